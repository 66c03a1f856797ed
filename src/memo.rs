// 📝 Board Memo Builder - fixed narrative items over the risk output
// Every figure is read by dimension name from the breakdown rows, so the memo
// keeps working if row order ever changes.

use serde::{Deserialize, Serialize};

use crate::anomaly::{Anomaly, Severity};
use crate::bank::BankKpi;
use crate::period::ReportingPeriod;
use crate::risk::{RiskBreakdownRow, RiskDimension, RiskScore, PENALTY_MAJOR, PENALTY_MINOR};

/// Headline lines kept in `meta.notes`
pub const MAX_HEADLINES: usize = 6;

const MISSING: &str = "n/a";

// ============================================================================
// MODEL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoSeverity {
    Info,
    Ok,
    Warn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoEvidence {
    /// Dotted path of the metric inside the snapshot
    pub metric: String,
    pub value: Option<f64>,
    pub display: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextAction {
    pub owner: String,
    pub action: String,
    pub due: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoItem {
    pub id: String,
    pub module: String,
    pub severity: MemoSeverity,
    pub title: String,
    pub conclusion: String,
    pub evidence: Vec<MemoEvidence>,
    pub next_actions: Vec<NextAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardMemo {
    pub items: Vec<MemoItem>,
    /// One-line summaries, at most `MAX_HEADLINES`
    pub headlines: Vec<String>,
}

impl BoardMemo {
    pub fn item(&self, id: &str) -> Option<&MemoItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn warn_count(&self) -> usize {
        self.items.iter().filter(|i| i.severity == MemoSeverity::Warn).count()
    }
}

// ============================================================================
// FORMATTING
// ============================================================================

pub fn fmt_amount(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => {
            let negative = v < 0.0;
            let cents = format!("{:.2}", v.abs());
            let (int_part, frac) = cents.split_once('.').unwrap_or((cents.as_str(), "00"));

            let mut grouped = String::new();
            for (i, c) in int_part.chars().enumerate() {
                if i > 0 && (int_part.len() - i) % 3 == 0 {
                    grouped.push(',');
                }
                grouped.push(c);
            }
            format!("{}{}.{}", if negative { "-" } else { "" }, grouped, frac)
        }
        _ => MISSING.to_string(),
    }
}

/// Ratio → percentage text
pub fn fmt_pct(ratio: Option<f64>) -> String {
    match ratio {
        Some(r) if r.is_finite() => format!("{:.2}%", r * 100.0),
        _ => MISSING.to_string(),
    }
}

fn severity_from_penalty(row: Option<&RiskBreakdownRow>) -> MemoSeverity {
    match row {
        Some(r) if r.ratio.is_none() => MemoSeverity::Info,
        Some(r) if r.penalty >= PENALTY_MAJOR => MemoSeverity::Warn,
        Some(r) if r.penalty >= PENALTY_MINOR => MemoSeverity::Ok,
        _ => MemoSeverity::Info,
    }
}

fn severity_from_cash(net: Option<f64>) -> MemoSeverity {
    match net {
        Some(v) if v < 0.0 => MemoSeverity::Warn,
        Some(_) => MemoSeverity::Ok,
        None => MemoSeverity::Info,
    }
}

// ============================================================================
// BUILDER
// ============================================================================

struct ItemSpec<'a> {
    id: &'a str,
    module: &'a str,
    severity: MemoSeverity,
    title: &'a str,
    conclusion: String,
    action: &'a str,
    evidence: Vec<MemoEvidence>,
}

fn ratio_evidence(row: Option<&RiskBreakdownRow>, dimension: RiskDimension) -> MemoEvidence {
    let ratio = row.and_then(|r| r.ratio);
    MemoEvidence {
        metric: format!("cashflow.risk.risk_breakdown_rows[{}].ratio", dimension.name()),
        value: ratio,
        display: fmt_pct(ratio),
    }
}

/// Build the five fixed memo items and their headline lines
pub fn build_board_memo(
    risk: &RiskScore,
    anomalies: &[Anomaly],
    kpi: &BankKpi,
    period: &ReportingPeriod,
    owner: &str,
) -> BoardMemo {
    let due = period.end.format("%Y-%m-%d").to_string();
    let mut specs = Vec::new();

    // Composite score
    let coverage = &risk.coverage;
    let total_severity = if risk.risk_score_total < 60 {
        MemoSeverity::Warn
    } else if risk.risk_score_total < 80 {
        MemoSeverity::Ok
    } else {
        MemoSeverity::Info
    };
    specs.push(ItemSpec {
        id: "RISK_TOTAL",
        module: "RISK",
        severity: total_severity,
        title: "Cash-flow risk score",
        conclusion: format!(
            "Risk score {}/100; {} of {} dimensions measurable",
            risk.risk_score_total, coverage.dimensions_scored, coverage.dimensions_total
        ),
        action: "Walk through every penalised dimension and its evidence filter",
        evidence: vec![MemoEvidence {
            metric: "cashflow.risk.risk_score_total".to_string(),
            value: Some(risk.risk_score_total as f64),
            display: risk.risk_score_total.to_string(),
        }],
    });

    let top1 = risk.row(RiskDimension::Top1Outflow);
    specs.push(ItemSpec {
        id: "CONCENTRATION",
        module: "BANK",
        severity: severity_from_penalty(top1),
        title: "Outflow concentration",
        conclusion: format!(
            "Largest counterparty takes {} of outflow",
            fmt_pct(top1.and_then(|r| r.ratio))
        ),
        action: "Review terms and alternatives for the top payees",
        evidence: vec![ratio_evidence(top1, RiskDimension::Top1Outflow)],
    });

    let financing = risk.row(RiskDimension::FinancingNet);
    specs.push(ItemSpec {
        id: "FINANCING",
        module: "BANK",
        severity: severity_from_penalty(financing),
        title: "Financing dependency",
        conclusion: format!(
            "Net financing flow equals {} of period net cash",
            fmt_pct(financing.and_then(|r| r.ratio))
        ),
        action: "Match loan drawdowns and repayments to the funding plan",
        evidence: vec![ratio_evidence(financing, RiskDimension::FinancingNet)],
    });

    let high = anomalies.iter().filter(|a| a.severity == Severity::High).count();
    let anomaly_severity = if high > 0 {
        MemoSeverity::Warn
    } else if !anomalies.is_empty() {
        MemoSeverity::Ok
    } else {
        MemoSeverity::Info
    };
    specs.push(ItemSpec {
        id: "ANOMALIES",
        module: "RISK",
        severity: anomaly_severity,
        title: "Transaction anomalies",
        conclusion: format!("{} anomalies flagged, {} high severity", anomalies.len(), high),
        action: "Clear high-severity anomalies with supporting documents",
        evidence: vec![MemoEvidence {
            metric: "cashflow.risk.anomalies".to_string(),
            value: Some(anomalies.len() as f64),
            display: anomalies.len().to_string(),
        }],
    });

    specs.push(ItemSpec {
        id: "NET_CASH",
        module: "BANK",
        severity: severity_from_cash(kpi.period_net_cash),
        title: "Net cash flow",
        conclusion: format!("Period net cash flow {}", fmt_amount(kpi.period_net_cash)),
        action: "Roll a 14-day cash plan and defer non-essential spend",
        evidence: vec![MemoEvidence {
            metric: "bank.kpi.period_net_cash".to_string(),
            value: kpi.period_net_cash,
            display: fmt_amount(kpi.period_net_cash),
        }],
    });

    let headlines = specs
        .iter()
        .map(|s| format!("[{}] {} | action: {}", s.id, s.conclusion, s.action))
        .take(MAX_HEADLINES)
        .collect();

    let items = specs
        .into_iter()
        .map(|s| MemoItem {
            id: s.id.to_string(),
            module: s.module.to_string(),
            severity: s.severity,
            title: s.title.to_string(),
            conclusion: s.conclusion,
            evidence: s.evidence,
            next_actions: vec![NextAction {
                owner: owner.to_string(),
                action: s.action.to_string(),
                due: due.clone(),
            }],
        })
        .collect();

    BoardMemo { items, headlines }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::AnomalyDetector;
    use crate::monthly::aggregate_monthly;
    use crate::risk::RiskScorer;
    use crate::transaction::tests::tx;

    #[test]
    fn test_fmt_helpers() {
        assert_eq!(fmt_amount(Some(-102000.0)), "-102,000.00");
        assert_eq!(fmt_amount(Some(999.5)), "999.50");
        assert_eq!(fmt_amount(Some(1234567.891)), "1,234,567.89");
        assert_eq!(fmt_amount(None), "n/a");
        assert_eq!(fmt_pct(Some(0.5)), "50.00%");
        assert_eq!(fmt_pct(None), "n/a");
    }

    #[test]
    fn test_memo_items_read_rows_by_name() {
        let txns = vec![
            tx(1, "2025-01-02", 3000.0, "Acme", "sales"),
            tx(2, "2025-01-03", -5000.0, "City Bank", "loan repayment"),
        ];
        let kpi = BankKpi {
            period_net_cash: Some(-2000.0),
            ..Default::default()
        };
        let period = ReportingPeriod::parse("2025-01-01", "2025-01-31").unwrap();
        let mut risk = RiskScorer::default().score(&txns, &aggregate_monthly(&txns), &kpi, &period);
        // Row order must not matter
        risk.risk_breakdown_rows.reverse();
        let anomalies = AnomalyDetector::default().detect(&txns);

        let memo = build_board_memo(&risk, &anomalies, &kpi, &period, "Finance");

        let ids: Vec<&str> = memo.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["RISK_TOTAL", "CONCENTRATION", "FINANCING", "ANOMALIES", "NET_CASH"]);

        let concentration = memo.item("CONCENTRATION").unwrap();
        assert_eq!(concentration.severity, MemoSeverity::Warn);
        assert!(concentration.conclusion.contains("100.00%"));

        let net = memo.item("NET_CASH").unwrap();
        assert_eq!(net.severity, MemoSeverity::Warn);
        assert_eq!(net.next_actions[0].due, "2025-01-31");
        assert_eq!(net.next_actions[0].owner, "Finance");

        assert!(memo.headlines.len() <= MAX_HEADLINES);
        assert!(memo.headlines[0].starts_with("[RISK_TOTAL]"));
    }

    #[test]
    fn test_undetermined_rows_are_info() {
        let kpi = BankKpi::default();
        let period = ReportingPeriod::parse("2025-01-01", "2025-01-31").unwrap();
        let risk = RiskScorer::default().score(&[], &aggregate_monthly(&[]), &kpi, &period);

        let memo = build_board_memo(&risk, &[], &kpi, &period, "Finance");

        assert_eq!(memo.item("CONCENTRATION").unwrap().severity, MemoSeverity::Info);
        assert_eq!(memo.item("ANOMALIES").unwrap().severity, MemoSeverity::Info);
        assert_eq!(memo.item("NET_CASH").unwrap().severity, MemoSeverity::Info);
        assert_eq!(memo.warn_count(), 0);
    }
}

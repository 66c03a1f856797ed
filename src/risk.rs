// 🎯 Risk Scorer - six ratios, two-tier penalties, one composite score
//
//   penalty(ratio) = 20 if ratio > t2
//                  = 10 if t1 < ratio <= t2
//                  =  0 otherwise (including an undefined ratio)
//   total          = clamp(100 - Σ penalty, 0, 100)
//   display score  = clamp(100 - 4 * penalty, 0, 100)
//
// Undefined ratios score zero penalty; `Coverage` says how many dimensions
// were actually measurable so "no risk" and "no evidence" stay distinct.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::bank::BankKpi;
use crate::monthly::MonthlySummary;
use crate::numeric::{finite, mean, safe_div, std_dev};
use crate::period::ReportingPeriod;
use crate::transaction::{CfClass, Transaction};

pub const PENALTY_MINOR: u32 = 10;
pub const PENALTY_MAJOR: u32 = 20;
const DISPLAY_PENALTY_WEIGHT: u32 = 4;
const MAX_SCORE: u32 = 100;

// ============================================================================
// DIMENSIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskDimension {
    UnknownOutflow,
    InternalNet,
    Top1Outflow,
    CashflowVolatility,
    ReconDiff,
    FinancingNet,
}

impl RiskDimension {
    pub const ALL: [RiskDimension; 6] = [
        RiskDimension::UnknownOutflow,
        RiskDimension::InternalNet,
        RiskDimension::Top1Outflow,
        RiskDimension::CashflowVolatility,
        RiskDimension::ReconDiff,
        RiskDimension::FinancingNet,
    ];

    /// Stable name used as the key everywhere downstream
    pub fn name(&self) -> &'static str {
        match self {
            RiskDimension::UnknownOutflow => "unknown_outflow_ratio",
            RiskDimension::InternalNet => "internal_net_ratio",
            RiskDimension::Top1Outflow => "top1_outflow_ratio",
            RiskDimension::CashflowVolatility => "cashflow_volatility",
            RiskDimension::ReconDiff => "recon_diff_ratio",
            RiskDimension::FinancingNet => "financing_net_ratio",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskDimension::UnknownOutflow => "Unidentified outflow share",
            RiskDimension::InternalNet => "Internal transfer net vs. net cash",
            RiskDimension::Top1Outflow => "Largest counterparty outflow share",
            RiskDimension::CashflowVolatility => "Monthly net-cash volatility",
            RiskDimension::ReconDiff => "Ledger vs. bank reconciliation gap",
            RiskDimension::FinancingNet => "Financing net vs. net cash",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|d| d.name() == name)
    }
}

// ============================================================================
// THRESHOLDS (configuration)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub t1: f64,
    pub t2: f64,
}

impl Thresholds {
    pub const fn new(t1: f64, t2: f64) -> Self {
        Thresholds { t1, t2 }
    }

    pub fn penalty(&self, ratio: Option<f64>) -> u32 {
        match ratio {
            Some(r) if r > self.t2 => PENALTY_MAJOR,
            Some(r) if r > self.t1 => PENALTY_MINOR,
            _ => 0,
        }
    }
}

/// Per-dimension (t1, t2) pairs; immutable once handed to a scorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    pub unknown_outflow: Thresholds,
    pub internal_net: Thresholds,
    pub top1_outflow: Thresholds,
    pub cashflow_volatility: Thresholds,
    pub recon_diff: Thresholds,
    pub financing_net: Thresholds,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        RiskThresholds {
            unknown_outflow: Thresholds::new(0.05, 0.15),
            internal_net: Thresholds::new(0.20, 0.50),
            top1_outflow: Thresholds::new(0.30, 0.50),
            cashflow_volatility: Thresholds::new(0.50, 1.00),
            recon_diff: Thresholds::new(0.01, 0.05),
            financing_net: Thresholds::new(0.30, 0.60),
        }
    }
}

impl RiskThresholds {
    pub fn get(&self, dimension: RiskDimension) -> Thresholds {
        match dimension {
            RiskDimension::UnknownOutflow => self.unknown_outflow,
            RiskDimension::InternalNet => self.internal_net,
            RiskDimension::Top1Outflow => self.top1_outflow,
            RiskDimension::CashflowVolatility => self.cashflow_volatility,
            RiskDimension::ReconDiff => self.recon_diff,
            RiskDimension::FinancingNet => self.financing_net,
        }
    }

    /// Human-readable problems; empty when every pair is usable
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for dim in RiskDimension::ALL {
            let t = self.get(dim);
            if !t.t1.is_finite() || !t.t2.is_finite() {
                problems.push(format!("{}: thresholds must be finite", dim.name()));
            } else if t.t1 < 0.0 || t.t1 > t.t2 {
                problems.push(format!("{}: expected 0 <= t1 <= t2, got {} / {}", dim.name(), t.t1, t.t2));
            }
        }
        problems
    }
}

// ============================================================================
// OUTPUT
// ============================================================================

/// Description of the transaction subset behind a number
///
/// `criteria` is a flat field → value filter a reader can apply to `txns`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceFilter {
    pub description: String,
    pub criteria: BTreeMap<String, String>,
}

impl EvidenceFilter {
    pub fn new(description: impl Into<String>) -> Self {
        EvidenceFilter {
            description: description.into(),
            criteria: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.criteria.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskBreakdownRow {
    pub dimension: String,
    pub label: String,
    pub ratio: Option<f64>,
    pub t1: f64,
    pub t2: f64,
    pub penalty: u32,
    pub score: u32,
    pub evidence: EvidenceFilter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    pub dimensions_scored: usize,
    pub dimensions_total: usize,
    /// Dimensions whose ratio was undefined for this period
    pub undetermined: Vec<String>,
}

impl Coverage {
    pub fn is_complete(&self) -> bool {
        self.dimensions_scored == self.dimensions_total
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    pub risk_score_total: u32,
    /// Display score per dimension name
    pub risk_scores: BTreeMap<String, u32>,
    pub risk_breakdown_rows: Vec<RiskBreakdownRow>,
    pub coverage: Coverage,
}

impl RiskScore {
    /// Look a breakdown row up by dimension (never by position)
    pub fn row(&self, dimension: RiskDimension) -> Option<&RiskBreakdownRow> {
        self.risk_breakdown_rows
            .iter()
            .find(|r| r.dimension == dimension.name())
    }

    pub fn total_penalty(&self) -> u32 {
        self.risk_breakdown_rows.iter().map(|r| r.penalty).sum()
    }
}

// ============================================================================
// RATIOS
// ============================================================================

fn total_outflow(transactions: &[Transaction]) -> f64 {
    transactions
        .iter()
        .filter(|t| t.is_outflow())
        .map(|t| t.amount_abs())
        .sum()
}

fn net_for_class(transactions: &[Transaction], class: CfClass) -> f64 {
    transactions
        .iter()
        .filter(|t| t.cf_class() == class)
        .map(|t| t.amount())
        .sum()
}

/// Outflow classified `unknown` ÷ total outflow
pub fn unknown_outflow_ratio(transactions: &[Transaction]) -> Option<f64> {
    let unknown: f64 = transactions
        .iter()
        .filter(|t| t.is_outflow() && t.cf_class() == CfClass::Unknown)
        .map(|t| t.amount_abs())
        .sum();
    safe_div(unknown, total_outflow(transactions))
}

/// |internal in - internal out| ÷ |period net cash|
pub fn internal_net_ratio(transactions: &[Transaction], period_net_cash: Option<f64>) -> Option<f64> {
    let net = net_for_class(transactions, CfClass::Internal);
    safe_div(net.abs(), period_net_cash?.abs())
}

/// Largest single counterparty's outflow ÷ total outflow
///
/// Blank counterparties are not pooled into a pseudo-counterparty.
pub fn top1_outflow_ratio(transactions: &[Transaction]) -> Option<f64> {
    top_outflow_counterparty(transactions).and_then(|(_, amount)| safe_div(amount, total_outflow(transactions)))
}

/// Counterparty with the largest total outflow; ties go to the name first in order
pub fn top_outflow_counterparty(transactions: &[Transaction]) -> Option<(String, f64)> {
    let mut by_counterparty: HashMap<&str, f64> = HashMap::new();
    for t in transactions.iter().filter(|t| t.is_outflow()) {
        let name = t.counterparty().trim();
        if name.is_empty() {
            continue;
        }
        *by_counterparty.entry(name).or_insert(0.0) += t.amount_abs();
    }

    by_counterparty
        .into_iter()
        .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(name, amount)| (name.to_string(), amount))
}

/// Population std-dev of monthly net ÷ |mean|; needs two months and a nonzero mean
///
/// The series runs over `months`, and a month with no activity counts as
/// zero net. An empty `months` falls back to the months present in `monthly`.
pub fn cashflow_volatility(monthly: &MonthlySummary, months: &[String]) -> Option<f64> {
    let series: Vec<f64> = if months.is_empty() {
        monthly.net_series()
    } else {
        months
            .iter()
            .map(|m| monthly.total_for(m).map_or(0.0, |t| t.net))
            .collect()
    };
    if series.len() < 2 {
        return None;
    }
    let m = mean(&series)?;
    safe_div(std_dev(&series)?, m.abs())
}

/// Largest reconciliation gap relative to the matching bank total
pub fn recon_diff_ratio(kpi: &BankKpi) -> Option<f64> {
    let receipts = kpi
        .diff_receipts
        .zip(kpi.bank_cash_in)
        .and_then(|(diff, bank)| safe_div(diff.abs(), bank.abs()));
    let payments = kpi
        .diff_payments
        .zip(kpi.bank_cash_out)
        .and_then(|(diff, bank)| safe_div(diff.abs(), bank.abs()));

    match (receipts, payments) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// |financing in - financing out| ÷ |period net cash|
pub fn financing_net_ratio(transactions: &[Transaction], period_net_cash: Option<f64>) -> Option<f64> {
    let net = net_for_class(transactions, CfClass::Financing);
    safe_div(net.abs(), period_net_cash?.abs())
}

// ============================================================================
// SCORER
// ============================================================================

pub struct RiskScorer {
    thresholds: RiskThresholds,
}

impl RiskScorer {
    pub fn new(thresholds: RiskThresholds) -> Self {
        RiskScorer { thresholds }
    }

    pub fn score(
        &self,
        transactions: &[Transaction],
        monthly: &MonthlySummary,
        kpi: &BankKpi,
        period: &ReportingPeriod,
    ) -> RiskScore {
        let months = period.months();
        let mut rows = Vec::with_capacity(RiskDimension::ALL.len());

        for dim in RiskDimension::ALL {
            let (ratio, evidence) = self.measure(dim, transactions, monthly, kpi, &months);
            let ratio = ratio.and_then(finite);
            let t = self.thresholds.get(dim);
            let penalty = t.penalty(ratio);

            debug!(dimension = dim.name(), ?ratio, penalty, "scored risk dimension");

            rows.push(RiskBreakdownRow {
                dimension: dim.name().to_string(),
                label: dim.label().to_string(),
                ratio,
                t1: t.t1,
                t2: t.t2,
                penalty,
                score: display_score(penalty),
                evidence,
            });
        }

        let total_penalty: u32 = rows.iter().map(|r| r.penalty).sum();
        let risk_score_total = MAX_SCORE.saturating_sub(total_penalty);

        let undetermined: Vec<String> = rows
            .iter()
            .filter(|r| r.ratio.is_none())
            .map(|r| r.dimension.clone())
            .collect();
        let coverage = Coverage {
            dimensions_scored: rows.len() - undetermined.len(),
            dimensions_total: rows.len(),
            undetermined,
        };

        let risk_scores = rows.iter().map(|r| (r.dimension.clone(), r.score)).collect();

        info!(
            risk_score_total,
            total_penalty,
            scored = coverage.dimensions_scored,
            total = coverage.dimensions_total,
            "computed risk score"
        );

        RiskScore {
            risk_score_total,
            risk_scores,
            risk_breakdown_rows: rows,
            coverage,
        }
    }

    fn measure(
        &self,
        dimension: RiskDimension,
        transactions: &[Transaction],
        monthly: &MonthlySummary,
        kpi: &BankKpi,
        months: &[String],
    ) -> (Option<f64>, EvidenceFilter) {
        match dimension {
            RiskDimension::UnknownOutflow => (
                unknown_outflow_ratio(transactions),
                EvidenceFilter::new("Outflows classified unknown over all outflows")
                    .with("direction", "out")
                    .with("cf_class", CfClass::Unknown.as_str()),
            ),
            RiskDimension::InternalNet => (
                internal_net_ratio(transactions, kpi.period_net_cash),
                EvidenceFilter::new("Net of internal transfers over period net cash")
                    .with("cf_class", CfClass::Internal.as_str()),
            ),
            RiskDimension::Top1Outflow => {
                let mut evidence =
                    EvidenceFilter::new("Outflows to the largest counterparty over all outflows").with("direction", "out");
                if let Some((name, _)) = top_outflow_counterparty(transactions) {
                    evidence = evidence.with("counterparty", name);
                }
                (top1_outflow_ratio(transactions), evidence)
            }
            RiskDimension::CashflowVolatility => (
                cashflow_volatility(monthly, months),
                EvidenceFilter::new("Std-dev of monthly net cash over |mean|").with("series", "monthly.monthly_totals.net"),
            ),
            RiskDimension::ReconDiff => (
                recon_diff_ratio(kpi),
                EvidenceFilter::new("Largest AR/AP vs. bank difference over bank totals")
                    .with("kpi", "bank.kpi.diff_receipts,bank.kpi.diff_payments"),
            ),
            RiskDimension::FinancingNet => (
                financing_net_ratio(transactions, kpi.period_net_cash),
                EvidenceFilter::new("Net of financing flows over period net cash")
                    .with("cf_class", CfClass::Financing.as_str()),
            ),
        }
    }
}

impl Default for RiskScorer {
    fn default() -> Self {
        Self::new(RiskThresholds::default())
    }
}

pub fn display_score(penalty: u32) -> u32 {
    MAX_SCORE.saturating_sub(penalty.saturating_mul(DISPLAY_PENALTY_WEIGHT))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monthly::aggregate_monthly;
    use crate::transaction::tests::tx;

    fn months(start: &str, end: &str) -> Vec<String> {
        ReportingPeriod::parse(start, end).unwrap().months()
    }

    fn jan() -> ReportingPeriod {
        ReportingPeriod::parse("2025-01-01", "2025-01-31").unwrap()
    }

    fn kpi_with_net(net: f64) -> BankKpi {
        BankKpi {
            period_net_cash: Some(net),
            ..Default::default()
        }
    }

    #[test]
    fn test_penalty_monotonic() {
        let t = Thresholds::new(0.1, 0.2);
        assert_eq!(t.penalty(Some(0.05)), 0);
        assert_eq!(t.penalty(Some(0.1)), 0);
        assert_eq!(t.penalty(Some(0.15)), 10);
        assert_eq!(t.penalty(Some(0.2)), 10);
        assert_eq!(t.penalty(Some(0.25)), 20);
        assert_eq!(t.penalty(None), 0);
    }

    #[test]
    fn test_display_score() {
        assert_eq!(display_score(0), 100);
        assert_eq!(display_score(10), 60);
        assert_eq!(display_score(20), 20);
        assert_eq!(display_score(30), 0);
    }

    #[test]
    fn test_ratios_on_small_book() {
        let txns = vec![
            tx(1, "2025-01-02", 1000.0, "Acme", "sales"),
            tx(2, "2025-01-03", -300.0, "Globex", "supplies"),
            tx(3, "2025-01-04", -100.0, "", "misc charge"),
            tx(4, "2025-01-05", -600.0, "Globex", "supplies"),
        ];

        assert_eq!(unknown_outflow_ratio(&txns), Some(0.1));
        assert_eq!(top1_outflow_ratio(&txns), Some(0.9));
        assert_eq!(top_outflow_counterparty(&txns).unwrap().0, "Globex");
    }

    #[test]
    fn test_ratios_undefined_without_denominator() {
        let inflow_only = vec![tx(1, "2025-01-02", 1000.0, "Acme", "sales")];
        assert_eq!(unknown_outflow_ratio(&inflow_only), None);
        assert_eq!(top1_outflow_ratio(&inflow_only), None);
        assert_eq!(internal_net_ratio(&inflow_only, Some(0.0)), None);
        assert_eq!(financing_net_ratio(&inflow_only, None), None);
        assert_eq!(recon_diff_ratio(&BankKpi::default()), None);

        // One month is not a series
        let monthly = aggregate_monthly(&inflow_only);
        assert_eq!(cashflow_volatility(&monthly, &["2025-01".to_string()]), None);
    }

    #[test]
    fn test_volatility_population_std() {
        let txns = vec![
            tx(1, "2025-01-02", 100.0, "A", "sales"),
            tx(2, "2025-02-02", 300.0, "A", "sales"),
        ];
        let monthly = aggregate_monthly(&txns);
        // mean 200, population std 100
        assert_eq!(cashflow_volatility(&monthly, &months("2025-01-01", "2025-02-28")), Some(0.5));
    }

    #[test]
    fn test_volatility_counts_quiet_months_as_zero() {
        let txns = vec![
            tx(1, "2025-01-02", 100.0, "A", "sales"),
            tx(2, "2025-03-02", 100.0, "A", "sales"),
        ];
        let monthly = aggregate_monthly(&txns);

        // Observed months alone look perfectly flat
        assert_eq!(cashflow_volatility(&monthly, &[]), Some(0.0));

        // [100, 0, 100]: mean 200/3, population std 100·√2/3
        let v = cashflow_volatility(&monthly, &months("2025-01-01", "2025-03-31")).unwrap();
        assert!((v - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-9);
    }

    #[test]
    fn test_recon_takes_larger_gap() {
        let kpi = BankKpi {
            diff_receipts: Some(-20.0),
            diff_payments: Some(5.0),
            bank_cash_in: Some(1000.0),
            bank_cash_out: Some(1000.0),
            ..Default::default()
        };
        assert_eq!(recon_diff_ratio(&kpi), Some(0.02));

        let receipts_only = BankKpi {
            diff_receipts: Some(10.0),
            bank_cash_in: Some(1000.0),
            ..Default::default()
        };
        assert_eq!(recon_diff_ratio(&receipts_only), Some(0.01));
    }

    #[test]
    fn test_score_total_and_coverage() {
        let txns = vec![
            tx(1, "2025-01-02", 3000.0, "Acme", "sales"),
            tx(2, "2025-01-03", -5000.0, "City Bank", "loan repayment"),
            tx(3, "2025-01-04", -1000.0, "", "unidentified debit"),
        ];
        let monthly = aggregate_monthly(&txns);
        let score = RiskScorer::default().score(&txns, &monthly, &kpi_with_net(-3000.0), &jan());

        // unknown 1000/6000 > 0.15, top1 5000/6000 > 0.5, financing 5000/3000 > 0.6
        assert_eq!(score.row(RiskDimension::UnknownOutflow).unwrap().penalty, 20);
        assert_eq!(score.row(RiskDimension::Top1Outflow).unwrap().penalty, 20);
        assert_eq!(score.row(RiskDimension::FinancingNet).unwrap().penalty, 20);
        assert_eq!(score.row(RiskDimension::InternalNet).unwrap().ratio, Some(0.0));
        assert_eq!(score.risk_score_total, 40);
        assert_eq!(score.risk_score_total, 100 - score.total_penalty());

        assert_eq!(score.coverage.dimensions_total, 6);
        assert_eq!(score.coverage.dimensions_scored, 4);
        assert_eq!(
            score.coverage.undetermined,
            vec!["cashflow_volatility".to_string(), "recon_diff_ratio".to_string()]
        );
        assert_eq!(score.risk_scores["financing_net_ratio"], 20);
        assert_eq!(score.risk_scores.len(), 6);
    }

    #[test]
    fn test_total_never_below_zero() {
        let strict = RiskThresholds {
            unknown_outflow: Thresholds::new(-1.0, -1.0),
            internal_net: Thresholds::new(-1.0, -1.0),
            top1_outflow: Thresholds::new(-1.0, -1.0),
            cashflow_volatility: Thresholds::new(-1.0, -1.0),
            recon_diff: Thresholds::new(-1.0, -1.0),
            financing_net: Thresholds::new(-1.0, -1.0),
        };
        let txns = vec![
            tx(1, "2025-01-02", -100.0, "X", ""),
            tx(2, "2025-02-02", 300.0, "Y", "intercompany sweep"),
            tx(3, "2025-02-03", -50.0, "Z", "loan"),
        ];
        let kpi = BankKpi {
            period_net_cash: Some(150.0),
            diff_receipts: Some(1.0),
            bank_cash_in: Some(300.0),
            ..Default::default()
        };
        let monthly = aggregate_monthly(&txns);
        let period = ReportingPeriod::parse("2025-01-01", "2025-02-28").unwrap();
        let score = RiskScorer::new(strict.clone()).score(&txns, &monthly, &kpi, &period);

        assert_eq!(score.total_penalty(), 120);
        assert_eq!(score.risk_score_total, 0);
        assert!(score.coverage.is_complete());
        assert_eq!(strict.problems().len(), 6);
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(RiskDimension::from_name("top1_outflow_ratio"), Some(RiskDimension::Top1Outflow));
        assert_eq!(RiskDimension::from_name("nope"), None);
        assert!(RiskThresholds::default().problems().is_empty());
    }
}

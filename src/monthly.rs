// 📊 Monthly Aggregator - per-month and per-month-per-class cash totals
//
// Invariant: for every bucket, net == inflow - outflow == Σ signed amounts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::bank::BankTrend;
use crate::transaction::{CfClass, Transaction};

/// Float tolerance for the Σ-signed-amount cross-check
const NET_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyTotal {
    pub month: String,
    pub inflow: f64,
    pub outflow: f64,
    pub net: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyClassTotal {
    pub month: String,
    pub cf_class: CfClass,
    pub inflow: f64,
    pub outflow: f64,
    pub net: f64,
    pub count: usize,
}

/// Where the monthly series came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonthlySource {
    /// Aggregated from classified transactions
    Transactions,
    /// Simple monthly cash totals from the bank KPIs (no class detail)
    BankKpi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlySummary {
    pub monthly_totals: Vec<MonthlyTotal>,
    pub monthly_by_class: Vec<MonthlyClassTotal>,
    pub source: MonthlySource,
}

#[derive(Default)]
struct Bucket {
    inflow: f64,
    outflow: f64,
    signed: f64,
    count: usize,
}

impl Bucket {
    fn add(&mut self, amount: f64) {
        self.inflow += amount.max(0.0);
        self.outflow += (-amount).max(0.0);
        self.signed += amount;
        self.count += 1;
    }

    /// net is reported as inflow - outflow; the signed running sum must agree
    fn net(&self, label: &str) -> f64 {
        let net = self.inflow - self.outflow;
        let scale = self.inflow.abs().max(self.outflow.abs()).max(1.0);
        if (net - self.signed).abs() > NET_TOLERANCE * scale {
            warn!(bucket = label, net, signed = self.signed, "monthly net disagrees with signed sum");
        }
        net
    }
}

/// Roll transactions into monthly buckets
///
/// Only observed (month, class) pairs appear; no empty months are invented.
/// An empty transaction list yields empty sequences.
pub fn aggregate_monthly(transactions: &[Transaction]) -> MonthlySummary {
    let mut by_month: BTreeMap<&str, Bucket> = BTreeMap::new();
    let mut by_class: BTreeMap<(&str, CfClass), Bucket> = BTreeMap::new();

    for tx in transactions {
        by_month.entry(tx.month()).or_default().add(tx.amount());
        by_class
            .entry((tx.month(), tx.cf_class()))
            .or_default()
            .add(tx.amount());
    }

    let monthly_totals = by_month
        .iter()
        .map(|(month, b)| MonthlyTotal {
            month: month.to_string(),
            inflow: b.inflow,
            outflow: b.outflow,
            net: b.net(month),
            count: b.count,
        })
        .collect();

    let monthly_by_class = by_class
        .iter()
        .map(|((month, class), b)| MonthlyClassTotal {
            month: month.to_string(),
            cf_class: *class,
            inflow: b.inflow,
            outflow: b.outflow,
            net: b.net(&format!("{}/{}", month, class.as_str())),
            count: b.count,
        })
        .collect();

    MonthlySummary {
        monthly_totals,
        monthly_by_class,
        source: MonthlySource::Transactions,
    }
}

impl MonthlySummary {
    /// Fallback series built from the bank KPI trend
    pub fn from_bank_trend(trend: &BankTrend) -> Self {
        let monthly_totals = trend
            .months
            .iter()
            .enumerate()
            .map(|(i, month)| {
                let inflow = trend.cash_in.get(i).copied().unwrap_or(0.0);
                let outflow = trend.cash_out.get(i).copied().unwrap_or(0.0);
                MonthlyTotal {
                    month: month.clone(),
                    inflow,
                    outflow,
                    net: inflow - outflow,
                    count: 0,
                }
            })
            .collect();

        MonthlySummary {
            monthly_totals,
            monthly_by_class: Vec::new(),
            source: MonthlySource::BankKpi,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.monthly_totals.is_empty()
    }

    /// Monthly net cash, ascending by month
    pub fn net_series(&self) -> Vec<f64> {
        self.monthly_totals.iter().map(|m| m.net).collect()
    }

    pub fn total_for(&self, month: &str) -> Option<&MonthlyTotal> {
        self.monthly_totals.iter().find(|m| m.month == month)
    }

    /// Re-check the aggregation invariants; returns human-readable violations
    pub fn check_invariants(&self) -> Vec<String> {
        let mut violations = Vec::new();

        for m in &self.monthly_totals {
            if m.net != m.inflow - m.outflow {
                violations.push(format!("{}: net {} != inflow - outflow", m.month, m.net));
            }
        }

        if self.source == MonthlySource::Transactions {
            let mut sums: BTreeMap<&str, (f64, f64, f64)> = BTreeMap::new();
            for c in &self.monthly_by_class {
                let entry = sums.entry(c.month.as_str()).or_insert((0.0, 0.0, 0.0));
                entry.0 += c.inflow;
                entry.1 += c.outflow;
                entry.2 += c.net;
            }
            for m in &self.monthly_totals {
                let (inflow, outflow, net) = sums.get(m.month.as_str()).copied().unwrap_or_default();
                let scale = m.inflow.abs().max(m.outflow.abs()).max(1.0);
                let close = |a: f64, b: f64| (a - b).abs() <= NET_TOLERANCE * scale;
                if !close(inflow, m.inflow) || !close(outflow, m.outflow) || !close(net, m.net) {
                    violations.push(format!("{}: class totals do not add up to month total", m.month));
                }
            }
        }

        violations
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::tests::tx;

    fn sample() -> Vec<Transaction> {
        vec![
            tx(1, "2025-02-03", 1200.0, "Acme", "sales"),
            tx(2, "2025-01-10", 1000.0, "Acme", "sales"),
            tx(3, "2025-01-12", -300.0, "Bank", "loan interest"),
            tx(4, "2025-01-20", -200.0, "Vendor", "supplies"),
            tx(5, "2025-02-14", -50.5, "", ""),
        ]
    }

    #[test]
    fn test_monthly_totals_sorted_and_balanced() {
        let summary = aggregate_monthly(&sample());

        assert_eq!(summary.source, MonthlySource::Transactions);
        let months: Vec<&str> = summary.monthly_totals.iter().map(|m| m.month.as_str()).collect();
        assert_eq!(months, vec!["2025-01", "2025-02"]);

        let jan = summary.total_for("2025-01").unwrap();
        assert_eq!(jan.inflow, 1000.0);
        assert_eq!(jan.outflow, 500.0);
        assert_eq!(jan.net, 500.0);
        assert_eq!(jan.count, 3);

        for m in &summary.monthly_totals {
            assert_eq!(m.net, m.inflow - m.outflow);
        }
        assert!(summary.check_invariants().is_empty());
    }

    #[test]
    fn test_by_class_sorted_and_sums_to_month() {
        let summary = aggregate_monthly(&sample());

        let keys: Vec<(String, CfClass)> = summary
            .monthly_by_class
            .iter()
            .map(|c| (c.month.clone(), c.cf_class))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("2025-01".to_string(), CfClass::Financing),
                ("2025-01".to_string(), CfClass::Operating),
                ("2025-02".to_string(), CfClass::Operating),
                ("2025-02".to_string(), CfClass::Unknown),
            ]
        );

        for m in &summary.monthly_totals {
            let classes: Vec<&MonthlyClassTotal> =
                summary.monthly_by_class.iter().filter(|c| c.month == m.month).collect();
            let inflow: f64 = classes.iter().map(|c| c.inflow).sum();
            let outflow: f64 = classes.iter().map(|c| c.outflow).sum();
            let net: f64 = classes.iter().map(|c| c.net).sum();
            assert!((inflow - m.inflow).abs() < 1e-9);
            assert!((outflow - m.outflow).abs() < 1e-9);
            assert!((net - m.net).abs() < 1e-9);
        }
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        let summary = aggregate_monthly(&[]);
        assert!(summary.is_empty());
        assert!(summary.monthly_by_class.is_empty());
    }

    #[test]
    fn test_fallback_from_bank_trend() {
        let trend = BankTrend {
            months: vec!["2025-01".into(), "2025-02".into()],
            cash_in: vec![100.0, 50.0],
            cash_out: vec![40.0, 80.0],
            net_cash: vec![60.0, -30.0],
            cum_net_cash: vec![60.0, 30.0],
        };
        let summary = MonthlySummary::from_bank_trend(&trend);

        assert_eq!(summary.source, MonthlySource::BankKpi);
        assert_eq!(summary.net_series(), vec![60.0, -30.0]);
        assert!(summary.monthly_by_class.is_empty());
        assert!(summary.check_invariants().is_empty());
    }
}

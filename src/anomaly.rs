// 🚨 Anomaly Detector - four independent passes over the period's transactions
//
//   amount_outlier    (high)   outbound operating/unknown/internal rows above p95
//   frequency_spike   (medium) counterparties suddenly transacting much more often
//   new_counterparty  (medium) biggest outbound counterparties never seen before
//   keyword_mismatch  (low)    "operating" rows whose memo reads like financing
//
// Passes only read the transactions; tags are attached afterwards by
// `tag_transactions`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

use crate::numeric::percentile;
use crate::period::shift_month;
use crate::risk::EvidenceFilter;
use crate::rules::keyword_matches;
use crate::transaction::{CfClass, Transaction};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    AmountOutlier,
    FrequencySpike,
    NewCounterparty,
    KeywordMismatch,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::AmountOutlier => "amount_outlier",
            AnomalyType::FrequencySpike => "frequency_spike",
            AnomalyType::NewCounterparty => "new_counterparty",
            AnomalyType::KeywordMismatch => "keyword_mismatch",
        }
    }
}

/// Declared most-severe first so the derived `Ord` ranks high before low
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    /// Transaction id, or `counterparty@YYYY-MM`
    pub reference: String,
    pub reason: String,
    pub suggested_action: String,
    pub evidence: EvidenceFilter,
    /// Amount used for ranking
    pub amount: Option<f64>,
    /// Transactions this anomaly refers to
    pub txn_ids: Vec<String>,
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Percentile used for both the outlier and the frequency passes
    pub percentile: f64,
    /// Latest-month count above `spike_ratio` × previous count is a spike
    pub spike_ratio: f64,
    /// Months before the latest one that count as "seen before"
    pub lookback_months: u32,
    pub new_counterparty_top_n: usize,
    /// Below this many eligible outflows the outlier baseline uses every transaction
    ///
    /// That baseline includes inflows and financing rows, so in a small book a
    /// modest outflow can be flagged when it towers over the receipts. Set to 0
    /// to always rank eligible outflows only against each other.
    pub min_outlier_sample: usize,
    pub sensitive_keywords: Vec<String>,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        AnomalyConfig {
            percentile: 95.0,
            spike_ratio: 2.0,
            lookback_months: 3,
            new_counterparty_top_n: 20,
            min_outlier_sample: 5,
            sensitive_keywords: [
                "loan",
                "debt",
                "deposit",
                "guarantee",
                "note",
                "wealth management",
                "pass-through",
                "private",
                "借款",
                "贷款",
                "债务",
                "保证金",
                "押金",
                "担保",
                "票据",
                "理财",
                "过桥",
                "代收",
                "代付",
                "私人",
                "个人账户",
            ]
            .iter()
            .map(|k| k.to_string())
            .collect(),
        }
    }
}

impl AnomalyConfig {
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !(self.percentile > 0.0 && self.percentile <= 100.0) {
            problems.push(format!("anomaly.percentile must be in (0, 100], got {}", self.percentile));
        }
        if !(self.spike_ratio.is_finite() && self.spike_ratio > 0.0) {
            problems.push(format!("anomaly.spike_ratio must be positive, got {}", self.spike_ratio));
        }
        if self.lookback_months == 0 {
            problems.push("anomaly.lookback_months must be at least 1".to_string());
        }
        problems
    }
}

// ============================================================================
// DETECTOR
// ============================================================================

pub struct AnomalyDetector {
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        AnomalyDetector { config }
    }

    /// Run every pass and return the ranked list
    pub fn detect(&self, transactions: &[Transaction]) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();
        anomalies.extend(self.amount_outliers(transactions));
        anomalies.extend(self.frequency_spikes(transactions));
        anomalies.extend(self.new_counterparties(transactions));
        anomalies.extend(self.keyword_mismatches(transactions));

        rank_anomalies(&mut anomalies);

        info!(
            total = anomalies.len(),
            high = anomalies.iter().filter(|a| a.severity == Severity::High).count(),
            "detected anomalies"
        );
        anomalies
    }

    /// Outbound operating/unknown/internal rows strictly above the percentile
    pub fn amount_outliers(&self, transactions: &[Transaction]) -> Vec<Anomaly> {
        let eligible: Vec<&Transaction> = transactions
            .iter()
            .filter(|t| {
                t.is_outflow() && matches!(t.cf_class(), CfClass::Operating | CfClass::Unknown | CfClass::Internal)
            })
            .collect();
        if eligible.is_empty() {
            return Vec::new();
        }

        // A handful of rows can't outrank their own percentile; widen the baseline
        let baseline: Vec<f64> = if eligible.len() < self.config.min_outlier_sample {
            transactions.iter().map(|t| t.amount_abs()).collect()
        } else {
            eligible.iter().map(|t| t.amount_abs()).collect()
        };
        let threshold = match percentile(&baseline, self.config.percentile) {
            Some(p) => p,
            None => return Vec::new(),
        };
        debug!(threshold, eligible = eligible.len(), baseline = baseline.len(), "outlier threshold");

        eligible
            .into_iter()
            .filter(|t| t.amount_abs() > threshold)
            .map(|t| Anomaly {
                anomaly_type: AnomalyType::AmountOutlier,
                severity: Severity::High,
                reference: t.id().to_string(),
                reason: format!(
                    "Outflow of {:.2} to '{}' is above the p{} threshold of {:.2}",
                    t.amount_abs(),
                    t.counterparty(),
                    self.config.percentile,
                    threshold
                ),
                suggested_action: "Confirm approval, contract and receiving account for this payment".to_string(),
                evidence: EvidenceFilter::new("Single outbound transaction").with("id", t.id()),
                amount: Some(t.amount_abs()),
                txn_ids: vec![t.id().to_string()],
            })
            .collect()
    }

    /// Per-counterparty counts in the latest month vs. its percentile and the month before
    pub fn frequency_spikes(&self, transactions: &[Transaction]) -> Vec<Anomaly> {
        let latest = match latest_month(transactions) {
            Some(m) => m,
            None => return Vec::new(),
        };
        let previous = shift_month(latest, -1);

        let current = counterparty_activity(transactions, latest);
        let prior = previous
            .as_deref()
            .map(|m| counterparty_activity(transactions, m))
            .unwrap_or_default();

        let counts: Vec<f64> = current.values().map(|a| a.count as f64).collect();
        let threshold = match percentile(&counts, self.config.percentile) {
            Some(p) => p,
            None => return Vec::new(),
        };

        let mut anomalies = Vec::new();
        for (name, activity) in &current {
            let count = activity.count as f64;
            let prev_count = prior.get(name).map(|a| a.count).unwrap_or(0);

            let above_percentile = count > threshold;
            let doubled = prev_count > 0 && count > self.config.spike_ratio * prev_count as f64;
            if !above_percentile && !doubled {
                continue;
            }

            let reason = if doubled {
                format!(
                    "'{}' had {} transactions in {} vs. {} the month before",
                    name, activity.count, latest, prev_count
                )
            } else {
                format!(
                    "'{}' had {} transactions in {}, above the p{} of {:.1}",
                    name, activity.count, latest, self.config.percentile, threshold
                )
            };

            anomalies.push(Anomaly {
                anomaly_type: AnomalyType::FrequencySpike,
                severity: Severity::Medium,
                reference: format!("{}@{}", name, latest),
                reason,
                suggested_action: "Check for split payments or duplicate postings with this counterparty".to_string(),
                evidence: EvidenceFilter::new("Latest-month transactions with this counterparty")
                    .with("counterparty", name.clone())
                    .with("month", latest),
                amount: Some(activity.total_abs),
                txn_ids: activity.ids.clone(),
            });
        }
        anomalies
    }

    /// Latest-month counterparties absent from the lookback window, largest outflow first
    pub fn new_counterparties(&self, transactions: &[Transaction]) -> Vec<Anomaly> {
        let latest = match latest_month(transactions) {
            Some(m) => m,
            None => return Vec::new(),
        };

        let lookback: BTreeSet<String> = (1..=self.config.lookback_months as i32)
            .filter_map(|k| shift_month(latest, -k))
            .collect();
        let seen: BTreeSet<&str> = transactions
            .iter()
            .filter(|t| lookback.contains(t.month()))
            .map(|t| t.counterparty().trim())
            .filter(|c| !c.is_empty())
            .collect();

        let mut candidates: Vec<(String, CounterpartyActivity)> = counterparty_activity(transactions, latest)
            .into_iter()
            .filter(|(name, activity)| !seen.contains(name.as_str()) && activity.outbound > 0.0)
            .collect();
        candidates.sort_by(|a, b| b.1.outbound.total_cmp(&a.1.outbound).then_with(|| a.0.cmp(&b.0)));
        candidates.truncate(self.config.new_counterparty_top_n);

        candidates
            .into_iter()
            .map(|(name, activity)| Anomaly {
                anomaly_type: AnomalyType::NewCounterparty,
                severity: Severity::Medium,
                reference: format!("{}@{}", name, latest),
                reason: format!(
                    "'{}' received {:.2} in {} with no activity in the previous {} months",
                    name, activity.outbound, latest, self.config.lookback_months
                ),
                suggested_action: "Verify vendor onboarding, contract and bank account ownership".to_string(),
                evidence: EvidenceFilter::new("Latest-month transactions with a first-seen counterparty")
                    .with("counterparty", name.clone())
                    .with("month", latest),
                amount: Some(activity.outbound),
                txn_ids: activity.ids,
            })
            .collect()
    }

    /// Operating rows whose memo carries financing-like language
    pub fn keyword_mismatches(&self, transactions: &[Transaction]) -> Vec<Anomaly> {
        transactions
            .iter()
            .filter(|t| t.cf_class() == CfClass::Operating)
            .filter_map(|t| {
                let memo = t.memo().to_lowercase();
                let keyword = self
                    .config
                    .sensitive_keywords
                    .iter()
                    .find(|k| keyword_matches(k, &memo))?;
                Some(Anomaly {
                    anomaly_type: AnomalyType::KeywordMismatch,
                    severity: Severity::Low,
                    reference: t.id().to_string(),
                    reason: format!("Classified operating but memo mentions '{}'", keyword),
                    suggested_action: "Review classification; may be financing or a related-party flow".to_string(),
                    evidence: EvidenceFilter::new("Single transaction with a sensitive memo keyword")
                        .with("id", t.id())
                        .with("keyword", keyword.clone()),
                    amount: Some(t.amount_abs()),
                    txn_ids: vec![t.id().to_string()],
                })
            })
            .collect()
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(AnomalyConfig::default())
    }
}

// ============================================================================
// HELPERS
// ============================================================================

#[derive(Debug, Clone, Default)]
struct CounterpartyActivity {
    count: usize,
    outbound: f64,
    total_abs: f64,
    ids: Vec<String>,
}

fn latest_month(transactions: &[Transaction]) -> Option<&str> {
    transactions.iter().map(|t| t.month()).max()
}

/// Named counterparties active in `month`; blank names are skipped
fn counterparty_activity(transactions: &[Transaction], month: &str) -> BTreeMap<String, CounterpartyActivity> {
    let mut activity: BTreeMap<String, CounterpartyActivity> = BTreeMap::new();
    for t in transactions.iter().filter(|t| t.month() == month) {
        let name = t.counterparty().trim();
        if name.is_empty() {
            continue;
        }
        let entry = activity.entry(name.to_string()).or_default();
        entry.count += 1;
        entry.total_abs += t.amount_abs();
        if t.is_outflow() {
            entry.outbound += t.amount_abs();
        }
        entry.ids.push(t.id().to_string());
    }
    activity
}

/// Severity (high first), then amount descending, then reference
pub fn rank_anomalies(anomalies: &mut [Anomaly]) {
    anomalies.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| {
                let a_amt = a.amount.unwrap_or(f64::NEG_INFINITY);
                let b_amt = b.amount.unwrap_or(f64::NEG_INFINITY);
                b_amt.total_cmp(&a_amt)
            })
            .then_with(|| a.reference.cmp(&b.reference))
    });
}

/// Attach each anomaly's type to every transaction it refers to
pub fn tag_transactions(transactions: &mut [Transaction], anomalies: &[Anomaly]) {
    let mut tags: HashMap<&str, Vec<AnomalyType>> = HashMap::new();
    for anomaly in anomalies {
        for id in &anomaly.txn_ids {
            tags.entry(id.as_str()).or_default().push(anomaly.anomaly_type);
        }
    }

    for tx in transactions.iter_mut() {
        if let Some(types) = tags.get(tx.id()) {
            for t in types {
                tx.add_tag(*t);
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::tests::tx;

    fn references(anomalies: &[Anomaly]) -> Vec<&str> {
        anomalies.iter().map(|a| a.reference.as_str()).collect()
    }

    #[test]
    fn test_outlier_flags_only_the_big_one() {
        let txns = vec![
            tx(1, "2025-03-01", -10.0, "A", "supplies"),
            tx(2, "2025-03-02", -10.0, "B", "supplies"),
            tx(3, "2025-03-03", -10.0, "C", "supplies"),
            tx(4, "2025-03-04", -10.0, "D", "supplies"),
            tx(5, "2025-03-05", -100.0, "E", "supplies"),
        ];
        let outliers = AnomalyDetector::default().amount_outliers(&txns);

        assert_eq!(references(&outliers), vec!["TX000005"]);
        assert_eq!(outliers[0].severity, Severity::High);
        assert!(outliers[0].reason.contains("82.00"));
    }

    #[test]
    fn test_outlier_ignores_financing_and_inflows() {
        let mut txns: Vec<Transaction> = (1..=5)
            .map(|i| tx(i, "2025-03-01", -10.0, "Vendor", "supplies"))
            .collect();
        txns.push(tx(6, "2025-03-02", -900.0, "City Bank", "loan repayment"));
        txns.push(tx(7, "2025-03-02", 900.0, "Acme", "sales"));

        let outliers = AnomalyDetector::default().amount_outliers(&txns);
        assert!(outliers.is_empty());
    }

    #[test]
    fn test_small_sample_widens_baseline() {
        let txns = vec![
            tx(1, "2025-01-02", 1000.0, "Acme", "sales"),
            tx(2, "2025-01-03", 1000.0, "Acme", "sales"),
            tx(3, "2025-01-04", 1000.0, "Acme", "sales"),
            tx(4, "2025-01-05", -5000.0, "City Bank", "loan repayment"),
            tx(5, "2025-01-06", -100000.0, "NewCo", "consulting"),
        ];
        let outliers = AnomalyDetector::default().amount_outliers(&txns);
        assert_eq!(references(&outliers), vec!["TX000005"]);
    }

    #[test]
    fn test_frequency_spike_vs_previous_month() {
        let mut txns = vec![tx(1, "2025-01-10", -10.0, "Courier", "delivery")];
        for i in 0..3 {
            txns.push(tx(2 + i, "2025-02-10", -10.0, "Courier", "delivery"));
        }
        txns.push(tx(10, "2025-02-11", -10.0, "Cafe", "lunch"));
        txns.push(tx(11, "2025-01-11", -10.0, "Cafe", "lunch"));

        let spikes = AnomalyDetector::default().frequency_spikes(&txns);

        assert_eq!(references(&spikes), vec!["Courier@2025-02"]);
        assert_eq!(spikes[0].txn_ids.len(), 3);
        assert!(spikes[0].reason.contains("vs. 1"));
    }

    #[test]
    fn test_frequency_spike_above_percentile_without_history() {
        let mut txns: Vec<Transaction> = (1..=19)
            .map(|i| tx(i, "2025-03-05", -10.0, &format!("Vendor {}", i), "parts"))
            .collect();
        for i in 0..5 {
            txns.push(tx(20 + i, "2025-03-10", -10.0, "Busy", "parts"));
        }

        let spikes = AnomalyDetector::default().frequency_spikes(&txns);

        // Counts are nineteen 1s and one 5: p95 = 1.2, no prior month to double
        assert_eq!(references(&spikes), vec!["Busy@2025-03"]);
        assert!(spikes[0].reason.contains("above the p95"));
        assert_eq!(spikes[0].txn_ids.len(), 5);
    }

    #[test]
    fn test_frequency_even_counts_not_flagged() {
        let mut txns = Vec::new();
        let mut seq = 0;
        for month in ["2025-02-10", "2025-03-10"] {
            for name in ["North", "South", "East"] {
                for _ in 0..2 {
                    seq += 1;
                    txns.push(tx(seq, month, -10.0, name, "parts"));
                }
            }
        }

        assert!(AnomalyDetector::default().frequency_spikes(&txns).is_empty());
    }

    #[test]
    fn test_new_counterparty_respects_lookback() {
        let txns = vec![
            tx(1, "2025-01-15", -100.0, "Old Supplier", "parts"),
            tx(2, "2025-03-05", -500.0, "Old Supplier", "parts"),
            tx(3, "2025-03-06", -900.0, "Fresh Ltd", "consulting"),
            tx(4, "2025-03-07", 50.0, "Inbound Only", "refund"),
        ];
        let found = AnomalyDetector::default().new_counterparties(&txns);

        // Seen in M-2 (absent in M-1) is still "seen"
        assert_eq!(references(&found), vec!["Fresh Ltd@2025-03"]);
        assert_eq!(found[0].amount, Some(900.0));
    }

    #[test]
    fn test_new_counterparty_top_n() {
        let txns: Vec<Transaction> = (1..=5)
            .map(|i| tx(i, "2025-03-05", -(i as f64) * 100.0, &format!("Vendor {}", i), "parts"))
            .collect();
        let detector = AnomalyDetector::new(AnomalyConfig {
            new_counterparty_top_n: 2,
            ..Default::default()
        });
        let found = detector.new_counterparties(&txns);
        assert_eq!(references(&found), vec!["Vendor 5@2025-03", "Vendor 4@2025-03"]);
    }

    #[test]
    fn test_keyword_mismatch_only_on_operating() {
        let txns = vec![
            tx(1, "2025-03-05", -300.0, "Landlord", "rental deposit"),
            tx(2, "2025-03-06", -300.0, "Bank", "loan repayment"),
            tx(3, "2025-03-07", -300.0, "Shop", "stationery"),
        ];
        let found = AnomalyDetector::default().keyword_mismatches(&txns);
        assert_eq!(references(&found), vec!["TX000001"]);
        assert_eq!(found[0].severity, Severity::Low);
    }

    #[test]
    fn test_ranking_and_tagging() {
        let mut txns = vec![
            tx(1, "2025-01-02", 1000.0, "Acme", "sales"),
            tx(2, "2025-01-03", 1000.0, "Acme", "sales"),
            tx(3, "2025-01-04", 1000.0, "Acme", "sales"),
            tx(4, "2025-01-05", -5000.0, "City Bank", "loan repayment"),
            tx(5, "2025-01-06", -100000.0, "NewCo", "security deposit"),
        ];
        let anomalies = AnomalyDetector::default().detect(&txns);

        assert_eq!(anomalies[0].anomaly_type, AnomalyType::AmountOutlier);
        for pair in anomalies.windows(2) {
            assert!(pair[0].severity <= pair[1].severity);
        }

        tag_transactions(&mut txns, &anomalies);
        let tags = txns[4].anomaly_tags();
        assert!(tags.contains(&AnomalyType::AmountOutlier));
        assert!(tags.contains(&AnomalyType::NewCounterparty));
        assert!(tags.contains(&AnomalyType::KeywordMismatch));
        assert!(!txns[3].anomaly_tags().contains(&AnomalyType::AmountOutlier));
    }

    #[test]
    fn test_empty_input() {
        let detector = AnomalyDetector::default();
        assert!(detector.detect(&[]).is_empty());
        assert!(AnomalyConfig::default().problems().is_empty());
    }
}

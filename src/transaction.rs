// 💳 Transaction Model + Normalizer
// Raw bank rows → canonical, classified transactions inside the period.
//
// Core fields are private: date/month, amount/direction and cf_class are
// derived once at construction and can't drift apart afterwards.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::anomaly::AnomalyType;
use crate::columns::{ColumnBindings, Field};
use crate::parser::{parse_amount, parse_date, BankTable};
use crate::period::{month_key, ReportingPeriod};
use crate::rules::{subclass_for, CashFlowClassifier};

// ============================================================================
// ENUMS
// ============================================================================

/// Cash-flow class
///
/// Variants are declared in name order so the derived `Ord` sorts by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CfClass {
    Financing,
    Internal,
    Investing,
    Operating,
    Unknown,
}

impl CfClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            CfClass::Financing => "financing",
            CfClass::Internal => "internal",
            CfClass::Investing => "investing",
            CfClass::Operating => "operating",
            CfClass::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

// ============================================================================
// ROW VALUES (resolved, not yet validated)
// ============================================================================

/// One bank row read through the column bindings
///
/// Unbound or unparsable amounts are already zero here; text is trimmed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowValues {
    pub date: Option<NaiveDate>,
    pub inflow: f64,
    pub outflow: f64,
    pub counterparty: String,
    pub memo: String,
    pub txn_type: String,
    pub match_status: Option<String>,
}

impl RowValues {
    pub fn from_row(table: &BankTable, row: &[String], bindings: &ColumnBindings) -> Self {
        let text = |field: Field| table.cell(row, bindings.get(field)).trim().to_string();
        let amount = |field: Field| {
            parse_amount(table.cell(row, bindings.get(field)))
                .map(f64::abs)
                .unwrap_or(0.0)
        };

        let match_status = text(Field::MatchStatus);

        RowValues {
            date: parse_date(table.cell(row, bindings.get(Field::Date))),
            inflow: amount(Field::Inflow),
            outflow: amount(Field::Outflow),
            counterparty: text(Field::Counterparty),
            memo: text(Field::Memo),
            txn_type: text(Field::TxnType),
            match_status: if match_status.is_empty() { None } else { Some(match_status) },
        }
    }
}

// ============================================================================
// TRANSACTION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    id: String,
    date: NaiveDate,
    month: String,
    direction: Direction,
    amount: f64,
    amount_abs: f64,
    counterparty: String,
    memo: String,
    #[serde(rename = "type")]
    txn_type: String,
    cf_class: CfClass,
    cf_subclass: String,
    /// Rule keyword that decided `cf_class`; None for the operating default
    cf_keyword: Option<String>,
    match_status: Option<String>,
    anomaly_tags: BTreeSet<AnomalyType>,
}

impl Transaction {
    /// Build a classified transaction from one row
    ///
    /// Returns None when the row has no usable date or carries no cash
    /// (zero inflow and zero outflow). Ties go to `in`.
    pub fn build(seq: usize, values: RowValues, classifier: &CashFlowClassifier) -> Option<Self> {
        let date = values.date?;
        if values.inflow == 0.0 && values.outflow == 0.0 {
            return None;
        }

        let (direction, amount) = if values.inflow >= values.outflow {
            (Direction::In, values.inflow)
        } else {
            (Direction::Out, -values.outflow)
        };

        let classification = classifier.classify(&values.counterparty, &values.memo, &values.txn_type);
        let cf_subclass = subclass_for(&values.txn_type, &values.memo);

        Some(Transaction {
            id: format!("TX{:06}", seq),
            date,
            month: month_key(date),
            direction,
            amount,
            amount_abs: amount.abs(),
            counterparty: values.counterparty,
            memo: values.memo,
            txn_type: values.txn_type,
            cf_class: classification.class,
            cf_subclass,
            cf_keyword: classification.keyword,
            match_status: values.match_status,
            anomaly_tags: BTreeSet::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn month(&self) -> &str {
        &self.month
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Signed: positive for `in`, negative for `out`
    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn amount_abs(&self) -> f64 {
        self.amount_abs
    }

    pub fn counterparty(&self) -> &str {
        &self.counterparty
    }

    pub fn memo(&self) -> &str {
        &self.memo
    }

    pub fn txn_type(&self) -> &str {
        &self.txn_type
    }

    pub fn cf_class(&self) -> CfClass {
        self.cf_class
    }

    pub fn cf_subclass(&self) -> &str {
        &self.cf_subclass
    }

    pub fn cf_keyword(&self) -> Option<&str> {
        self.cf_keyword.as_deref()
    }

    pub fn match_status(&self) -> Option<&str> {
        self.match_status.as_deref()
    }

    pub fn anomaly_tags(&self) -> &BTreeSet<AnomalyType> {
        &self.anomaly_tags
    }

    pub fn is_outflow(&self) -> bool {
        self.direction == Direction::Out
    }

    pub fn is_inflow(&self) -> bool {
        self.direction == Direction::In
    }

    pub(crate) fn add_tag(&mut self, tag: AnomalyType) {
        self.anomaly_tags.insert(tag);
    }
}

// ============================================================================
// NORMALIZER
// ============================================================================

/// What happened to the rows of one table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeStats {
    pub rows_seen: usize,
    pub bad_dates: usize,
    pub out_of_period: usize,
    pub zero_amount: usize,
    pub kept: usize,
}

/// Convert a bank table into the ordered transaction list for the period
///
/// Never fails: bad rows are skipped and counted, missing columns read as
/// empty/zero.
pub fn normalize_transactions(
    table: &BankTable,
    bindings: &ColumnBindings,
    period: &ReportingPeriod,
    classifier: &CashFlowClassifier,
) -> (Vec<Transaction>, NormalizeStats) {
    let mut stats = NormalizeStats::default();
    let mut transactions = Vec::new();

    for (row_idx, row) in table.rows.iter().enumerate() {
        stats.rows_seen += 1;
        let values = RowValues::from_row(table, row, bindings);

        let date = match values.date {
            Some(d) => d,
            None => {
                stats.bad_dates += 1;
                debug!(row = row_idx, "skipping row without a parsable date");
                continue;
            }
        };

        if !period.contains(date) {
            stats.out_of_period += 1;
            continue;
        }

        if values.inflow == 0.0 && values.outflow == 0.0 {
            stats.zero_amount += 1;
            continue;
        }

        if let Some(tx) = Transaction::build(transactions.len() + 1, values, classifier) {
            transactions.push(tx);
        }
    }

    stats.kept = transactions.len();
    info!(
        rows = stats.rows_seen,
        kept = stats.kept,
        bad_dates = stats.bad_dates,
        out_of_period = stats.out_of_period,
        zero_amount = stats.zero_amount,
        "normalized bank transactions"
    );

    (transactions, stats)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::columns::ColumnResolver;

    /// Shared helper for other modules' tests
    pub(crate) fn tx(seq: usize, date: &str, amount: f64, counterparty: &str, memo: &str) -> Transaction {
        let values = RowValues {
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").ok(),
            inflow: if amount > 0.0 { amount } else { 0.0 },
            outflow: if amount < 0.0 { -amount } else { 0.0 },
            counterparty: counterparty.to_string(),
            memo: memo.to_string(),
            ..Default::default()
        };
        Transaction::build(seq, values, &CashFlowClassifier::default()).unwrap()
    }

    fn sample_table() -> BankTable {
        let headers = ["日期", "对方单位", "摘要", "收入", "支出", "类型"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let rows = vec![
            vec!["2025-01-05", "Acme", "sales receipt", "1,000.00", "", "回款"],
            vec!["2025-01-06", "Bank", "loan repayment", "", "5000", ""],
            vec!["bad date", "Acme", "ignored", "10", "", ""],
            vec!["2025-01-07", "Acme", "zero row", "0", "0", ""],
            vec!["2024-12-31", "Acme", "before period", "10", "", ""],
            vec!["2025-01-09", "Globex", "", "", "-250", ""],
        ]
        .into_iter()
        .map(|r| r.into_iter().map(|s| s.to_string()).collect())
        .collect();
        BankTable::new("bank.csv", headers, rows)
    }

    #[test]
    fn test_normalize_filters_and_counts() {
        let table = sample_table();
        let bindings = ColumnResolver::default().resolve(&table.headers);
        let period = ReportingPeriod::parse("2025-01-01", "2025-01-31").unwrap();

        let (txns, stats) = normalize_transactions(&table, &bindings, &period, &CashFlowClassifier::default());

        assert_eq!(stats.rows_seen, 6);
        assert_eq!(stats.bad_dates, 1);
        assert_eq!(stats.zero_amount, 1);
        assert_eq!(stats.out_of_period, 1);
        assert_eq!(stats.kept, 3);

        assert_eq!(txns[0].id(), "TX000001");
        assert_eq!(txns[0].amount(), 1000.0);
        assert_eq!(txns[0].cf_subclass(), "回款");
        assert_eq!(txns[0].cf_keyword(), None);

        assert_eq!(txns[1].direction(), Direction::Out);
        assert_eq!(txns[1].amount(), -5000.0);
        assert_eq!(txns[1].cf_class(), CfClass::Financing);
        assert_eq!(txns[1].cf_keyword(), Some("loan"));

        // Negative outflow cells are taken as magnitudes
        assert_eq!(txns[2].amount(), -250.0);
        assert_eq!(txns[2].cf_subclass(), "unclassified");
        assert_eq!(txns[2].month(), "2025-01");
    }

    #[test]
    fn test_direction_matches_sign() {
        let table = sample_table();
        let bindings = ColumnResolver::default().resolve(&table.headers);
        let period = ReportingPeriod::parse("2024-01-01", "2025-12-31").unwrap();
        let (txns, _) = normalize_transactions(&table, &bindings, &period, &CashFlowClassifier::default());

        for t in &txns {
            assert_eq!(t.direction() == Direction::In, t.amount() >= 0.0);
            assert_eq!(t.amount_abs(), t.amount().abs());
            assert!(t.amount_abs() >= 0.0);
        }
    }

    #[test]
    fn test_tie_goes_to_inflow() {
        let values = RowValues {
            date: NaiveDate::from_ymd_opt(2025, 1, 1),
            inflow: 100.0,
            outflow: 100.0,
            ..Default::default()
        };
        let t = Transaction::build(1, values, &CashFlowClassifier::default()).unwrap();
        assert_eq!(t.direction(), Direction::In);
        assert_eq!(t.amount(), 100.0);
        // Blank text classifies as unknown
        assert_eq!(t.cf_class(), CfClass::Unknown);
    }

    #[test]
    fn test_zero_row_and_missing_date_dropped() {
        let zero = RowValues {
            date: NaiveDate::from_ymd_opt(2025, 1, 1),
            ..Default::default()
        };
        assert!(Transaction::build(1, zero, &CashFlowClassifier::default()).is_none());

        let undated = RowValues {
            inflow: 5.0,
            ..Default::default()
        };
        assert!(Transaction::build(1, undated, &CashFlowClassifier::default()).is_none());
    }

    #[test]
    fn test_unbound_columns_read_empty() {
        let headers = vec!["Date".to_string(), "Credit".to_string()];
        let rows = vec![vec!["2025-02-01".to_string(), "12.5".to_string()]];
        let table = BankTable::new("t.csv", headers, rows);
        let bindings = ColumnResolver::default().resolve(&table.headers);
        let period = ReportingPeriod::parse("2025-02-01", "2025-02-28").unwrap();

        let (txns, _) = normalize_transactions(&table, &bindings, &period, &CashFlowClassifier::default());

        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].counterparty(), "");
        assert_eq!(txns[0].match_status(), None);
        assert_eq!(txns[0].cf_class(), CfClass::Unknown);
    }
}

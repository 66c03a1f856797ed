// 🏛️ Column Resolver - Semantic layer over heterogeneous headers
// Maps whatever the bank export calls its columns onto canonical fields.
// Each field has an ordered list of candidate patterns; a pattern is a set of
// keys that must ALL appear in the normalized header. First pattern wins.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ============================================================================
// CANONICAL FIELDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Date,
    Inflow,
    Outflow,
    Counterparty,
    Memo,
    TxnType,
    MatchStatus,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Field::Date,
        Field::Inflow,
        Field::Outflow,
        Field::Counterparty,
        Field::Memo,
        Field::TxnType,
        Field::MatchStatus,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Field::Date => "date",
            Field::Inflow => "inflow_amount",
            Field::Outflow => "outflow_amount",
            Field::Counterparty => "counterparty",
            Field::Memo => "memo",
            Field::TxnType => "type",
            Field::MatchStatus => "match_status",
        }
    }
}

/// Lowercase, unify full-width parentheses, drop whitespace and `-_/`
pub fn normalize_header(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .replace('（', "(")
        .replace('）', ")")
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '_' | '/'))
        .collect()
}

// ============================================================================
// PATTERNS (configuration)
// ============================================================================

/// Candidate header patterns per field, in priority order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnPatterns {
    pub date: Vec<Vec<String>>,
    pub inflow: Vec<Vec<String>>,
    pub outflow: Vec<Vec<String>>,
    pub counterparty: Vec<Vec<String>>,
    pub memo: Vec<Vec<String>>,
    pub txn_type: Vec<Vec<String>>,
    pub match_status: Vec<Vec<String>>,
}

fn pats(groups: &[&[&str]]) -> Vec<Vec<String>> {
    groups
        .iter()
        .map(|keys| keys.iter().map(|k| k.to_string()).collect())
        .collect()
}

impl Default for ColumnPatterns {
    fn default() -> Self {
        ColumnPatterns {
            date: pats(&[&["日期"], &["记账日期"], &["业务日期"], &["date"]]),
            inflow: pats(&[
                &["收入", "本位币"],
                &["收入金额"],
                &["收款"],
                &["收入"],
                &["inflow"],
                &["credit"],
                &["deposit"],
                &["moneyin"],
            ]),
            outflow: pats(&[
                &["支出", "本位币"],
                &["支出金额"],
                &["付款"],
                &["支出"],
                &["outflow"],
                &["debit"],
                &["withdrawal"],
                &["moneyout"],
            ]),
            counterparty: pats(&[
                &["对方单位"],
                &["对方名称"],
                &["往来单位"],
                &["对方"],
                &["counterparty"],
                &["payee"],
                &["payer"],
            ]),
            memo: pats(&[&["摘要"], &["用途"], &["备注"], &["memo"], &["description"], &["narrative"]]),
            txn_type: pats(&[&["类型"], &["业务类型"], &["type"], &["category"]]),
            match_status: pats(&[&["勾对"], &["对账"], &["matchstatus"], &["reconciled"], &["match"]]),
        }
    }
}

impl ColumnPatterns {
    pub fn for_field(&self, field: Field) -> &[Vec<String>] {
        match field {
            Field::Date => &self.date,
            Field::Inflow => &self.inflow,
            Field::Outflow => &self.outflow,
            Field::Counterparty => &self.counterparty,
            Field::Memo => &self.memo,
            Field::TxnType => &self.txn_type,
            Field::MatchStatus => &self.match_status,
        }
    }
}

// ============================================================================
// BINDINGS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnBinding {
    pub index: usize,
    pub header: String,
}

/// Resolved field → column map; any field may be unbound
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnBindings {
    pub date: Option<ColumnBinding>,
    pub inflow: Option<ColumnBinding>,
    pub outflow: Option<ColumnBinding>,
    pub counterparty: Option<ColumnBinding>,
    pub memo: Option<ColumnBinding>,
    pub txn_type: Option<ColumnBinding>,
    pub match_status: Option<ColumnBinding>,
}

impl ColumnBindings {
    pub fn get(&self, field: Field) -> Option<&ColumnBinding> {
        match field {
            Field::Date => self.date.as_ref(),
            Field::Inflow => self.inflow.as_ref(),
            Field::Outflow => self.outflow.as_ref(),
            Field::Counterparty => self.counterparty.as_ref(),
            Field::Memo => self.memo.as_ref(),
            Field::TxnType => self.txn_type.as_ref(),
            Field::MatchStatus => self.match_status.as_ref(),
        }
    }

    fn set(&mut self, field: Field, binding: Option<ColumnBinding>) {
        match field {
            Field::Date => self.date = binding,
            Field::Inflow => self.inflow = binding,
            Field::Outflow => self.outflow = binding,
            Field::Counterparty => self.counterparty = binding,
            Field::Memo => self.memo = binding,
            Field::TxnType => self.txn_type = binding,
            Field::MatchStatus => self.match_status = binding,
        }
    }

    pub fn missing(&self) -> Vec<Field> {
        Field::ALL
            .iter()
            .copied()
            .filter(|f| self.get(*f).is_none())
            .collect()
    }

    /// Transactions need a date and at least one amount column
    pub fn has_transaction_columns(&self) -> bool {
        self.date.is_some() && (self.inflow.is_some() || self.outflow.is_some())
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

pub struct ColumnResolver {
    patterns: ColumnPatterns,
}

impl ColumnResolver {
    pub fn new(patterns: ColumnPatterns) -> Self {
        ColumnResolver { patterns }
    }

    /// Find the first header matching the first matching pattern
    pub fn find_column(&self, headers: &[String], field: Field) -> Option<ColumnBinding> {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();

        for pattern in self.patterns.for_field(field) {
            let keys: Vec<String> = pattern.iter().map(|k| normalize_header(k)).collect();
            if keys.is_empty() || keys.iter().all(|k| k.is_empty()) {
                continue;
            }
            for (index, header) in normalized.iter().enumerate() {
                if keys.iter().all(|k| header.contains(k.as_str())) {
                    return Some(ColumnBinding {
                        index,
                        header: headers[index].clone(),
                    });
                }
            }
        }
        None
    }

    pub fn resolve(&self, headers: &[String]) -> ColumnBindings {
        let mut bindings = ColumnBindings::default();
        for field in Field::ALL {
            let binding = self.find_column(headers, field);
            match &binding {
                Some(b) => debug!(field = field.name(), header = %b.header, index = b.index, "bound column"),
                None => debug!(field = field.name(), "no column matched"),
            }
            bindings.set(field, binding);
        }

        if !bindings.has_transaction_columns() {
            warn!(
                missing = ?bindings.missing().iter().map(|f| f.name()).collect::<Vec<_>>(),
                "bank export lacks date or amount columns; transaction detail unavailable"
            );
        }
        bindings
    }
}

impl Default for ColumnResolver {
    fn default() -> Self {
        Self::new(ColumnPatterns::default())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header(" 收入（本位币） "), "收入(本位币)");
        assert_eq!(normalize_header("Money-In / GBP"), "moneyingbp");
        assert_eq!(normalize_header("Match_Status"), "matchstatus");
    }

    #[test]
    fn test_resolve_chinese_bank_export() {
        let resolver = ColumnResolver::default();
        let h = headers(&["序号", "记账日期", "对方单位名称", "摘要", "收入(本位币)", "支出(本位币)", "业务类型"]);

        let b = resolver.resolve(&h);

        assert_eq!(b.date.as_ref().unwrap().index, 1);
        assert_eq!(b.counterparty.as_ref().unwrap().index, 2);
        assert_eq!(b.memo.as_ref().unwrap().index, 3);
        assert_eq!(b.inflow.as_ref().unwrap().index, 4);
        assert_eq!(b.outflow.as_ref().unwrap().index, 5);
        assert_eq!(b.txn_type.as_ref().unwrap().index, 6);
        assert!(b.match_status.is_none());
        assert!(b.has_transaction_columns());
    }

    #[test]
    fn test_resolve_english_bank_export() {
        let resolver = ColumnResolver::default();
        let h = headers(&["Posting Date", "Payee", "Description", "Money In", "Money Out", "Type", "Match Status"]);

        let b = resolver.resolve(&h);

        assert_eq!(b.date.unwrap().header, "Posting Date");
        assert_eq!(b.counterparty.unwrap().header, "Payee");
        assert_eq!(b.inflow.unwrap().header, "Money In");
        assert_eq!(b.outflow.unwrap().header, "Money Out");
        assert_eq!(b.match_status.unwrap().header, "Match Status");
    }

    #[test]
    fn test_pattern_priority_beats_column_order() {
        let resolver = ColumnResolver::default();
        // "收款" appears first but the compound pattern is tried first
        let h = headers(&["收款账号", "收入（本位币）"]);
        let b = resolver.resolve(&h);
        assert_eq!(b.inflow.unwrap().index, 1);
    }

    #[test]
    fn test_missing_columns_reported() {
        let resolver = ColumnResolver::default();
        let b = resolver.resolve(&headers(&["foo", "bar"]));
        assert!(!b.has_transaction_columns());
        assert_eq!(b.missing().len(), Field::ALL.len());
    }
}

// 🏷️ Cash-Flow Classification Rules - Rules as Data
// Ordered (class, keywords) pairs evaluated first-match-wins over the
// counterparty | memo | type text of a bank transaction.

use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::transaction::CfClass;

/// Subclass used when a transaction has neither a type nor a memo
pub const UNCLASSIFIED_SUBCLASS: &str = "unclassified";

/// Memo excerpt length used as a fallback subclass
const SUBCLASS_MEMO_CHARS: usize = 16;

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashFlowRule {
    /// Rule ID for tracking which rule fired
    pub id: String,

    /// Class assigned when any keyword matches
    pub class: CfClass,

    /// Keywords (case-insensitive substrings; `*` splits ordered parts)
    pub keywords: Vec<String>,

    /// Description/notes about this rule
    #[serde(default)]
    pub description: Option<String>,
}

impl CashFlowRule {
    pub fn new(id: &str, class: CfClass, keywords: &[&str]) -> Self {
        CashFlowRule {
            id: id.to_string(),
            class,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            description: None,
        }
    }

    /// First keyword found in `text_lower`, if any
    pub fn matched_keyword(&self, text_lower: &str) -> Option<&str> {
        self.keywords
            .iter()
            .find(|k| keyword_matches(k, text_lower))
            .map(|k| k.as_str())
    }
}

/// Substring match; with `*`, every part must appear in order
///
/// "intercompany*transfer" matches "intercompany fund transfer".
pub fn keyword_matches(keyword: &str, text_lower: &str) -> bool {
    let keyword_lower = keyword.trim().to_lowercase();
    if keyword_lower.is_empty() {
        return false;
    }

    if !keyword_lower.contains('*') {
        return text_lower.contains(&keyword_lower);
    }

    let mut current_pos = 0;
    let mut any_part = false;
    for part in keyword_lower.split('*') {
        if part.is_empty() {
            continue;
        }
        any_part = true;
        match text_lower[current_pos..].find(part) {
            Some(pos) => current_pos += pos + part.len(),
            None => return false,
        }
    }
    any_part
}

// ============================================================================
// CLASSIFIER CONFIG
// ============================================================================

/// The ordered rule list; order IS priority
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub rules: Vec<CashFlowRule>,
}

impl Default for ClassifierConfig {
    /// Internal before financing: intercompany movements must never inflate
    /// financing-dependency metrics ("internal loan settlement" is internal).
    fn default() -> Self {
        ClassifierConfig {
            rules: vec![
                CashFlowRule::new(
                    "internal",
                    CfClass::Internal,
                    &[
                        "internal",
                        "intercompany",
                        "inter-company",
                        "own account",
                        "between accounts",
                        "sweep",
                        "内部",
                        "调拨",
                        "划转",
                        "资金归集",
                        "同名",
                    ],
                ),
                CashFlowRule::new(
                    "financing",
                    CfClass::Financing,
                    &[
                        "loan",
                        "borrow",
                        "principal repayment",
                        "repay loan",
                        "interest",
                        "dividend",
                        "capital injection",
                        "share capital",
                        "credit line",
                        "借款",
                        "贷款",
                        "还款",
                        "利息",
                        "融资",
                        "分红",
                        "股利",
                        "注资",
                        "增资",
                    ],
                ),
                CashFlowRule::new(
                    "investing",
                    CfClass::Investing,
                    &[
                        "capex",
                        "equipment",
                        "fixed asset",
                        "acquisition",
                        "investment",
                        "securities",
                        "设备",
                        "固定资产",
                        "工程款",
                        "投资",
                        "收购",
                    ],
                ),
                CashFlowRule::new(
                    "unknown",
                    CfClass::Unknown,
                    &["unknown", "unidentified", "suspense", "misc", "未知", "待查", "不明", "其他"],
                ),
            ],
        }
    }
}

impl ClassifierConfig {
    /// Load a rule list from JSON
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read rules file: {:?}", path.as_ref()))?;

        let rules: Vec<CashFlowRule> = serde_json::from_str(&content)
            .context("Failed to parse rules JSON")?;

        Ok(ClassifierConfig { rules })
    }
}

// ============================================================================
// CLASSIFICATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub class: CfClass,
    pub rule_id: Option<String>,
    pub keyword: Option<String>,
}

// ============================================================================
// CLASSIFIER
// ============================================================================

pub struct CashFlowClassifier {
    rules: Vec<CashFlowRule>,
}

impl CashFlowClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        CashFlowClassifier {
            rules: config.rules.clone(),
        }
    }

    /// Classify a transaction from its three text fields
    pub fn classify(&self, counterparty: &str, memo: &str, txn_type: &str) -> ClassificationResult {
        let parts = [counterparty.trim(), memo.trim(), txn_type.trim()];
        if parts.iter().all(|p| p.is_empty()) {
            return ClassificationResult {
                class: CfClass::Unknown,
                rule_id: None,
                keyword: None,
            };
        }

        let text = parts.join(" | ").to_lowercase();
        self.classify_text(&text)
    }

    /// Apply the ordered rules to already-joined text
    pub fn classify_text(&self, text: &str) -> ClassificationResult {
        let text_lower = text.to_lowercase();

        for rule in &self.rules {
            if let Some(keyword) = rule.matched_keyword(&text_lower) {
                return ClassificationResult {
                    class: rule.class,
                    rule_id: Some(rule.id.clone()),
                    keyword: Some(keyword.to_string()),
                };
            }
        }

        ClassificationResult {
            class: CfClass::Operating,
            rule_id: None,
            keyword: None,
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl Default for CashFlowClassifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}

/// Secondary label: explicit type, else a memo excerpt, else a placeholder
pub fn subclass_for(txn_type: &str, memo: &str) -> String {
    let txn_type = txn_type.trim();
    if !txn_type.is_empty() {
        return txn_type.to_string();
    }
    let memo = memo.trim();
    if !memo.is_empty() {
        return memo.chars().take(SUBCLASS_MEMO_CHARS).collect();
    }
    UNCLASSIFIED_SUBCLASS.to_string()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_substring_match() {
        assert!(keyword_matches("LOAN", "bank loan drawdown"));
        assert!(keyword_matches("借款", "归还借款"));
        assert!(!keyword_matches("loan", "payroll march"));
        assert!(!keyword_matches("  ", "anything"));
    }

    #[test]
    fn test_wildcard_keyword() {
        assert!(keyword_matches("intercompany*transfer", "intercompany fund transfer"));
        assert!(!keyword_matches("intercompany*transfer", "transfer intercompany"));
        assert!(!keyword_matches("*", "anything"));
    }

    #[test]
    fn test_empty_text_is_unknown() {
        let classifier = CashFlowClassifier::default();
        let result = classifier.classify("", "  ", "");
        assert_eq!(result.class, CfClass::Unknown);
        assert_eq!(result.rule_id, None);
    }

    #[test]
    fn test_default_is_operating() {
        let classifier = CashFlowClassifier::default();
        let result = classifier.classify("Acme Foods", "March goods payment", "");
        assert_eq!(result.class, CfClass::Operating);
    }

    #[test]
    fn test_internal_beats_financing() {
        let classifier = CashFlowClassifier::default();
        let result = classifier.classify("", "internal loan settlement", "");
        assert_eq!(result.class, CfClass::Internal);
        assert_eq!(result.rule_id.as_deref(), Some("internal"));
    }

    #[test]
    fn test_financing_and_investing() {
        let classifier = CashFlowClassifier::default();
        assert_eq!(classifier.classify("City Bank", "loan repayment", "").class, CfClass::Financing);
        assert_eq!(classifier.classify("", "", "贷款").class, CfClass::Financing);
        assert_eq!(classifier.classify("Tooling Co", "new equipment", "").class, CfClass::Investing);
        assert_eq!(classifier.classify("", "待查款项", "").class, CfClass::Unknown);
    }

    #[test]
    fn test_prepayment_stays_operating() {
        let classifier = CashFlowClassifier::default();
        let result = classifier.classify("Acme Supplies", "supplier prepayment", "");
        assert_eq!(result.class, CfClass::Operating);
        assert_eq!(result.keyword, None);

        let result = classifier.classify("City Bank", "principal repayment", "");
        assert_eq!(result.class, CfClass::Financing);
        assert_eq!(result.keyword.as_deref(), Some("principal repayment"));
    }

    #[test]
    fn test_custom_rule_order() {
        // Putting financing first flips the priority
        let config = ClassifierConfig {
            rules: vec![
                CashFlowRule::new("fin", CfClass::Financing, &["loan"]),
                CashFlowRule::new("int", CfClass::Internal, &["internal"]),
            ],
        };
        let classifier = CashFlowClassifier::new(&config);
        assert_eq!(classifier.rule_count(), 2);
        assert_eq!(classifier.classify("", "internal loan", "").class, CfClass::Financing);
    }

    #[test]
    fn test_subclass_fallbacks() {
        assert_eq!(subclass_for("Payroll", "whatever"), "Payroll");
        assert_eq!(subclass_for("", "Supplier payment for March"), "Supplier payment");
        assert_eq!(subclass_for("", "货款结算一二三四五六七八九十壹贰叁"), "货款结算一二三四五六七八九十壹贰");
        assert_eq!(subclass_for(" ", ""), UNCLASSIFIED_SUBCLASS);
    }
}

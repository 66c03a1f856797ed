// ⚙️ Engine Config - every tunable in one immutable value
// Loaded from JSON; any missing section falls back to its defaults.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::anomaly::AnomalyConfig;
use crate::columns::ColumnPatterns;
use crate::report::ReportConfig;
use crate::risk::RiskThresholds;
use crate::rules::ClassifierConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub columns: ColumnPatterns,
    pub classifier: ClassifierConfig,
    pub risk: RiskThresholds,
    pub anomaly: AnomalyConfig,
    pub report: ReportConfig,
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: EngineConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config JSON: {:?}", path.as_ref()))?;

        config.validate()?;
        info!(path = %path.as_ref().display(), rules = config.classifier.rules.len(), "loaded engine config");
        Ok(config)
    }

    /// Every problem found, or Ok
    pub fn problems(&self) -> Vec<String> {
        let mut problems = self.risk.problems();
        problems.extend(self.anomaly.problems());

        if self.classifier.rules.is_empty() {
            problems.push("classifier.rules is empty; everything would classify as operating".to_string());
        }
        for rule in &self.classifier.rules {
            if rule.keywords.iter().all(|k| k.trim().is_empty()) {
                problems.push(format!("classifier rule '{}' has no keywords", rule.id));
            }
        }

        if self.columns.date.is_empty() {
            problems.push("columns.date has no patterns".to_string());
        }
        if self.columns.inflow.is_empty() && self.columns.outflow.is_empty() {
            problems.push("columns.inflow and columns.outflow both have no patterns".to_string());
        }

        problems
    }

    pub fn validate(&self) -> Result<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("Invalid engine config:\n  - {}", problems.join("\n  - ")))
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize engine config")
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::Thresholds;
    use crate::rules::CashFlowRule;
    use crate::transaction::CfClass;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.classifier.rules[0].class, CfClass::Internal);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "risk": { "top1_outflow": { "t1": 0.4, "t2": 0.7 } } }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.risk.top1_outflow, Thresholds::new(0.4, 0.7));
        assert_eq!(config.risk.unknown_outflow, Thresholds::new(0.05, 0.15));
        assert_eq!(config.anomaly.percentile, 95.0);
        assert_eq!(config.report.currency, "CNY");
        assert!(!config.classifier.rules.is_empty());
    }

    #[test]
    fn test_validate_reports_problems() {
        let mut config = EngineConfig::default();
        config.risk.recon_diff = Thresholds::new(0.5, 0.1);
        config.anomaly.percentile = 0.0;
        config.classifier.rules.push(CashFlowRule::new("empty", CfClass::Unknown, &[" "]));

        let problems = config.problems();
        assert_eq!(problems.len(), 3);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_round_trip() {
        let config = EngineConfig::default();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_json().unwrap().as_bytes()).unwrap();

        let loaded = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded.risk, config.risk);
        assert_eq!(loaded.classifier.rules.len(), config.classifier.rules.len());
    }
}

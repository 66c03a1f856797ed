// 📦 Finance Snapshot - assembled JSON output + versioned files
//
// Layout under the output root:
//   data/finance_latest.json             always the newest snapshot
//   data/finance_<YYYYMMDD>_v<N>.json    immutable, N = 1 + highest existing

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::anomaly::Anomaly;
use crate::bank::BankSummary;
use crate::columns::ColumnBindings;
use crate::error::PackageError;
use crate::memo::BoardMemo;
use crate::monthly::MonthlySummary;
use crate::risk::RiskScore;
use crate::transaction::{NormalizeStats, Transaction};

pub const DATA_DIR: &str = "data";
pub const LATEST_SNAPSHOT: &str = "data/finance_latest.json";

/// Dotted paths that must exist in every published snapshot (null counts as present)
pub const REQUIRED_FIELDS: &[&str] = &[
    "meta.period_start",
    "meta.period_end",
    "meta.generated_at",
    "meta.currency",
    "meta.unit",
    "meta.notes",
    "bp.latest_path",
    "bp.title",
    "bank.kpi.period_cash_in",
    "bank.kpi.period_cash_out",
    "bank.kpi.period_net_cash",
    "bank.trend.months",
    "bank.trend.cash_in",
    "bank.trend.cash_out",
    "bank.trend.net_cash",
    "bank.trend.cum_net_cash",
    "bank.by_type",
    "cashflow.txns",
    "cashflow.monthly.monthly_totals",
    "cashflow.monthly.monthly_by_class",
    "cashflow.monthly.source",
    "cashflow.risk.risk_score_total",
    "cashflow.risk.risk_scores",
    "cashflow.risk.risk_breakdown_rows",
    "cashflow.risk.anomalies",
    "cashflow.risk.coverage",
    "memo.items",
];

// ============================================================================
// SNAPSHOT MODEL
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotMeta {
    pub period_start: String,
    pub period_end: String,
    pub generated_at: String,
    pub currency: String,
    pub unit: String,
    pub engine_version: String,
    pub source_file: String,
    /// Memo headline lines
    pub notes: Vec<String>,
    pub columns: ColumnBindings,
    pub normalize: NormalizeStats,
}

/// Where the rendered report lives, relative to the output root
#[derive(Debug, Clone, Serialize)]
pub struct ReportRef {
    pub latest_path: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskSection {
    #[serde(flatten)]
    pub score: RiskScore,
    pub anomalies: Vec<Anomaly>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CashflowSection {
    pub txns: Vec<Transaction>,
    pub monthly: MonthlySummary,
    pub risk: RiskSection,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinanceSnapshot {
    pub meta: SnapshotMeta,
    pub bp: ReportRef,
    pub bank: BankSummary,
    pub cashflow: CashflowSection,
    pub memo: BoardMemo,
}

impl FinanceSnapshot {
    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).context("Failed to serialize finance snapshot")
    }

    /// Pretty JSON with a trailing newline
    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self).context("Failed to serialize finance snapshot")?;
        json.push('\n');
        Ok(json)
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

/// Paths from `rules` that do not resolve in `data`
pub fn missing_required_fields(data: &Value, rules: &[&str]) -> Vec<String> {
    rules
        .iter()
        .filter(|path| {
            let mut current = data;
            for part in path.split('.') {
                match current.get(part) {
                    Some(next) => current = next,
                    None => return true,
                }
            }
            false
        })
        .map(|p| p.to_string())
        .collect()
}

/// First non-finite number in a JSON tree, as a dotted path
pub fn find_non_finite(value: &Value, path: &str) -> Option<String> {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if !f.is_finite() => Some(path.to_string()),
            _ => None,
        },
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, v)| find_non_finite(v, &format!("{}[{}]", path, i))),
        Value::Object(map) => map.iter().find_map(|(k, v)| {
            let child = if path.is_empty() { k.clone() } else { format!("{}.{}", path, k) };
            find_non_finite(v, &child)
        }),
        _ => None,
    }
}

/// Re-parse a written snapshot and run the publish checks on it
pub fn validate_snapshot_text(text: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(text).context("Snapshot is not valid JSON")?;

    let missing = missing_required_fields(&value, REQUIRED_FIELDS);
    if !missing.is_empty() {
        return Err(PackageError::MissingRequiredFields(missing).into());
    }
    if let Some(path) = find_non_finite(&value, "") {
        return Err(PackageError::NonFiniteNumber(path).into());
    }
    Ok(value)
}

// ============================================================================
// WRITER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenSnapshot {
    pub latest: PathBuf,
    pub versioned: PathBuf,
    pub version: u32,
}

pub struct SnapshotWriter {
    out_root: PathBuf,
}

impl SnapshotWriter {
    pub fn new<P: AsRef<Path>>(out_root: P) -> Self {
        SnapshotWriter {
            out_root: out_root.as_ref().to_path_buf(),
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.out_root.join(DATA_DIR)
    }

    /// 1 + the highest `finance_<tag>_v<N>.json` already on disk
    pub fn next_version(&self, tag: &str) -> Result<u32> {
        let dir = self.data_dir();
        if !dir.exists() {
            return Ok(1);
        }

        let prefix = format!("finance_{}_v", tag);
        let mut max_version = 0;
        for entry in fs::read_dir(&dir).with_context(|| format!("Failed to list {}", dir.display()))? {
            let entry = entry?;
            let name = entry.file_name();
            let version = name
                .to_str()
                .and_then(|n| n.strip_prefix(&prefix))
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|v| v.parse::<u32>().ok());
            if let Some(v) = version {
                max_version = max_version.max(v);
            }
        }
        Ok(max_version + 1)
    }

    /// Write latest first, then the next versioned copy
    pub fn write(&self, snapshot: &FinanceSnapshot, tag: &str) -> Result<WrittenSnapshot> {
        let dir = self.data_dir();
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        let json = snapshot.to_json()?;

        let latest = self.out_root.join(LATEST_SNAPSHOT);
        fs::write(&latest, &json).with_context(|| format!("Failed to write {}", latest.display()))?;

        let version = self.next_version(tag)?;
        let versioned = dir.join(format!("finance_{}_v{}.json", tag, version));
        fs::write(&versioned, &json).with_context(|| format!("Failed to write {}", versioned.display()))?;

        debug!(bytes = json.len(), "snapshot serialized");
        info!(latest = %latest.display(), versioned = %versioned.display(), version, "wrote finance snapshot");

        Ok(WrittenSnapshot {
            latest,
            versioned,
            version,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

// 🔄 Pipeline - bank export in, snapshot + report + publish package out
//
//   load CSV → resolve columns → normalize/classify → bank KPIs
//     → monthly → risk → anomalies (+ tags) → memo
//     → snapshot files → HTML report → checks → signed package

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::anomaly::{tag_transactions, Anomaly, AnomalyDetector};
use crate::bank::{build_bank_summary, BankSummary, ReconInputs};
use crate::columns::{ColumnBindings, ColumnResolver};
use crate::config::EngineConfig;
use crate::error::PackageError;
use crate::memo::{build_board_memo, BoardMemo};
use crate::monthly::{aggregate_monthly, MonthlySummary};
use crate::parser::{load_bank_csv, BankTable};
use crate::period::ReportingPeriod;
use crate::publish::{run_snapshot_checks, PublishPackage, SnapshotLink};
use crate::report::{render_report, report_title, write_report, WrittenReport, LATEST_REPORT, REPORTS_DIR};
use crate::risk::{RiskScore, RiskScorer};
use crate::rules::CashFlowClassifier;
use crate::snapshot::{
    validate_snapshot_text, CashflowSection, FinanceSnapshot, ReportRef, RiskSection, SnapshotMeta, SnapshotWriter,
    WrittenSnapshot, DATA_DIR, LATEST_SNAPSHOT,
};
use crate::transaction::{normalize_transactions, NormalizeStats, Transaction};

pub const PUBLISH_DIR: &str = "publish";

// ============================================================================
// ENGINE
// ============================================================================

/// Everything the engine derives from one bank table
#[derive(Debug, Clone)]
pub struct Analysis {
    pub source_file: String,
    pub bindings: ColumnBindings,
    pub stats: NormalizeStats,
    pub transactions: Vec<Transaction>,
    pub bank: BankSummary,
    pub monthly: MonthlySummary,
    pub risk: RiskScore,
    pub anomalies: Vec<Anomaly>,
    pub memo: BoardMemo,
}

/// The classification + scoring engine, configured once
pub struct CashflowEngine {
    config: EngineConfig,
    resolver: ColumnResolver,
    classifier: CashFlowClassifier,
    scorer: RiskScorer,
    detector: AnomalyDetector,
}

impl CashflowEngine {
    pub fn new(config: EngineConfig) -> Self {
        CashflowEngine {
            resolver: ColumnResolver::new(config.columns.clone()),
            classifier: CashFlowClassifier::new(&config.classifier),
            scorer: RiskScorer::new(config.risk.clone()),
            detector: AnomalyDetector::new(config.anomaly.clone()),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the core over one table; never fails, degrades instead
    pub fn analyze(&self, table: &BankTable, period: &ReportingPeriod, recon: &ReconInputs) -> Analysis {
        let bindings = self.resolver.resolve(&table.headers);
        let (mut transactions, stats) = normalize_transactions(table, &bindings, period, &self.classifier);
        let bank = build_bank_summary(table, &bindings, period, recon);

        let monthly = if transactions.is_empty() {
            warn!("no classified transactions; monthly series falls back to bank totals");
            MonthlySummary::from_bank_trend(&bank.trend)
        } else {
            aggregate_monthly(&transactions)
        };
        for violation in monthly.check_invariants() {
            warn!(%violation, "monthly aggregation invariant violated");
        }

        let risk = self.scorer.score(&transactions, &monthly, &bank.kpi, period);
        let anomalies = self.detector.detect(&transactions);
        tag_transactions(&mut transactions, &anomalies);

        let memo = build_board_memo(&risk, &anomalies, &bank.kpi, period, &self.config.report.owner);

        Analysis {
            source_file: table.source_file.clone(),
            bindings,
            stats,
            transactions,
            bank,
            monthly,
            risk,
            anomalies,
            memo,
        }
    }

    /// Assemble the JSON snapshot from an analysis
    pub fn build_snapshot(&self, analysis: Analysis, period: &ReportingPeriod) -> FinanceSnapshot {
        let period_end = period.end.format("%Y-%m-%d").to_string();
        let report = &self.config.report;

        FinanceSnapshot {
            meta: SnapshotMeta {
                period_start: period.start.format("%Y-%m-%d").to_string(),
                period_end: period_end.clone(),
                generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                currency: report.currency.clone(),
                unit: report.unit.clone(),
                engine_version: crate::VERSION.to_string(),
                source_file: analysis.source_file,
                notes: analysis.memo.headlines.clone(),
                columns: analysis.bindings,
                normalize: analysis.stats,
            },
            bp: ReportRef {
                latest_path: format!("./{}", LATEST_REPORT),
                title: report_title(&period_end),
            },
            bank: analysis.bank,
            cashflow: CashflowSection {
                txns: analysis.transactions,
                monthly: analysis.monthly,
                risk: RiskSection {
                    score: analysis.risk,
                    anomalies: analysis.anomalies,
                },
            },
            memo: analysis.memo,
        }
    }
}

impl Default for CashflowEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

// ============================================================================
// BUILD COMMAND
// ============================================================================

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub bank_csv: PathBuf,
    pub period: ReportingPeriod,
    pub out_root: PathBuf,
    pub header_row: Option<usize>,
    pub recon: ReconInputs,
    pub signing_key: Option<Vec<u8>>,
}

#[derive(Debug)]
pub struct BuildOutcome {
    pub snapshot: WrittenSnapshot,
    pub report: WrittenReport,
    pub package_path: PathBuf,
    pub package: PublishPackage,
    pub risk_score_total: u32,
    pub transactions: usize,
    pub anomalies: usize,
}

/// Load, analyze, write every artifact and emit the signed package
pub fn run_build(engine: &CashflowEngine, options: &BuildOptions) -> Result<BuildOutcome> {
    let table = load_bank_csv(&options.bank_csv, options.header_row)?;
    run_build_from_table(engine, &table, options)
}

/// Same as `run_build` with an already-loaded table
pub fn run_build_from_table(engine: &CashflowEngine, table: &BankTable, options: &BuildOptions) -> Result<BuildOutcome> {
    let period = &options.period;
    let root = options.out_root.as_path();
    let tag = period.end_tag();

    let analysis = engine.analyze(table, period, &options.recon);
    let transactions = analysis.transactions.len();
    let anomalies = analysis.anomalies.len();
    let risk_score_total = analysis.risk.risk_score_total;

    let snapshot = engine.build_snapshot(analysis, period);
    let written = SnapshotWriter::new(root).write(&snapshot, &tag)?;

    let html = render_report(&snapshot, &engine.config().report);
    let report = write_report(root, &html, &tag)?;

    // Validate what actually landed on disk, not the in-memory value
    let latest_text = fs::read_to_string(root.join(LATEST_SNAPSHOT))
        .with_context(|| format!("Failed to re-read {}", LATEST_SNAPSHOT))?;
    validate_snapshot_text(&latest_text)?;

    let checks = run_snapshot_checks(root);
    if let Some(failed) = checks.iter().find(|c| !c.passed) {
        return Err(PackageError::CheckFailed {
            check: failed.check_type.clone(),
            detail: failed.detail.clone().unwrap_or_default(),
        }
        .into());
    }

    let snapshots = vec![
        SnapshotLink {
            from: LATEST_SNAPSHOT.to_string(),
            to: format!("{}/finance_{}_v{}.json", DATA_DIR, tag, written.version),
        },
        SnapshotLink {
            from: LATEST_REPORT.to_string(),
            to: format!("{}/bp_{}.html", REPORTS_DIR, tag),
        },
    ];

    let mut package = PublishPackage::build(root, period, snapshots, checks)?;
    package.sign(options.signing_key.as_deref())?;
    let package_path = write_package(root, &package, &tag)?;

    info!(
        risk_score_total,
        transactions,
        anomalies,
        package = %package_path.display(),
        "build complete"
    );

    Ok(BuildOutcome {
        snapshot: written,
        report,
        package_path,
        package,
        risk_score_total,
        transactions,
        anomalies,
    })
}

fn write_package(root: &Path, package: &PublishPackage, tag: &str) -> Result<PathBuf> {
    let dir = root.join(PUBLISH_DIR);
    fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(format!("publish_package_{}.json", tag));
    fs::write(&path, package.to_json()?).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

// ============================================================================
// TESTS
// ============================================================================

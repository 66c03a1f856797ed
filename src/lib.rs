// Cash-Flow Risk Engine - Core Library
// Exposes all modules for use in the CLI and tests

pub mod numeric;
pub mod period;
pub mod parser;
pub mod columns;      // Column Resolver - heterogeneous headers → canonical fields
pub mod rules;        // Cash-flow classification rules (rules as data)
pub mod transaction;  // Transaction model + normalizer
pub mod bank;         // Bank KPIs, monthly cash trend, reconciliation
pub mod monthly;      // Monthly aggregator
pub mod risk;         // Risk scorer - six ratios, two-tier penalties
pub mod anomaly;      // Anomaly detector - four passes
pub mod memo;         // Board memo builder
pub mod snapshot;     // JSON snapshot + versioned files
pub mod report;       // HTML report
pub mod publish;      // Signed publish package
pub mod config;
pub mod error;
pub mod pipeline;

// Re-export commonly used types
pub use parser::{load_bank_csv, parse_bank_csv, parse_amount, parse_date, BankTable};
pub use period::ReportingPeriod;
pub use columns::{ColumnBinding, ColumnBindings, ColumnPatterns, ColumnResolver, Field};
pub use rules::{CashFlowClassifier, CashFlowRule, ClassificationResult, ClassifierConfig};
pub use transaction::{normalize_transactions, CfClass, Direction, NormalizeStats, Transaction};
pub use bank::{build_bank_summary, BankKpi, BankSummary, BankTrend, ReconInputs};
pub use monthly::{aggregate_monthly, MonthlyClassTotal, MonthlySource, MonthlySummary, MonthlyTotal};
pub use risk::{
    Coverage, EvidenceFilter, RiskBreakdownRow, RiskDimension, RiskScore, RiskScorer, RiskThresholds, Thresholds,
};
pub use anomaly::{tag_transactions, Anomaly, AnomalyConfig, AnomalyDetector, AnomalyType, Severity};
pub use memo::{build_board_memo, BoardMemo, MemoItem, MemoSeverity};
pub use snapshot::{FinanceSnapshot, SnapshotWriter, REQUIRED_FIELDS};
pub use report::{render_report, ReportConfig};
pub use publish::{verify_package, PublishPackage};
pub use config::EngineConfig;
pub use error::PackageError;
pub use pipeline::{run_build, Analysis, BuildOptions, BuildOutcome, CashflowEngine};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

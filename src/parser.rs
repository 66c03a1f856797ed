// 🏗️ Bank Export Parser - CSV tables of unknown schema
// Loads a bank statement export as headers + string cells. Nothing here knows
// which column means what; that is the Column Resolver's job.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use crate::columns::ColumnBinding;

/// How many leading rows are inspected when guessing the header row
const HEADER_SCAN_ROWS: usize = 4;

// ============================================================================
// BANK TABLE
// ============================================================================

/// BankTable - raw tabular bank export
///
/// Exports often carry title lines above the real header, so the header row
/// is either given or guessed; everything below it is data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankTable {
    /// Original filename (provenance only)
    pub source_file: String,

    /// Unique, non-empty header names
    pub headers: Vec<String>,

    /// Data rows; a row may be shorter than the header
    pub rows: Vec<Vec<String>>,
}

impl BankTable {
    pub fn new(source_file: impl Into<String>, headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        BankTable {
            source_file: source_file.into(),
            headers: make_unique(&headers),
            rows,
        }
    }

    /// Cell text for a bound column; unbound columns and short rows read as ""
    pub fn cell<'a>(&self, row: &'a [String], binding: Option<&ColumnBinding>) -> &'a str {
        binding
            .and_then(|b| row.get(b.index))
            .map(|s| s.as_str())
            .unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ============================================================================
// LOADING
// ============================================================================

/// Load a bank export CSV from disk
///
/// `header_row` is the 0-based line holding column names; `None` guesses it.
pub fn load_bank_csv(path: &Path, header_row: Option<usize>) -> Result<BankTable> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open bank export: {}", path.display()))?;

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown.csv")
        .to_string();

    parse_bank_csv(file, &filename, header_row)
}

/// Parse a bank export from any reader
pub fn parse_bank_csv<R: Read>(reader: R, source_file: &str, header_row: Option<usize>) -> Result<BankTable> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut records: Vec<Vec<String>> = Vec::new();
    for (line_num, result) in reader.records().enumerate() {
        let record = result.with_context(|| {
            format!("Failed to parse CSV line {} in {}", line_num + 1, source_file)
        })?;
        records.push(record.iter().map(|c| c.trim().to_string()).collect());
    }

    // Excel likes to prefix UTF-8 exports with a BOM
    if let Some(first) = records.first_mut().and_then(|r| r.first_mut()) {
        if let Some(stripped) = first.strip_prefix('\u{feff}') {
            *first = stripped.to_string();
        }
    }

    if records.is_empty() {
        info!(source_file, "bank export is empty");
        return Ok(BankTable::new(source_file, Vec::new(), Vec::new()));
    }

    let header_idx = header_row.unwrap_or_else(|| guess_header_row(&records));
    let headers = records.get(header_idx).cloned().unwrap_or_default();

    let rows: Vec<Vec<String>> = records
        .into_iter()
        .skip(header_idx + 1)
        .filter(|row| row.iter().any(|c| !c.is_empty()))
        .collect();

    info!(
        source_file,
        header_row = header_idx,
        columns = headers.len(),
        rows = rows.len(),
        "loaded bank export"
    );

    Ok(BankTable::new(source_file, headers, rows))
}

/// Pick the row with the most non-empty cells among the first few lines
fn guess_header_row(records: &[Vec<String>]) -> usize {
    let mut best = (0usize, 0usize);
    for (idx, row) in records.iter().take(HEADER_SCAN_ROWS).enumerate() {
        let filled = row.iter().filter(|c| !c.is_empty()).count();
        if filled > best.1 {
            best = (idx, filled);
        }
    }
    debug!(header_row = best.0, filled = best.1, "guessed header row");
    best.0
}

/// Blank headers become `col_N`; repeats become `name_2`, `name_3`, ...
fn make_unique(headers: &[String]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let base = if h.trim().is_empty() {
                format!("col_{}", i + 1)
            } else {
                h.trim().to_string()
            };
            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                base
            } else {
                format!("{}_{}", base, count)
            }
        })
        .collect()
}

// ============================================================================
// CELL PARSING
// ============================================================================

/// Parse a money cell; anything unparsable is None (callers treat it as zero)
///
/// Handles thousands separators, currency symbols and accounting-style
/// parentheses: "(1,234.50)" → -1234.5
pub fn parse_amount(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let (negative, body) = if s.starts_with('(') && s.ends_with(')') {
        (true, &s[1..s.len() - 1])
    } else {
        (false, s)
    };

    let cleaned: String = body
        .chars()
        .filter(|c| !matches!(c, ',' | '，' | '$' | '¥' | '￥' | '€' | '£' | ' ' | '\u{a0}'))
        .collect();

    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negative { -value } else { value })
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%Y%m%d", "%m/%d/%Y", "%Y年%m月%d日"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

/// Parse a date cell in any of the formats bank exports actually use
///
/// Also accepts spreadsheet serial day numbers (days since 1899-12-30).
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date);
        }
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }

    parse_serial_date(s)
}

fn parse_serial_date(s: &str) -> Option<NaiveDate> {
    let serial: f64 = s.parse().ok()?;
    // Plausible range: 1900-01-01 .. 2099-12-31; keeps "20250101"-like
    // strings that failed %Y%m%d from turning into dates
    if !(1.0..=73050.0).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial.floor() as i64))
}

// ============================================================================
// TESTS
// ============================================================================

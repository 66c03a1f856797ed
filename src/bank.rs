// ⚖️ Bank KPIs - period cash totals and reconciliation figures
//
// Computed straight from the raw rows, independent of classification, so the
// snapshot always has a monthly cash series even when transaction-level
// detail is unusable. Rows are bucketed by month; a month belongs to the
// period if the period touches it.
//
// Reconciliation:
//   diff_receipts = AR cash receipts - bank cash in
//   diff_payments = AP cash payments - bank cash out

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

use crate::columns::{ColumnBindings, Field};
use crate::parser::{parse_amount, parse_date, BankTable};
use crate::period::{month_key, ReportingPeriod};

/// Label for rows whose type cell is blank
const UNKNOWN_TYPE: &str = "unknown";

// ============================================================================
// INPUTS
// ============================================================================

/// Totals from the AR/AP ledgers, supplied by the caller when known
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconInputs {
    pub ar_receipts: Option<f64>,
    pub ap_payments: Option<f64>,
}

// ============================================================================
// OUTPUTS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BankKpi {
    pub period_cash_in: Option<f64>,
    pub period_cash_out: Option<f64>,
    pub period_net_cash: Option<f64>,
    pub diff_receipts: Option<f64>,
    pub diff_payments: Option<f64>,
    pub bank_cash_in: Option<f64>,
    pub bank_cash_out: Option<f64>,
}

impl BankKpi {
    pub fn has_reconciliation(&self) -> bool {
        self.diff_receipts.is_some() || self.diff_payments.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BankTrend {
    pub months: Vec<String>,
    pub cash_in: Vec<f64>,
    pub cash_out: Vec<f64>,
    pub net_cash: Vec<f64>,
    pub cum_net_cash: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSummary {
    #[serde(rename = "type")]
    pub txn_type: String,
    pub cash_in: f64,
    pub cash_out: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BankSummary {
    pub kpi: BankKpi,
    pub trend: BankTrend,
    pub by_type: Vec<TypeSummary>,
}

// ============================================================================
// BUILDER
// ============================================================================

/// Build bank KPIs, monthly trend and per-type summary for the period
pub fn build_bank_summary(
    table: &BankTable,
    bindings: &ColumnBindings,
    period: &ReportingPeriod,
    recon: &ReconInputs,
) -> BankSummary {
    let months = period.months();
    let has_in = bindings.inflow.is_some();
    let has_out = bindings.outflow.is_some();

    // Without dates or amounts there is nothing to total
    if bindings.date.is_none() || (!has_in && !has_out) {
        info!("bank KPIs unavailable: date or amount columns missing");
        return BankSummary {
            kpi: BankKpi::default(),
            trend: BankTrend {
                months,
                ..Default::default()
            },
            by_type: Vec::new(),
        };
    }

    let month_index: HashMap<&str, usize> = months
        .iter()
        .enumerate()
        .map(|(i, m)| (m.as_str(), i))
        .collect();

    let mut cash_in = vec![0.0; months.len()];
    let mut cash_out = vec![0.0; months.len()];
    let mut by_type: BTreeMap<String, TypeSummary> = BTreeMap::new();

    for row in &table.rows {
        let date = match parse_date(table.cell(row, bindings.get(Field::Date))) {
            Some(d) => d,
            None => continue,
        };
        let idx = match month_index.get(month_key(date).as_str()) {
            Some(i) => *i,
            None => continue,
        };

        let inflow = parse_amount(table.cell(row, bindings.get(Field::Inflow))).unwrap_or(0.0);
        let outflow = parse_amount(table.cell(row, bindings.get(Field::Outflow)))
            .unwrap_or(0.0)
            .abs();
        cash_in[idx] += inflow;
        cash_out[idx] += outflow;

        if bindings.txn_type.is_some() {
            let raw_type = table.cell(row, bindings.get(Field::TxnType)).trim();
            let key = if raw_type.is_empty() { UNKNOWN_TYPE } else { raw_type };
            let entry = by_type.entry(key.to_string()).or_insert_with(|| TypeSummary {
                txn_type: key.to_string(),
                cash_in: 0.0,
                cash_out: 0.0,
                count: 0,
            });
            entry.cash_in += inflow;
            entry.cash_out += outflow;
            entry.count += 1;
        }
    }

    let mut net_cash = Vec::with_capacity(months.len());
    let mut cum_net_cash = Vec::with_capacity(months.len());
    let mut running = 0.0;
    for (cin, cout) in cash_in.iter().zip(&cash_out) {
        let net = cin - cout;
        running += net;
        net_cash.push(net);
        cum_net_cash.push(running);
    }

    let period_cash_in = if has_in { Some(cash_in.iter().sum::<f64>()) } else { None };
    let period_cash_out = if has_out { Some(cash_out.iter().sum::<f64>()) } else { None };
    let period_net_cash = Some(net_cash.iter().sum::<f64>());

    let kpi = BankKpi {
        period_cash_in,
        period_cash_out,
        period_net_cash,
        diff_receipts: recon.ar_receipts.zip(period_cash_in).map(|(ar, bank)| ar - bank),
        diff_payments: recon.ap_payments.zip(period_cash_out).map(|(ap, bank)| ap - bank),
        bank_cash_in: period_cash_in,
        bank_cash_out: period_cash_out,
    };

    info!(
        cash_in = ?kpi.period_cash_in,
        cash_out = ?kpi.period_cash_out,
        net_cash = ?kpi.period_net_cash,
        reconciled = kpi.has_reconciliation(),
        "built bank KPIs"
    );

    BankSummary {
        kpi,
        trend: BankTrend {
            months,
            cash_in,
            cash_out,
            net_cash,
            cum_net_cash,
        },
        by_type: by_type.into_values().collect(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

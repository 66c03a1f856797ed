// 📄 HTML Report - self-contained business-performance page
//
// reports/bp_latest.html       newest report (also the optional template)
// reports/bp_<YYYYMMDD>.html   dated copy
//
// If the current bp_latest.html contains `{{BP_CONTENT}}` it is treated as a
// site template and the rendered page is spliced in at the placeholder.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::memo::{fmt_amount, fmt_pct, MemoSeverity};
use crate::snapshot::FinanceSnapshot;

pub const REPORTS_DIR: &str = "reports";
pub const LATEST_REPORT: &str = "reports/bp_latest.html";
pub const TEMPLATE_PLACEHOLDER: &str = "{{BP_CONTENT}}";

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub currency: String,
    pub unit: String,
    /// Owner named on memo actions
    pub owner: String,
    pub top_anomalies_in_report: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        ReportConfig {
            currency: "CNY".to_string(),
            unit: "元".to_string(),
            owner: "Finance".to_string(),
            top_anomalies_in_report: 10,
        }
    }
}

pub fn report_title(period_end: &str) -> String {
    format!("Business Performance Report (as of {})", period_end)
}

// ============================================================================
// RENDERING
// ============================================================================

/// Render the full report page for a snapshot
pub fn render_report(snapshot: &FinanceSnapshot, config: &ReportConfig) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>{css}</style>
</head>
<body>
    <div class="header">
        <h1>{title}</h1>
        <div class="sub">Period {start} to {end}. Amounts in {currency} ({unit}); cash figures come from the bank statement.</div>
    </div>
    <div class="container">
        {cards}
        {memo}
        {risk}
        {anomalies}
        {monthly}
        {footer}
    </div>
</body>
</html>"#,
        title = html_escape(&snapshot.bp.title),
        css = inline_css(),
        start = html_escape(&snapshot.meta.period_start),
        end = html_escape(&snapshot.meta.period_end),
        currency = html_escape(&config.currency),
        unit = html_escape(&config.unit),
        cards = render_kpi_cards(snapshot),
        memo = render_memo(snapshot),
        risk = render_risk_table(snapshot),
        anomalies = render_anomalies(snapshot, config.top_anomalies_in_report),
        monthly = render_monthly(snapshot),
        footer = render_footer(snapshot),
    )
}

fn render_kpi_cards(snapshot: &FinanceSnapshot) -> String {
    let kpi = &snapshot.bank.kpi;
    let risk = &snapshot.cashflow.risk.score;
    let cards = [
        ("Period cash in", fmt_amount(kpi.period_cash_in), String::new()),
        ("Period cash out", fmt_amount(kpi.period_cash_out), String::new()),
        ("Period net cash", fmt_amount(kpi.period_net_cash), String::new()),
        (
            "Risk score",
            format!("{}/100", risk.risk_score_total),
            format!(
                "{} of {} dimensions measurable",
                risk.coverage.dimensions_scored, risk.coverage.dimensions_total
            ),
        ),
    ];

    let body: String = cards
        .iter()
        .map(|(k, v, note)| {
            format!(
                r#"<div class="card"><div class="k">{}</div><div class="v">{}</div><div class="small">{}</div></div>"#,
                html_escape(k),
                html_escape(v),
                html_escape(note)
            )
        })
        .collect();

    format!(r#"<div class="grid">{}</div>"#, body)
}

fn render_memo(snapshot: &FinanceSnapshot) -> String {
    let items = &snapshot.memo.items;
    if items.is_empty() {
        return String::new();
    }

    let conclusions: String = items
        .iter()
        .map(|item| {
            let evidence: Vec<String> = item
                .evidence
                .iter()
                .map(|e| format!("{}={}", e.metric, e.display))
                .collect();
            format!(
                r#"<li class="sev-{}">{} <span class="small">({})</span></li>"#,
                severity_class(item.severity),
                html_escape(&item.conclusion),
                html_escape(&evidence.join("; "))
            )
        })
        .collect();

    let actions: String = items
        .iter()
        .flat_map(|item| item.next_actions.iter())
        .map(|a| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                html_escape(&a.owner),
                html_escape(&a.action),
                html_escape(&a.due)
            )
        })
        .collect();

    format!(
        r#"<div class="section">
            <h2>Conclusions</h2>
            <ul>{conclusions}</ul>
        </div>
        <div class="section">
            <h2>Next actions</h2>
            <table>
                <thead><tr><th>Owner</th><th>Action</th><th>Due</th></tr></thead>
                <tbody>{actions}</tbody>
            </table>
        </div>"#,
        conclusions = conclusions,
        actions = actions,
    )
}

fn severity_class(severity: MemoSeverity) -> &'static str {
    match severity {
        MemoSeverity::Info => "info",
        MemoSeverity::Ok => "ok",
        MemoSeverity::Warn => "warn",
    }
}

fn render_risk_table(snapshot: &FinanceSnapshot) -> String {
    let rows: String = snapshot
        .cashflow
        .risk
        .score
        .risk_breakdown_rows
        .iter()
        .map(|r| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{} / {}</td><td>{}</td><td>{}</td><td class=\"small\">{}</td></tr>",
                html_escape(&r.label),
                html_escape(&r.dimension),
                fmt_pct(r.ratio),
                fmt_pct(Some(r.t1)),
                fmt_pct(Some(r.t2)),
                r.penalty,
                r.score,
                html_escape(&r.evidence.description)
            )
        })
        .collect();

    format!(
        r#"<div class="section">
            <h2>Risk breakdown</h2>
            <table>
                <thead><tr><th>Dimension</th><th>Key</th><th>Ratio</th><th>Thresholds</th><th>Penalty</th><th>Score</th><th>Evidence</th></tr></thead>
                <tbody>{}</tbody>
            </table>
        </div>"#,
        rows
    )
}

fn render_anomalies(snapshot: &FinanceSnapshot, limit: usize) -> String {
    let anomalies = &snapshot.cashflow.risk.anomalies;
    if anomalies.is_empty() {
        return r#"<div class="section"><h2>Anomalies</h2><p class="small">No anomalies flagged.</p></div>"#.to_string();
    }

    let rows: String = anomalies
        .iter()
        .take(limit)
        .map(|a| {
            format!(
                "<tr><td class=\"sev-{sev}\">{sev}</td><td>{ty}</td><td>{reference}</td><td>{amount}</td><td>{reason}</td><td>{action}</td></tr>",
                sev = a.severity.as_str(),
                ty = a.anomaly_type.as_str(),
                reference = html_escape(&a.reference),
                amount = fmt_amount(a.amount),
                reason = html_escape(&a.reason),
                action = html_escape(&a.suggested_action),
            )
        })
        .collect();

    format!(
        r#"<div class="section">
            <h2>Anomalies <span class="small">(top {shown} of {total})</span></h2>
            <table>
                <thead><tr><th>Severity</th><th>Type</th><th>Reference</th><th>Amount</th><th>Reason</th><th>Suggested action</th></tr></thead>
                <tbody>{rows}</tbody>
            </table>
        </div>"#,
        shown = anomalies.len().min(limit),
        total = anomalies.len(),
        rows = rows,
    )
}

fn render_monthly(snapshot: &FinanceSnapshot) -> String {
    let monthly = &snapshot.cashflow.monthly;
    let rows: String = monthly
        .monthly_totals
        .iter()
        .map(|m| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                html_escape(&m.month),
                fmt_amount(Some(m.inflow)),
                fmt_amount(Some(m.outflow)),
                fmt_amount(Some(m.net)),
                m.count
            )
        })
        .collect();

    let source = match monthly.source {
        crate::monthly::MonthlySource::Transactions => "classified transactions",
        crate::monthly::MonthlySource::BankKpi => "bank totals (no transaction detail)",
    };

    format!(
        r#"<div class="section">
            <h2>Monthly cash <span class="small">(from {source})</span></h2>
            <table>
                <thead><tr><th>Month</th><th>Inflow</th><th>Outflow</th><th>Net</th><th>Count</th></tr></thead>
                <tbody>{rows}</tbody>
            </table>
        </div>"#,
        source = source,
        rows = rows,
    )
}

fn render_footer(snapshot: &FinanceSnapshot) -> String {
    format!(
        r#"<div class="footer small">Generated {} by cashflow-risk {} from {}</div>"#,
        html_escape(&snapshot.meta.generated_at),
        html_escape(&snapshot.meta.engine_version),
        html_escape(&snapshot.meta.source_file)
    )
}

fn inline_css() -> &'static str {
    r#"
body{font-family:system-ui,-apple-system,"Segoe UI","PingFang SC","Microsoft YaHei",Arial,sans-serif;margin:0;background:#faf7f2;color:#1f2a37;}
.header{padding:24px 24px 10px;background:linear-gradient(180deg,#fff,#faf7f2);border-bottom:1px solid #eee;}
h1{margin:0;font-size:22px;}
.sub{color:#6b7280;margin-top:6px;font-size:13px;line-height:1.5;}
.container{max-width:1100px;margin:0 auto;padding:18px 24px 48px;}
.grid{display:grid;grid-template-columns:repeat(4,1fr);gap:12px;}
.card{background:#fff;border:1px solid #eee;border-radius:14px;padding:12px;}
.card .k{color:#6b7280;font-size:12px;}
.card .v{font-weight:700;font-size:18px;margin-top:4px;}
.section{margin-top:18px;background:#fff;border:1px solid #eee;border-radius:14px;padding:14px;}
.section h2{margin:0 0 10px;font-size:16px;}
table{width:100%;border-collapse:collapse;font-size:12px;}
th,td{border-bottom:1px solid #f0f0f0;padding:8px 6px;text-align:left;vertical-align:top;}
.small{color:#6b7280;font-size:12px;}
.sev-warn,.sev-high{color:#b91c1c;}
.sev-ok,.sev-medium{color:#b45309;}
.footer{margin-top:18px;}
@media(max-width:960px){.grid{grid-template-columns:repeat(2,1fr);}}
@media(max-width:520px){.grid{grid-template-columns:1fr;}}
"#
}

/// Escape text for HTML element and attribute content
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Splice rendered content into a template at the placeholder, if it has one
pub fn apply_template(template: &str, content: &str) -> Option<String> {
    if template.contains(TEMPLATE_PLACEHOLDER) {
        Some(template.replace(TEMPLATE_PLACEHOLDER, content))
    } else {
        None
    }
}

// ============================================================================
// WRITER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenReport {
    pub latest: PathBuf,
    pub dated: PathBuf,
    pub used_template: bool,
}

/// Write bp_latest.html and bp_<tag>.html under `out_root/reports`
pub fn write_report(out_root: &Path, html: &str, tag: &str) -> Result<WrittenReport> {
    let dir = out_root.join(REPORTS_DIR);
    fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let latest = out_root.join(LATEST_REPORT);
    let templated = if latest.exists() {
        let existing = fs::read_to_string(&latest)
            .with_context(|| format!("Failed to read report template {}", latest.display()))?;
        apply_template(&existing, html)
    } else {
        None
    };
    let used_template = templated.is_some();
    let page = templated.unwrap_or_else(|| html.to_string());

    fs::write(&latest, &page).with_context(|| format!("Failed to write {}", latest.display()))?;

    let dated = dir.join(format!("bp_{}.html", tag));
    fs::write(&dated, &page).with_context(|| format!("Failed to write {}", dated.display()))?;

    info!(latest = %latest.display(), dated = %dated.display(), used_template, "wrote report");

    Ok(WrittenReport {
        latest,
        dated,
        used_template,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(
            html_escape(r#"<b>"A&B's"</b>"#),
            "&lt;b&gt;&quot;A&amp;B&#39;s&quot;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_apply_template() {
        let tpl = "<html><nav>site</nav>{{BP_CONTENT}}</html>";
        assert_eq!(
            apply_template(tpl, "<p>x</p>").unwrap(),
            "<html><nav>site</nav><p>x</p></html>"
        );
        assert!(apply_template("<html>old report</html>", "<p>x</p>").is_none());
    }

    #[test]
    fn test_write_report_uses_template_once() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(REPORTS_DIR)).unwrap();
        fs::write(dir.path().join(LATEST_REPORT), "<main>{{BP_CONTENT}}</main>").unwrap();

        let first = write_report(dir.path(), "<p>one</p>", "20250131").unwrap();
        assert!(first.used_template);
        assert_eq!(fs::read_to_string(&first.latest).unwrap(), "<main><p>one</p></main>");
        assert_eq!(fs::read_to_string(&first.dated).unwrap(), "<main><p>one</p></main>");

        // The placeholder is consumed, so the next run overwrites plainly
        let second = write_report(dir.path(), "<p>two</p>", "20250131").unwrap();
        assert!(!second.used_template);
        assert_eq!(fs::read_to_string(&second.latest).unwrap(), "<p>two</p>");
    }
}

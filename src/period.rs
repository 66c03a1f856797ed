// 📅 Reporting Period - the fixed [start, end] window of one run
// Month keys are "YYYY-MM" strings; they sort chronologically as text.

use anyhow::{anyhow, Context, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ReportingPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(anyhow!("period end {} is before period start {}", end, start));
        }
        Ok(ReportingPeriod { start, end })
    }

    /// Parse a period from two `YYYY-MM-DD` strings
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let start = NaiveDate::parse_from_str(start.trim(), "%Y-%m-%d")
            .with_context(|| format!("Invalid period start: {:?}", start))?;
        let end = NaiveDate::parse_from_str(end.trim(), "%Y-%m-%d")
            .with_context(|| format!("Invalid period end: {:?}", end))?;
        ReportingPeriod::new(start, end)
    }

    /// Inclusive on both ends
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Every calendar month touched by the period, ascending
    pub fn months(&self) -> Vec<String> {
        let mut months = Vec::new();
        let (mut year, mut month) = (self.start.year(), self.start.month());
        let (end_year, end_month) = (self.end.year(), self.end.month());

        while (year, month) <= (end_year, end_month) {
            months.push(format!("{:04}-{:02}", year, month));
            if month == 12 {
                year += 1;
                month = 1;
            } else {
                month += 1;
            }
        }
        months
    }

    /// Compact tag used in versioned file names, e.g. "20250331"
    pub fn end_tag(&self) -> String {
        self.end.format("%Y%m%d").to_string()
    }
}

pub fn month_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// Shift a "YYYY-MM" key by a number of months (negative = back in time)
pub fn shift_month(month: &str, delta: i32) -> Option<String> {
    let (year, mon) = month.split_once('-')?;
    let year: i32 = year.parse().ok()?;
    let mon: i32 = mon.parse().ok()?;
    if !(1..=12).contains(&mon) {
        return None;
    }

    let index = year * 12 + (mon - 1) + delta;
    let (y, m) = (index.div_euclid(12), index.rem_euclid(12) + 1);
    Some(format!("{:04}-{:02}", y, m))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_period_contains_is_inclusive() {
        let period = ReportingPeriod::new(d(2025, 1, 1), d(2025, 3, 31)).unwrap();
        assert!(period.contains(d(2025, 1, 1)));
        assert!(period.contains(d(2025, 3, 31)));
        assert!(!period.contains(d(2024, 12, 31)));
        assert!(!period.contains(d(2025, 4, 1)));
    }

    #[test]
    fn test_period_months_cross_year() {
        let period = ReportingPeriod::parse("2024-11-15", "2025-02-03").unwrap();
        assert_eq!(period.months(), vec!["2024-11", "2024-12", "2025-01", "2025-02"]);
        assert_eq!(period.end_tag(), "20250203");
    }

    #[test]
    fn test_period_rejects_inverted_range() {
        assert!(ReportingPeriod::parse("2025-03-01", "2025-01-01").is_err());
        assert!(ReportingPeriod::parse("2025/03/01", "2025-04-01").is_err());
    }

    #[test]
    fn test_shift_month() {
        assert_eq!(shift_month("2025-01", -1).as_deref(), Some("2024-12"));
        assert_eq!(shift_month("2025-03", -3).as_deref(), Some("2024-12"));
        assert_eq!(shift_month("2024-12", 1).as_deref(), Some("2025-01"));
        assert_eq!(shift_month("garbage", 1), None);
    }
}

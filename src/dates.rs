use anyhow::anyhow;
use chrono::{Local, NaiveDate};

/// First month of an academic year (1-based, September).
pub const ACADEMIC_YEAR_START_MONTH: u32 = 9;

pub fn parse_iso_date(raw: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| anyhow!("invalid date {:?} (expected YYYY-MM-DD): {}", raw, e))
}

pub fn format_iso_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub fn today_local() -> NaiveDate {
    Local::now().date_naive()
}

pub fn september_first(year: i32) -> anyhow::Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, ACADEMIC_YEAR_START_MONTH, 1)
        .ok_or_else(|| anyhow!("year {} is out of range", year))
}

pub fn august_thirty_first(year: i32) -> anyhow::Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 8, 31).ok_or_else(|| anyhow!("year {} is out of range", year))
}

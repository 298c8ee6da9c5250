use chrono::{Datelike, NaiveDate};

pub const CALENDAR_COLUMNS: [&str; 3] = ["frac_week", "frac_month", "frac_year"];

pub fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|next| next.pred_opt())
        .map(|last| last.day())
        .unwrap_or(31)
}

/// Position within the trading week, Monday = 0.2 through Friday = 1.0
pub fn frac_week(date: NaiveDate) -> f64 {
    (date.weekday().num_days_from_monday() + 1) as f64 / 5.0
}

pub fn frac_month(date: NaiveDate) -> f64 {
    date.day() as f64 / days_in_month(date) as f64
}

pub fn frac_year(date: NaiveDate) -> f64 {
    (date.month0() as f64 + frac_month(date)) / 12.0
}

/// `[frac_week, frac_month, frac_year]`
pub fn calendar_fractions(date: NaiveDate) -> [f64; 3] {
    [frac_week(date), frac_month(date), frac_year(date)]
}

// 📅 Calendar Entity - one row of the pre-populated date dimension

use crate::temporal::date_key;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarDay {
    pub date_key: i32,
    pub date_actual: NaiveDate,
    /// 0 = Sunday .. 6 = Saturday
    pub day_of_week: u32,
    pub day_name: String,
    pub day_of_month: u32,
    pub day_of_year: u32,
    /// ISO week number
    pub week_of_year: u32,
    pub week_start_date: NaiveDate,
    pub month_number: u32,
    pub month_name: String,
    pub month_abbr: String,
    pub month_start_date: NaiveDate,
    pub month_end_date: NaiveDate,
    pub quarter_number: u32,
    pub quarter_name: String,
    pub year_number: i32,
    pub is_weekend: bool,
    pub is_business_day: bool,
}

impl CalendarDay {
    pub fn from_date(date: NaiveDate) -> Self {
        let weekday = date.weekday();
        let is_weekend = matches!(weekday, Weekday::Sat | Weekday::Sun);
        let quarter = (date.month() - 1) / 3 + 1;
        let month_start = date.with_day(1).unwrap_or(date);

        CalendarDay {
            date_key: date_key(date),
            date_actual: date,
            day_of_week: weekday.num_days_from_sunday(),
            day_name: date.format("%A").to_string(),
            day_of_month: date.day(),
            day_of_year: date.ordinal(),
            week_of_year: date.iso_week().week(),
            week_start_date: date - Duration::days(weekday.num_days_from_monday() as i64),
            month_number: date.month(),
            month_name: date.format("%B").to_string(),
            month_abbr: date.format("%b").to_string(),
            month_start_date: month_start,
            month_end_date: last_day_of_month(date),
            quarter_number: quarter,
            quarter_name: format!("Q{}", quarter),
            year_number: date.year(),
            is_weekend,
            is_business_day: !is_weekend,
        }
    }
}

fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .unwrap_or(date)
}

/// Every day from Jan 1 of `start_year` to Dec 31 of `end_year`
pub fn calendar_range(start_year: i32, end_year: i32) -> impl Iterator<Item = NaiveDate> {
    let first = NaiveDate::from_ymd_opt(start_year, 1, 1);
    let last = NaiveDate::from_ymd_opt(end_year, 12, 31);

    let mut next = match (first, last) {
        (Some(f), Some(l)) if f <= l => Some(f),
        _ => None,
    };

    std::iter::from_fn(move || {
        let current = next?;
        next = current.succ_opt().filter(|d| Some(*d) <= last);
        Some(current)
    })
}

use std::sync::OnceLock;

use chrono::{Duration, NaiveDate};
use regex::Regex;

use crate::data::Value;

const TRUTHY: &[&str] = &["1", "true", "si", "sì", "yes"];
const FALSY: &[&str] = &["0", "false", "no"];

/// Two-digit years below this pivot land in the 2000s, the rest in the 1900s.
const TWO_DIGIT_YEAR_PIVOT: u32 = 70;

fn iso_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}").expect("valid ISO date regex"))
}

fn day_month_year_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{1,2})[/\-.](\d{1,2})[/\-.](\d{4}|\d{2})$")
            .expect("valid day/month/year regex")
    })
}

/// Broad family of a declared SQL column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Integer,
    Real,
    Boolean,
    Date,
    Text,
}

impl TypeFamily {
    pub fn of(sql_type: &str) -> Self {
        let upper = sql_type.trim().to_ascii_uppercase();
        if upper.contains("BOOL") {
            TypeFamily::Boolean
        } else if upper.contains("DATE") || upper.contains("TIMESTAMP") {
            TypeFamily::Date
        } else if upper.contains("INT") {
            TypeFamily::Integer
        } else if ["REAL", "NUMERIC", "DECIMAL", "FLOAT", "DOUBLE", "MONEY"]
            .iter()
            .any(|token| upper.contains(token))
        {
            TypeFamily::Real
        } else {
            TypeFamily::Text
        }
    }

    pub fn is_textual(self) -> bool {
        matches!(self, TypeFamily::Text)
    }
}

/// Normalizes a textual date into `YYYY-MM-DD` where the input is recognised.
///
/// Accepted shapes: ISO dates (returned unchanged), `D/M/YYYY` and `D-M-YY`
/// (any of `/`, `-`, `.` as separator) and bare integers, read as spreadsheet
/// serial dates counted from 1899-12-30. Anything else is returned unchanged.
pub fn normalize_date(raw: &str) -> String {
    let value = raw.trim();
    if value.is_empty() || iso_date_regex().is_match(value) {
        return value.to_string();
    }
    if let Some(caps) = day_month_year_regex().captures(value) {
        let day: u32 = caps[1].parse().unwrap_or(0);
        let month: u32 = caps[2].parse().unwrap_or(0);
        let year_token = &caps[3];
        let mut year: i32 = year_token.parse().unwrap_or(0);
        if year_token.len() == 2 {
            year += if (year as u32) < TWO_DIGIT_YEAR_PIVOT {
                2000
            } else {
                1900
            };
        }
        return match NaiveDate::from_ymd_opt(year, month, day) {
            Some(date) => date.format("%Y-%m-%d").to_string(),
            None => value.to_string(),
        };
    }
    if value.bytes().all(|b| b.is_ascii_digit()) {
        if let Some(date) = serial_to_date(value) {
            return date.format("%Y-%m-%d").to_string();
        }
    }
    value.to_string()
}

fn serial_to_date(value: &str) -> Option<NaiveDate> {
    let days: i64 = value.parse().ok()?;
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::try_days(days)?)
}

/// Parses a locale-formatted number such as `€ 1.234,56` or `0,25 €/kWh`.
///
/// When both `,` and `.` appear, `.` is a thousands separator and `,` the
/// decimal mark. Surplus dots are collapsed so only the last one remains.
pub fn normalize_number(raw: &str) -> Option<f64> {
    let mut cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();
    if cleaned.contains(',') && cleaned.contains('.') {
        cleaned.retain(|c| c != '.');
    }
    let mut cleaned = cleaned.replace(',', ".");
    if cleaned.matches('.').count() > 1 {
        if let Some(last) = cleaned.rfind('.') {
            let (integer, fraction) = cleaned.split_at(last);
            cleaned = format!("{}{}", integer.replace('.', ""), fraction);
        }
    }
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Maps Italian/English yes/no tokens onto booleans.
pub fn normalize_boolean(raw: &str) -> Option<bool> {
    let lowered = raw.trim().to_lowercase();
    if TRUTHY.contains(&lowered.as_str()) {
        Some(true)
    } else if FALSY.contains(&lowered.as_str()) {
        Some(false)
    } else {
        None
    }
}

/// Coerces `raw` according to the declared type of the destination column.
pub fn normalize_for_column(raw: &str, sql_type: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    match TypeFamily::of(sql_type) {
        TypeFamily::Integer => match normalize_number(trimmed) {
            Some(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => Value::Integer(n as i64),
            Some(n) => Value::Real(n),
            None => Value::Null,
        },
        TypeFamily::Real => normalize_number(trimmed).map_or(Value::Null, Value::Real),
        TypeFamily::Boolean => {
            normalize_boolean(trimmed).map_or(Value::Null, |b| Value::Integer(i64::from(b)))
        }
        TypeFamily::Date => Value::Text(normalize_date(trimmed)),
        TypeFamily::Text => Value::Text(trimmed.to_string()),
    }
}

//! Lenient per-column extraction from legacy rows.
//!
//! The legacy tables are inconsistently typed: ids arrive as BIGINT or INT,
//! odds as INT or TEXT, dates as DATE, TIMESTAMPTZ or TEXT in two formats.
//! Each helper tries the native decodings first and falls back to text
//! parsing; a value that survives none of them produces an error *reason*
//! (the mapper turns it into a rejected row, never a failed step). A missing
//! column is an error for `req_*` helpers and `None` for `opt_*` ones.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;

fn column_missing(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::ColumnNotFound(_))
}

pub fn req_i64(row: &PgRow, col: &str) -> Result<i64, String> {
    if let Ok(v) = row.try_get::<i64, _>(col) {
        return Ok(v);
    }
    if let Ok(v) = row.try_get::<i32, _>(col) {
        return Ok(i64::from(v));
    }
    match row.try_get::<Option<String>, _>(col) {
        Ok(Some(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("column {col}: cannot parse {s:?} as integer")),
        Ok(None) => Err(format!("column {col}: NULL where integer required")),
        Err(e) => Err(format!("column {col}: {e}")),
    }
}

pub fn req_text(row: &PgRow, col: &str) -> Result<String, String> {
    match row.try_get::<Option<String>, _>(col) {
        Ok(Some(s)) if !s.trim().is_empty() => Ok(s),
        Ok(_) => Err(format!("column {col}: NULL/empty where text required")),
        Err(e) => Err(format!("column {col}: {e}")),
    }
}

pub fn opt_text(row: &PgRow, col: &str) -> Option<String> {
    row.try_get::<Option<String>, _>(col)
        .ok()
        .flatten()
        .filter(|s| !s.trim().is_empty())
}

/// External reference ids arrive as TEXT in some sources and BIGINT in
/// others (e.g. MLB gamePk). Normalize to text.
pub fn opt_ref_id(row: &PgRow, col: &str) -> Option<String> {
    if let Some(s) = opt_text(row, col) {
        return Some(s);
    }
    if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(col) {
        return Some(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(col) {
        return Some(v.to_string());
    }
    None
}

pub fn opt_i32(row: &PgRow, col: &str) -> Result<Option<i32>, String> {
    if let Ok(v) = row.try_get::<Option<i32>, _>(col) {
        return Ok(v);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(col) {
        return Ok(v.map(|x| x as i32));
    }
    match row.try_get::<Option<String>, _>(col) {
        Ok(None) => Ok(None),
        Ok(Some(s)) => {
            let t = s.trim();
            if t.is_empty() {
                return Ok(None);
            }
            t.parse::<i32>()
                .map(Some)
                .map_err(|_| format!("column {col}: cannot parse {t:?} as integer"))
        }
        Err(e) if column_missing(&e) => Ok(None),
        Err(e) => Err(format!("column {col}: {e}")),
    }
}

pub fn opt_f64(row: &PgRow, col: &str) -> Result<Option<f64>, String> {
    if let Ok(v) = row.try_get::<Option<f64>, _>(col) {
        return Ok(v);
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(col) {
        return Ok(v.map(f64::from));
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(col) {
        return Ok(v.map(|x| x as f64));
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(col) {
        return Ok(v.map(f64::from));
    }
    match row.try_get::<Option<String>, _>(col) {
        Ok(None) => Ok(None),
        Ok(Some(s)) => {
            let t = s.trim();
            if t.is_empty() {
                return Ok(None);
            }
            t.parse::<f64>()
                .map(Some)
                .map_err(|_| format!("column {col}: cannot parse {t:?} as number"))
        }
        Err(e) if column_missing(&e) => Ok(None),
        Err(e) => Err(format!("column {col}: {e}")),
    }
}

pub fn opt_bool(row: &PgRow, col: &str) -> Option<bool> {
    if let Ok(v) = row.try_get::<Option<bool>, _>(col) {
        return v;
    }
    if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(col) {
        return Some(v != 0);
    }
    if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(col) {
        return Some(v != 0);
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(col) {
        return match s.trim().to_ascii_lowercase().as_str() {
            "t" | "true" | "1" | "yes" | "y" => Some(true),
            "f" | "false" | "0" | "no" | "n" => Some(false),
            _ => None,
        };
    }
    None
}

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

fn parse_date_text(t: &str) -> Option<NaiveDate> {
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(t, fmt) {
            return Some(d);
        }
    }
    // Timestamp-shaped strings: take the date part.
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.date_naive());
    }
    None
}

pub fn req_date(row: &PgRow, col: &str) -> Result<NaiveDate, String> {
    match opt_date(row, col)? {
        Some(d) => Ok(d),
        None => Err(format!("column {col}: NULL where date required")),
    }
}

pub fn opt_date(row: &PgRow, col: &str) -> Result<Option<NaiveDate>, String> {
    if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(col) {
        return Ok(v);
    }
    if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(col) {
        return Ok(v.map(|dt| dt.date_naive()));
    }
    match row.try_get::<Option<String>, _>(col) {
        Ok(None) => Ok(None),
        Ok(Some(s)) => {
            let t = s.trim();
            if t.is_empty() {
                return Ok(None);
            }
            parse_date_text(t)
                .map(Some)
                .ok_or_else(|| format!("column {col}: cannot parse {t:?} as date"))
        }
        Err(e) if column_missing(&e) => Ok(None),
        Err(e) => Err(format!("column {col}: {e}")),
    }
}

pub fn opt_ts(row: &PgRow, col: &str) -> Result<Option<DateTime<Utc>>, String> {
    if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(col) {
        return Ok(v);
    }
    if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(col) {
        return Ok(v.map(|ndt| ndt.and_utc()));
    }
    match row.try_get::<Option<String>, _>(col) {
        Ok(None) => Ok(None),
        Ok(Some(s)) => {
            let t = s.trim();
            if t.is_empty() {
                return Ok(None);
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
                return Ok(Some(dt.with_timezone(&Utc)));
            }
            if let Ok(ndt) = NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S") {
                return Ok(Some(ndt.and_utc()));
            }
            Err(format!("column {col}: cannot parse {t:?} as timestamp"))
        }
        Err(e) if column_missing(&e) => Ok(None),
        Err(e) => Err(format!("column {col}: {e}")),
    }
}

pub fn opt_json(row: &PgRow, col: &str) -> Option<serde_json::Value> {
    if let Ok(Some(v)) = row.try_get::<Option<serde_json::Value>, _>(col) {
        return Some(v);
    }
    if let Some(s) = opt_text(row, col) {
        return serde_json::from_str(&s).ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_text_formats() {
        let d = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        assert_eq!(parse_date_text("2024-04-01"), Some(d));
        assert_eq!(parse_date_text("04/01/2024"), Some(d));
        assert_eq!(parse_date_text("2024/04/01"), Some(d));
        assert_eq!(parse_date_text("2024-04-01T19:05:00Z"), Some(d));
        assert_eq!(parse_date_text("opening day"), None);
    }
}

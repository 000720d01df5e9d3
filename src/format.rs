//! Turning decoded cells into display text, and naming the command tag of
//! statements that return no rows.

use crate::model::{DisplayRow, Interval, Value};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer};

pub fn displayable_rows(rows: Vec<Vec<Value>>) -> Vec<DisplayRow> {
    rows.into_iter()
        .map(|row| row.iter().map(display_value).collect())
        .collect()
}

/// Display text for one cell; `None` for SQL NULL.
pub fn display_value(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::Bool(b) => b.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Real(f) => non_finite(f64::from(*f)).unwrap_or_else(|| f.to_string()),
        Value::Float(f) => non_finite(*f).unwrap_or_else(|| f.to_string()),
        Value::Numeric(s) | Value::Text(s) => s.clone(),
        Value::Bytes(b) => format!("<binary: {} bytes>", b.len()),
        Value::Uuid(u) => u.to_string(),
        Value::Json(j) => j.to_string(),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::Time(t) => t.format("%H:%M:%S%.f").to_string(),
        Value::TimeTz { time, offset_secs } => {
            format!("{}{}", time.format("%H:%M:%S%.f"), format_offset(*offset_secs))
        }
        Value::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        Value::TimestampTz(ts) => ts.format("%Y-%m-%d %H:%M:%S%.f+00:00").to_string(),
        Value::Interval(iv) => format_interval(iv),
        Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(json_value).collect()).to_string()
        }
        Value::Unsupported(ty) => format!("<unsupported type: {ty}>"),
    };
    Some(text)
}

fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(n) => serde_json::Value::from(*n),
        Value::Real(_) | Value::Float(_) => {
            let text = display_value(value).unwrap_or_default();
            text.parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::String(text))
        }
        Value::Json(j) => j.clone(),
        other => display_value(other)
            .map(serde_json::Value::String)
            .unwrap_or(serde_json::Value::Null),
    }
}

/// Server spelling of the float values Rust prints differently.
fn non_finite(f: f64) -> Option<String> {
    let text = if f.is_nan() {
        "NaN"
    } else if f == f64::INFINITY {
        "Infinity"
    } else if f == f64::NEG_INFINITY {
        "-Infinity"
    } else {
        return None;
    };
    Some(text.to_string())
}

/// `+02`, `+05:30` or `-03:00:15`, as the server prints TIMETZ offsets.
fn format_offset(secs: i32) -> String {
    let sign = if secs < 0 { '-' } else { '+' };
    let abs = secs.unsigned_abs();
    let (hours, minutes, seconds) = (abs / 3600, abs / 60 % 60, abs % 60);
    match (minutes, seconds) {
        (0, 0) => format!("{sign}{hours:02}"),
        (_, 0) => format!("{sign}{hours:02}:{minutes:02}"),
        _ => format!("{sign}{hours:02}:{minutes:02}:{seconds:02}"),
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("{n} {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

fn format_interval(iv: &Interval) -> String {
    let mut parts = Vec::new();
    let years = (iv.months / 12) as i64;
    let months = (iv.months % 12) as i64;
    if years != 0 {
        parts.push(plural(years, "year"));
    }
    if months != 0 {
        parts.push(plural(months, "mon"));
    }
    if iv.days != 0 {
        parts.push(plural(iv.days as i64, "day"));
    }

    if iv.micros != 0 || parts.is_empty() {
        let sign = if iv.micros < 0 { "-" } else { "" };
        let total = iv.micros.unsigned_abs();
        let secs = total / 1_000_000;
        let frac = total % 1_000_000;
        let mut time = format!(
            "{sign}{:02}:{:02}:{:02}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60
        );
        if frac != 0 {
            let digits = format!("{frac:06}");
            time.push('.');
            time.push_str(digits.trim_end_matches('0'));
        }
        parts.push(time);
    }

    parts.join(" ")
}

/// Status text for a statement that produced no row set, in the shape of
/// the server's command tag (`SET`, `INSERT 0 1`, `CREATE TABLE`, ...).
pub fn command_tag(sql: &str, affected: u64) -> String {
    let words = leading_words(sql, 6);
    let Some(first) = words.first() else {
        return "OK".to_string();
    };

    match first.as_str() {
        "INSERT" => format!("INSERT 0 {affected}"),
        "UPDATE" | "DELETE" | "MERGE" | "SELECT" | "MOVE" | "FETCH" | "COPY" => {
            format!("{first} {affected}")
        }
        "CREATE" | "DROP" | "ALTER" => {
            let mut object = words[1..].iter().skip_while(|w| {
                matches!(
                    w.as_str(),
                    "OR" | "REPLACE"
                        | "TEMP"
                        | "TEMPORARY"
                        | "UNLOGGED"
                        | "UNIQUE"
                        | "GLOBAL"
                        | "LOCAL"
                )
            });
            match object.next() {
                Some(w) if w == "MATERIALIZED" || w == "FOREIGN" => match object.next() {
                    Some(next) => format!("{first} {w} {next}"),
                    None => format!("{first} {w}"),
                },
                Some(w) => format!("{first} {w}"),
                None => first.clone(),
            }
        }
        "DECLARE" => "DECLARE CURSOR".to_string(),
        _ => first.clone(),
    }
}

/// Up to `limit` leading unquoted words, upper-cased, skipping comments.
fn leading_words(sql: &str, limit: usize) -> Vec<String> {
    let dialect = PostgreSqlDialect {};
    let Ok(tokens) = Tokenizer::new(&dialect, sql).tokenize() else {
        return sql
            .split_whitespace()
            .take(limit)
            .map(|w| w.to_ascii_uppercase())
            .collect();
    };

    let mut out = Vec::new();
    for token in tokens {
        match token {
            Token::Whitespace(_) => continue,
            Token::Word(w) if w.quote_style.is_none() => {
                out.push(w.value.to_ascii_uppercase());
                if out.len() == limit {
                    break;
                }
            }
            _ => break,
        }
    }
    out
}

//! Display formatting of cell values.
//!
//! Only the number patterns the engine propagates are understood:
//! `0`, `0.00`, `0%`, `0.00%`, `#,##0`, `#,##0.00`, and simple date
//! patterns built from `yyyy`, `yy`, `mm`, `m`, `dd`, `d`. Anything else
//! falls back to the unformatted rendering.

use chrono::Datelike;

use crate::{LiteralValue, serial_to_datetime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NumberPattern {
    decimals: usize,
    thousands: bool,
    percent: bool,
}

fn parse_number_pattern(format: &str) -> Option<NumberPattern> {
    let (body, percent) = match format.strip_suffix('%') {
        Some(body) => (body, true),
        None => (format, false),
    };
    let (body, thousands) = match body.strip_prefix("#,##") {
        Some(rest) => (rest, true),
        None => (body, false),
    };
    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (body, None),
    };
    if int_part != "0" {
        return None;
    }
    let decimals = match frac_part {
        Some(f) if !f.is_empty() && f.bytes().all(|b| b == b'0') => f.len(),
        Some(_) => return None,
        None => 0,
    };
    Some(NumberPattern {
        decimals,
        thousands,
        percent,
    })
}

fn group_thousands(int_digits: &str) -> String {
    let mut out = String::with_capacity(int_digits.len() + int_digits.len() / 3);
    for (i, ch) in int_digits.chars().enumerate() {
        if i > 0 && (int_digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn apply_number_pattern(value: f64, pattern: NumberPattern) -> String {
    let scaled = if pattern.percent { value * 100.0 } else { value };
    let rendered = format!("{:.*}", pattern.decimals, scaled.abs());
    let rendered = if pattern.thousands {
        match rendered.split_once('.') {
            Some((i, f)) => format!("{}.{f}", group_thousands(i)),
            None => group_thousands(&rendered),
        }
    } else {
        rendered
    };
    let is_zero = rendered.bytes().all(|b| matches!(b, b'0' | b'.' | b','));
    let sign = if scaled < 0.0 && !is_zero { "-" } else { "" };
    let suffix = if pattern.percent { "%" } else { "" };
    format!("{sign}{rendered}{suffix}")
}

fn is_date_pattern(format: &str) -> bool {
    let lower = format.to_ascii_lowercase();
    lower.contains('y') || lower.contains('d')
}

fn apply_date_pattern(value: f64, format: &str) -> Option<String> {
    let dt = serial_to_datetime(value)?;
    let lower = format.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut out = String::new();
    let mut i = 0;
    while i < bytes.len() {
        let ch = bytes[i];
        let run = bytes[i..].iter().take_while(|&&b| b == ch).count();
        match ch {
            b'y' if run >= 4 => out.push_str(&format!("{:04}", dt.year())),
            b'y' => out.push_str(&format!("{:02}", dt.year().rem_euclid(100))),
            b'm' if run >= 2 => out.push_str(&format!("{:02}", dt.month())),
            b'm' => out.push_str(&dt.month().to_string()),
            b'd' if run >= 2 => out.push_str(&format!("{:02}", dt.day())),
            b'd' => out.push_str(&dt.day().to_string()),
            _ => {
                out.push_str(&format[i..i + run]);
            }
        }
        i += run;
    }
    Some(out)
}

fn format_number(value: f64, format: Option<&str>) -> String {
    match format {
        Some(fmt) => {
            if let Some(pattern) = parse_number_pattern(fmt) {
                apply_number_pattern(value, pattern)
            } else if is_date_pattern(fmt) {
                apply_date_pattern(value, fmt).unwrap_or_else(|| value.to_string())
            } else {
                value.to_string()
            }
        }
        None => value.to_string(),
    }
}

/// Render a value the way a cell displays it.
pub fn format_value(value: &LiteralValue, format: Option<&str>) -> String {
    match value {
        LiteralValue::Int(i) => format_number(*i as f64, format),
        LiteralValue::Number(n) => format_number(*n, format),
        LiteralValue::Array(rows) => rows
            .first()
            .and_then(|r| r.first())
            .map(|v| format_value(v, format))
            .unwrap_or_default(),
        other => other.to_string(),
    }
}

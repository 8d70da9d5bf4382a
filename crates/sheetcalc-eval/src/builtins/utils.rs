use crate::traits::ArgumentHandle;
use sheetcalc_common::{ExcelError, ExcelErrorKind, LiteralValue};

pub fn coerce_num(v: &LiteralValue) -> Result<f64, ExcelError> {
    match v {
        LiteralValue::Number(n) => Ok(*n),
        LiteralValue::Int(i) => Ok(*i as f64),
        LiteralValue::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
        LiteralValue::Empty => Ok(0.0),
        LiteralValue::Text(s) if s.trim().is_empty() => Ok(0.0),
        LiteralValue::Text(s) => s.trim().parse::<f64>().map_err(|_| {
            ExcelError::new(ExcelErrorKind::Value)
                .with_message(format!("The value '{s}' cannot be converted to a number."))
        }),
        LiteralValue::Error(e) => Err(e.clone()),
        LiteralValue::Array(_) => Err(ExcelError::new(ExcelErrorKind::Value)
            .with_message("Expected a single value, got an array.")),
    }
}

pub fn coerce_text(v: &LiteralValue) -> Result<String, ExcelError> {
    match v {
        LiteralValue::Error(e) => Err(e.clone()),
        LiteralValue::Array(_) => Err(ExcelError::new(ExcelErrorKind::Value)
            .with_message("Expected a single value, got an array.")),
        other => Ok(other.to_string()),
    }
}

pub fn coerce_bool(v: &LiteralValue) -> Result<bool, ExcelError> {
    match v {
        LiteralValue::Boolean(b) => Ok(*b),
        LiteralValue::Number(n) => Ok(*n != 0.0),
        LiteralValue::Int(i) => Ok(*i != 0),
        LiteralValue::Empty => Ok(false),
        LiteralValue::Text(s) if s.eq_ignore_ascii_case("TRUE") => Ok(true),
        LiteralValue::Text(s) if s.eq_ignore_ascii_case("FALSE") => Ok(false),
        LiteralValue::Text(s) => Err(ExcelError::new(ExcelErrorKind::Value)
            .with_message(format!("The value '{s}' cannot be converted to a boolean."))),
        LiteralValue::Error(e) => Err(e.clone()),
        LiteralValue::Array(_) => Err(ExcelError::new(ExcelErrorKind::Value)
            .with_message("Expected a single value, got an array.")),
    }
}

/// Visit every value an argument contributes. `from_range` is true for
/// values that come out of a reference or a matrix, where non-numeric
/// entries are skipped rather than coerced.
pub fn for_each_value<F>(args: &[ArgumentHandle], mut f: F) -> Result<(), ExcelError>
where
    F: FnMut(&LiteralValue, bool) -> Result<(), ExcelError>,
{
    for arg in args {
        if arg.is_omitted() {
            continue;
        }
        let v = arg.value()?;
        match v.as_ref() {
            LiteralValue::Array(rows) => {
                for item in rows.iter().flatten() {
                    f(item, true)?;
                }
            }
            other => f(other, arg.is_reference())?,
        }
    }
    Ok(())
}

/// Numbers of all arguments, with aggregate semantics: errors propagate,
/// text and booleans inside ranges are ignored, direct scalars are coerced.
pub fn collect_numbers(args: &[ArgumentHandle]) -> Result<Vec<f64>, ExcelError> {
    let mut out = Vec::new();
    for_each_value(args, |v, from_range| {
        match v {
            LiteralValue::Error(e) => return Err(e.clone()),
            LiteralValue::Number(n) => out.push(*n),
            LiteralValue::Int(i) => out.push(*i as f64),
            _ if from_range => {}
            other => out.push(coerce_num(other)?),
        }
        Ok(())
    })?;
    Ok(out)
}

#![cfg(test)]
//! Test-only functions and engine helpers keyed by A1 strings.

use crate::builtins::utils::{coerce_num, collect_numbers};
use crate::engine::{Engine, EvalConfig};
use crate::function::{ArgSpec, ComputedFormat, Function};
use crate::traits::{ArgumentHandle, EvaluationContext};
use sheetcalc_common::{ExcelError, ExcelErrorKind, LiteralValue, Position, SheetId, Zone, parse_a1};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

static FILL: [ArgSpec; 3] = [
    ArgSpec::scalar("cols"),
    ArgSpec::scalar("rows"),
    ArgSpec::scalar("value"),
];
static DIMS: [ArgSpec; 2] = [ArgSpec::scalar("rows"), ArgSpec::scalar("cols")];
static VALUES: [ArgSpec; 1] = [ArgSpec::range("value")];

fn size(v: &LiteralValue) -> Result<usize, ExcelError> {
    let n = coerce_num(v)?;
    if n < 1.0 {
        return Err(ExcelError::new(ExcelErrorKind::Value).with_message("Size must be positive."));
    }
    Ok(n as usize)
}

/// `MFILL(cols, rows, value)`: a `rows x cols` matrix filled with `value`.
#[derive(Debug)]
pub struct MfillFn;

impl Function for MfillFn {
    fn name(&self) -> &'static str {
        "MFILL"
    }
    fn min_args(&self) -> usize {
        3
    }
    fn arg_schema(&self) -> &'static [ArgSpec] {
        &FILL
    }
    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _ctx: &dyn EvaluationContext,
    ) -> Result<LiteralValue, ExcelError> {
        let cols = size(&args[0].scalar()?)?;
        let rows = size(&args[1].scalar()?)?;
        let v = args[2].scalar()?;
        Ok(LiteralValue::Array(vec![vec![v; cols]; rows]))
    }
}

/// `MATRIX(rows, cols)`: `rows x cols` matrix numbered 1.. row-major.
#[derive(Debug)]
pub struct MatrixFn;

impl Function for MatrixFn {
    fn name(&self) -> &'static str {
        "MATRIX"
    }
    fn min_args(&self) -> usize {
        2
    }
    fn arg_schema(&self) -> &'static [ArgSpec] {
        &DIMS
    }
    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _ctx: &dyn EvaluationContext,
    ) -> Result<LiteralValue, ExcelError> {
        let rows = size(&args[0].scalar()?)?;
        let cols = size(&args[1].scalar()?)?;
        Ok(LiteralValue::Array(
            (0..rows)
                .map(|r| {
                    (0..cols)
                        .map(|c| LiteralValue::Number((r * cols + c + 1) as f64))
                        .collect()
                })
                .collect(),
        ))
    }
}

/// `MATRIX.2.2()`: a 2x2 matrix with per-cell formats.
#[derive(Debug)]
pub struct FormattedMatrixFn;

impl Function for FormattedMatrixFn {
    fn name(&self) -> &'static str {
        "MATRIX.2.2"
    }
    fn eval<'a, 'b>(
        &self,
        _args: &'a [ArgumentHandle<'a, 'b>],
        _ctx: &dyn EvaluationContext,
    ) -> Result<LiteralValue, ExcelError> {
        Ok(LiteralValue::Array(vec![
            vec![LiteralValue::Number(0.5), LiteralValue::Number(1234.5)],
            vec![LiteralValue::Number(2.0), LiteralValue::Number(0.25)],
        ]))
    }
    fn compute_format<'a, 'b>(&self, _args: &'a [ArgumentHandle<'a, 'b>]) -> ComputedFormat {
        ComputedFormat::Matrix(vec![
            vec![Some("0%".into()), Some("#,##0.00".into())],
            vec![None, Some("0.00%".into())],
        ])
    }
}

/// `SIMPLE.VALUE()`: a scalar with a format matrix, which is a shape error.
#[derive(Debug)]
pub struct MismatchedFormatFn;

impl Function for MismatchedFormatFn {
    fn name(&self) -> &'static str {
        "SIMPLE.VALUE"
    }
    fn eval<'a, 'b>(
        &self,
        _args: &'a [ArgumentHandle<'a, 'b>],
        _ctx: &dyn EvaluationContext,
    ) -> Result<LiteralValue, ExcelError> {
        Ok(LiteralValue::Number(1.0))
    }
    fn compute_format<'a, 'b>(&self, _args: &'a [ArgumentHandle<'a, 'b>]) -> ComputedFormat {
        ComputedFormat::Matrix(vec![vec![Some("0%".into()); 2]; 2])
    }
}

/// `COUNTED(values...)`: `SUM` that counts its invocations.
#[derive(Debug, Default)]
pub struct CountingFn {
    pub calls: Arc<AtomicUsize>,
}

impl CountingFn {
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Function for CountingFn {
    fn name(&self) -> &'static str {
        "COUNTED"
    }
    fn variadic(&self) -> bool {
        true
    }
    fn arg_schema(&self) -> &'static [ArgSpec] {
        &VALUES
    }
    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _ctx: &dyn EvaluationContext,
    ) -> Result<LiteralValue, ExcelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(LiteralValue::Number(collect_numbers(args)?.iter().sum()))
    }
}

/// Engine with the default configuration and the test functions.
pub fn engine() -> Engine {
    engine_with(EvalConfig::default())
}

pub fn engine_with(config: EvalConfig) -> Engine {
    let mut e = Engine::new(config);
    e.register_function(Arc::new(MfillFn));
    e.register_function(Arc::new(MatrixFn));
    e.register_function(Arc::new(FormattedMatrixFn));
    e.register_function(Arc::new(MismatchedFormatFn));
    e
}

/// Engine whose single sheet is `rows x cols`.
pub fn small_engine(rows: u32, cols: u32) -> Engine {
    engine_with(EvalConfig {
        default_rows: rows,
        default_cols: cols,
        ..EvalConfig::default()
    })
}

/// Register a fresh `COUNTED` and return its call counter.
pub fn with_counter(e: &mut Engine) -> Arc<AtomicUsize> {
    let f = CountingFn::default();
    let calls = Arc::clone(&f.calls);
    e.register_function(Arc::new(f));
    calls
}

pub fn pos_on(sheet: SheetId, a1: &str) -> Position {
    let coord = parse_a1(a1).unwrap_or_else(|| panic!("bad A1 reference {a1}"));
    Position::new(sheet, coord.row(), coord.col())
}

/// Position on the first sheet.
pub fn pos(a1: &str) -> Position {
    pos_on(0, a1)
}

/// `"A1"` or `"A1:B2"` on `sheet`.
pub fn zone_on(sheet: SheetId, text: &str) -> Zone {
    match text.split_once(':') {
        Some((a, b)) => {
            let (a, b) = (pos_on(sheet, a), pos_on(sheet, b));
            Zone::new(sheet, a.row, a.col, b.row, b.col)
        }
        None => Zone::single(pos_on(sheet, text)),
    }
}

pub fn zone(text: &str) -> Zone {
    zone_on(0, text)
}

pub fn set(e: &mut Engine, a1: &str, text: &str) {
    set_on(e, 0, a1, text);
}

pub fn set_on(e: &mut Engine, sheet: SheetId, a1: &str, text: &str) {
    let p = pos_on(sheet, a1);
    e.set_cell_content(sheet, p.row, p.col, text).unwrap();
}

pub fn value(e: &Engine, a1: &str) -> LiteralValue {
    e.get_cell_value(pos(a1))
}

pub fn text(e: &Engine, a1: &str) -> String {
    e.get_cell_text(pos(a1))
}

pub fn content(e: &Engine, a1: &str) -> String {
    e.get_cell_content(pos(a1))
}

pub fn num(n: f64) -> LiteralValue {
    LiteralValue::Number(n)
}

/// The error at `a1`, panicking when the cell holds a value.
pub fn error_at(e: &Engine, a1: &str) -> ExcelError {
    match value(e, a1) {
        LiteralValue::Error(err) => err,
        other => panic!("expected an error in {a1}, got {other:?}"),
    }
}

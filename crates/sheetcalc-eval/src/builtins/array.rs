use crate::function::{ArgSpec, ComputedFormat, Function};
use crate::traits::{ArgumentHandle, EvaluationContext};
use sheetcalc_common::{ExcelError, LiteralValue};
use std::sync::Arc;

fn transpose<T: Clone>(rows: &[Vec<T>]) -> Vec<Vec<T>> {
    let width = rows.first().map_or(0, Vec::len);
    (0..width)
        .map(|c| rows.iter().map(|row| row[c].clone()).collect())
        .collect()
}

/* ───────────────────────── TRANSPOSE() ──────────────────────────── */

static ARRAY: [ArgSpec; 1] = [ArgSpec::range("array")];

/// Swaps rows and columns. Cell formats travel with their values.
#[derive(Debug)]
pub struct TransposeFn;

impl Function for TransposeFn {
    fn name(&self) -> &'static str {
        "TRANSPOSE"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn arg_schema(&self) -> &'static [ArgSpec] {
        &ARRAY
    }
    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _ctx: &dyn EvaluationContext,
    ) -> Result<LiteralValue, ExcelError> {
        let range = args[0].range()?;
        let data = range.materialise();
        if data.len() == 1 && data[0].len() == 1 {
            return Ok(data[0][0].clone());
        }
        Ok(LiteralValue::Array(transpose(&data)))
    }

    fn compute_format<'a, 'b>(&self, args: &'a [ArgumentHandle<'a, 'b>]) -> ComputedFormat {
        match args.first().map(|a| a.format()) {
            Some(ComputedFormat::Matrix(m)) if m.len() == 1 && m[0].len() == 1 => {
                ComputedFormat::Scalar(m[0][0].clone())
            }
            Some(ComputedFormat::Matrix(m)) => ComputedFormat::Matrix(transpose(&m)),
            Some(scalar) => scalar,
            None => ComputedFormat::none(),
        }
    }
}

pub fn register_builtins() {
    crate::function_registry::register(Arc::new(TransposeFn));
}

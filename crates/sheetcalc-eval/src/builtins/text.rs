use super::utils::{coerce_text, for_each_value};
use crate::function::{ArgSpec, Function};
use crate::traits::{ArgumentHandle, EvaluationContext};
use sheetcalc_common::{ExcelError, LiteralValue};
use std::sync::Arc;

/* ─────────────────────────── CONCAT() ───────────────────────────── */

static TEXTS: [ArgSpec; 1] = [ArgSpec::range("text")];

/// Joins every value, ranges flattened row by row.
#[derive(Debug)]
pub struct ConcatFn;

impl Function for ConcatFn {
    fn name(&self) -> &'static str {
        "CONCAT"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn variadic(&self) -> bool {
        true
    }
    fn arg_schema(&self) -> &'static [ArgSpec] {
        &TEXTS
    }
    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _ctx: &dyn EvaluationContext,
    ) -> Result<LiteralValue, ExcelError> {
        let mut out = String::new();
        for_each_value(args, |v, _| {
            out.push_str(&coerce_text(v)?);
            Ok(())
        })?;
        Ok(LiteralValue::Text(out))
    }
}

pub fn register_builtins() {
    crate::function_registry::register(Arc::new(ConcatFn));
}

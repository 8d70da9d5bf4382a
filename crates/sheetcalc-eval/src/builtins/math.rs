use super::utils::{coerce_num, collect_numbers, for_each_value};
use crate::function::{ArgSpec, FnCaps, Function};
use crate::traits::{ArgumentHandle, EvaluationContext};
use sheetcalc_common::{ExcelError, ExcelErrorKind, LiteralValue};
use std::sync::Arc;

static VALUES: [ArgSpec; 1] = [ArgSpec::range("value")];
static SINGLE: [ArgSpec; 1] = [ArgSpec::scalar("value")];

/* ─────────────────────────── SUM() ──────────────────────────── */

/// Adds numeric values across scalars and ranges. Text and booleans inside
/// ranges are ignored; the first error encountered is returned.
#[derive(Debug)]
pub struct SumFn;

impl Function for SumFn {
    fn caps(&self) -> FnCaps {
        FnCaps::FORMAT_PASSTHROUGH
    }
    fn name(&self) -> &'static str {
        "SUM"
    }
    fn min_args(&self) -> usize {
        1
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
        Ok(LiteralValue::Number(collect_numbers(args)?.iter().sum()))
    }
}

/* ───────────────────────── AVERAGE() ────────────────────────── */

#[derive(Debug)]
pub struct AverageFn;

impl Function for AverageFn {
    fn caps(&self) -> FnCaps {
        FnCaps::FORMAT_PASSTHROUGH
    }
    fn name(&self) -> &'static str {
        "AVERAGE"
    }
    fn min_args(&self) -> usize {
        1
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
        let nums = collect_numbers(args)?;
        if nums.is_empty() {
            return Err(ExcelError::new(ExcelErrorKind::Div)
                .with_message("Evaluation of function AVERAGE caused a divide by zero error."));
        }
        Ok(LiteralValue::Number(nums.iter().sum::<f64>() / nums.len() as f64))
    }
}

/* ─────────────────────── MIN() / MAX() ──────────────────────── */

#[derive(Debug)]
pub struct MinFn;

impl Function for MinFn {
    fn caps(&self) -> FnCaps {
        FnCaps::FORMAT_PASSTHROUGH
    }
    fn name(&self) -> &'static str {
        "MIN"
    }
    fn min_args(&self) -> usize {
        1
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
        let nums = collect_numbers(args)?;
        Ok(LiteralValue::Number(
            nums.into_iter().reduce(f64::min).unwrap_or(0.0),
        ))
    }
}

#[derive(Debug)]
pub struct MaxFn;

impl Function for MaxFn {
    fn caps(&self) -> FnCaps {
        FnCaps::FORMAT_PASSTHROUGH
    }
    fn name(&self) -> &'static str {
        "MAX"
    }
    fn min_args(&self) -> usize {
        1
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
        let nums = collect_numbers(args)?;
        Ok(LiteralValue::Number(
            nums.into_iter().reduce(f64::max).unwrap_or(0.0),
        ))
    }
}

/* ─────────────────────────── COUNT() ────────────────────────── */

/// Counts numeric values. Errors and text inside ranges are skipped; direct
/// scalars count when they coerce to a number.
#[derive(Debug)]
pub struct CountFn;

impl Function for CountFn {
    fn name(&self) -> &'static str {
        "COUNT"
    }
    fn min_args(&self) -> usize {
        1
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
        let mut count = 0usize;
        for_each_value(args, |v, from_range| {
            match v {
                LiteralValue::Number(_) | LiteralValue::Int(_) => count += 1,
                LiteralValue::Text(_) | LiteralValue::Boolean(_) if !from_range => {
                    if coerce_num(v).is_ok() {
                        count += 1;
                    }
                }
                _ => {}
            }
            Ok(())
        })?;
        Ok(LiteralValue::Number(count as f64))
    }
}

/* ────────────────────────── MEDIAN() ────────────────────────── */

#[derive(Debug)]
pub struct MedianFn;

impl Function for MedianFn {
    fn caps(&self) -> FnCaps {
        FnCaps::FORMAT_PASSTHROUGH
    }
    fn name(&self) -> &'static str {
        "MEDIAN"
    }
    fn min_args(&self) -> usize {
        1
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
        let mut nums = collect_numbers(args)?;
        if nums.is_empty() {
            return Err(ExcelError::new(ExcelErrorKind::Num)
                .with_message("MEDIAN has no valid input data."));
        }
        nums.sort_by(|a, b| a.total_cmp(b));
        let mid = nums.len() / 2;
        let median = if nums.len() % 2 == 0 {
            (nums[mid - 1] + nums[mid]) / 2.0
        } else {
            nums[mid]
        };
        Ok(LiteralValue::Number(median))
    }
}

/* ─────────────────────────── ABS() ──────────────────────────── */

#[derive(Debug)]
pub struct AbsFn;

impl Function for AbsFn {
    fn caps(&self) -> FnCaps {
        FnCaps::FORMAT_PASSTHROUGH
    }
    fn name(&self) -> &'static str {
        "ABS"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn arg_schema(&self) -> &'static [ArgSpec] {
        &SINGLE
    }
    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _ctx: &dyn EvaluationContext,
    ) -> Result<LiteralValue, ExcelError> {
        let n = coerce_num(&args[0].scalar()?)?;
        Ok(LiteralValue::Number(n.abs()))
    }
}

pub fn register_builtins() {
    crate::function_registry::register(Arc::new(SumFn));
    crate::function_registry::register(Arc::new(AverageFn));
    crate::function_registry::register(Arc::new(MinFn));
    crate::function_registry::register(Arc::new(MaxFn));
    crate::function_registry::register(Arc::new(CountFn));
    crate::function_registry::register(Arc::new(MedianFn));
    crate::function_registry::register(Arc::new(AbsFn));
}

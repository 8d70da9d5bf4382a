// Logical functions: IF, AND, OR, NOT.

use super::utils::{coerce_bool, for_each_value};
use crate::function::{ArgSpec, FnCaps, Function};
use crate::traits::{ArgumentHandle, EvaluationContext};
use sheetcalc_common::{ExcelError, ExcelErrorKind, LiteralValue};
use std::sync::Arc;

/* ─────────────────────────── IF() ───────────────────────────────── */

static IF_ARGS: [ArgSpec; 3] = [
    ArgSpec::scalar("logical_test"),
    ArgSpec::range("value_if_true").optional(),
    ArgSpec::range("value_if_false").optional(),
];

/// Only the selected branch is evaluated. A missing false branch yields
/// `FALSE`, an omitted true branch yields `0`.
#[derive(Debug)]
pub struct IfFn;

impl Function for IfFn {
    fn caps(&self) -> FnCaps {
        FnCaps::SHORT_CIRCUIT
    }
    fn name(&self) -> &'static str {
        "IF"
    }
    fn min_args(&self) -> usize {
        2
    }
    fn arg_schema(&self) -> &'static [ArgSpec] {
        &IF_ARGS
    }
    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _ctx: &dyn EvaluationContext,
    ) -> Result<LiteralValue, ExcelError> {
        let cond = coerce_bool(&args[0].scalar()?)?;
        let branch = if cond { args.get(1) } else { args.get(2) };
        match branch {
            None => Ok(LiteralValue::Boolean(false)),
            Some(h) if h.is_omitted() => Ok(LiteralValue::Number(0.0)),
            Some(h) => Ok(h.value()?.into_owned()),
        }
    }
}

/* ─────────────────────────── AND() ──────────────────────────────── */

static LOGICALS: [ArgSpec; 1] = [ArgSpec::range("logical")];

/// Booleans and numbers collected from every argument. Text inside ranges is
/// skipped; direct text must read as TRUE/FALSE.
fn collect_logicals(args: &[ArgumentHandle], name: &str) -> Result<Vec<bool>, ExcelError> {
    let mut out = Vec::new();
    for_each_value(args, |v, from_range| {
        match v {
            LiteralValue::Error(e) => return Err(e.clone()),
            LiteralValue::Boolean(_) | LiteralValue::Number(_) | LiteralValue::Int(_) => {
                out.push(coerce_bool(v)?)
            }
            LiteralValue::Empty | LiteralValue::Text(_) if from_range => {}
            other => out.push(coerce_bool(other)?),
        }
        Ok(())
    })?;
    if out.is_empty() {
        return Err(ExcelError::new(ExcelErrorKind::Value)
            .with_message(format!("{name} received no logical values.")));
    }
    Ok(out)
}

#[derive(Debug)]
pub struct AndFn;

impl Function for AndFn {
    fn name(&self) -> &'static str {
        "AND"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn variadic(&self) -> bool {
        true
    }
    fn arg_schema(&self) -> &'static [ArgSpec] {
        &LOGICALS
    }
    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _ctx: &dyn EvaluationContext,
    ) -> Result<LiteralValue, ExcelError> {
        let values = collect_logicals(args, "AND")?;
        Ok(LiteralValue::Boolean(values.iter().all(|b| *b)))
    }
}

/* ─────────────────────────── OR() ───────────────────────────────── */

#[derive(Debug)]
pub struct OrFn;

impl Function for OrFn {
    fn name(&self) -> &'static str {
        "OR"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn variadic(&self) -> bool {
        true
    }
    fn arg_schema(&self) -> &'static [ArgSpec] {
        &LOGICALS
    }
    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _ctx: &dyn EvaluationContext,
    ) -> Result<LiteralValue, ExcelError> {
        let values = collect_logicals(args, "OR")?;
        Ok(LiteralValue::Boolean(values.iter().any(|b| *b)))
    }
}

/* ─────────────────────────── NOT() ──────────────────────────────── */

static NOT_ARGS: [ArgSpec; 1] = [ArgSpec::scalar("logical")];

#[derive(Debug)]
pub struct NotFn;

impl Function for NotFn {
    fn name(&self) -> &'static str {
        "NOT"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn arg_schema(&self) -> &'static [ArgSpec] {
        &NOT_ARGS
    }
    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        _ctx: &dyn EvaluationContext,
    ) -> Result<LiteralValue, ExcelError> {
        Ok(LiteralValue::Boolean(!coerce_bool(&args[0].scalar()?)?))
    }
}

pub fn register_builtins() {
    crate::function_registry::register(Arc::new(IfFn));
    crate::function_registry::register(Arc::new(AndFn));
    crate::function_registry::register(Arc::new(OrFn));
    crate::function_registry::register(Arc::new(NotFn));
}

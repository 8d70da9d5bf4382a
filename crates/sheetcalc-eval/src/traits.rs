//! sheetcalc-eval – core traits (object-safe)

use once_cell::unsync::OnceCell;
use std::borrow::Cow;
use std::fmt::Debug;
use std::sync::Arc;

use sheetcalc_parse::parser::{ASTNode, ASTNodeType, ReferenceType};

use crate::function::{ComputedFormat, Function};
use crate::interpreter::Interpreter;
use sheetcalc_common::{ExcelError, ExcelErrorKind, LiteralValue, Position, Zone};

/* ───────────────────────────── Range ───────────────────────────── */

pub trait Range: Debug {
    fn get(&self, row: usize, col: usize) -> LiteralValue;
    fn format(&self, row: usize, col: usize) -> Option<String>;
    fn dimensions(&self) -> (usize, usize);

    fn materialise(&self) -> Cow<'_, [Vec<LiteralValue>]> {
        let (rows, cols) = self.dimensions();
        Cow::Owned(
            (0..rows)
                .map(|r| (0..cols).map(|c| self.get(r, c)).collect())
                .collect(),
        )
    }

    fn formats(&self) -> Vec<Vec<Option<String>>> {
        let (rows, cols) = self.dimensions();
        (0..rows)
            .map(|r| (0..cols).map(|c| self.format(r, c)).collect())
            .collect()
    }

    fn iter_cells<'a>(&'a self) -> Box<dyn Iterator<Item = LiteralValue> + 'a> {
        let (rows, cols) = self.dimensions();
        Box::new((0..rows).flat_map(move |r| (0..cols).map(move |c| self.get(r, c))))
    }
}

/* blanket dyn passthrough */
impl Range for Box<dyn Range> {
    fn get(&self, r: usize, c: usize) -> LiteralValue {
        (**self).get(r, c)
    }
    fn format(&self, r: usize, c: usize) -> Option<String> {
        (**self).format(r, c)
    }
    fn dimensions(&self) -> (usize, usize) {
        (**self).dimensions()
    }
    fn materialise(&self) -> Cow<'_, [Vec<LiteralValue>]> {
        (**self).materialise()
    }
    fn iter_cells<'a>(&'a self) -> Box<dyn Iterator<Item = LiteralValue> + 'a> {
        (**self).iter_cells()
    }
}

/// Row-major values with optional per-cell formats.
#[derive(Debug, Clone)]
pub struct InMemoryRange {
    data: Vec<Vec<LiteralValue>>,
    formats: Option<Vec<Vec<Option<String>>>>,
}

impl InMemoryRange {
    pub fn new(data: Vec<Vec<LiteralValue>>) -> Self {
        Self {
            data,
            formats: None,
        }
    }

    pub fn with_formats(mut self, formats: Vec<Vec<Option<String>>>) -> Self {
        self.formats = Some(formats);
        self
    }
}

impl Range for InMemoryRange {
    fn get(&self, r: usize, c: usize) -> LiteralValue {
        self.data
            .get(r)
            .and_then(|row| row.get(c))
            .cloned()
            .unwrap_or(LiteralValue::Empty)
    }
    fn format(&self, r: usize, c: usize) -> Option<String> {
        self.formats
            .as_ref()
            .and_then(|f| f.get(r))
            .and_then(|row| row.get(c))
            .cloned()
            .flatten()
    }
    fn dimensions(&self) -> (usize, usize) {
        (self.data.len(), self.data.first().map_or(0, Vec::len))
    }
    fn materialise(&self) -> Cow<'_, [Vec<LiteralValue>]> {
        Cow::Borrowed(&self.data)
    }
}

/* ────────────────────── ArgumentHandle helpers ───────────────────── */

pub type CowValue<'a> = Cow<'a, LiteralValue>;

/// Lazy view of one function argument.
pub struct ArgumentHandle<'a, 'b> {
    node: &'a ASTNode,
    interp: &'a Interpreter<'b>,
    /// Value settled by the dispatcher for scalar arguments.
    settled: OnceCell<LiteralValue>,
}

fn single_value(v: LiteralValue) -> Result<LiteralValue, ExcelError> {
    match v {
        LiteralValue::Array(_) => {
            let (rows, cols) = v.dims();
            v.coerce_to_single_value().map_err(|_| {
                ExcelError::new(ExcelErrorKind::Error).with_message(format!(
                    "Expected a single value, got a {rows}x{cols} array."
                ))
            })
        }
        other => Ok(other),
    }
}

impl<'a, 'b> ArgumentHandle<'a, 'b> {
    pub(crate) fn new(node: &'a ASTNode, interp: &'a Interpreter<'b>) -> Self {
        Self {
            node,
            interp,
            settled: OnceCell::new(),
        }
    }

    pub fn value(&self) -> Result<CowValue<'_>, ExcelError> {
        if let ASTNodeType::Literal(ref v) = self.node.node_type {
            return Ok(Cow::Borrowed(v));
        }
        if let Some(v) = self.settled.get() {
            return Ok(Cow::Borrowed(v));
        }
        self.interp.evaluate_ast(self.node).map(Cow::Owned)
    }

    /// The argument as a single value. A 1x1 matrix degrades to its element;
    /// anything larger is an error.
    pub fn scalar(&self) -> Result<LiteralValue, ExcelError> {
        single_value(self.value()?.into_owned())
    }

    /// Evaluate once and keep the single value, rejecting larger matrices.
    /// Evaluation errors are kept for the function to handle.
    pub(crate) fn settle_scalar(&self) -> Result<(), ExcelError> {
        if self.settled.get().is_some() || matches!(self.node.node_type, ASTNodeType::Literal(_)) {
            return Ok(());
        }
        let Ok(v) = self.interp.evaluate_ast(self.node) else {
            return Ok(());
        };
        let _ = self.settled.set(single_value(v)?);
        Ok(())
    }

    pub fn range(&self) -> Result<Box<dyn Range>, ExcelError> {
        match &self.node.node_type {
            ASTNodeType::Reference { reference, .. } => self
                .interp
                .context
                .resolve_range_like(reference, self.interp.current_sheet()),
            _ => {
                let formats = match self.format() {
                    ComputedFormat::Matrix(m) => Some(m),
                    ComputedFormat::Scalar(_) => None,
                };
                let data = match self.value()?.into_owned() {
                    LiteralValue::Array(rows) => rows,
                    other => vec![vec![other]],
                };
                let range = InMemoryRange::new(data);
                Ok(Box::new(match formats {
                    Some(f) => range.with_formats(f),
                    None => range,
                }))
            }
        }
    }

    /// Format of the argument, computed without evaluating its value.
    pub fn format(&self) -> ComputedFormat {
        self.interp.evaluate_format(self.node)
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.node.node_type, ASTNodeType::Reference { .. })
    }

    pub fn is_omitted(&self) -> bool {
        matches!(self.node.node_type, ASTNodeType::Literal(LiteralValue::Empty))
    }

    pub fn ast(&self) -> &'a ASTNode {
        self.node
    }
}

/* ─────────────────────────── Resolvers ─────────────────────────── */

pub trait Resolver {
    /// Resolve a parsed reference to a zone, `current_sheet` supplying the
    /// sheet of unqualified references.
    fn resolve_zone(&self, reference: &ReferenceType, current_sheet: &str)
    -> Result<Zone, ExcelError>;

    /// Value visible at `pos`, spilled values included.
    fn cell_value(&self, pos: Position) -> LiteralValue;

    /// Effective format at `pos`.
    fn cell_format(&self, pos: Position) -> Option<String>;

    fn resolve_range_like(
        &self,
        reference: &ReferenceType,
        current_sheet: &str,
    ) -> Result<Box<dyn Range>, ExcelError> {
        let zone = self.resolve_zone(reference, current_sheet)?;
        let mut data = Vec::with_capacity(zone.rows() as usize);
        let mut formats = Vec::with_capacity(zone.rows() as usize);
        for row in zone.top..=zone.bottom {
            let mut values = Vec::with_capacity(zone.cols() as usize);
            let mut fmts = Vec::with_capacity(zone.cols() as usize);
            for col in zone.left..=zone.right {
                let pos = Position::new(zone.sheet, row, col);
                values.push(self.cell_value(pos));
                fmts.push(self.cell_format(pos));
            }
            data.push(values);
            formats.push(fmts);
        }
        Ok(Box::new(InMemoryRange::new(data).with_formats(formats)))
    }
}

pub trait FunctionProvider {
    fn get_function(&self, ns: &str, name: &str) -> Option<Arc<dyn Function>>;
}

pub trait EvaluationContext: Resolver + FunctionProvider {}

impl<T> EvaluationContext for T where T: Resolver + FunctionProvider {}

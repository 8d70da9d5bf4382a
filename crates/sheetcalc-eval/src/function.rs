//! sheetcalc-eval/src/function.rs
// Home for the core `Function` trait, its capability flags and argument specs.

use crate::traits::{ArgumentHandle, EvaluationContext};
use sheetcalc_common::{ExcelError, ExcelErrorKind, LiteralValue};

bitflags::bitflags! {
    /// Describes the capabilities and properties of a function.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct FnCaps: u16 {
        /// Only evaluates the arguments it needs (`IF`). Argument shapes are
        /// left to the function.
        const SHORT_CIRCUIT      = 0b0000_0001;
        /// The result carries the format of the first argument.
        const FORMAT_PASSTHROUGH = 0b0000_0010;
    }
}

/// Shape an argument is consumed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgShape {
    /// A single value; a 1x1 matrix degrades to its element, larger ones are rejected.
    Scalar,
    /// A value or a matrix/range.
    Range,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArgSpec {
    pub name: &'static str,
    pub shape: ArgShape,
    pub optional: bool,
}

impl ArgSpec {
    pub const fn scalar(name: &'static str) -> Self {
        Self {
            name,
            shape: ArgShape::Scalar,
            optional: false,
        }
    }

    pub const fn range(name: &'static str) -> Self {
        Self {
            name,
            shape: ArgShape::Range,
            optional: false,
        }
    }

    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Format produced alongside a function result.
///
/// A `Matrix` must have the shape of the matrix value it describes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ComputedFormat {
    Scalar(Option<String>),
    Matrix(Vec<Vec<Option<String>>>),
}

impl ComputedFormat {
    pub fn none() -> Self {
        ComputedFormat::Scalar(None)
    }

    /// Top-left format, for consumers that want a single format.
    pub fn first(&self) -> Option<String> {
        match self {
            ComputedFormat::Scalar(f) => f.clone(),
            ComputedFormat::Matrix(rows) => rows.first().and_then(|r| r.first()).cloned().flatten(),
        }
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self, ComputedFormat::Matrix(_))
    }
}

pub trait Function: Send + Sync + 'static {
    fn caps(&self) -> FnCaps {
        FnCaps::empty()
    }

    /* metadata getters */
    fn name(&self) -> &'static str;
    fn namespace(&self) -> &'static str {
        ""
    }
    fn min_args(&self) -> usize {
        0
    }
    fn variadic(&self) -> bool {
        false
    }
    fn arg_schema(&self) -> &'static [ArgSpec] {
        &[]
    }

    /* core work */
    fn eval<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        ctx: &dyn EvaluationContext,
    ) -> Result<LiteralValue, ExcelError>;

    /// Format of the result. Functions flagged `FORMAT_PASSTHROUGH` reuse the
    /// first argument's format; everything else is unformatted unless overridden.
    fn compute_format<'a, 'b>(&self, args: &'a [ArgumentHandle<'a, 'b>]) -> ComputedFormat {
        if self.caps().contains(FnCaps::FORMAT_PASSTHROUGH) {
            ComputedFormat::Scalar(args.first().and_then(|a| a.format().first()))
        } else {
            ComputedFormat::none()
        }
    }

    /// Arity and argument shape checks, then `eval`. Scalar arguments are
    /// settled before `eval` sees them: a 1x1 matrix degrades to its element
    /// and a larger one is rejected.
    fn dispatch<'a, 'b>(
        &self,
        args: &'a [ArgumentHandle<'a, 'b>],
        ctx: &dyn EvaluationContext,
    ) -> Result<LiteralValue, ExcelError> {
        if args.len() < self.min_args() {
            return Err(ExcelError::new(ExcelErrorKind::Error).with_message(format!(
                "Invalid number of arguments for the {} function. Expected {} minimum, but got {} instead.",
                self.name(),
                self.min_args(),
                args.len()
            )));
        }
        let max = self.arg_schema().len();
        if !self.variadic() && args.len() > max {
            return Err(ExcelError::new(ExcelErrorKind::Error).with_message(format!(
                "Invalid number of arguments for the {} function. Expected {} maximum, but got {} instead.",
                self.name(),
                max,
                args.len()
            )));
        }
        if !self.caps().contains(FnCaps::SHORT_CIRCUIT) {
            for (i, arg) in args.iter().enumerate() {
                if self.arg_spec(i).is_some_and(|spec| spec.shape == ArgShape::Scalar) {
                    arg.settle_scalar()?;
                }
            }
        }
        self.eval(args, ctx)
    }

    /// Schema entry for the argument at `index`; variadic functions repeat their last entry.
    fn arg_spec(&self, index: usize) -> Option<ArgSpec> {
        let schema = self.arg_schema();
        schema
            .get(index)
            .or_else(|| if self.variadic() { schema.last() } else { None })
            .copied()
    }
}

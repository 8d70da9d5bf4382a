//! Spreadsheet engine: cell store, dependency tracking, spilling and
//! recalculation.

pub mod clipboard;
pub mod eval;
pub mod graph;
pub mod reference_adjuster;
pub mod scheduler;
pub mod sheet;
pub mod spill;

pub use clipboard::{ClipboardContent, ClippedCell, PasteMode};
pub use eval::{Engine, EvaluatedCell};
pub use graph::DependencyGraph;
pub use reference_adjuster::{ReferenceAdjuster, ShiftOperation};
pub use scheduler::{Schedule, Scheduler};
pub use sheet::{Cell, CellContent, FormulaCell, Sheet, SheetRegistry};
pub use spill::{Collision, SpillManager, SpillState};

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Size of sheets created without explicit dimensions.
    pub default_rows: u32,
    pub default_cols: u32,
    /// Extra recompute rounds a single flush may run after the first one.
    pub max_recompute_rounds: usize,
    pub default_sheet_name: String,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            default_rows: 100,
            default_cols: 26,
            max_recompute_rounds: 30,
            default_sheet_name: "Sheet1".to_string(),
        }
    }
}

/// Misuse of the engine API. Formula problems are never reported here; they
/// are stored as error values in cells.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("unknown sheet: {0}")]
    UnknownSheet(String),
    #[error("a sheet named {0} already exists")]
    DuplicateSheet(String),
    #[error("the last sheet cannot be deleted")]
    LastSheet,
    #[error("this paste option is not available after a cut")]
    WrongPasteOption,
    #[error("the clipboard is empty")]
    EmptyClipboard,
    #[error("out of bounds: {0}")]
    OutOfBounds(String),
    #[error("invalid reference: {0}")]
    InvalidReference(String),
}

#[cfg(test)]
mod tests;

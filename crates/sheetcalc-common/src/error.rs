//! Spreadsheet error values.
//!
//! - **`ExcelErrorKind`** : the error codes a cell can show
//! - **`ExcelErrorExtra`**: per-kind payload slot (e.g. the intended spill size)
//! - **`ExcelError`**     : kind + optional message + extra, carried as a value
//!
//! Errors never cross the evaluation boundary as panics; a formula that
//! fails stores one of these in place of its value.

use std::{error::Error, fmt};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::LiteralValue;

/// All recognised error codes.
///
/// `Display` renders the code exactly as a cell shows it (`#DIV/0!`, `#REF`).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ExcelErrorKind {
    Null,
    /// Invalid or deleted reference.
    Ref,
    Name,
    Value,
    Div,
    Na,
    Num,
    /// Generic formula, parse or runtime error.
    Error,
    /// Array result could not be expanded.
    Spill,
    /// Circular reference.
    Circ,
}

impl fmt::Display for ExcelErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Null => "#NULL!",
            Self::Ref => "#REF",
            Self::Name => "#NAME?",
            Self::Value => "#VALUE!",
            Self::Div => "#DIV/0!",
            Self::Na => "#N/A",
            Self::Num => "#NUM!",
            Self::Error => "#ERROR",
            Self::Spill => "#SPILL!",
            Self::Circ => "#CIRC!",
        })
    }
}

impl ExcelErrorKind {
    /// Parse an error code as typed in a formula. Both `#REF` and `#REF!`
    /// are accepted.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.trim().to_ascii_uppercase().as_str() {
            "#NULL!" => Self::Null,
            "#REF" | "#REF!" => Self::Ref,
            "#NAME?" => Self::Name,
            "#VALUE!" => Self::Value,
            "#DIV/0!" => Self::Div,
            "#N/A" => Self::Na,
            "#NUM!" => Self::Num,
            "#ERROR" | "#ERROR!" => Self::Error,
            "#SPILL!" => Self::Spill,
            "#CIRC!" => Self::Circ,
            _ => return None,
        })
    }
}

/// Kind-specific payloads.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ExcelErrorExtra {
    #[default]
    None,

    /// `#SPILL!`: the shape the anchor tried to claim.
    Spill {
        expected_rows: u32,
        expected_cols: u32,
    },
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExcelError {
    pub kind: ExcelErrorKind,
    pub message: Option<String>,
    pub extra: ExcelErrorExtra,
}

/* ───────────────────── Constructors & helpers ─────────────────────── */

impl From<ExcelErrorKind> for ExcelError {
    fn from(kind: ExcelErrorKind) -> Self {
        Self {
            kind,
            message: None,
            extra: ExcelErrorExtra::None,
        }
    }
}

impl ExcelError {
    pub fn new(kind: ExcelErrorKind) -> Self {
        kind.into()
    }

    /// Attach a human-readable explanation.
    pub fn with_message<S: Into<String>>(mut self, msg: S) -> Self {
        self.message = Some(msg.into());
        self
    }

    pub fn with_extra(mut self, extra: ExcelErrorExtra) -> Self {
        self.extra = extra;
        self
    }

    /// Build from a typed error code; unknown codes become a generic error
    /// carrying the offending text.
    pub fn from_error_string(s: &str) -> Self {
        match ExcelErrorKind::parse(s) {
            Some(ExcelErrorKind::Ref) => {
                Self::new(ExcelErrorKind::Ref).with_message("Invalid reference")
            }
            Some(kind) => Self::new(kind),
            None => Self::new(ExcelErrorKind::Error).with_message(format!("Unknown error {s}")),
        }
    }

    /// The message, or an empty string.
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }
}

/* ───────────────────────── Display / Error ────────────────────────── */

impl fmt::Display for ExcelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ref msg) = self.message {
            write!(f, ": {msg}")?;
        }
        match &self.extra {
            ExcelErrorExtra::None => {}
            ExcelErrorExtra::Spill {
                expected_rows,
                expected_cols,
            } => {
                write!(f, " [spill {expected_rows}x{expected_cols}]")?;
            }
        }
        Ok(())
    }
}

impl Error for ExcelError {}

impl From<ExcelError> for LiteralValue {
    fn from(error: ExcelError) -> Self {
        LiteralValue::Error(error)
    }
}

impl PartialEq<str> for ExcelErrorKind {
    fn eq(&self, other: &str) -> bool {
        self.to_string() == other
    }
}

impl PartialEq<&str> for ExcelError {
    fn eq(&self, other: &&str) -> bool {
        self.kind.to_string() == *other
    }
}

impl PartialEq<str> for ExcelError {
    fn eq(&self, other: &str) -> bool {
        self.kind.to_string() == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_parse() {
        for kind in [
            ExcelErrorKind::Null,
            ExcelErrorKind::Ref,
            ExcelErrorKind::Name,
            ExcelErrorKind::Value,
            ExcelErrorKind::Div,
            ExcelErrorKind::Na,
            ExcelErrorKind::Num,
            ExcelErrorKind::Error,
            ExcelErrorKind::Spill,
            ExcelErrorKind::Circ,
        ] {
            assert_eq!(ExcelErrorKind::parse(&kind.to_string()), Some(kind));
        }
    }

    #[test]
    fn ref_accepts_both_spellings() {
        assert_eq!(ExcelErrorKind::parse("#REF!"), Some(ExcelErrorKind::Ref));
        assert_eq!(ExcelErrorKind::parse("#ref"), Some(ExcelErrorKind::Ref));
        assert_eq!(ExcelErrorKind::Ref.to_string(), "#REF");
    }

    #[test]
    fn unknown_code_is_generic_error() {
        let err = ExcelError::from_error_string("#WHAT");
        assert_eq!(err, "#ERROR");
        assert_eq!(err.message(), "Unknown error #WHAT");
    }

    #[test]
    fn display_includes_message_and_spill_shape() {
        let err = ExcelError::new(ExcelErrorKind::Spill)
            .with_message("blocked")
            .with_extra(ExcelErrorExtra::Spill {
                expected_rows: 2,
                expected_cols: 3,
            });
        assert_eq!(err.to_string(), "#SPILL!: blocked [spill 2x3]");
    }
}

use std::fmt::{self, Display};

#[derive(Debug, Clone, PartialEq)]
pub enum ParsingError {
    InvalidReference(String),
}

impl Display for ParsingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParsingError::InvalidReference(msg) => write!(f, "Invalid reference: {msg}"),
        }
    }
}

impl std::error::Error for ParsingError {}

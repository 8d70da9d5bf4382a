pub mod parser;
pub mod pretty;
pub mod tokenizer;
pub mod types;

pub use parser::{ASTNode, ASTNodeType, AxisRef, Parser, ParserError, ReferenceType, parse};
pub use pretty::render_formula;
pub use tokenizer::{Token, TokenSubType, TokenType, Tokenizer, TokenizerError};
pub use types::ParsingError;

pub use sheetcalc_common::{ExcelError, ExcelErrorKind, LiteralValue};

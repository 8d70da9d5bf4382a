use crate::tokenizer::{Associativity, Token, TokenSubType, TokenType, Tokenizer, TokenizerError};
use crate::types::ParsingError;
use sheetcalc_common::{ExcelError, LiteralValue, RelativeCoord, column_to_letters, parse_a1};

use once_cell::sync::Lazy;
use std::error::Error;
use std::fmt::{self, Display};

#[derive(Debug, Clone, PartialEq)]
pub struct ParserError {
    pub message: String,
    pub position: Option<usize>,
}

impl Display for ParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(pos) = self.position {
            write!(f, "ParserError at position {}: {}", pos, self.message)
        } else {
            write!(f, "ParserError: {}", self.message)
        }
    }
}

impl Error for ParserError {}

// Column lookup table for common columns (A-ZZ = 702 columns)
static COLUMN_LOOKUP: Lazy<Vec<String>> = Lazy::new(|| (0..702).map(column_to_letters).collect());

fn column_name(col: u32) -> String {
    COLUMN_LOOKUP
        .get(col as usize)
        .cloned()
        .unwrap_or_else(|| column_to_letters(col))
}

/// One axis of a range endpoint: zero-based index plus its `$` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AxisRef {
    pub index: u32,
    pub fixed: bool,
}

impl AxisRef {
    pub const fn new(index: u32, fixed: bool) -> Self {
        Self { index, fixed }
    }
}

/// A parsed reference.
///
/// Ranges keep each axis optional so that `A:B` (whole columns), `1:2`
/// (whole rows) and `A1:A` (open-ended) can be represented; a missing axis
/// is resolved against the sheet dimensions at evaluation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReferenceType {
    Cell {
        sheet: Option<String>,
        coord: RelativeCoord,
    },
    Range {
        sheet: Option<String>,
        start_row: Option<AxisRef>,
        start_col: Option<AxisRef>,
        end_row: Option<AxisRef>,
        end_col: Option<AxisRef>,
    },
}

impl ReferenceType {
    /// Parse `A1`, `$A$1`, `A1:B2`, `A:A`, `1:1`, `Sheet2!B3`, `'My sheet'!A1:B2`.
    /// Whitespace around `:` is ignored.
    pub fn from_string(reference: &str) -> Result<Self, ParsingError> {
        let (sheet, ref_part) = Self::extract_sheet_name(reference.trim());
        let compact: String = ref_part.chars().filter(|c| !c.is_whitespace()).collect();

        if compact.contains(':') {
            Self::parse_range_reference(&compact, sheet)
        } else {
            let coord = parse_a1(&compact).ok_or_else(|| {
                ParsingError::InvalidReference(format!("Invalid cell reference: {reference}"))
            })?;
            Ok(ReferenceType::Cell { sheet, coord })
        }
    }

    pub fn sheet(&self) -> Option<&str> {
        match self {
            ReferenceType::Cell { sheet, .. } | ReferenceType::Range { sheet, .. } => {
                sheet.as_deref()
            }
        }
    }

    pub fn set_sheet(&mut self, name: Option<String>) {
        match self {
            ReferenceType::Cell { sheet, .. } | ReferenceType::Range { sheet, .. } => {
                *sheet = name
            }
        }
    }

    fn parse_range_reference(reference: &str, sheet: Option<String>) -> Result<Self, ParsingError> {
        let Some((start, end)) = reference.split_once(':') else {
            return Err(ParsingError::InvalidReference(format!(
                "Invalid range: {reference}"
            )));
        };

        let (start_col, start_row) = Self::parse_range_part(start)?;
        let (end_col, end_row) = Self::parse_range_part(end)?;

        if (start_col.is_none() && start_row.is_none()) || (end_col.is_none() && end_row.is_none())
        {
            return Err(ParsingError::InvalidReference(format!(
                "Invalid range: {reference}"
            )));
        }

        Ok(Self::normalised_range(
            sheet, start_row, start_col, end_row, end_col,
        ))
    }

    /// Build a range with each axis ordered independently, so that
    /// `$C2:E$1` becomes `$C$1:E2`.
    pub fn normalised_range(
        sheet: Option<String>,
        start_row: Option<AxisRef>,
        start_col: Option<AxisRef>,
        end_row: Option<AxisRef>,
        end_col: Option<AxisRef>,
    ) -> Self {
        let order = |a: Option<AxisRef>, b: Option<AxisRef>| match (a, b) {
            (Some(x), Some(y)) if x.index > y.index => (Some(y), Some(x)),
            other => other,
        };
        let (start_row, end_row) = order(start_row, end_row);
        let (start_col, end_col) = order(start_col, end_col);
        ReferenceType::Range {
            sheet,
            start_row,
            start_col,
            end_row,
            end_col,
        }
    }

    /// Parse one side of a range. Returns `(column, row)`; either may be
    /// absent for whole-row or whole-column references.
    fn parse_range_part(part: &str) -> Result<(Option<AxisRef>, Option<AxisRef>), ParsingError> {
        if let Some(coord) = parse_a1(part) {
            return Ok((
                Some(AxisRef::new(coord.col(), coord.col_abs())),
                Some(AxisRef::new(coord.row(), coord.row_abs())),
            ));
        }

        let invalid = || ParsingError::InvalidReference(format!("Invalid range part: {part}"));
        let (fixed, body) = match part.strip_prefix('$') {
            Some(rest) => (true, rest),
            None => (false, part),
        };
        if body.is_empty() {
            return Err(invalid());
        }

        if body.bytes().all(|b| b.is_ascii_alphabetic()) {
            if body.len() > 3 {
                return Err(invalid());
            }
            let col =
                RelativeCoord::letters_to_col(&body.to_ascii_uppercase()).ok_or_else(invalid)?;
            return Ok((Some(AxisRef::new(col, fixed)), None));
        }

        if body.bytes().all(|b| b.is_ascii_digit()) {
            let row: u32 = body.parse().map_err(|_| invalid())?;
            if row == 0 {
                return Err(invalid());
            }
            return Ok((None, Some(AxisRef::new(row - 1, fixed))));
        }

        Err(invalid())
    }

    /// Split `Sheet!A1` / `'My sheet'!A1` into sheet name and the rest.
    fn extract_sheet_name(reference: &str) -> (Option<String>, String) {
        let bytes = reference.as_bytes();

        if bytes.first() == Some(&b'\'') {
            let mut name = String::new();
            let mut i = 1;
            while i < bytes.len() {
                if bytes[i] == b'\'' {
                    if bytes.get(i + 1) == Some(&b'\'') {
                        name.push('\'');
                        i += 2;
                        continue;
                    }
                    if bytes.get(i + 1) == Some(&b'!') {
                        return (Some(name), reference[i + 2..].to_string());
                    }
                    break;
                }
                let ch_len = reference[i..].chars().next().map_or(1, char::len_utf8);
                name.push_str(&reference[i..i + ch_len]);
                i += ch_len;
            }
        }

        match reference.rfind('!') {
            Some(i) if i > 0 => (
                Some(reference[..i].to_string()),
                reference[i + 1..].to_string(),
            ),
            _ => (None, reference.to_string()),
        }
    }
}

/// Quote a sheet name when it is not a plain identifier.
pub fn format_sheet_name(name: &str) -> String {
    let plain = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if plain {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

fn write_axis_pair(
    f: &mut fmt::Formatter<'_>,
    col: Option<AxisRef>,
    row: Option<AxisRef>,
) -> fmt::Result {
    if let Some(c) = col {
        if c.fixed {
            write!(f, "$")?;
        }
        write!(f, "{}", column_name(c.index))?;
    }
    if let Some(r) = row {
        if r.fixed {
            write!(f, "$")?;
        }
        write!(f, "{}", r.index + 1)?;
    }
    Ok(())
}

impl Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sheet) = self.sheet() {
            write!(f, "{}!", format_sheet_name(sheet))?;
        }
        match self {
            ReferenceType::Cell { coord, .. } => write!(f, "{coord}"),
            ReferenceType::Range {
                start_row,
                start_col,
                end_row,
                end_col,
                ..
            } => {
                write_axis_pair(f, *start_col, *start_row)?;
                write!(f, ":")?;
                write_axis_pair(f, *end_col, *end_row)
            }
        }
    }
}

/// The different types of AST nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum ASTNodeType {
    Literal(LiteralValue),
    Reference {
        /// Reference text as written.
        original: String,
        reference: ReferenceType,
    },
    UnaryOp {
        op: String,
        expr: Box<ASTNode>,
    },
    BinaryOp {
        op: String,
        left: Box<ASTNode>,
        right: Box<ASTNode>,
    },
    Function {
        name: String,
        args: Vec<ASTNode>,
    },
    Array(Vec<Vec<ASTNode>>),
}

impl Display for ASTNodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ASTNodeType::Literal(value) => write!(f, "Literal({value})"),
            ASTNodeType::Reference { reference, .. } => write!(f, "Reference({reference})"),
            ASTNodeType::UnaryOp { op, expr } => write!(f, "UnaryOp({op}, {expr})"),
            ASTNodeType::BinaryOp { op, left, right } => {
                write!(f, "BinaryOp({op}, {left}, {right})")
            }
            ASTNodeType::Function { name, args } => {
                write!(f, "Function({name}, [")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, "])")
            }
            ASTNodeType::Array(rows) => write!(f, "Array({rows:?})"),
        }
    }
}

/// A parsed formula element.
#[derive(Debug, Clone, PartialEq)]
pub struct ASTNode {
    pub node_type: ASTNodeType,
    pub source_token: Option<Token>,
}

impl ASTNode {
    pub fn new(node_type: ASTNodeType, source_token: Option<Token>) -> Self {
        ASTNode {
            node_type,
            source_token,
        }
    }

    pub fn literal(value: LiteralValue) -> Self {
        ASTNode::new(ASTNodeType::Literal(value), None)
    }

    pub fn get_dependencies(&self) -> Vec<&ReferenceType> {
        let mut dependencies = Vec::new();
        self.collect_dependencies(&mut dependencies);
        dependencies
    }

    pub fn get_dependency_strings(&self) -> Vec<String> {
        self.get_dependencies()
            .into_iter()
            .map(|dep| format!("{dep}"))
            .collect()
    }

    fn collect_dependencies<'a>(&'a self, dependencies: &mut Vec<&'a ReferenceType>) {
        match &self.node_type {
            ASTNodeType::Reference { reference, .. } => {
                dependencies.push(reference);
            }
            ASTNodeType::UnaryOp { expr, .. } => {
                expr.collect_dependencies(dependencies);
            }
            ASTNodeType::BinaryOp { left, right, .. } => {
                left.collect_dependencies(dependencies);
                right.collect_dependencies(dependencies);
            }
            ASTNodeType::Function { args, .. } => {
                for arg in args {
                    arg.collect_dependencies(dependencies);
                }
            }
            ASTNodeType::Array(rows) => {
                for row in rows {
                    for item in row {
                        item.collect_dependencies(dependencies);
                    }
                }
            }
            ASTNodeType::Literal(_) => {}
        }
    }

    /// Visit every node mutably, parents before children.
    pub fn visit_mut<F: FnMut(&mut ASTNode)>(&mut self, f: &mut F) {
        f(self);
        match &mut self.node_type {
            ASTNodeType::UnaryOp { expr, .. } => expr.visit_mut(f),
            ASTNodeType::BinaryOp { left, right, .. } => {
                left.visit_mut(f);
                right.visit_mut(f);
            }
            ASTNodeType::Function { args, .. } => {
                for arg in args.iter_mut() {
                    arg.visit_mut(f);
                }
            }
            ASTNodeType::Array(rows) => {
                for item in rows.iter_mut().flatten() {
                    item.visit_mut(f);
                }
            }
            ASTNodeType::Literal(_) | ASTNodeType::Reference { .. } => {}
        }
    }
}

impl Display for ASTNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.node_type)
    }
}

/// A parser for converting tokens into an AST.
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, include_whitespace: bool) -> Self {
        let filtered_tokens = if include_whitespace {
            tokens
        } else {
            tokens
                .into_iter()
                .filter(|t| t.token_type != TokenType::Whitespace)
                .collect()
        };
        Parser {
            tokens: filtered_tokens,
            position: 0,
        }
    }

    pub fn parse(&mut self) -> Result<ASTNode, ParserError> {
        if self.tokens.is_empty() {
            return Err(ParserError {
                message: "No tokens to parse".to_string(),
                position: None,
            });
        }

        if self.tokens[0].token_type == TokenType::Literal {
            let token = self.tokens[0].clone();
            return Ok(ASTNode::new(
                ASTNodeType::Literal(LiteralValue::Text(token.value.clone())),
                Some(token),
            ));
        }

        let ast = self.parse_expression()?;
        if self.position < self.tokens.len() {
            return Err(ParserError {
                message: format!(
                    "Unexpected token at position {}: {}",
                    self.position, self.tokens[self.position]
                ),
                position: Some(self.position),
            });
        }
        Ok(ast)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn parse_expression(&mut self) -> Result<ASTNode, ParserError> {
        self.parse_binary_op(0)
    }

    fn parse_binary_op(&mut self, min_precedence: u8) -> Result<ASTNode, ParserError> {
        let mut left = self.parse_unary_op()?;

        while let Some(token) = self.peek() {
            if token.token_type != TokenType::OpInfix {
                break;
            }

            let (precedence, associativity) =
                token.get_precedence().unwrap_or((0, Associativity::Left));
            if precedence < min_precedence {
                break;
            }

            let op_token = token.clone();
            self.position += 1;

            let next_min_precedence = if associativity == Associativity::Left {
                precedence + 1
            } else {
                precedence
            };

            let right = self.parse_binary_op(next_min_precedence)?;
            left = ASTNode::new(
                ASTNodeType::BinaryOp {
                    op: op_token.value.clone(),
                    left: Box::new(left),
                    right: Box::new(right),
                },
                Some(op_token),
            );
        }

        Ok(left)
    }

    fn parse_unary_op(&mut self) -> Result<ASTNode, ParserError> {
        if let Some(token) = self.peek() {
            if token.token_type == TokenType::OpPrefix {
                let op_token = token.clone();
                self.position += 1;
                let expr = self.parse_unary_op()?;
                return Ok(ASTNode::new(
                    ASTNodeType::UnaryOp {
                        op: op_token.value.clone(),
                        expr: Box::new(expr),
                    },
                    Some(op_token),
                ));
            }
        }
        self.parse_postfix_op()
    }

    fn parse_postfix_op(&mut self) -> Result<ASTNode, ParserError> {
        let mut expr = self.parse_primary()?;

        while let Some(token) = self.peek() {
            if token.token_type != TokenType::OpPostfix {
                break;
            }
            let op_token = token.clone();
            self.position += 1;
            expr = ASTNode::new(
                ASTNodeType::UnaryOp {
                    op: op_token.value.clone(),
                    expr: Box::new(expr),
                },
                Some(op_token),
            );
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<ASTNode, ParserError> {
        let Some(token) = self.peek().cloned() else {
            return Err(ParserError {
                message: "Unexpected end of tokens".to_string(),
                position: Some(self.position),
            });
        };
        self.position += 1;
        match (token.token_type, token.subtype) {
            (TokenType::Operand, _) => self.parse_operand(token),
            (TokenType::Func, TokenSubType::Open) => self.parse_function(token),
            (TokenType::Paren, TokenSubType::Open) => {
                let expr = self.parse_expression()?;
                match self.peek() {
                    Some(t)
                        if t.token_type == TokenType::Paren && t.subtype == TokenSubType::Close =>
                    {
                        self.position += 1;
                        Ok(expr)
                    }
                    _ => Err(ParserError {
                        message: "Expected closing parenthesis".to_string(),
                        position: Some(self.position),
                    }),
                }
            }
            (TokenType::Array, TokenSubType::Open) => self.parse_array(),
            _ => Err(ParserError {
                message: format!("Unexpected token: {token}"),
                position: Some(self.position - 1),
            }),
        }
    }

    fn parse_operand(&mut self, token: Token) -> Result<ASTNode, ParserError> {
        let node_type = match token.subtype {
            TokenSubType::Number => {
                let value = token.value.parse::<f64>().map_err(|_| ParserError {
                    message: format!("Invalid number: {}", token.value),
                    position: Some(self.position),
                })?;
                ASTNodeType::Literal(LiteralValue::Number(value))
            }
            TokenSubType::Text => {
                let inner = token
                    .value
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .unwrap_or(&token.value);
                ASTNodeType::Literal(LiteralValue::Text(inner.replace("\"\"", "\"")))
            }
            TokenSubType::Logical => ASTNodeType::Literal(LiteralValue::Boolean(
                token.value.eq_ignore_ascii_case("TRUE"),
            )),
            TokenSubType::Error => ASTNodeType::Literal(LiteralValue::Error(
                ExcelError::from_error_string(&token.value),
            )),
            TokenSubType::Range => {
                if token.value.contains('#') {
                    // `Sheet!#REF` after its target was deleted
                    let code = &token.value[token.value.find('#').unwrap_or(0)..];
                    ASTNodeType::Literal(LiteralValue::Error(ExcelError::from_error_string(code)))
                } else {
                    let reference =
                        ReferenceType::from_string(&token.value).map_err(|e| ParserError {
                            message: format!("Invalid reference '{}': {}", token.value, e),
                            position: Some(self.position),
                        })?;
                    ASTNodeType::Reference {
                        original: token.value.clone(),
                        reference,
                    }
                }
            }
            _ => {
                return Err(ParserError {
                    message: format!("Unexpected operand subtype: {:?}", token.subtype),
                    position: Some(self.position),
                });
            }
        };
        Ok(ASTNode::new(node_type, Some(token)))
    }

    fn parse_function(&mut self, func_token: Token) -> Result<ASTNode, ParserError> {
        let name = func_token.value[..func_token.value.len() - 1].to_string();
        let args = self.parse_function_arguments()?;
        Ok(ASTNode::new(
            ASTNodeType::Function { name, args },
            Some(func_token),
        ))
    }

    fn at_arg_separator(&self) -> bool {
        self.peek_is(TokenType::Sep, TokenSubType::Arg)
    }

    fn at_function_close(&self) -> bool {
        self.peek_is(TokenType::Func, TokenSubType::Close)
    }

    fn peek_is(&self, token_type: TokenType, subtype: TokenSubType) -> bool {
        matches!(self.peek(), Some(t) if t.token_type == token_type && t.subtype == subtype)
    }

    /// Parse function arguments up to and including the closing paren.
    /// Omitted arguments (`F(1,,2)`) become `Empty` literals.
    fn parse_function_arguments(&mut self) -> Result<Vec<ASTNode>, ParserError> {
        let mut args = Vec::new();

        if self.at_function_close() {
            self.position += 1;
            return Ok(args);
        }

        loop {
            if self.at_arg_separator() || self.at_function_close() {
                args.push(ASTNode::literal(LiteralValue::Empty));
            } else {
                args.push(self.parse_expression()?);
            }

            if self.at_arg_separator() {
                self.position += 1;
                continue;
            }
            if self.at_function_close() {
                self.position += 1;
                return Ok(args);
            }
            return Err(ParserError {
                message: match self.peek() {
                    Some(t) => format!("Expected ',' or ')' in function arguments, got {t}"),
                    None => "Unexpected end of function arguments".to_string(),
                },
                position: Some(self.position),
            });
        }
    }

    fn parse_array(&mut self) -> Result<ASTNode, ParserError> {
        let mut rows = Vec::new();
        let mut current_row = Vec::new();

        if self.peek_is(TokenType::Array, TokenSubType::Close) {
            self.position += 1;
            return Ok(ASTNode::new(ASTNodeType::Array(rows), None));
        }

        current_row.push(self.parse_expression()?);

        while let Some(token) = self.peek() {
            match (token.token_type, token.subtype) {
                (TokenType::Sep, TokenSubType::Arg) => {
                    self.position += 1;
                    current_row.push(self.parse_expression()?);
                }
                (TokenType::Sep, TokenSubType::Row) => {
                    self.position += 1;
                    rows.push(std::mem::take(&mut current_row));
                    current_row.push(self.parse_expression()?);
                }
                (TokenType::Array, TokenSubType::Close) => {
                    self.position += 1;
                    rows.push(current_row);
                    let width = rows[0].len();
                    if rows.iter().any(|r| r.len() != width) {
                        return Err(ParserError {
                            message: "Array rows must have the same length".to_string(),
                            position: Some(self.position),
                        });
                    }
                    return Ok(ASTNode::new(ASTNodeType::Array(rows), None));
                }
                _ => {
                    return Err(ParserError {
                        message: format!("Unexpected token in array: {token}"),
                        position: Some(self.position),
                    });
                }
            }
        }

        Err(ParserError {
            message: "Unterminated array".to_string(),
            position: Some(self.position),
        })
    }
}

impl From<TokenizerError> for ParserError {
    fn from(err: TokenizerError) -> Self {
        ParserError {
            message: err.message,
            position: Some(err.pos),
        }
    }
}

/// Normalise a reference string to its canonical form.
pub fn normalise_reference(reference: &str) -> Result<String, ParsingError> {
    let ref_type = ReferenceType::from_string(reference)?;
    Ok(ref_type.to_string())
}

/// Tokenize and parse a formula (or bare literal content).
pub fn parse<T: AsRef<str>>(formula: T) -> Result<ASTNode, ParserError> {
    let tokens = Tokenizer::new(formula.as_ref())?.items;
    Parser::new(tokens, false).parse()
}

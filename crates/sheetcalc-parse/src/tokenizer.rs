use std::convert::TryFrom;
use std::error::Error;
use std::fmt::{self, Display};

const TOKEN_ENDERS: &str = ",;}) +-*/^&=><%";

const fn build_token_enders() -> [bool; 256] {
    let mut tbl = [false; 256];
    let bytes = TOKEN_ENDERS.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        tbl[bytes[i] as usize] = true;
        i += 1;
    }
    tbl
}
static TOKEN_ENDERS_TABLE: [bool; 256] = build_token_enders();

#[inline(always)]
fn is_token_ender(c: u8) -> bool {
    TOKEN_ENDERS_TABLE[c as usize]
}

// Longer codes first: `#REF!` must win over `#REF`.
static ERROR_CODES: &[&str] = &[
    "#NULL!", "#DIV/0!", "#VALUE!", "#REF!", "#REF", "#NAME?", "#NUM!", "#N/A", "#ERROR",
    "#SPILL!", "#CIRC!",
];

/// Operator associativity.
#[derive(Debug, PartialEq, Eq)]
pub enum Associativity {
    Left,
    Right,
}

#[derive(Debug)]
pub struct TokenizerError {
    pub message: String,
    pub pos: usize,
}

impl fmt::Display for TokenizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenizerError: {}", self.message)
    }
}

impl Error for TokenizerError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    /// Whole content of a cell that is not a formula.
    Literal,
    Operand,
    Func,
    Array,
    Paren,
    Sep,
    OpPrefix,
    OpInfix,
    OpPostfix,
    Whitespace,
}

impl Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenSubType {
    None,
    Text,
    Number,
    Logical,
    Error,
    Range,
    Open,
    Close,
    Arg,
    Row,
}

impl Display for TokenSubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A token of a formula, with its byte span in the source text.
#[derive(Debug, Clone, PartialEq, Hash)]
pub struct Token {
    pub value: String,
    pub token_type: TokenType,
    pub subtype: TokenSubType,
    pub start: usize,
    pub end: usize,
}

impl Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{} subtype: {:?} value: {}>",
            self.token_type, self.subtype, self.value
        )
    }
}

fn operand_subtype(value: &str) -> TokenSubType {
    if value.starts_with('"') {
        TokenSubType::Text
    } else if value.starts_with('#') {
        TokenSubType::Error
    } else if value.eq_ignore_ascii_case("TRUE") || value.eq_ignore_ascii_case("FALSE") {
        TokenSubType::Logical
    } else if value.parse::<f64>().is_ok() {
        TokenSubType::Number
    } else {
        TokenSubType::Range
    }
}

impl Token {
    pub fn new(
        value: String,
        token_type: TokenType,
        subtype: TokenSubType,
        start: usize,
        end: usize,
    ) -> Self {
        Token {
            value,
            token_type,
            subtype,
            start,
            end,
        }
    }

    fn from_slice(
        source: &str,
        token_type: TokenType,
        subtype: TokenSubType,
        start: usize,
        end: usize,
    ) -> Self {
        Token::new(source[start..end].to_string(), token_type, subtype, start, end)
    }

    pub fn is_operator(&self) -> bool {
        matches!(
            self.token_type,
            TokenType::OpPrefix | TokenType::OpInfix | TokenType::OpPostfix
        )
    }

    pub fn get_precedence(&self) -> Option<(u8, Associativity)> {
        // Prefix operators share the "u" slot.
        let op = if self.token_type == TokenType::OpPrefix {
            "u"
        } else {
            self.value.as_str()
        };

        match op {
            ":" | " " | "," => Some((8, Associativity::Left)),
            "u" => Some((7, Associativity::Right)),
            "%" => Some((6, Associativity::Left)),
            "^" => Some((5, Associativity::Left)),
            "*" | "/" => Some((4, Associativity::Left)),
            "+" | "-" => Some((3, Associativity::Left)),
            "&" => Some((2, Associativity::Left)),
            "=" | "<" | ">" | "<=" | ">=" | "<>" => Some((1, Associativity::Left)),
            _ => None,
        }
    }

    /// Build an operand token, classifying it from its text.
    pub fn make_operand(value: String, start: usize, end: usize) -> Self {
        let subtype = operand_subtype(&value);
        Token::new(value, TokenType::Operand, subtype, start, end)
    }

    fn make_operand_from_slice(source: &str, start: usize, end: usize) -> Self {
        Token::make_operand(source[start..end].to_string(), start, end)
    }

    /// Subexpression token for `(`, `)`, `{`, `}` or a `NAME(` function opener.
    fn make_subexp_from_slice(source: &str, func: bool, start: usize, end: usize) -> Self {
        let value = &source[start..end];
        let last = value.as_bytes().last().copied().unwrap_or(b'(');
        let token_type = if func {
            TokenType::Func
        } else if matches!(last, b'{' | b'}') {
            TokenType::Array
        } else {
            TokenType::Paren
        };
        let subtype = if matches!(last, b')' | b'}') {
            TokenSubType::Close
        } else {
            TokenSubType::Open
        };
        Token::from_slice(source, token_type, subtype, start, end)
    }

    /// The closing byte expected for an opener token.
    fn closer_byte(&self) -> Option<u8> {
        if self.subtype != TokenSubType::Open {
            return None;
        }
        Some(if self.token_type == TokenType::Array {
            b'}'
        } else {
            b')'
        })
    }
}

/// Byte-oriented tokenizer for cell formulas.
///
/// Content that does not start with `=` is a single [`TokenType::Literal`].
pub struct Tokenizer {
    formula: String,
    pub items: Vec<Token>,
    token_stack: Vec<Token>,
    offset: usize,
    token_start: usize,
    token_end: usize,
}

impl Tokenizer {
    pub fn new(formula: &str) -> Result<Self, TokenizerError> {
        let mut tokenizer = Tokenizer {
            formula: formula.to_string(),
            items: Vec::with_capacity(formula.len() / 2),
            token_stack: Vec::with_capacity(16),
            offset: 0,
            token_start: 0,
            token_end: 0,
        };
        tokenizer.parse()?;
        tokenizer.merge_spaced_ranges();
        Ok(tokenizer)
    }

    #[inline]
    fn current_byte(&self) -> Option<u8> {
        self.formula.as_bytes().get(self.offset).copied()
    }

    #[inline]
    fn has_token(&self) -> bool {
        self.token_end > self.token_start
    }

    #[inline]
    fn start_token(&mut self) {
        self.token_start = self.offset;
        self.token_end = self.offset;
    }

    #[inline]
    fn extend_token(&mut self) {
        self.token_end = self.offset;
    }

    fn parse(&mut self) -> Result<(), TokenizerError> {
        if self.formula.is_empty() {
            return Ok(());
        }

        if self.formula.as_bytes()[0] != b'=' {
            self.items.push(Token::new(
                self.formula.clone(),
                TokenType::Literal,
                TokenSubType::None,
                0,
                self.formula.len(),
            ));
            return Ok(());
        }

        self.offset = 1;
        self.start_token();

        while self.offset < self.formula.len() {
            if self.check_scientific_notation() {
                continue;
            }

            let curr_byte = self.formula.as_bytes()[self.offset];

            if is_token_ender(curr_byte) && self.has_token() {
                self.save_token();
                self.start_token();
            }

            match curr_byte {
                b'"' | b'\'' => self.parse_string()?,
                b'[' => self.parse_brackets()?,
                b'#' => self.parse_error()?,
                b' ' | b'\n' | b'\t' => self.parse_whitespace(),
                b'+' | b'-' | b'*' | b'/' | b'^' | b'&' | b'=' | b'>' | b'<' | b'%' => {
                    self.parse_operator()
                }
                b'{' | b'(' => self.parse_opener(),
                b')' | b'}' => self.parse_closer()?,
                b';' | b',' => self.parse_separator(),
                _ => {
                    if !self.has_token() {
                        self.start_token();
                    }
                    self.offset += 1;
                    self.extend_token();
                }
            }
        }

        if self.has_token() {
            self.save_token();
        }

        if !self.token_stack.is_empty() {
            return Err(TokenizerError {
                message: "Unmatched opening parenthesis or bracket".to_string(),
                pos: self.offset,
            });
        }

        Ok(())
    }

    /// Consume the sign of an exponent (`1.5E-3`) as part of the number.
    fn check_scientific_notation(&mut self) -> bool {
        if let Some(curr_byte) = self.current_byte() {
            if (curr_byte == b'+' || curr_byte == b'-')
                && self.has_token()
                && self.is_scientific_notation_base()
            {
                self.offset += 1;
                self.extend_token();
                return true;
            }
        }
        false
    }

    fn is_scientific_notation_base(&self) -> bool {
        let token_slice = &self.formula.as_bytes()[self.token_start..self.token_end];
        if token_slice.len() < 2 {
            return false;
        }

        let last = token_slice[token_slice.len() - 1];
        if !(last == b'E' || last == b'e') {
            return false;
        }
        if !token_slice[0].is_ascii_digit() {
            return false;
        }

        let mut dot_seen = false;
        for &ch in &token_slice[1..token_slice.len() - 1] {
            match ch {
                b'0'..=b'9' => {}
                b'.' if !dot_seen => dot_seen = true,
                _ => return false,
            }
        }
        true
    }

    fn save_token(&mut self) {
        if self.has_token() {
            let token =
                Token::make_operand_from_slice(&self.formula, self.token_start, self.token_end);
            self.items.push(token);
        }
    }

    /// Double quotes delimit text; single quotes delimit a sheet name that
    /// stays part of the surrounding reference token.
    fn parse_string(&mut self) -> Result<(), TokenizerError> {
        let delim = self.formula.as_bytes()[self.offset];

        let is_dollar_ref = delim == b'\''
            && self.has_token()
            && self.token_end - self.token_start == 1
            && self.formula.as_bytes()[self.token_start] == b'$';

        if !is_dollar_ref
            && self.has_token()
            && self.formula.as_bytes()[self.token_end - 1] != b':'
        {
            self.save_token();
            self.start_token();
        }

        let string_start = if is_dollar_ref {
            self.token_start
        } else {
            self.offset
        };
        self.offset += 1;

        while self.offset < self.formula.len() {
            if self.formula.as_bytes()[self.offset] == delim {
                self.offset += 1;
                if self.current_byte() == Some(delim) {
                    self.offset += 1;
                } else {
                    if delim == b'"' {
                        let token = Token::make_operand_from_slice(
                            &self.formula,
                            string_start,
                            self.offset,
                        );
                        self.items.push(token);
                        self.start_token();
                    } else {
                        self.token_end = self.offset;
                    }
                    return Ok(());
                }
            } else {
                self.offset += 1;
            }
        }

        Err(TokenizerError {
            message: "Reached end of formula while parsing string".to_string(),
            pos: self.offset,
        })
    }

    fn parse_brackets(&mut self) -> Result<(), TokenizerError> {
        if !self.has_token() {
            self.start_token();
        }

        let mut open_count = 1;
        self.offset += 1;

        while self.offset < self.formula.len() {
            match self.formula.as_bytes()[self.offset] {
                b'[' => open_count += 1,
                b']' => {
                    open_count -= 1;
                    if open_count == 0 {
                        self.offset += 1;
                        self.extend_token();
                        return Ok(());
                    }
                }
                _ => {}
            }
            self.offset += 1;
        }

        Err(TokenizerError {
            message: "Encountered unmatched '['".to_string(),
            pos: self.offset,
        })
    }

    /// Error literal starting with `#`, optionally prefixed by `Sheet!`.
    fn parse_error(&mut self) -> Result<(), TokenizerError> {
        if self.has_token() && self.formula.as_bytes()[self.token_end - 1] != b'!' {
            self.save_token();
            self.start_token();
        }

        let error_start = if self.has_token() {
            self.token_start
        } else {
            self.offset
        };

        let upper = self.formula[self.offset..].to_ascii_uppercase();
        for &err_code in ERROR_CODES {
            if upper.starts_with(err_code) {
                let end = self.offset + err_code.len();
                let token = Token::make_operand_from_slice(&self.formula, error_start, end);
                self.items.push(token);
                self.offset = end;
                self.start_token();
                return Ok(());
            }
        }

        Err(TokenizerError {
            message: format!("Invalid error code at position {}", self.offset),
            pos: self.offset,
        })
    }

    fn parse_whitespace(&mut self) {
        self.save_token();

        let ws_start = self.offset;
        while let Some(b' ' | b'\n' | b'\t') = self.current_byte() {
            self.offset += 1;
        }

        self.items.push(Token::from_slice(
            &self.formula,
            TokenType::Whitespace,
            TokenSubType::None,
            ws_start,
            self.offset,
        ));
        self.start_token();
    }

    fn parse_operator(&mut self) {
        self.save_token();

        if self.offset + 1 < self.formula.len() {
            let two_char = &self.formula.as_bytes()[self.offset..self.offset + 2];
            if two_char == b">=" || two_char == b"<=" || two_char == b"<>" {
                self.items.push(Token::from_slice(
                    &self.formula,
                    TokenType::OpInfix,
                    TokenSubType::None,
                    self.offset,
                    self.offset + 2,
                ));
                self.offset += 2;
                self.start_token();
                return;
            }
        }

        let curr_byte = self.formula.as_bytes()[self.offset];
        let token_type = match curr_byte {
            b'%' => TokenType::OpPostfix,
            b'+' | b'-' => {
                let prev = self
                    .items
                    .iter()
                    .rev()
                    .find(|t| t.token_type != TokenType::Whitespace);
                match prev {
                    Some(p)
                        if p.subtype == TokenSubType::Close
                            || p.token_type == TokenType::OpPostfix
                            || p.token_type == TokenType::Operand =>
                    {
                        TokenType::OpInfix
                    }
                    _ => TokenType::OpPrefix,
                }
            }
            _ => TokenType::OpInfix,
        };

        self.items.push(Token::from_slice(
            &self.formula,
            token_type,
            TokenSubType::None,
            self.offset,
            self.offset + 1,
        ));
        self.offset += 1;
        self.start_token();
    }

    fn parse_opener(&mut self) {
        let curr_byte = self.formula.as_bytes()[self.offset];

        let token = if curr_byte == b'{' {
            self.save_token();
            Token::make_subexp_from_slice(&self.formula, false, self.offset, self.offset + 1)
        } else if self.has_token() {
            // `NAME(` opens a function call.
            Token::make_subexp_from_slice(&self.formula, true, self.token_start, self.offset + 1)
        } else {
            Token::make_subexp_from_slice(&self.formula, false, self.offset, self.offset + 1)
        };

        self.items.push(token.clone());
        self.token_stack.push(token);
        self.offset += 1;
        self.start_token();
    }

    fn parse_closer(&mut self) -> Result<(), TokenizerError> {
        self.save_token();

        let curr_byte = self.formula.as_bytes()[self.offset];

        let Some(open_token) = self.token_stack.pop() else {
            return Err(TokenizerError {
                message: format!("No matching opener for closer at position {}", self.offset),
                pos: self.offset,
            });
        };
        if open_token.closer_byte() != Some(curr_byte) {
            return Err(TokenizerError {
                message: "Mismatched ( and { pair".to_string(),
                pos: self.offset,
            });
        }

        self.items.push(Token::from_slice(
            &self.formula,
            open_token.token_type,
            TokenSubType::Close,
            self.offset,
            self.offset + 1,
        ));

        self.offset += 1;
        self.start_token();
        Ok(())
    }

    fn parse_separator(&mut self) {
        self.save_token();

        let curr_byte = self.formula.as_bytes()[self.offset];

        let (token_type, subtype) = if curr_byte == b';' {
            (TokenType::Sep, TokenSubType::Row)
        } else if let Some(top) = self.token_stack.last() {
            if top.token_type == TokenType::Func || top.token_type == TokenType::Array {
                (TokenType::Sep, TokenSubType::Arg)
            } else {
                (TokenType::OpInfix, TokenSubType::None)
            }
        } else {
            (TokenType::OpInfix, TokenSubType::None)
        };

        self.items.push(Token::from_slice(
            &self.formula,
            token_type,
            subtype,
            self.offset,
            self.offset + 1,
        ));

        self.offset += 1;
        self.start_token();
    }

    /// Fold `A1 : A2`, `A1: A2` and `A1 :A2` into one range operand whose
    /// span covers the inner whitespace.
    fn merge_spaced_ranges(&mut self) {
        let is_range =
            |t: &Token| t.token_type == TokenType::Operand && t.subtype == TokenSubType::Range;
        let mut merged: Vec<Token> = Vec::with_capacity(self.items.len());
        let mut i = 0;
        while i < self.items.len() {
            let mut current = self.items[i].clone();
            i += 1;
            if is_range(&current) {
                loop {
                    let mut j = i;
                    while j < self.items.len() && self.items[j].token_type == TokenType::Whitespace
                    {
                        j += 1;
                    }
                    let Some(next) = self.items.get(j) else { break };
                    if !is_range(next)
                        || !(current.value.ends_with(':') || next.value.starts_with(':'))
                    {
                        break;
                    }
                    current =
                        Token::make_operand_from_slice(&self.formula, current.start, next.end);
                    i = j + 1;
                }
            }
            merged.push(current);
        }
        self.items = merged;
    }

    /// Reconstruct the formula from the tokens.
    pub fn render(&self) -> String {
        match self.items.first() {
            None => String::new(),
            Some(t) if t.token_type == TokenType::Literal => t.value.clone(),
            Some(_) => {
                let concatenated: String = self.items.iter().map(|t| t.value.as_str()).collect();
                format!("={concatenated}")
            }
        }
    }
}

impl TryFrom<&str> for Tokenizer {
    type Error = TokenizerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Tokenizer::new(value)
    }
}

impl TryFrom<String> for Tokenizer {
    type Error = TokenizerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Tokenizer::new(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn kinds(formula: &str) -> Vec<(TokenType, String)> {
        Tokenizer::new(formula)
            .unwrap()
            .items
            .into_iter()
            .map(|t| (t.token_type, t.value))
            .collect()
    }

    #[test]
    fn bare_text_is_a_literal() {
        let t = Tokenizer::new("hello world").unwrap();
        assert_eq!(t.items.len(), 1);
        assert_eq!(t.items[0].token_type, TokenType::Literal);
        assert_eq!(t.items[0].value, "hello world");
    }

    #[test]
    fn empty_content_has_no_tokens() {
        assert!(Tokenizer::new("").unwrap().items.is_empty());
    }

    #[test]
    fn ranges_are_single_operands() {
        for xc in ["A1:B1", "A:A", "1:1", "A1:A", "B3:4", "$A$1:B$2"] {
            let items = Tokenizer::new(&format!("={xc}")).unwrap().items;
            assert_eq!(items.len(), 1, "{xc}");
            assert_eq!(items[0].subtype, TokenSubType::Range);
            assert_eq!(items[0].value, xc);
        }
    }

    #[test]
    fn spaced_range_merges_into_one_reference() {
        let items = Tokenizer::new("=A3+  A1 : A2   ").unwrap().items;
        let values: Vec<&str> = items.iter().map(|t| t.value.as_str()).collect();
        assert_eq!(values, vec!["A3", "+", "  ", "A1 : A2", "   "]);
        assert_eq!((items[3].start, items[3].end), (6, 13));
    }

    #[test]
    fn spaced_range_variants() {
        for (formula, range) in [
            ("= A : A ", "A : A"),
            ("=A1: A2", "A1: A2"),
            ("=A1 :A2", "A1 :A2"),
            ("=  A1 : A2   +a3", "A1 : A2"),
        ] {
            let items = Tokenizer::new(formula).unwrap().items;
            assert!(
                items
                    .iter()
                    .any(|t| t.subtype == TokenSubType::Range && t.value == range),
                "{formula}"
            );
        }
    }

    #[test]
    fn spaced_range_inside_function() {
        let items = kinds("= SUM ( C4 : C5 )");
        assert!(items.contains(&(TokenType::Operand, "C4 : C5".to_string())));
    }

    #[test]
    fn comparison_operators() {
        let ops: Vec<String> = Tokenizer::new("=1>=2<=3<>4<5")
            .unwrap()
            .items
            .into_iter()
            .filter(|t| t.token_type == TokenType::OpInfix)
            .map(|t| t.value)
            .collect();
        assert_eq!(ops, vec![">=", "<=", "<>", "<"]);
    }

    #[test]
    fn prefix_and_infix_minus() {
        let items = kinds("=-1-2");
        assert_eq!(items[0], (TokenType::OpPrefix, "-".to_string()));
        assert_eq!(items[2], (TokenType::OpInfix, "-".to_string()));
    }

    #[test]
    fn quoted_sheet_stays_in_reference() {
        let items = Tokenizer::new("='Sheet 2'!B3+1").unwrap().items;
        assert_eq!(items[0].value, "'Sheet 2'!B3");
        assert_eq!(items[0].subtype, TokenSubType::Range);
    }

    #[test]
    fn strings_and_escaped_quotes() {
        let items = Tokenizer::new("=\"he\"\"llo\"&\"x\"").unwrap().items;
        assert_eq!(items[0].value, "\"he\"\"llo\"");
        assert_eq!(items[0].subtype, TokenSubType::Text);
    }

    #[test]
    fn error_literals() {
        let items = Tokenizer::new("=SUM(#REF)+#REF!+#DIV/0!").unwrap().items;
        let errors: Vec<&str> = items
            .iter()
            .filter(|t| t.subtype == TokenSubType::Error)
            .map(|t| t.value.as_str())
            .collect();
        assert_eq!(errors, vec!["#REF", "#REF!", "#DIV/0!"]);
    }

    #[test]
    fn lowercase_booleans_are_logical() {
        let items = Tokenizer::new("=AND(true,FALSE)").unwrap().items;
        assert_eq!(items[1].subtype, TokenSubType::Logical);
        assert_eq!(items[3].subtype, TokenSubType::Logical);
    }

    #[test]
    fn scientific_notation() {
        let items = kinds("=1.5E-3+2");
        assert_eq!(items[0], (TokenType::Operand, "1.5E-3".to_string()));
    }

    #[test]
    fn unbalanced_parens_fail() {
        assert!(Tokenizer::new("=SUM(1").is_err());
        assert!(Tokenizer::new("=1)").is_err());
        assert!(Tokenizer::new("={1)").is_err());
    }

    #[test]
    fn render_round_trips() {
        for f in ["=SUM(A1:B2, 3)", "=A1 : A2+1", "plain", "={1,2;3,4}"] {
            assert_eq!(Tokenizer::new(f).unwrap().render(), f);
        }
    }

    proptest! {
        #[test]
        fn render_preserves_simple_sums(a in 0u32..1000, b in 1u32..500) {
            let f = format!("=A{b}+{a}*B{b}");
            prop_assert_eq!(Tokenizer::new(&f).unwrap().render(), f);
        }
    }
}

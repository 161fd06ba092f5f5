//! Formula tokenizer.
//!
//! Splits formula text into operands, function openers/closers, separators
//! and operators. Reference detection downstream only needs operand tokens
//! with [`TokenSubType::Range`]; the reference evaluator in the testkit also
//! uses operator precedence from here.

use std::error::Error;
use std::fmt::{self, Display};

const TOKEN_ENDERS: &[u8] = b",;}) +-*/^&=><%";

const fn build_token_enders() -> [bool; 256] {
    let mut tbl = [false; 256];
    let mut i = 0;
    while i < TOKEN_ENDERS.len() {
        tbl[TOKEN_ENDERS[i] as usize] = true;
        i += 1;
    }
    tbl
}
static TOKEN_ENDERS_TABLE: [bool; 256] = build_token_enders();

#[inline(always)]
fn is_token_ender(c: u8) -> bool {
    TOKEN_ENDERS_TABLE[c as usize]
}

static ERROR_CODES: &[&str] = &[
    "#NULL!",
    "#DIV/0!",
    "#VALUE!",
    "#REF!",
    "#NAME?",
    "#NUM!",
    "#N/A",
    "#CIRC!",
    "#TIMEOUT!",
    "#ERROR!",
];

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Associativity {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizerError {
    pub message: String,
    pub pos: usize,
}

impl fmt::Display for TokenizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at byte {})", self.message, self.pos)
    }
}

impl Error for TokenizerError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
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

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    pub value: String,
    pub token_type: TokenType,
    pub subtype: TokenSubType,
    pub start: usize,
    pub end: usize,
}

impl Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{:?}/{:?} {}>", self.token_type, self.subtype, self.value)
    }
}

impl Token {
    fn from_slice(
        source: &str,
        token_type: TokenType,
        subtype: TokenSubType,
        start: usize,
        end: usize,
    ) -> Self {
        Token {
            value: source[start..end].to_string(),
            token_type,
            subtype,
            start,
            end,
        }
    }

    fn operand(source: &str, start: usize, end: usize) -> Self {
        let text = &source[start..end];
        let subtype = classify_operand(text);
        Token::from_slice(source, TokenType::Operand, subtype, start, end)
    }

    pub fn is_operator(&self) -> bool {
        matches!(
            self.token_type,
            TokenType::OpPrefix | TokenType::OpInfix | TokenType::OpPostfix
        )
    }

    pub fn is_open(&self) -> bool {
        self.subtype == TokenSubType::Open
    }

    pub fn is_close(&self) -> bool {
        self.subtype == TokenSubType::Close
    }

    /// Function name of a `Func` opener (`"SUMIFS("` -> `"SUMIFS"`), upper-cased.
    pub fn func_name(&self) -> Option<String> {
        if self.token_type == TokenType::Func && self.subtype == TokenSubType::Open {
            Some(self.value.trim_end_matches('(').to_ascii_uppercase())
        } else {
            None
        }
    }

    /// Binding power of an operator token.
    pub fn precedence(&self) -> Option<(u8, Associativity)> {
        if self.token_type == TokenType::OpPrefix {
            return Some((7, Associativity::Right));
        }
        match self.value.as_str() {
            "%" => Some((6, Associativity::Left)),
            "^" => Some((5, Associativity::Left)),
            "*" | "/" => Some((4, Associativity::Left)),
            "+" | "-" => Some((3, Associativity::Left)),
            "&" => Some((2, Associativity::Left)),
            "=" | "<" | ">" | "<=" | ">=" | "<>" => Some((1, Associativity::Left)),
            _ => None,
        }
    }
}

fn classify_operand(text: &str) -> TokenSubType {
    if text.starts_with('"') {
        TokenSubType::Text
    } else if text.starts_with('#') || text.ends_with("#REF!") {
        TokenSubType::Error
    } else if text.eq_ignore_ascii_case("TRUE") || text.eq_ignore_ascii_case("FALSE") {
        TokenSubType::Logical
    } else if text.parse::<f64>().is_ok() {
        TokenSubType::Number
    } else {
        TokenSubType::Range
    }
}

/// Tokenized formula. A leading `=` is optional.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    formula: String,
    pub items: Vec<Token>,
    openers: Vec<TokenType>,
    offset: usize,
    token_start: usize,
    token_end: usize,
}

impl Tokenizer {
    pub fn new(formula: &str) -> Result<Self, TokenizerError> {
        let mut tokenizer = Tokenizer {
            formula: formula.to_string(),
            items: Vec::with_capacity(formula.len() / 2),
            openers: Vec::with_capacity(8),
            offset: 0,
            token_start: 0,
            token_end: 0,
        };
        tokenizer.run()?;
        Ok(tokenizer)
    }

    pub fn formula(&self) -> &str {
        &self.formula
    }

    /// Tokens with whitespace removed.
    pub fn significant(&self) -> impl Iterator<Item = &Token> {
        self.items
            .iter()
            .filter(|t| t.token_type != TokenType::Whitespace)
    }

    #[inline]
    fn byte(&self, at: usize) -> u8 {
        self.formula.as_bytes()[at]
    }

    #[inline]
    fn has_token(&self) -> bool {
        self.token_end > self.token_start
    }

    #[inline]
    fn reset_token(&mut self) {
        self.token_start = self.offset;
        self.token_end = self.offset;
    }

    fn run(&mut self) -> Result<(), TokenizerError> {
        if self.formula.starts_with('=') {
            self.offset = 1;
        }
        self.reset_token();

        while self.offset < self.formula.len() {
            if self.consume_exponent_sign() {
                continue;
            }
            let b = self.byte(self.offset);
            if is_token_ender(b) && self.has_token() {
                self.flush_operand();
                self.reset_token();
            }
            match b {
                b'"' | b'\'' => self.quoted()?,
                b'[' => self.brackets()?,
                b'#' => self.error_literal()?,
                b' ' | b'\n' | b'\t' => self.whitespace(),
                b'+' | b'-' | b'*' | b'/' | b'^' | b'&' | b'=' | b'>' | b'<' | b'%' => {
                    self.operator()
                }
                b'{' | b'(' => self.opener(),
                b')' | b'}' => self.closer()?,
                b';' | b',' => self.separator(),
                _ => {
                    if !self.has_token() {
                        self.reset_token();
                    }
                    self.offset += 1;
                    self.token_end = self.offset;
                }
            }
        }
        self.flush_operand();

        if !self.openers.is_empty() {
            return Err(TokenizerError {
                message: "unmatched opening parenthesis or brace".to_string(),
                pos: self.offset,
            });
        }
        Ok(())
    }

    /// `1.5E+3`: the sign belongs to the number, not an operator.
    fn consume_exponent_sign(&mut self) -> bool {
        let b = self.byte(self.offset);
        if (b == b'+' || b == b'-') && self.exponent_base_pending() {
            self.offset += 1;
            self.token_end = self.offset;
            return true;
        }
        false
    }

    fn exponent_base_pending(&self) -> bool {
        if !self.has_token() {
            return false;
        }
        let tok = &self.formula.as_bytes()[self.token_start..self.token_end];
        if tok.len() < 2 || !tok[0].is_ascii_digit() {
            return false;
        }
        let (last, middle) = (tok[tok.len() - 1], &tok[1..tok.len() - 1]);
        if !matches!(last, b'E' | b'e') {
            return false;
        }
        let mut dot = false;
        middle.iter().all(|&c| match c {
            b'0'..=b'9' => true,
            b'.' if !dot => {
                dot = true;
                true
            }
            _ => false,
        })
    }

    fn flush_operand(&mut self) {
        if self.has_token() {
            let token = Token::operand(&self.formula, self.token_start, self.token_end);
            self.items.push(token);
        }
    }

    /// `"text"` literals become operands; `'sheet name'` joins the current
    /// operand so `'My Sheet'!A1` stays one reference token.
    fn quoted(&mut self) -> Result<(), TokenizerError> {
        let delim = self.byte(self.offset);
        let joins_operand = delim == b'\'';
        if !joins_operand && self.has_token() && self.byte(self.token_end - 1) != b':' {
            self.flush_operand();
            self.reset_token();
        }
        if !self.has_token() {
            self.reset_token();
        }
        let start = if delim == b'"' && !self.has_token() {
            self.offset
        } else {
            self.token_start
        };
        self.offset += 1;

        while self.offset < self.formula.len() {
            if self.byte(self.offset) != delim {
                self.offset += 1;
                continue;
            }
            self.offset += 1;
            if self.offset < self.formula.len() && self.byte(self.offset) == delim {
                self.offset += 1;
                continue;
            }
            if delim == b'"' {
                let token = Token::operand(&self.formula, start, self.offset);
                self.items.push(token);
                self.reset_token();
            } else {
                self.token_start = start;
                self.token_end = self.offset;
            }
            return Ok(());
        }
        Err(TokenizerError {
            message: "unterminated quoted text".to_string(),
            pos: self.offset,
        })
    }

    fn brackets(&mut self) -> Result<(), TokenizerError> {
        if !self.has_token() {
            self.reset_token();
        }
        let mut depth = 0usize;
        while self.offset < self.formula.len() {
            match self.byte(self.offset) {
                b'[' => depth += 1,
                b']' => {
                    depth -= 1;
                    if depth == 0 {
                        self.offset += 1;
                        self.token_end = self.offset;
                        return Ok(());
                    }
                }
                _ => {}
            }
            self.offset += 1;
        }
        Err(TokenizerError {
            message: "unmatched '['".to_string(),
            pos: self.offset,
        })
    }

    /// Error literals, including the `Sheet1!#REF!` form.
    fn error_literal(&mut self) -> Result<(), TokenizerError> {
        if self.has_token() && self.byte(self.token_end - 1) != b'!' {
            self.flush_operand();
            self.reset_token();
        }
        let start = if self.has_token() {
            self.token_start
        } else {
            self.offset
        };
        let rest = &self.formula.as_bytes()[self.offset..];
        let code = ERROR_CODES.iter().find(|code| {
            rest.len() >= code.len() && rest[..code.len()].eq_ignore_ascii_case(code.as_bytes())
        });
        match code {
            Some(code) => {
                let end = self.offset + code.len();
                self.items.push(Token::operand(&self.formula, start, end));
                self.offset = end;
                self.reset_token();
                Ok(())
            }
            None => Err(TokenizerError {
                message: "invalid error literal".to_string(),
                pos: self.offset,
            }),
        }
    }

    fn whitespace(&mut self) {
        self.flush_operand();
        let start = self.offset;
        while self.offset < self.formula.len()
            && matches!(self.byte(self.offset), b' ' | b'\n' | b'\t')
        {
            self.offset += 1;
        }
        self.items.push(Token::from_slice(
            &self.formula,
            TokenType::Whitespace,
            TokenSubType::None,
            start,
            self.offset,
        ));
        self.reset_token();
    }

    fn operator(&mut self) {
        self.flush_operand();
        let bytes = self.formula.as_bytes();
        if self.offset + 1 < bytes.len() {
            let pair = &bytes[self.offset..self.offset + 2];
            if pair == b">=" || pair == b"<=" || pair == b"<>" {
                self.push_simple(TokenType::OpInfix, TokenSubType::None, 2);
                return;
            }
        }
        let token_type = match bytes[self.offset] {
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
        self.push_simple(token_type, TokenSubType::None, 1);
    }

    fn push_simple(&mut self, token_type: TokenType, subtype: TokenSubType, len: usize) {
        self.items.push(Token::from_slice(
            &self.formula,
            token_type,
            subtype,
            self.offset,
            self.offset + len,
        ));
        self.offset += len;
        self.reset_token();
    }

    fn opener(&mut self) {
        let b = self.byte(self.offset);
        let (token_type, start) = if b == b'{' {
            self.flush_operand();
            (TokenType::Array, self.offset)
        } else if self.has_token() {
            (TokenType::Func, self.token_start)
        } else {
            (TokenType::Paren, self.offset)
        };
        self.items.push(Token::from_slice(
            &self.formula,
            token_type,
            TokenSubType::Open,
            start,
            self.offset + 1,
        ));
        self.openers.push(token_type);
        self.offset += 1;
        self.reset_token();
    }

    fn closer(&mut self) -> Result<(), TokenizerError> {
        self.flush_operand();
        let b = self.byte(self.offset);
        let Some(open) = self.openers.pop() else {
            return Err(TokenizerError {
                message: "closer without a matching opener".to_string(),
                pos: self.offset,
            });
        };
        if (open == TokenType::Array) != (b == b'}') {
            return Err(TokenizerError {
                message: "mismatched ( and { pair".to_string(),
                pos: self.offset,
            });
        }
        self.push_simple(open, TokenSubType::Close, 1);
        Ok(())
    }

    fn separator(&mut self) {
        self.flush_operand();
        let (token_type, subtype) = if self.byte(self.offset) == b';' {
            (TokenType::Sep, TokenSubType::Row)
        } else if matches!(self.openers.last(), Some(TokenType::Func | TokenType::Array)) {
            (TokenType::Sep, TokenSubType::Arg)
        } else {
            (TokenType::OpInfix, TokenSubType::None)
        };
        self.push_simple(token_type, subtype, 1);
    }
}

impl TryFrom<&str> for Tokenizer {
    type Error = TokenizerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Tokenizer::new(value)
    }
}

//! Parser contract and the built-in recursive-descent implementation.
//!
//! The engine is parser-agnostic: it consumes [`ScriptParser`] and only
//! requires that the produced AST agrees with `crate::ast`. Parse
//! failures surface as deterministic [`ParseError`] envelopes; drivers
//! classify them into reference-error versus syntax-error throw
//! completions by message-substring match against a fixed list.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::{
    AssignOp, BinaryOp, BlockStatement, CatchClause, DoWhileStatement, Expression,
    ExpressionStatement, ForInStatement, ForInTarget, ForInit, ForStatement, FunctionDeclaration,
    FunctionExpression, IfStatement, LabeledStatement, LogicalOp, MemberKey, ObjectProperty,
    ParseGoal, Program, PropertyKind, PropertyName, ReturnStatement, SourceSpan, Statement,
    SwitchCase, SwitchStatement, ThrowStatement, TryStatement, UnaryOp, UpdateOp,
    VariableDeclaration, VariableDeclarator, VariableKind, WhileStatement,
};

pub type ParseResult<T> = Result<T, ParseError>;

// ---------------------------------------------------------------------------
// Error envelope
// ---------------------------------------------------------------------------

/// Stable parse error codes for deterministic diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseErrorCode {
    EmptySource,
    UnexpectedToken,
    UnexpectedEnd,
    UnterminatedString,
    UnterminatedComment,
    InvalidNumber,
}

/// Deterministic parse error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseError {
    pub code: ParseErrorCode,
    pub message: String,
    pub source_label: String,
    pub span: Option<SourceSpan>,
}

impl ParseError {
    fn new(
        code: ParseErrorCode,
        message: impl Into<String>,
        source_label: impl Into<String>,
        span: Option<SourceSpan>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source_label: source_label.into(),
            span,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.span {
            Some(span) => write!(
                f,
                "{:?}: {} (source={}, line={}, column={})",
                self.code, self.message, self.source_label, span.start_line, span.start_column
            ),
            None => write!(
                f,
                "{:?}: {} (source={})",
                self.code, self.message, self.source_label
            ),
        }
    }
}

impl std::error::Error for ParseError {}

/// How a parse failure should surface in the interpreted program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseFailureKind {
    SyntaxError,
    ReferenceError,
}

/// Fixed substrings that mark a failure as a reference error instead of
/// a syntax error.
const REFERENCE_ERROR_MARKERS: &[&str] = &["is not defined", "Invalid left-hand side"];

/// Classify a parse failure by message substring (§ the parser contract).
pub fn classify_parse_failure(message: &str) -> ParseFailureKind {
    if REFERENCE_ERROR_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
    {
        ParseFailureKind::ReferenceError
    } else {
        ParseFailureKind::SyntaxError
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Source-to-AST contract consumed by the engine.
pub trait ScriptParser {
    fn parse(
        &self,
        source: &str,
        source_label: &str,
        goal: ParseGoal,
        start_line: u64,
    ) -> ParseResult<Program>;
}

/// Deterministic recursive-descent parser over the canonical AST.
#[derive(Debug, Default, Clone, Copy)]
pub struct CanonicalParser;

impl ScriptParser for CanonicalParser {
    fn parse(
        &self,
        source: &str,
        source_label: &str,
        goal: ParseGoal,
        start_line: u64,
    ) -> ParseResult<Program> {
        if source.trim().is_empty() {
            return Err(ParseError::new(
                ParseErrorCode::EmptySource,
                "source is empty",
                source_label,
                None,
            ));
        }
        let tokens = Lexer::new(source, source_label, start_line).tokenize()?;
        let mut parser = Parser {
            tokens,
            position: 0,
            source_label: source_label.to_string(),
            source_len: source.len() as u64,
            no_in: false,
        };
        let mut body = Vec::new();
        while !parser.at_end() {
            body.push(parser.parse_statement()?);
        }
        let span = SourceSpan::new(0, source.len() as u64, start_line, 1, start_line, 1);
        Ok(Program::new(goal, body, span))
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Identifier(String),
    Number(f64),
    Str(String),
    Punct(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    span: SourceSpan,
}

const PUNCTUATORS: &[&str] = &[
    ">>>=", "===", "!==", ">>>", "<<=", ">>=", "==", "!=", "<=", ">=", "&&", "||", "++", "--",
    "+=", "-=", "*=", "/=", "%=", "<<", ">>", "&=", "|=", "^=", "{", "}", "(", ")", "[", "]", ";",
    ",", "<", ">", "+", "-", "*", "/", "%", "&", "|", "^", "!", "~", "?", ":", "=", ".",
];

struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    offset: usize,
    line: u64,
    column: u64,
    source_label: &'a str,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str, source_label: &'a str, start_line: u64) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            offset: 0,
            line: start_line,
            column: 1,
            source_label,
        }
    }

    fn error(&self, code: ParseErrorCode, message: impl Into<String>) -> ParseError {
        ParseError::new(
            code,
            message,
            self.source_label,
            Some(SourceSpan::new(
                self.offset as u64,
                self.offset as u64,
                self.line,
                self.column,
                self.line,
                self.column,
            )),
        )
    }

    fn peek_byte(&self) -> Option<u8> {
        self.bytes.get(self.offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let byte = self.peek_byte()?;
        self.offset += 1;
        if byte == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(byte)
    }

    fn skip_trivia(&mut self) -> ParseResult<()> {
        loop {
            match self.peek_byte() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => {
                    self.advance();
                }
                Some(b'/') if self.bytes.get(self.offset + 1) == Some(&b'/') => {
                    while let Some(byte) = self.peek_byte() {
                        if byte == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some(b'/') if self.bytes.get(self.offset + 1) == Some(&b'*') => {
                    self.advance();
                    self.advance();
                    loop {
                        match self.peek_byte() {
                            Some(b'*') if self.bytes.get(self.offset + 1) == Some(&b'/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(_) => {
                                self.advance();
                            }
                            None => {
                                return Err(self.error(
                                    ParseErrorCode::UnterminatedComment,
                                    "unterminated block comment",
                                ))
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn tokenize(mut self) -> ParseResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let Some(byte) = self.peek_byte() else {
                break;
            };
            let start_offset = self.offset as u64;
            let start_line = self.line;
            let start_column = self.column;

            let kind = if byte.is_ascii_alphabetic() || byte == b'_' || byte == b'$' {
                let begin = self.offset;
                while let Some(b) = self.peek_byte() {
                    if b.is_ascii_alphanumeric() || b == b'_' || b == b'$' {
                        self.advance();
                    } else {
                        break;
                    }
                }
                TokenKind::Identifier(self.source[begin..self.offset].to_string())
            } else if byte.is_ascii_digit() {
                self.lex_number()?
            } else if byte == b'"' || byte == b'\'' {
                self.lex_string(byte)?
            } else {
                let rest = &self.source[self.offset..];
                let Some(punct) = PUNCTUATORS.iter().find(|p| rest.starts_with(**p)) else {
                    return Err(self.error(
                        ParseErrorCode::UnexpectedToken,
                        format!("unexpected character `{}`", byte as char),
                    ));
                };
                for _ in 0..punct.len() {
                    self.advance();
                }
                TokenKind::Punct(punct)
            };

            tokens.push(Token {
                kind,
                span: SourceSpan::new(
                    start_offset,
                    self.offset as u64,
                    start_line,
                    start_column,
                    self.line,
                    self.column,
                ),
            });
        }
        Ok(tokens)
    }

    fn lex_number(&mut self) -> ParseResult<TokenKind> {
        let begin = self.offset;
        if self.peek_byte() == Some(b'0') && matches!(self.bytes.get(self.offset + 1), Some(b'x' | b'X')) {
            self.advance();
            self.advance();
            while let Some(b) = self.peek_byte() {
                if b.is_ascii_hexdigit() {
                    self.advance();
                } else {
                    break;
                }
            }
            let text = &self.source[begin + 2..self.offset];
            let value = u64::from_str_radix(text, 16).map_err(|_| {
                self.error(ParseErrorCode::InvalidNumber, format!("invalid hex literal 0x{text}"))
            })?;
            return Ok(TokenKind::Number(value as f64));
        }
        while let Some(b) = self.peek_byte() {
            if b.is_ascii_digit() {
                self.advance();
            } else {
                break;
            }
        }
        if self.peek_byte() == Some(b'.') {
            self.advance();
            while let Some(b) = self.peek_byte() {
                if b.is_ascii_digit() {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        if matches!(self.peek_byte(), Some(b'e' | b'E')) {
            self.advance();
            if matches!(self.peek_byte(), Some(b'+' | b'-')) {
                self.advance();
            }
            while let Some(b) = self.peek_byte() {
                if b.is_ascii_digit() {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        let text = &self.source[begin..self.offset];
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| self.error(ParseErrorCode::InvalidNumber, format!("invalid number `{text}`")))
    }

    fn lex_string(&mut self, quote: u8) -> ParseResult<TokenKind> {
        self.advance();
        let mut value = String::new();
        loop {
            match self.advance() {
                None | Some(b'\n') => {
                    return Err(self.error(
                        ParseErrorCode::UnterminatedString,
                        "unterminated string literal",
                    ))
                }
                Some(b) if b == quote => break,
                Some(b'\\') => match self.advance() {
                    Some(b'n') => value.push('\n'),
                    Some(b't') => value.push('\t'),
                    Some(b'r') => value.push('\r'),
                    Some(b'0') => value.push('\0'),
                    Some(b'\\') => value.push('\\'),
                    Some(b'\'') => value.push('\''),
                    Some(b'"') => value.push('"'),
                    Some(b'u') => {
                        let mut code = 0u32;
                        for _ in 0..4 {
                            let Some(digit) = self.advance() else {
                                return Err(self.error(
                                    ParseErrorCode::UnterminatedString,
                                    "unterminated unicode escape",
                                ));
                            };
                            let digit = (digit as char).to_digit(16).ok_or_else(|| {
                                self.error(
                                    ParseErrorCode::UnexpectedToken,
                                    "invalid unicode escape",
                                )
                            })?;
                            code = code * 16 + digit;
                        }
                        value.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
                    }
                    Some(other) => value.push(other as char),
                    None => {
                        return Err(self.error(
                            ParseErrorCode::UnterminatedString,
                            "unterminated escape sequence",
                        ))
                    }
                },
                Some(byte) if byte.is_ascii() => value.push(byte as char),
                Some(byte) => {
                    // Re-assemble a multi-byte UTF-8 scalar.
                    let start = self.offset - 1;
                    let width = utf8_width(byte);
                    for _ in 1..width {
                        self.advance();
                    }
                    value.push_str(&self.source[start..self.offset]);
                }
            }
        }
        Ok(TokenKind::Str(value))
    }
}

fn utf8_width(byte: u8) -> usize {
    if byte >= 0xF0 {
        4
    } else if byte >= 0xE0 {
        3
    } else {
        2
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    position: usize,
    source_label: String,
    source_len: u64,
    /// Suppresses the `in` relational operator inside `for (…)` headers.
    no_in: bool,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.position >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn peek_ahead(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.position + n)
    }

    fn current_span(&self) -> SourceSpan {
        self.peek()
            .map(|t| t.span)
            .unwrap_or_else(|| SourceSpan::new(self.source_len, self.source_len, 0, 0, 0, 0))
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let code = if self.at_end() {
            ParseErrorCode::UnexpectedEnd
        } else {
            ParseErrorCode::UnexpectedToken
        };
        ParseError::new(code, message, self.source_label.clone(), Some(self.current_span()))
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn is_punct(&self, punct: &str) -> bool {
        matches!(self.peek(), Some(Token { kind: TokenKind::Punct(p), .. }) if *p == punct)
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token { kind: TokenKind::Identifier(name), .. }) if name == keyword)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.is_punct(punct) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> ParseResult<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{punct}`")))
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword(keyword) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect_identifier(&mut self) -> ParseResult<String> {
        match self.advance() {
            Some(Token { kind: TokenKind::Identifier(name), .. }) => Ok(name),
            _ => Err(self.error("expected an identifier")),
        }
    }

    fn eat_semicolon(&mut self) {
        self.eat_punct(";");
    }

    // -- Statements ---------------------------------------------------------

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        let span = self.current_span();
        if self.eat_punct(";") {
            return Ok(Statement::Empty { span });
        }
        if self.is_punct("{") {
            return Ok(Statement::Block(self.parse_block()?));
        }
        if self.is_keyword("var") || self.is_keyword("let") || self.is_keyword("const") {
            let declaration = self.parse_variable_declaration()?;
            self.eat_semicolon();
            return Ok(Statement::Variable(declaration));
        }
        if self.eat_keyword("function") {
            let name = self.expect_identifier()?;
            let params = self.parse_params()?;
            let body = self.parse_block()?;
            return Ok(Statement::Function(FunctionDeclaration {
                name,
                params,
                body,
                span,
            }));
        }
        if self.eat_keyword("if") {
            self.expect_punct("(")?;
            let test = self.parse_expression()?;
            self.expect_punct(")")?;
            let consequent = Box::new(self.parse_statement()?);
            let alternate = if self.eat_keyword("else") {
                Some(Box::new(self.parse_statement()?))
            } else {
                None
            };
            return Ok(Statement::If(IfStatement {
                test,
                consequent,
                alternate,
                span,
            }));
        }
        if self.eat_keyword("while") {
            self.expect_punct("(")?;
            let test = self.parse_expression()?;
            self.expect_punct(")")?;
            let body = Box::new(self.parse_statement()?);
            return Ok(Statement::While(WhileStatement { test, body, span }));
        }
        if self.eat_keyword("do") {
            let body = Box::new(self.parse_statement()?);
            if !self.eat_keyword("while") {
                return Err(self.error("expected `while` after do-body"));
            }
            self.expect_punct("(")?;
            let test = self.parse_expression()?;
            self.expect_punct(")")?;
            self.eat_semicolon();
            return Ok(Statement::DoWhile(DoWhileStatement { body, test, span }));
        }
        if self.eat_keyword("for") {
            return self.parse_for(span);
        }
        if self.eat_keyword("switch") {
            return self.parse_switch(span);
        }
        if self.eat_keyword("try") {
            return self.parse_try(span);
        }
        if self.eat_keyword("throw") {
            let argument = self.parse_expression()?;
            self.eat_semicolon();
            return Ok(Statement::Throw(ThrowStatement { argument, span }));
        }
        if self.eat_keyword("return") {
            let argument = if self.is_punct(";") || self.is_punct("}") || self.at_end() {
                None
            } else {
                Some(self.parse_expression()?)
            };
            self.eat_semicolon();
            return Ok(Statement::Return(ReturnStatement { argument, span }));
        }
        if self.eat_keyword("break") {
            let label = self.optional_label();
            self.eat_semicolon();
            return Ok(Statement::Break { label, span });
        }
        if self.eat_keyword("continue") {
            let label = self.optional_label();
            self.eat_semicolon();
            return Ok(Statement::Continue { label, span });
        }

        // Labeled statement: identifier followed by `:`.
        if let Some(Token { kind: TokenKind::Identifier(name), .. }) = self.peek() {
            if !is_reserved(name)
                && matches!(self.peek_ahead(1), Some(Token { kind: TokenKind::Punct(":"), .. }))
            {
                let label = self.expect_identifier()?;
                self.expect_punct(":")?;
                let body = Box::new(self.parse_statement()?);
                return Ok(Statement::Labeled(LabeledStatement { label, body, span }));
            }
        }

        let expression = self.parse_expression()?;
        self.eat_semicolon();
        Ok(Statement::Expression(ExpressionStatement { expression, span }))
    }

    fn optional_label(&mut self) -> Option<String> {
        match self.peek() {
            Some(Token { kind: TokenKind::Identifier(name), .. }) if !is_reserved(name) => {
                let label = name.clone();
                self.position += 1;
                Some(label)
            }
            _ => None,
        }
    }

    fn parse_block(&mut self) -> ParseResult<BlockStatement> {
        let span = self.current_span();
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.is_punct("}") {
            if self.at_end() {
                return Err(self.error("unterminated block"));
            }
            body.push(self.parse_statement()?);
        }
        self.expect_punct("}")?;
        Ok(BlockStatement { body, span })
    }

    fn parse_variable_declaration(&mut self) -> ParseResult<VariableDeclaration> {
        let span = self.current_span();
        let kind = if self.eat_keyword("var") {
            VariableKind::Var
        } else if self.eat_keyword("let") {
            VariableKind::Let
        } else if self.eat_keyword("const") {
            VariableKind::Const
        } else {
            return Err(self.error("expected a declaration keyword"));
        };
        let mut declarators = Vec::new();
        loop {
            let declarator_span = self.current_span();
            let name = self.expect_identifier()?;
            let init = if self.eat_punct("=") {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            declarators.push(VariableDeclarator {
                name,
                init,
                span: declarator_span,
            });
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(VariableDeclaration {
            kind,
            declarators,
            span,
        })
    }

    fn parse_for(&mut self, span: SourceSpan) -> ParseResult<Statement> {
        self.expect_punct("(")?;

        // `for (… in …)` detection.
        if self.is_keyword("var") || self.is_keyword("let") || self.is_keyword("const") {
            let declaration = self.parse_variable_declaration()?;
            if self.eat_keyword("in") {
                if declaration.declarators.len() != 1 || declaration.declarators[0].init.is_some() {
                    return Err(self.error("invalid for-in declaration"));
                }
                let right = self.parse_expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.parse_statement()?);
                return Ok(Statement::ForIn(ForInStatement {
                    left: ForInTarget::Declaration(
                        declaration.kind,
                        declaration.declarators[0].name.clone(),
                    ),
                    right,
                    body,
                    span,
                }));
            }
            self.expect_punct(";")?;
            return self.parse_for_tail(Some(ForInit::Declaration(declaration)), span);
        }

        if self.eat_punct(";") {
            return self.parse_for_tail(None, span);
        }

        self.no_in = true;
        let init = self.parse_expression();
        self.no_in = false;
        let init = init?;
        if self.eat_keyword("in") {
            let right = self.parse_expression()?;
            self.expect_punct(")")?;
            let body = Box::new(self.parse_statement()?);
            return Ok(Statement::ForIn(ForInStatement {
                left: ForInTarget::Pattern(init),
                right,
                body,
                span,
            }));
        }
        self.expect_punct(";")?;
        self.parse_for_tail(Some(ForInit::Expression(init)), span)
    }

    fn parse_for_tail(&mut self, init: Option<ForInit>, span: SourceSpan) -> ParseResult<Statement> {
        let test = if self.is_punct(";") {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(")")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Statement::For(ForStatement {
            init,
            test,
            update,
            body,
            span,
        }))
    }

    fn parse_switch(&mut self, span: SourceSpan) -> ParseResult<Statement> {
        self.expect_punct("(")?;
        let discriminant = self.parse_expression()?;
        self.expect_punct(")")?;
        self.expect_punct("{")?;
        let mut cases = Vec::new();
        while !self.is_punct("}") {
            let case_span = self.current_span();
            let test = if self.eat_keyword("case") {
                let test = self.parse_expression()?;
                Some(test)
            } else if self.eat_keyword("default") {
                None
            } else {
                return Err(self.error("expected `case` or `default`"));
            };
            self.expect_punct(":")?;
            let mut body = Vec::new();
            while !self.is_punct("}") && !self.is_keyword("case") && !self.is_keyword("default") {
                body.push(self.parse_statement()?);
            }
            cases.push(SwitchCase {
                test,
                body,
                span: case_span,
            });
        }
        self.expect_punct("}")?;
        Ok(Statement::Switch(SwitchStatement {
            discriminant,
            cases,
            span,
        }))
    }

    fn parse_try(&mut self, span: SourceSpan) -> ParseResult<Statement> {
        let block = self.parse_block()?;
        let handler = if self.eat_keyword("catch") {
            let handler_span = self.current_span();
            let param = if self.eat_punct("(") {
                let param = self.expect_identifier()?;
                self.expect_punct(")")?;
                Some(param)
            } else {
                None
            };
            let body = self.parse_block()?;
            Some(CatchClause {
                param,
                body,
                span: handler_span,
            })
        } else {
            None
        };
        let finalizer = if self.eat_keyword("finally") {
            Some(self.parse_block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(self.error("try statement requires catch or finally"));
        }
        Ok(Statement::Try(TryStatement {
            block,
            handler,
            finalizer,
            span,
        }))
    }

    fn parse_params(&mut self) -> ParseResult<Vec<String>> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        if !self.is_punct(")") {
            loop {
                params.push(self.expect_identifier()?);
                if !self.eat_punct(",") {
                    break;
                }
            }
        }
        self.expect_punct(")")?;
        Ok(params)
    }

    // -- Expressions ---------------------------------------------------------

    fn parse_expression(&mut self) -> ParseResult<Expression> {
        let span = self.current_span();
        let first = self.parse_assignment()?;
        if !self.is_punct(",") {
            return Ok(first);
        }
        let mut expressions = vec![first];
        while self.eat_punct(",") {
            expressions.push(self.parse_assignment()?);
        }
        Ok(Expression::Sequence { expressions, span })
    }

    fn parse_assignment(&mut self) -> ParseResult<Expression> {
        let span = self.current_span();
        let target = self.parse_conditional()?;
        let operator = if self.eat_punct("=") {
            AssignOp::Assign
        } else if self.eat_punct("+=") {
            AssignOp::AddAssign
        } else if self.eat_punct("-=") {
            AssignOp::SubAssign
        } else if self.eat_punct("*=") {
            AssignOp::MulAssign
        } else if self.eat_punct("/=") {
            AssignOp::DivAssign
        } else {
            return Ok(target);
        };
        if !matches!(target, Expression::Identifier { .. } | Expression::Member { .. }) {
            return Err(self.error("Invalid left-hand side in assignment"));
        }
        let value = self.parse_assignment()?;
        Ok(Expression::Assignment {
            operator,
            target: Box::new(target),
            value: Box::new(value),
            span,
        })
    }

    fn parse_conditional(&mut self) -> ParseResult<Expression> {
        let span = self.current_span();
        let test = self.parse_logical_or()?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.parse_assignment()?;
        self.expect_punct(":")?;
        let alternate = self.parse_assignment()?;
        Ok(Expression::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
            span,
        })
    }

    fn parse_logical_or(&mut self) -> ParseResult<Expression> {
        let span = self.current_span();
        let mut left = self.parse_logical_and()?;
        while self.eat_punct("||") {
            let right = self.parse_logical_and()?;
            left = Expression::Logical {
                operator: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> ParseResult<Expression> {
        let span = self.current_span();
        let mut left = self.parse_bitwise()?;
        while self.eat_punct("&&") {
            let right = self.parse_bitwise()?;
            left = Expression::Logical {
                operator: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_bitwise(&mut self) -> ParseResult<Expression> {
        let span = self.current_span();
        let mut left = self.parse_equality()?;
        loop {
            let operator = if self.eat_punct("|") {
                BinaryOp::BitOr
            } else if self.eat_punct("^") {
                BinaryOp::BitXor
            } else if self.eat_punct("&") {
                BinaryOp::BitAnd
            } else {
                return Ok(left);
            };
            let right = self.parse_equality()?;
            left = Expression::Binary {
                operator,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
    }

    fn parse_equality(&mut self) -> ParseResult<Expression> {
        let span = self.current_span();
        let mut left = self.parse_relational()?;
        loop {
            let operator = if self.eat_punct("===") {
                BinaryOp::StrictEq
            } else if self.eat_punct("!==") {
                BinaryOp::StrictNotEq
            } else if self.eat_punct("==") {
                BinaryOp::Eq
            } else if self.eat_punct("!=") {
                BinaryOp::NotEq
            } else {
                return Ok(left);
            };
            let right = self.parse_relational()?;
            left = Expression::Binary {
                operator,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
    }

    fn parse_relational(&mut self) -> ParseResult<Expression> {
        let span = self.current_span();
        let mut left = self.parse_shift()?;
        loop {
            let operator = if self.eat_punct("<=") {
                BinaryOp::LtEq
            } else if self.eat_punct(">=") {
                BinaryOp::GtEq
            } else if self.eat_punct("<") {
                BinaryOp::Lt
            } else if self.eat_punct(">") {
                BinaryOp::Gt
            } else if !self.no_in && self.is_keyword("in") {
                self.position += 1;
                BinaryOp::In
            } else if self.eat_keyword("instanceof") {
                BinaryOp::InstanceOf
            } else {
                return Ok(left);
            };
            let right = self.parse_shift()?;
            left = Expression::Binary {
                operator,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
    }

    fn parse_shift(&mut self) -> ParseResult<Expression> {
        let span = self.current_span();
        let mut left = self.parse_additive()?;
        loop {
            let operator = if self.eat_punct(">>>") {
                BinaryOp::UShr
            } else if self.eat_punct("<<") {
                BinaryOp::Shl
            } else if self.eat_punct(">>") {
                BinaryOp::Shr
            } else {
                return Ok(left);
            };
            let right = self.parse_additive()?;
            left = Expression::Binary {
                operator,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
    }

    fn parse_additive(&mut self) -> ParseResult<Expression> {
        let span = self.current_span();
        let mut left = self.parse_multiplicative()?;
        loop {
            let operator = if self.eat_punct("+") {
                BinaryOp::Add
            } else if self.eat_punct("-") {
                BinaryOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.parse_multiplicative()?;
            left = Expression::Binary {
                operator,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expression> {
        let span = self.current_span();
        let mut left = self.parse_unary()?;
        loop {
            let operator = if self.eat_punct("*") {
                BinaryOp::Mul
            } else if self.eat_punct("/") {
                BinaryOp::Div
            } else if self.eat_punct("%") {
                BinaryOp::Mod
            } else {
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = Expression::Binary {
                operator,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
    }

    fn parse_unary(&mut self) -> ParseResult<Expression> {
        let span = self.current_span();
        let operator = if self.eat_punct("!") {
            Some(UnaryOp::Not)
        } else if self.eat_punct("~") {
            Some(UnaryOp::BitNot)
        } else if self.eat_punct("-") {
            Some(UnaryOp::Minus)
        } else if self.eat_punct("+") {
            Some(UnaryOp::Plus)
        } else if self.eat_keyword("typeof") {
            Some(UnaryOp::TypeOf)
        } else if self.eat_keyword("void") {
            Some(UnaryOp::Void)
        } else if self.eat_keyword("delete") {
            Some(UnaryOp::Delete)
        } else {
            None
        };
        if let Some(operator) = operator {
            let argument = self.parse_unary()?;
            return Ok(Expression::Unary {
                operator,
                argument: Box::new(argument),
                span,
            });
        }
        if self.eat_punct("++") {
            let argument = self.parse_unary()?;
            return Ok(Expression::Update {
                operator: UpdateOp::Increment,
                prefix: true,
                argument: Box::new(argument),
                span,
            });
        }
        if self.eat_punct("--") {
            let argument = self.parse_unary()?;
            return Ok(Expression::Update {
                operator: UpdateOp::Decrement,
                prefix: true,
                argument: Box::new(argument),
                span,
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> ParseResult<Expression> {
        let span = self.current_span();
        let argument = self.parse_call_or_member()?;
        if self.eat_punct("++") {
            return Ok(Expression::Update {
                operator: UpdateOp::Increment,
                prefix: false,
                argument: Box::new(argument),
                span,
            });
        }
        if self.eat_punct("--") {
            return Ok(Expression::Update {
                operator: UpdateOp::Decrement,
                prefix: false,
                argument: Box::new(argument),
                span,
            });
        }
        Ok(argument)
    }

    fn parse_call_or_member(&mut self) -> ParseResult<Expression> {
        let span = self.current_span();
        if self.eat_keyword("new") {
            let callee = self.parse_call_or_member_base()?;
            let arguments = if self.is_punct("(") {
                self.parse_arguments()?
            } else {
                Vec::new()
            };
            let mut expression = Expression::New {
                callee: Box::new(callee),
                arguments,
                span,
            };
            expression = self.parse_member_suffix(expression)?;
            return Ok(expression);
        }
        let base = self.parse_primary()?;
        self.parse_member_suffix(base)
    }

    /// Member chain on a `new` callee: stops before the argument list.
    fn parse_call_or_member_base(&mut self) -> ParseResult<Expression> {
        let mut expression = self.parse_primary()?;
        loop {
            let span = self.current_span();
            if self.eat_punct(".") {
                let name = self.expect_identifier()?;
                expression = Expression::Member {
                    object: Box::new(expression),
                    key: MemberKey::Static(name),
                    span,
                };
            } else if self.eat_punct("[") {
                let key = self.parse_expression()?;
                self.expect_punct("]")?;
                expression = Expression::Member {
                    object: Box::new(expression),
                    key: MemberKey::Computed(Box::new(key)),
                    span,
                };
            } else {
                return Ok(expression);
            }
        }
    }

    fn parse_member_suffix(&mut self, mut expression: Expression) -> ParseResult<Expression> {
        loop {
            let span = self.current_span();
            if self.eat_punct(".") {
                let name = self.expect_identifier()?;
                expression = Expression::Member {
                    object: Box::new(expression),
                    key: MemberKey::Static(name),
                    span,
                };
            } else if self.eat_punct("[") {
                let key = self.parse_expression()?;
                self.expect_punct("]")?;
                expression = Expression::Member {
                    object: Box::new(expression),
                    key: MemberKey::Computed(Box::new(key)),
                    span,
                };
            } else if self.is_punct("(") {
                let arguments = self.parse_arguments()?;
                expression = Expression::Call {
                    callee: Box::new(expression),
                    arguments,
                    span,
                };
            } else {
                return Ok(expression);
            }
        }
    }

    fn parse_arguments(&mut self) -> ParseResult<Vec<Expression>> {
        self.expect_punct("(")?;
        let mut arguments = Vec::new();
        if !self.is_punct(")") {
            loop {
                arguments.push(self.parse_assignment()?);
                if !self.eat_punct(",") {
                    break;
                }
            }
        }
        self.expect_punct(")")?;
        Ok(arguments)
    }

    fn parse_primary(&mut self) -> ParseResult<Expression> {
        let span = self.current_span();
        if self.eat_punct("(") {
            let expression = self.parse_expression()?;
            self.expect_punct(")")?;
            return Ok(expression);
        }
        if self.eat_punct("[") {
            let mut elements = Vec::new();
            while !self.is_punct("]") {
                if self.eat_punct(",") {
                    elements.push(None);
                    continue;
                }
                elements.push(Some(self.parse_assignment()?));
                if !self.is_punct("]") {
                    self.expect_punct(",")?;
                }
            }
            self.expect_punct("]")?;
            return Ok(Expression::ArrayLiteral { elements, span });
        }
        if self.is_punct("{") {
            return self.parse_object_literal(span);
        }
        if self.eat_keyword("function") {
            let name = match self.peek() {
                Some(Token { kind: TokenKind::Identifier(name), .. }) if !is_reserved(name) => {
                    let name = name.clone();
                    self.position += 1;
                    Some(name)
                }
                _ => None,
            };
            let params = self.parse_params()?;
            let body = self.parse_block()?;
            return Ok(Expression::Function(FunctionExpression {
                name,
                params,
                body,
                span,
            }));
        }
        match self.advance() {
            Some(Token { kind: TokenKind::Number(value), .. }) => {
                Ok(Expression::NumberLiteral { value, span })
            }
            Some(Token { kind: TokenKind::Str(value), .. }) => {
                Ok(Expression::StringLiteral { value, span })
            }
            Some(Token { kind: TokenKind::Identifier(name), .. }) => match name.as_str() {
                "true" => Ok(Expression::BooleanLiteral { value: true, span }),
                "false" => Ok(Expression::BooleanLiteral { value: false, span }),
                "null" => Ok(Expression::NullLiteral { span }),
                "this" => Ok(Expression::This { span }),
                _ => Ok(Expression::Identifier { name, span }),
            },
            _ => Err(self.error("expected an expression")),
        }
    }

    fn parse_object_literal(&mut self, span: SourceSpan) -> ParseResult<Expression> {
        self.expect_punct("{")?;
        let mut properties = Vec::new();
        while !self.is_punct("}") {
            let property_span = self.current_span();
            let key = match self.advance() {
                Some(Token { kind: TokenKind::Identifier(name), .. }) => {
                    PropertyName::Identifier(name)
                }
                Some(Token { kind: TokenKind::Str(value), .. }) => {
                    PropertyName::StringLiteral(value)
                }
                Some(Token { kind: TokenKind::Number(value), .. }) => {
                    PropertyName::NumberLiteral(value)
                }
                Some(Token { kind: TokenKind::Punct("["), .. }) => {
                    let key = self.parse_assignment()?;
                    self.expect_punct("]")?;
                    PropertyName::Computed(Box::new(key))
                }
                _ => return Err(self.error("expected a property name")),
            };
            self.expect_punct(":")?;
            let value = self.parse_assignment()?;
            properties.push(ObjectProperty {
                key,
                value,
                kind: PropertyKind::Init,
                span: property_span,
            });
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct("}")?;
        Ok(Expression::ObjectLiteral { properties, span })
    }
}

fn is_reserved(name: &str) -> bool {
    matches!(
        name,
        "var" | "let"
            | "const"
            | "function"
            | "if"
            | "else"
            | "for"
            | "while"
            | "do"
            | "switch"
            | "case"
            | "default"
            | "try"
            | "catch"
            | "finally"
            | "throw"
            | "return"
            | "break"
            | "continue"
            | "new"
            | "delete"
            | "typeof"
            | "void"
            | "in"
            | "instanceof"
            | "this"
            | "true"
            | "false"
            | "null"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Program {
        CanonicalParser
            .parse(source, "<test>", ParseGoal::Script, 1)
            .unwrap()
    }

    #[test]
    fn parses_variable_declaration_with_addition() {
        let program = parse("var x = 1 + 2;");
        assert_eq!(program.body.len(), 1);
        let Statement::Variable(declaration) = &program.body[0] else {
            panic!("expected variable declaration");
        };
        assert_eq!(declaration.kind, VariableKind::Var);
        assert_eq!(declaration.declarators[0].name, "x");
        assert!(matches!(
            declaration.declarators[0].init,
            Some(Expression::Binary {
                operator: BinaryOp::Add,
                ..
            })
        ));
    }

    #[test]
    fn parses_member_call_chain() {
        let program = parse("console.log(\"hi\");");
        let Statement::Expression(statement) = &program.body[0] else {
            panic!("expected expression statement");
        };
        let Expression::Call { callee, arguments, .. } = &statement.expression else {
            panic!("expected call");
        };
        assert!(matches!(
            callee.as_ref(),
            Expression::Member { key: MemberKey::Static(name), .. } if name == "log"
        ));
        assert_eq!(arguments.len(), 1);
    }

    #[test]
    fn parses_for_in_over_declaration() {
        let program = parse("for (var k in o) { t[k] = o[k]; }");
        let Statement::ForIn(statement) = &program.body[0] else {
            panic!("expected for-in");
        };
        assert!(matches!(
            &statement.left,
            ForInTarget::Declaration(VariableKind::Var, name) if name == "k"
        ));
    }

    #[test]
    fn parses_try_catch_finally() {
        let program = parse("try { f(); } catch (e) { g(e); } finally { h(); }");
        let Statement::Try(statement) = &program.body[0] else {
            panic!("expected try");
        };
        assert!(statement.handler.is_some());
        assert!(statement.finalizer.is_some());
        assert_eq!(statement.handler.as_ref().unwrap().param.as_deref(), Some("e"));
    }

    #[test]
    fn parses_precedence_correctly() {
        let program = parse("x = 1 + 2 * 3 === 7;");
        let Statement::Expression(statement) = &program.body[0] else {
            panic!("expected expression");
        };
        let Expression::Assignment { value, .. } = &statement.expression else {
            panic!("expected assignment");
        };
        assert!(matches!(
            value.as_ref(),
            Expression::Binary {
                operator: BinaryOp::StrictEq,
                ..
            }
        ));
    }

    #[test]
    fn parses_new_and_conditional() {
        let program = parse("var e = c ? new Error(\"a\") : null;");
        let Statement::Variable(declaration) = &program.body[0] else {
            panic!("expected declaration");
        };
        assert!(matches!(
            declaration.declarators[0].init,
            Some(Expression::Conditional { .. })
        ));
    }

    #[test]
    fn tracks_line_numbers() {
        let program = parse("var a = 1;\nvar b = 2;");
        assert_eq!(program.body[1].span().start_line, 2);
    }

    #[test]
    fn empty_source_is_an_error() {
        let error = CanonicalParser
            .parse("   ", "<test>", ParseGoal::Script, 1)
            .unwrap_err();
        assert_eq!(error.code, ParseErrorCode::EmptySource);
    }

    #[test]
    fn classification_by_message_substring() {
        assert_eq!(
            classify_parse_failure("Invalid left-hand side in assignment"),
            ParseFailureKind::ReferenceError
        );
        assert_eq!(
            classify_parse_failure("unexpected token `)`"),
            ParseFailureKind::SyntaxError
        );
    }

    #[test]
    fn labeled_statement_and_break() {
        let program = parse("outer: for (;;) { break outer; }");
        let Statement::Labeled(labeled) = &program.body[0] else {
            panic!("expected labeled statement");
        };
        assert_eq!(labeled.label, "outer");
    }

    #[test]
    fn string_escapes() {
        let program = parse("var s = \"a\\nb\\\"c\";");
        let Statement::Variable(declaration) = &program.body[0] else {
            panic!("expected declaration");
        };
        assert!(matches!(
            &declaration.declarators[0].init,
            Some(Expression::StringLiteral { value, .. }) if value == "a\nb\"c"
        ));
    }
}

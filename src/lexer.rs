//! Hand-rolled lexer (scanner) for the Slang language.
//!
//! The [`Lexer`] consumes a source string and produces a flat `Vec<Token>`.
//! Tokens carry [`Span`] information for precise error reporting.
//!
//! # Error Handling
//!
//! Lexer errors are collected into an internal list rather than immediately
//! aborting.  This lets the lexer report multiple problems in a single pass.
//! Call [`Lexer::scan`] to get both the token stream and the error list.

use crate::token::{keyword, Span, Token, TokenKind};

// ─────────────────────────────────────────────────────────────────────────────
// Lexer struct
// ─────────────────────────────────────────────────────────────────────────────

/// The Slang lexical scanner.
///
/// Construct one with [`Lexer::new`] and then call [`Lexer::scan`] to obtain
/// the full token stream.  The lexer itself is consumed after scanning.
pub struct Lexer<'src> {
    /// Iterator over `(byte_offset, char)` pairs.
    chars: std::str::CharIndices<'src>,
    /// The current character and its byte offset, or `None` at EOF.
    current: Option<(usize, char)>,
    /// The *next* character peeked without consuming (for two-character lookahead).
    peeked: Option<(usize, char)>,
    /// Current source line (1-indexed).
    line: u32,
    /// Current source column in *characters* (1-indexed).
    col: u32,
    /// Byte offset of the character immediately after the most recently consumed one.
    /// Used to set `span.end` after consuming a token.
    pos: usize,
    /// Accumulated lex errors.  Non-fatal; scanning continues after recording.
    errors: Vec<LexError>,
}

/// A non-fatal lexical error.  Lexing continues after recording these so
/// the parser sees as many tokens as possible.
#[derive(Debug, Clone)]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.span, self.message)
    }
}

/// Scan `src` in one call, returning `(tokens, errors)`.
pub fn lex(src: &str) -> (Vec<Token>, Vec<LexError>) {
    Lexer::new(src).scan()
}

impl<'src> Lexer<'src> {
    /// Create a new lexer for the given source text.
    pub fn new(src: &'src str) -> Self {
        let mut chars = src.char_indices();
        let current = chars.next();
        let peeked = chars.next();
        Self {
            chars,
            current,
            peeked,
            line: 1,
            col: 1,
            pos: 0,
            errors: Vec::new(),
        }
    }

    /// Run the full scan, returning `(tokens, errors)`.
    ///
    /// `tokens` always ends with an [`TokenKind::Eof`] sentinel.
    /// `errors` is empty on a clean input.
    pub fn scan(mut self) -> (Vec<Token>, Vec<LexError>) {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace_and_comments();

            if self.current.is_none() {
                let span = Span::new(self.pos, self.pos, self.line, self.col);
                tokens.push(Token::new(TokenKind::Eof, span));
                break;
            }

            if let Some(tok) = self.next_token() {
                tokens.push(tok);
            }
        }

        (tokens, self.errors)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal scanning helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Return the current character without consuming it.
    #[inline]
    fn peek(&self) -> Option<char> {
        self.current.map(|(_, c)| c)
    }

    /// Return the next character without consuming either current or next.
    #[inline]
    fn peek2(&self) -> Option<char> {
        self.peeked.map(|(_, c)| c)
    }

    /// Consume the current character and advance the iterator.
    /// Updates line/column counters and `self.pos`.
    fn advance(&mut self) -> Option<char> {
        let result = self.current;
        self.current = self.peeked;
        self.peeked = self.chars.next();

        if let Some((offset, ch)) = result {
            // Update position to the byte offset AFTER this character.
            self.pos = offset + ch.len_utf8();
            if ch == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
            Some(ch)
        } else {
            None
        }
    }

    /// Consume the current character only if it equals `expected`.
    /// Returns whether the character was consumed.
    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Build a [`Span`] that begins at `start_pos/start_line/start_col` and
    /// ends at the current `self.pos`.
    #[inline]
    fn make_span(&self, start_pos: usize, start_line: u32, start_col: u32) -> Span {
        Span::new(start_pos, self.pos, start_line, start_col)
    }

    /// Skip all whitespace and `//` line comments.
    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r' | '\n') => {
                    self.advance();
                }
                Some('/') if self.peek2() == Some('/') => {
                    // Consume until end-of-line.
                    while self.peek().map(|c| c != '\n').unwrap_or(false) {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    /// Lex the next token from the current position.
    ///
    /// Returns `None` when the character could not start any token (an error
    /// is recorded and the character is skipped).
    /// Precondition: `self.current` is `Some` (not EOF).
    fn next_token(&mut self) -> Option<Token> {
        let start_pos = self.current.map(|(o, _)| o).unwrap_or(self.pos);
        let start_line = self.line;
        let start_col = self.col;

        let ch = self.advance().expect("next_token called at EOF");

        let kind = match ch {
            // ── Single-character unambiguous tokens ──────────────────────────
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '+' => TokenKind::Plus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '=' => TokenKind::Eq,
            '<' => TokenKind::Lt,
            '!' => TokenKind::Bang,
            '?' => TokenKind::Question,

            // ── Multi-character or overloaded tokens ─────────────────────────
            '-' => {
                if self.eat('>') {
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            ':' => {
                if self.eat('=') {
                    TokenKind::Assign
                } else {
                    let span = self.make_span(start_pos, start_line, start_col);
                    self.errors.push(LexError {
                        message: "unexpected character `:`; did you mean `:=`?".into(),
                        span,
                    });
                    return None;
                }
            }
            '&' => {
                if self.eat('&') {
                    TokenKind::AndAnd
                } else {
                    let span = self.make_span(start_pos, start_line, start_col);
                    self.errors.push(LexError {
                        message: "unexpected character `&`; did you mean `&&`?".into(),
                        span,
                    });
                    return None;
                }
            }
            '|' => {
                if self.eat('|') {
                    TokenKind::OrOr
                } else {
                    TokenKind::Bar
                }
            }

            // ── Numbers ──────────────────────────────────────────────────────
            c if c.is_ascii_digit() => {
                let mut text = String::new();
                text.push(c);
                while self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                    text.push(self.advance().unwrap());
                }
                match text.parse::<i64>() {
                    Ok(n) => TokenKind::Int(n),
                    Err(_) => {
                        let span = self.make_span(start_pos, start_line, start_col);
                        self.errors.push(LexError {
                            message: format!("integer literal `{text}` is out of range"),
                            span,
                        });
                        return None;
                    }
                }
            }

            // ── Identifiers and keywords ─────────────────────────────────────
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut text = String::new();
                text.push(c);
                while self
                    .peek()
                    .map(|c| c.is_ascii_alphanumeric() || c == '_')
                    .unwrap_or(false)
                {
                    text.push(self.advance().unwrap());
                }
                keyword(&text).unwrap_or(TokenKind::Ident(text))
            }

            other => {
                let span = self.make_span(start_pos, start_line, start_col);
                self.errors.push(LexError {
                    message: format!("unexpected character `{other}`"),
                    span,
                });
                return None;
            }
        };

        let span = self.make_span(start_pos, start_line, start_col);
        Some(Token::new(kind, span))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

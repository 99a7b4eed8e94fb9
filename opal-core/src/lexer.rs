//! Lexer for Opal source text.
//!
//! A single left-to-right scan with one character of lookahead. The
//! lexer attaches no semantic meaning beyond keyword recognition and
//! literal classification; escape sequences inside string literals are
//! kept raw and interpolated (backtick) strings are passed through
//! untouched for later stages to interpret.

use crate::error::CoreError;

/// Kind of a token produced by the lexer.
///
/// The enumeration is closed. Several keywords (`enum`, `impl`, ...)
/// are reserved and lexed even though the parser rejects them today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Identifiers and literals
    Identifier,
    Integer,
    Float,
    String,
    Char,
    BacktickString,

    // Keywords
    Fn,
    Struct,
    Enum,
    Interface,
    Impl,
    Use,
    Extern,
    Match,
    If,
    Else,
    For,
    In,
    While,
    Loop,
    Break,
    Continue,
    Var,
    Mut,
    Const,
    True,
    False,

    // Delimiters
    LParen,   // (
    RParen,   // )
    LBrace,   // {
    RBrace,   // }
    LBracket, // [
    RBracket, // ]
    Comma,
    Semicolon,
    Colon,
    Dot,
    Question,
    FatArrow,   // =>
    Arrow,      // ->
    Underscore, // _

    // Operators
    Assign,      // =
    PlusEquals,  // +=
    MinusEquals, // -=
    Equals,      // ==
    BangEquals,  // !=
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    AndAnd,
    OrOr,
    GreaterThan,
    GreaterThanEquals,
    LessThan,
    LessThanEquals,

    Eof,
}

/// A token with its kind, source text and 1-based position.
///
/// Immutable once produced; the parser consumes these read-only. The
/// `text` of a string/char token is the span between the delimiters,
/// with escapes left unprocessed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: u32,
    pub column: u32,
}

/// Lex a source string into tokens.
///
/// Total over well-formed input; the first malformed construct aborts
/// with a positioned error. The returned stream always ends with an
/// `Eof` sentinel so downstream consumers never bounds-check.
pub fn lex(source: &str) -> Result<Vec<Token>, CoreError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    index: usize,
    line: u32,
    column: u32,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Lexer {
            chars: source.chars().collect(),
            index: 0,
            line: 1,
            column: 1,
        }
    }

    fn run(mut self) -> Result<Vec<Token>, CoreError> {
        let mut tokens = Vec::new();

        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
                continue;
            }

            if c == '/' && self.peek_next() == Some('/') {
                self.skip_line_comment();
                continue;
            }

            if c == '/' && self.peek_next() == Some('*') {
                self.skip_block_comment()?;
                continue;
            }

            if is_ident_start(c) {
                tokens.push(self.lex_ident_or_keyword());
                continue;
            }

            if c.is_ascii_digit() {
                tokens.push(self.lex_number());
                continue;
            }

            if c == '"' {
                tokens.push(self.lex_string()?);
                continue;
            }

            if c == '`' {
                tokens.push(self.lex_backtick_string()?);
                continue;
            }

            if c == '\'' {
                tokens.push(self.lex_char()?);
                continue;
            }

            if let Some(token) = self.lex_two_char_operator(c) {
                tokens.push(token);
                continue;
            }

            if let Some(token) = self.lex_single_char(c) {
                tokens.push(token);
                continue;
            }

            return Err(self.error_here(format!("unexpected character '{c}'")));
        }

        tokens.push(Token {
            kind: TokenKind::Eof,
            text: String::new(),
            line: self.line,
            column: self.column,
        });
        Ok(tokens)
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), CoreError> {
        let (start_line, start_column) = (self.line, self.column);
        self.advance(); // '/'
        self.advance(); // '*'

        while let Some(c) = self.peek() {
            if c == '*' && self.peek_next() == Some('/') {
                self.advance();
                self.advance();
                return Ok(());
            }
            self.advance();
        }

        Err(CoreError::Lex {
            line: start_line,
            column: start_column,
            message: "unterminated block comment".to_string(),
        })
    }

    fn lex_ident_or_keyword(&mut self) -> Token {
        let (line, column) = (self.line, self.column);
        let start = self.index;
        while let Some(c) = self.peek() {
            if is_ident_continue(c) {
                self.advance();
            } else {
                break;
            }
        }

        let text: String = self.chars[start..self.index].iter().collect();
        let kind = match text.as_str() {
            "fn" => TokenKind::Fn,
            "struct" => TokenKind::Struct,
            "enum" => TokenKind::Enum,
            "interface" => TokenKind::Interface,
            "impl" => TokenKind::Impl,
            "use" => TokenKind::Use,
            "extern" => TokenKind::Extern,
            "match" => TokenKind::Match,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "while" => TokenKind::While,
            "loop" => TokenKind::Loop,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "var" => TokenKind::Var,
            "mut" => TokenKind::Mut,
            "const" => TokenKind::Const,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "_" => TokenKind::Underscore,
            _ => TokenKind::Identifier,
        };

        Token {
            kind,
            text,
            line,
            column,
        }
    }

    /// Digits, an optional `.digits` fraction promoting the literal to
    /// a float, then an optional identifier-shaped suffix (`42i32`)
    /// absorbed into the text without validation.
    fn lex_number(&mut self) -> Token {
        let (line, column) = (self.line, self.column);
        let start = self.index;

        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }

        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.advance(); // '.'
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        if self.peek().is_some_and(is_ident_start) {
            while self.peek().is_some_and(is_ident_continue) {
                self.advance();
            }
        }

        Token {
            kind: if is_float {
                TokenKind::Float
            } else {
                TokenKind::Integer
            },
            text: self.chars[start..self.index].iter().collect(),
            line,
            column,
        }
    }

    fn lex_string(&mut self) -> Result<Token, CoreError> {
        let (line, column) = (self.line, self.column);
        self.advance(); // opening quote
        let start = self.index;

        while let Some(c) = self.peek() {
            match c {
                '"' => {
                    let text: String = self.chars[start..self.index].iter().collect();
                    self.advance(); // closing quote
                    return Ok(Token {
                        kind: TokenKind::String,
                        text,
                        line,
                        column,
                    });
                }
                // A backslash escapes the next character rather than
                // terminating the scan; interpretation happens later.
                '\\' => {
                    self.advance();
                    if self.peek().is_some() {
                        self.advance();
                    }
                }
                _ => self.advance(),
            }
        }

        Err(CoreError::Lex {
            line,
            column,
            message: "unterminated string literal".to_string(),
        })
    }

    fn lex_backtick_string(&mut self) -> Result<Token, CoreError> {
        let (line, column) = (self.line, self.column);
        self.advance(); // opening backtick
        let start = self.index;

        while let Some(c) = self.peek() {
            if c == '`' {
                let text: String = self.chars[start..self.index].iter().collect();
                self.advance(); // closing backtick
                return Ok(Token {
                    kind: TokenKind::BacktickString,
                    text,
                    line,
                    column,
                });
            }
            self.advance();
        }

        Err(CoreError::Lex {
            line,
            column,
            message: "unterminated interpolated string".to_string(),
        })
    }

    /// Exactly one logical character: either a bare character or a
    /// backslash followed by one character. Validity of the escape is
    /// checked at emission, not here.
    fn lex_char(&mut self) -> Result<Token, CoreError> {
        let (line, column) = (self.line, self.column);
        let unterminated = |message: &str| CoreError::Lex {
            line,
            column,
            message: message.to_string(),
        };

        self.advance(); // opening quote
        let start = self.index;

        match self.peek() {
            None => return Err(unterminated("unterminated char literal")),
            Some('\\') => {
                self.advance();
                if self.peek().is_none() {
                    return Err(unterminated("unterminated char escape"));
                }
                self.advance();
            }
            Some(_) => self.advance(),
        }

        if self.peek() != Some('\'') {
            return Err(unterminated("unterminated char literal"));
        }

        let text: String = self.chars[start..self.index].iter().collect();
        self.advance(); // closing quote
        Ok(Token {
            kind: TokenKind::Char,
            text,
            line,
            column,
        })
    }

    fn lex_two_char_operator(&mut self, c: char) -> Option<Token> {
        let next = self.peek_next()?;
        let kind = match (c, next) {
            ('=', '>') => TokenKind::FatArrow,
            ('-', '>') => TokenKind::Arrow,
            ('=', '=') => TokenKind::Equals,
            ('!', '=') => TokenKind::BangEquals,
            ('<', '=') => TokenKind::LessThanEquals,
            ('>', '=') => TokenKind::GreaterThanEquals,
            ('+', '=') => TokenKind::PlusEquals,
            ('-', '=') => TokenKind::MinusEquals,
            ('&', '&') => TokenKind::AndAnd,
            ('|', '|') => TokenKind::OrOr,
            _ => return None,
        };

        let (line, column) = (self.line, self.column);
        self.advance();
        self.advance();
        Some(Token {
            kind,
            text: format!("{c}{next}"),
            line,
            column,
        })
    }

    fn lex_single_char(&mut self, c: char) -> Option<Token> {
        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            ':' => TokenKind::Colon,
            '.' => TokenKind::Dot,
            '?' => TokenKind::Question,
            '=' => TokenKind::Assign,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '!' => TokenKind::Bang,
            '<' => TokenKind::LessThan,
            '>' => TokenKind::GreaterThan,
            _ => return None,
        };

        let (line, column) = (self.line, self.column);
        self.advance();
        Some(Token {
            kind,
            text: c.to_string(),
            line,
            column,
        })
    }

    fn error_here(&self, message: String) -> CoreError {
        CoreError::Lex {
            line: self.line,
            column: self.column,
            message,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.index + 1).copied()
    }

    fn advance(&mut self) {
        if let Some(&c) = self.chars.get(self.index) {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
            self.index += 1;
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> String {
        lex(source)
            .expect("lex")
            .iter()
            .map(|t| format!("{:?}", t.kind))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn lexes_operators_and_keywords() {
        let source = "mut var total: i32 = 42i32;\nif total >= 10 && total != 11 => total += 1;";
        let expected = "Mut Var Identifier Colon Identifier Assign Integer Semicolon \
                        If Identifier GreaterThanEquals Integer AndAnd Identifier BangEquals Integer FatArrow \
                        Identifier PlusEquals Integer Semicolon Eof";
        assert_eq!(kinds(source), expected.split_whitespace().collect::<Vec<_>>().join(" "));
    }

    #[test]
    fn skips_comments_and_keeps_literal_text() {
        let source = "// line comment\nvar a = \"x\";\n/* block\n   comment */\nvar b = `sum {a}`;\nvar c = '\\n';";
        let tokens = lex(source).expect("lex");
        let snapshot = tokens
            .iter()
            .map(|t| format!("{:?}:{}", t.kind, t.text))
            .collect::<Vec<_>>()
            .join(" | ");
        assert_eq!(
            snapshot,
            "Var:var | Identifier:a | Assign:= | String:x | Semicolon:; | \
             Var:var | Identifier:b | Assign:= | BacktickString:sum {a} | Semicolon:; | \
             Var:var | Identifier:c | Assign:= | Char:\\n | Semicolon:; | Eof:"
        );
    }

    #[test]
    fn tracks_one_based_positions() {
        let tokens = lex("fn main()\n  => 1;").expect("lex");
        let fn_tok = &tokens[0];
        assert_eq!((fn_tok.line, fn_tok.column), (1, 1));
        let main_tok = &tokens[1];
        assert_eq!((main_tok.line, main_tok.column), (1, 4));
        let arrow = tokens.iter().find(|t| t.kind == TokenKind::FatArrow).unwrap();
        assert_eq!((arrow.line, arrow.column), (2, 3));
    }

    #[test]
    fn always_terminates_with_eof_sentinel() {
        for source in ["", "   ", "// only a comment", "fn main() => 1;"] {
            let tokens = lex(source).expect("lex");
            assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);
        }
    }

    #[test]
    fn absorbs_numeric_suffixes_without_validating() {
        let tokens = lex("42i32 3.14f64 7").expect("lex");
        assert_eq!(tokens[0].kind, TokenKind::Integer);
        assert_eq!(tokens[0].text, "42i32");
        assert_eq!(tokens[1].kind, TokenKind::Float);
        assert_eq!(tokens[1].text, "3.14f64");
        assert_eq!(tokens[2].kind, TokenKind::Integer);
        assert_eq!(tokens[2].text, "7");
    }

    #[test]
    fn dot_after_integer_stays_a_member_access() {
        let tokens = lex("1.foo").expect("lex");
        assert_eq!(tokens[0].kind, TokenKind::Integer);
        assert_eq!(tokens[1].kind, TokenKind::Dot);
        assert_eq!(tokens[2].kind, TokenKind::Identifier);
    }

    #[test]
    fn string_escape_does_not_terminate_the_scan() {
        let tokens = lex(r#""a\"b""#).expect("lex");
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].text, "a\\\"b");
    }

    #[test]
    fn reports_unterminated_constructs_with_position() {
        let err = lex("\"abc").unwrap_err();
        assert!(matches!(err, CoreError::Lex { line: 1, column: 1, .. }), "{err}");

        let err = lex("/* never closed").unwrap_err();
        assert!(err.to_string().contains("unterminated block comment"));

        let err = lex("'a").unwrap_err();
        assert!(err.to_string().contains("unterminated char literal"));

        let err = lex("`oops").unwrap_err();
        assert!(err.to_string().contains("unterminated interpolated string"));
    }

    #[test]
    fn rejects_unrecognized_characters() {
        let err = lex("var a = #;").unwrap_err();
        assert!(err.to_string().contains("unexpected character '#'"));
        assert!(err.to_string().contains("1:9"));
    }
}

//! Tokenizer for definition files.

use crate::Position;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Str(String),
    Integer(i64),
    Float(f64),
    True,
    False,
    Let,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Equals,
    Plus,
    Eof,
}
impl Token {
    /// Description used in "expected X, found Y" messages.
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Ident(name) => format!("identifier `{name}`"),
            Self::Str(_) => "string".to_string(),
            Self::Integer(_) | Self::Float(_) => "number".to_string(),
            Self::True | Self::False => "boolean".to_string(),
            Self::Let => "`let`".to_string(),
            Self::LBrace => "`{`".to_string(),
            Self::RBrace => "`}`".to_string(),
            Self::LBracket => "`[`".to_string(),
            Self::RBracket => "`]`".to_string(),
            Self::Comma => "`,`".to_string(),
            Self::Equals => "`=`".to_string(),
            Self::Plus => "`+`".to_string(),
            Self::Eof => "end of file".to_string(),
        }
    }
}

pub(crate) struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: u32,
    column: u32,
}
impl<'a> Lexer<'a> {
    pub(crate) fn new(source: &'a str) -> Self {
        Self { chars: source.chars().peekable(), line: 1, column: 1 }
    }

    /// Tokenize the whole source. The last token is always [`Token::Eof`].
    pub(crate) fn tokenize(mut self) -> Result<Vec<(Token, Position)>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let position = self.position();
            let Some(c) = self.bump() else {
                tokens.push((Token::Eof, position));
                return Ok(tokens);
            };
            let token = match c {
                '{' => Token::LBrace,
                '}' => Token::RBrace,
                '[' => Token::LBracket,
                ']' => Token::RBracket,
                ',' => Token::Comma,
                '=' => Token::Equals,
                '+' => Token::Plus,
                '"' => Token::Str(self.string(position)?),
                '-' if self.chars.peek().is_some_and(char::is_ascii_digit) => self.number('-', position)?,
                c if c.is_ascii_digit() => self.number(c, position)?,
                c if c.is_ascii_alphabetic() || c == '_' => match self.word(c).as_str() {
                    "let" => Token::Let,
                    "true" => Token::True,
                    "false" => Token::False,
                    word => Token::Ident(word.to_string()),
                },
                other => exn::bail!(ErrorKind::Syntax { position, message: format!("unexpected character {other:?}") }),
            };
            tokens.push((token, position));
        }
    }

    fn position(&self) -> Position {
        Position { line: self.line, column: self.column }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) {
        while let Some(&c) = self.chars.peek() {
            if c == '#' {
                while self.chars.peek().is_some_and(|c| *c != '\n') {
                    self.bump();
                }
            } else if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn string(&mut self, start: Position) -> Result<String> {
        let mut value = String::new();
        loop {
            let position = self.position();
            match self.bump() {
                None => exn::bail!(ErrorKind::Syntax { position: start, message: "unterminated string".to_string() }),
                Some('"') => return Ok(value),
                Some('\\') => match self.bump() {
                    Some('"') => value.push('"'),
                    Some('\\') => value.push('\\'),
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(other) => exn::bail!(ErrorKind::Syntax {
                        position,
                        message: format!("unknown escape sequence \\{other}"),
                    }),
                    None => exn::bail!(ErrorKind::Syntax { position: start, message: "unterminated string".to_string() }),
                },
                Some(c) => value.push(c),
            }
        }
    }

    fn number(&mut self, first: char, position: Position) -> Result<Token> {
        let mut text = String::from(first);
        let mut is_float = false;
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.bump();
                if c != '_' {
                    text.push(c);
                }
            } else if c == '.' && !is_float {
                is_float = true;
                self.bump();
                text.push(c);
            } else {
                break;
            }
        }
        if is_float {
            if text.ends_with('.') {
                exn::bail!(ErrorKind::Syntax { position, message: format!("malformed number `{text}`") });
            }
            return text
                .parse::<f64>()
                .map(Token::Float)
                .or_raise(|| ErrorKind::Syntax { position, message: format!("malformed number `{text}`") });
        }
        text.parse::<i64>()
            .map(Token::Integer)
            .or_raise(|| ErrorKind::Syntax { position, message: format!("integer literal out of range: {text}") })
    }

    fn word(&mut self, first: char) -> String {
        let mut word = String::from(first);
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.bump();
                word.push(c);
            } else {
                break;
            }
        }
        word
    }
}

//! Recursive-descent parser producing the definition file syntax tree.
//!
//! The tree is deliberately dumb: no kinds are resolved and no constants are
//! looked up here. All of that happens during evaluation so that syntax errors
//! and missing symbols are reported as different failure categories.

use crate::Position;
use crate::error::{ErrorKind, Result};
use crate::lexer::Token;
use crate::models::Value;

#[derive(Debug, PartialEq)]
pub(crate) enum Item {
    Let { name: String, value: Expr, position: Position },
    Block(Block),
}

#[derive(Debug, PartialEq)]
pub(crate) struct Block {
    pub(crate) kind: String,
    pub(crate) label: Option<String>,
    pub(crate) entries: Vec<Entry>,
    pub(crate) position: Position,
}

#[derive(Debug, PartialEq)]
pub(crate) enum Entry {
    Attribute { key: String, value: Expr, position: Position },
    Block(Block),
}

#[derive(Debug, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    Constant { name: String, position: Position },
    List(Vec<Expr>),
    Concat { terms: Vec<Expr>, position: Position },
}

/// Deepest allowed nesting of blocks and lists. Evaluation recurses over the
/// same tree, so this also bounds its stack use.
const MAX_DEPTH: usize = 64;

pub(crate) struct Parser {
    tokens: Vec<(Token, Position)>,
    cursor: usize,
    depth: usize,
}
impl Parser {
    pub(crate) fn new(tokens: Vec<(Token, Position)>) -> Self {
        Self { tokens, cursor: 0, depth: 0 }
    }

    pub(crate) fn parse(mut self) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        loop {
            let (token, position) = self.next();
            match token {
                Token::Eof => return Ok(items),
                Token::Let => items.push(self.constant()?),
                Token::Ident(kind) => items.push(Item::Block(self.block(kind, position, true)?)),
                other => exn::bail!(ErrorKind::Syntax {
                    position,
                    message: format!("expected `let` or a block, found {}", other.describe()),
                }),
            }
        }
    }

    fn peek(&self) -> &Token {
        // The lexer always terminates the stream with Eof, and `next` never
        // advances past it.
        &self.tokens[self.cursor].0
    }

    fn next(&mut self) -> (Token, Position) {
        let current = self.tokens[self.cursor].clone();
        if current.0 != Token::Eof {
            self.cursor += 1;
        }
        current
    }

    fn expect(&mut self, expected: Token) -> Result<Position> {
        let (token, position) = self.next();
        if token != expected {
            exn::bail!(ErrorKind::Syntax {
                position,
                message: format!("expected {}, found {}", expected.describe(), token.describe()),
            });
        }
        Ok(position)
    }

    /// Open one level of nesting at `position`.
    fn descend(&mut self, position: Position) -> Result<()> {
        if self.depth == MAX_DEPTH {
            exn::bail!(ErrorKind::Syntax { position, message: "nesting too deep".to_string() });
        }
        self.depth += 1;
        Ok(())
    }

    fn constant(&mut self) -> Result<Item> {
        let (token, position) = self.next();
        let Token::Ident(name) = token else {
            exn::bail!(ErrorKind::Syntax {
                position,
                message: format!("expected constant name, found {}", token.describe()),
            });
        };
        self.expect(Token::Equals)?;
        let value = self.expr()?;
        Ok(Item::Let { name, value, position })
    }

    fn block(&mut self, kind: String, position: Position, top_level: bool) -> Result<Block> {
        let label = if matches!(self.peek(), Token::Str(_)) {
            let (token, label_position) = self.next();
            if !top_level {
                exn::bail!(ErrorKind::Syntax {
                    position: label_position,
                    message: format!("nested block `{kind}` cannot have a label"),
                });
            }
            match token {
                Token::Str(label) => Some(label),
                _ => None,
            }
        } else {
            None
        };
        self.expect(Token::LBrace)?;
        self.descend(position)?;
        let mut entries = Vec::new();
        loop {
            let (token, entry_position) = self.next();
            match token {
                Token::RBrace => break,
                Token::Ident(key) if *self.peek() == Token::Equals => {
                    self.next();
                    let value = self.expr()?;
                    entries.push(Entry::Attribute { key, value, position: entry_position });
                },
                Token::Ident(key) => entries.push(Entry::Block(self.block(key, entry_position, false)?)),
                Token::Eof => exn::bail!(ErrorKind::Syntax {
                    position,
                    message: format!("block `{kind}` is never closed"),
                }),
                other => exn::bail!(ErrorKind::Syntax {
                    position: entry_position,
                    message: format!("expected attribute or `}}`, found {}", other.describe()),
                }),
            }
        }
        self.depth -= 1;
        Ok(Block { kind, label, entries, position })
    }

    fn expr(&mut self) -> Result<Expr> {
        let first = self.primary()?;
        if *self.peek() != Token::Plus {
            return Ok(first);
        }
        let mut terms = vec![first];
        let mut position = None;
        while *self.peek() == Token::Plus {
            let (_, plus) = self.next();
            position.get_or_insert(plus);
            terms.push(self.primary()?);
        }
        Ok(Expr::Concat { terms, position: position.unwrap_or_default() })
    }

    fn primary(&mut self) -> Result<Expr> {
        let (token, position) = self.next();
        Ok(match token {
            Token::Str(s) => Expr::Literal(Value::String(s)),
            Token::Integer(i) => Expr::Literal(Value::Integer(i)),
            Token::Float(x) => Expr::Literal(Value::Float(x)),
            Token::True => Expr::Literal(Value::Bool(true)),
            Token::False => Expr::Literal(Value::Bool(false)),
            Token::Ident(name) => Expr::Constant { name, position },
            Token::LBracket => {
                self.descend(position)?;
                let mut items = Vec::new();
                loop {
                    if *self.peek() == Token::RBracket {
                        self.next();
                        break;
                    }
                    items.push(self.expr()?);
                    match self.next() {
                        (Token::Comma, _) => {},
                        (Token::RBracket, _) => break,
                        (other, position) => exn::bail!(ErrorKind::Syntax {
                            position,
                            message: format!("expected `,` or `]`, found {}", other.describe()),
                        }),
                    }
                }
                self.depth -= 1;
                Expr::List(items)
            },
            other => exn::bail!(ErrorKind::Syntax {
                position,
                message: format!("expected a value, found {}", other.describe()),
            }),
        })
    }
}

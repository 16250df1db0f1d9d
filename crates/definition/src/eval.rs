//! Evaluation of the parsed syntax tree into [`Definition`]s.
//!
//! Evaluation is sandboxed by construction: the only names an expression can
//! see are constants declared earlier in the same file, and the only
//! operation available is `+`.

use crate::Position;
use crate::error::{ErrorKind, Result, Symbol};
use crate::kind::KindRegistry;
use crate::models::{Definition, Value};
use crate::parser::{Block, Entry, Expr, Item};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry as MapEntry;

pub(crate) struct Evaluator<'k> {
    kinds: &'k KindRegistry,
    constants: BTreeMap<String, Value>,
}
impl<'k> Evaluator<'k> {
    pub(crate) fn new(kinds: &'k KindRegistry) -> Self {
        Self { kinds, constants: BTreeMap::new() }
    }

    pub(crate) fn evaluate(mut self, items: Vec<Item>) -> Result<Vec<Definition>> {
        let mut definitions = Vec::new();
        for item in items {
            match item {
                Item::Let { name, value, position } => {
                    let value = self.expr(value)?;
                    match self.constants.entry(name) {
                        MapEntry::Occupied(occupied) => exn::bail!(ErrorKind::Runtime {
                            position,
                            message: format!("constant `{}` is already defined", occupied.key()),
                        }),
                        MapEntry::Vacant(vacant) => {
                            vacant.insert(value);
                        },
                    }
                },
                Item::Block(block) => {
                    if !self.kinds.contains(&block.kind) {
                        exn::bail!(ErrorKind::MissingSymbol {
                            symbol: Symbol::Kind,
                            name: block.kind,
                            position: block.position,
                        });
                    }
                    let kind = block.kind.clone();
                    let name = block.label.clone();
                    let attributes = self.attributes(block)?;
                    definitions.push(Definition { kind, name, attributes });
                },
            }
        }
        Ok(definitions)
    }

    fn attributes(&self, block: Block) -> Result<BTreeMap<String, Value>> {
        let mut attributes = BTreeMap::new();
        for entry in block.entries {
            let (key, value, position) = match entry {
                Entry::Attribute { key, value, position } => (key, self.expr(value)?, position),
                Entry::Block(nested) => {
                    let position = nested.position;
                    (nested.kind.clone(), Value::Map(self.attributes(nested)?), position)
                },
            };
            match attributes.entry(key) {
                MapEntry::Occupied(occupied) => exn::bail!(ErrorKind::Runtime {
                    position,
                    message: format!("attribute `{}` is set more than once in `{}`", occupied.key(), block.kind),
                }),
                MapEntry::Vacant(vacant) => {
                    vacant.insert(value);
                },
            }
        }
        Ok(attributes)
    }

    fn expr(&self, expr: Expr) -> Result<Value> {
        match expr {
            Expr::Literal(value) => Ok(value),
            Expr::Constant { name, position } => match self.constants.get(&name) {
                Some(value) => Ok(value.clone()),
                None => exn::bail!(ErrorKind::MissingSymbol { symbol: Symbol::Constant, name, position }),
            },
            Expr::List(items) => Ok(Value::List(items.into_iter().map(|item| self.expr(item)).collect::<Result<_>>()?)),
            Expr::Concat { terms, position } => {
                let mut terms = terms.into_iter();
                let mut accumulator = match terms.next() {
                    Some(first) => self.expr(first)?,
                    None => exn::bail!(ErrorKind::Runtime { position, message: "empty expression".to_string() }),
                };
                for term in terms {
                    accumulator = add(accumulator, self.expr(term)?, position)?;
                }
                Ok(accumulator)
            },
        }
    }
}

fn add(left: Value, right: Value, position: Position) -> Result<Value> {
    Ok(match (left, right) {
        (Value::String(mut a), Value::String(b)) => {
            a.push_str(&b);
            Value::String(a)
        },
        (Value::Integer(a), Value::Integer(b)) => match a.checked_add(b) {
            Some(sum) => Value::Integer(sum),
            None => exn::bail!(ErrorKind::Runtime { position, message: format!("integer overflow in {a} + {b}") }),
        },
        (Value::Float(a), Value::Float(b)) => Value::Float(a + b),
        // Lossy for integers beyond 2^53, which is acceptable for a
        // configuration language.
        (Value::Integer(a), Value::Float(b)) => Value::Float(a as f64 + b),
        (Value::Float(a), Value::Integer(b)) => Value::Float(a + b as f64),
        (Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Value::List(a)
        },
        (a, b) => exn::bail!(ErrorKind::Runtime {
            position,
            message: format!("cannot add {} to {}", b.type_name(), a.type_name()),
        }),
    })
}

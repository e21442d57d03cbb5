//! Textual S-expression form of a chromosome, e.g.
//! `(SUB 3.85202 (INV close[16]))`.
//!
//! Constants print with the shortest representation that reads back to
//! the same `f64`, so printing and parsing a chromosome gives an identical
//! tree.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::chromosome::Args;
use crate::chromosome::Chromosome;
use crate::chromosome::NodeId;
use crate::chromosome::NodeKind;
use crate::error::ParseError;
use crate::op::Op;
use crate::value::Value;
use crate::window::Schema;

/// Deepest function nesting [`Chromosome::parse`] accepts.
pub const MAX_NESTING: usize = 512;

impl fmt::Display for Chromosome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_node(f, self.root())
    }
}

impl Chromosome {
    fn write_node(&self, f: &mut fmt::Formatter<'_>, id: NodeId) -> fmt::Result {
        match self.node(id).kind() {
            NodeKind::Const(value) => write!(f, "{value}"),
            NodeKind::Lookup { attr, offset } => {
                write!(f, "{}[{offset}]", self.schema().name(*attr))
            }
            NodeKind::Func { op, args } => {
                write!(f, "({op}")?;
                for arg in args.as_slice() {
                    f.write_str(" ")?;
                    self.write_node(f, *arg)?;
                }
                f.write_str(")")
            }
        }
    }

    /// Reads a chromosome back from its textual form. Lookup names are
    /// resolved against `schema`.
    pub fn parse(text: &str, schema: Arc<Schema>) -> Result<Self, ParseError> {
        let mut parser = Parser {
            tokens: tokenize(text),
            pos: 0,
            chromosome: Chromosome::empty(schema),
        };
        let _root = parser.expr(None, 0)?;
        if parser.pos < parser.tokens.len() {
            let rest: Vec<String> = parser.tokens[parser.pos..]
                .iter()
                .map(ToString::to_string)
                .collect();
            return Err(ParseError::TrailingInput(rest.join(" ")));
        }
        Ok(parser.chromosome)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Token<'a> {
    Open,
    Close,
    Atom(&'a str),
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Open => f.write_str("("),
            Token::Close => f.write_str(")"),
            Token::Atom(atom) => f.write_str(atom),
        }
    }
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = text.trim_start();
    while let Some(c) = rest.chars().next() {
        let len = match c {
            '(' => {
                tokens.push(Token::Open);
                1
            }
            ')' => {
                tokens.push(Token::Close);
                1
            }
            _ => {
                let len = rest
                    .find(|c: char| c.is_whitespace() || c == '(' || c == ')')
                    .unwrap_or(rest.len());
                tokens.push(Token::Atom(&rest[..len]));
                len
            }
        };
        rest = rest[len..].trim_start();
    }
    tokens
}

struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
    chromosome: Chromosome,
}

impl<'a> Parser<'a> {
    fn next(&mut self) -> Result<Token<'a>, ParseError> {
        let token = *self.tokens.get(self.pos).ok_or(ParseError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn peek(&self) -> Option<Token<'a>> {
        self.tokens.get(self.pos).copied()
    }

    fn expr(&mut self, parent: Option<NodeId>, depth: usize) -> Result<NodeId, ParseError> {
        match self.next()? {
            Token::Open if depth >= MAX_NESTING => Err(ParseError::TooDeep { limit: MAX_NESTING }),
            Token::Open => self.func(parent, depth),
            Token::Close => Err(ParseError::UnexpectedToken(")".to_string())),
            Token::Atom(atom) => {
                let kind = self.leaf(atom)?;
                Ok(self.chromosome.push(kind, parent))
            }
        }
    }

    fn func(&mut self, parent: Option<NodeId>, depth: usize) -> Result<NodeId, ParseError> {
        let name = match self.next()? {
            Token::Atom(name) => name,
            token => return Err(ParseError::UnexpectedToken(token.to_string())),
        };
        let op = Op::from_str(name).map_err(|_| ParseError::UnknownOperator(name.to_string()))?;
        let args = Args::placeholder(op.arity());
        let id = self.chromosome.push(NodeKind::Func { op, args }, parent);

        let mut children = Vec::with_capacity(op.arity());
        loop {
            match self.peek() {
                None => return Err(ParseError::UnexpectedEnd),
                Some(Token::Close) => {
                    self.pos += 1;
                    break;
                }
                Some(_) => children.push(self.expr(Some(id), depth + 1)?),
            }
        }
        if children.len() != op.arity() {
            return Err(ParseError::Arity {
                op,
                expected: op.arity(),
                found: children.len(),
            });
        }
        self.chromosome.attach(id, &children);
        Ok(id)
    }

    fn leaf(&self, atom: &str) -> Result<NodeKind, ParseError> {
        if let Some((name, rest)) = atom.split_once('[') {
            let offset = rest
                .strip_suffix(']')
                .and_then(|o| o.parse::<u16>().ok())
                .ok_or_else(|| ParseError::InvalidLookup(atom.to_string()))?;
            let attr = self
                .chromosome
                .schema()
                .position(name)
                .ok_or_else(|| ParseError::UnknownAttribute(name.to_string()))?;
            return Ok(NodeKind::Lookup { attr, offset });
        }
        match atom.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(NodeKind::Const(Value(value))),
            _ => Err(ParseError::InvalidConstant(atom.to_string())),
        }
    }
}

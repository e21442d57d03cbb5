use std::collections::TryReserveError;

use thiserror::Error;

use crate::op::Op;
use crate::window::AttrId;

/// A numeric problem detected while executing a chromosome.
///
/// Faults are expected during evolution; the scoring phase turns them into
/// dead individuals instead of aborting the run.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum Fault {
    #[error("{op} is undefined for {input}")]
    Domain { op: Op, input: f64 },

    #[error("{op} produced a non-finite result")]
    NonFinite { op: Op },

    #[error("lookup of attribute #{attr} at offset {offset} is outside the window")]
    OutOfBounds { attr: AttrId, offset: u16 },

    #[error("fitness metric overflowed")]
    Metric,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected end of chromosome text")]
    UnexpectedEnd,

    #[error("unexpected token `{0}`")]
    UnexpectedToken(String),

    #[error("unknown operator `{0}`")]
    UnknownOperator(String),

    #[error("unknown attribute `{0}`")]
    UnknownAttribute(String),

    #[error("invalid lookup `{0}`")]
    InvalidLookup(String),

    #[error("invalid constant `{0}`")]
    InvalidConstant(String),

    #[error("{op} takes {expected} argument(s), found {found}")]
    Arity {
        op: Op,
        expected: usize,
        found: usize,
    },

    #[error("chromosome nests deeper than {limit} functions")]
    TooDeep { limit: usize },

    #[error("trailing input after chromosome: `{0}`")]
    TrailingInput(String),
}

#[derive(Error, Debug)]
pub enum MateError {
    #[error("out of memory while breeding: {0}")]
    OutOfMemory(#[from] TryReserveError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvolveError {
    #[error("generation {generation} has no individual able to reproduce")]
    NoEligibleParents { generation: usize },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    #[error("schema has {attributes} attribute(s) but {columns} column(s) were given")]
    SchemaMismatch { attributes: usize, columns: usize },

    #[error("column `{name}` has {len} rows, expected {expected}")]
    RaggedColumn {
        name: String,
        len: usize,
        expected: usize,
    },

    #[error("unknown attribute `{0}`")]
    UnknownAttribute(String),

    #[error("schema has {count} attributes, at most {max} are supported")]
    TooManyAttributes { count: usize, max: usize },
}

use thiserror::Error;

/// The encoded triple pattern type is not one of the eight known types.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Invalid triple pattern type {0}")]
pub struct InvalidTriplePatternTypeError(pub i32);

/// The value of a variable was requested but the variable is not bound.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Variable {0} is not bound")]
pub struct UnboundVariableError(pub u64);

/// An error that occurs while parsing a textual triple pattern.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatternParseError {
    #[error("Expected three terms in triple pattern '{0}'")]
    WrongNumberOfTerms(String),
    #[error("Invalid term '{0}'. Terms are either variables (?name) or resource ids")]
    InvalidTerm(String),
}

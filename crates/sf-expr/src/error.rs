use sf_types::TypeError;
use thiserror::Error;

use crate::node::ExprNodeOrigin;

/// Rejected attempt to build a node from malformed parts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConstructionError {
    #[error("stream selector requires a stream name or a wildcard")]
    StreamNameRequired,
    #[error("{kind} requires a non-empty name")]
    EmptyName { kind: &'static str },
    #[error("{kind} expects at least {expected} operands but received {found}")]
    TooFewOperands {
        kind: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{found} values cannot be written as literals")]
    UnsupportedLiteral { found: String },
}

/// A node could not be bound against the streams and plug-ins in scope.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ExprValidationError {
    message: String,
}

impl ExprValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Prefixes the message with the clause and text of the expression that
    /// failed, e.g. `Failed to validate select-clause expression 'b.*': ...`.
    #[must_use]
    pub fn with_origin(self, origin: ExprNodeOrigin, expression_text: &str) -> Self {
        Self {
            message: format!(
                "Failed to validate {} expression '{expression_text}': {}",
                origin.clause_name(),
                self.message
            ),
        }
    }
}

impl From<TypeError> for ExprValidationError {
    fn from(err: TypeError) -> Self {
        Self::new(err.to_string())
    }
}

/// A validation-only query was made against a node that has no binding.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IllegalStateError {
    #[error("{kind} node has not been validated")]
    NotValidated { kind: &'static str },
}

/// The generated program could not be turned into an evaluator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodegenError {
    #[error("method m{0} was never created in this scope")]
    UnknownMethod(usize),
    #[error("function f{0} was never registered with the class scope")]
    UnknownFunction(usize),
    #[error("local '{name}' is referenced before it is declared in m{method}")]
    UndeclaredLocal { method: usize, name: String },
    #[error("local '{name}' is declared twice in m{method}")]
    DuplicateLocal { method: usize, name: String },
    #[error("m{method} uses {expression} where {expected} is required")]
    OperandMismatch {
        method: usize,
        expression: String,
        expected: &'static str,
    },
    #[error("m{method} has no return statement")]
    MissingReturn { method: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExprError {
    #[error("parse error: {0}")]
    ParseError(String),
    #[error(transparent)]
    Construction(#[from] ConstructionError),
    #[error(transparent)]
    Validation(#[from] ExprValidationError),
    #[error(transparent)]
    IllegalState(#[from] IllegalStateError),
    #[error(transparent)]
    Codegen(#[from] CodegenError),
}

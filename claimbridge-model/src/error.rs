use std::fmt::{self, Display};

use crate::result::SubmissionStatus;

/// Errors produced by model constructors and state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    InvalidIdentifier(String),
    InvalidTransition {
        from: SubmissionStatus,
        to: SubmissionStatus,
    },
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidIdentifier(msg) => {
                write!(f, "invalid identifier: {msg}")
            }
            ModelError::InvalidTransition { from, to } => {
                write!(f, "invalid status transition: {from} -> {to}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;

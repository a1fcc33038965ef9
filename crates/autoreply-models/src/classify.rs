//! Error classification shared by every collaborator boundary.
//!
//! Collaborators (the database, the text-generation APIs) classify their own
//! errors when they construct them. Callers branch on the class and never
//! look inside error payloads to guess whether something is worth retrying.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Rate limited, unavailable, internal error, gateway timeout, deadline
    Transient,
    /// Will fail again if repeated
    Terminal,
    /// A referenced row or resource does not exist
    NotFound,
    /// A uniqueness or precondition conflict
    Conflict,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Terminal => "terminal",
            ErrorClass::NotFound => "not_found",
            ErrorClass::Conflict => "conflict",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that carry an explicit classification.
pub trait Classified {
    fn class(&self) -> ErrorClass;
}

//! Unified error types for the ledger.
//!
//! Every fallible operation returns [`Result`]. The variants mirror the failure classes a
//! caller has to tell apart: bad input, insufficient role, unknown ids, lost races and
//! balance shortfalls. Database failures are wrapped transparently; unreadable settings
//! files surface as [`Error::Config`].

use thiserror::Error;

/// Errors produced by the ledger core
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing input, non-positive amounts
    #[error("Validation error: {message}")]
    Validation {
        /// Human-readable description of the rejected input
        message: String,
    },

    /// The actor's role rank is insufficient for the operation
    #[error("Not authorized: {message}")]
    Authorization {
        /// What the actor attempted
        message: String,
    },

    /// Unknown user, account, transaction, promotion or event
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of record that was looked up
        entity: &'static str,
        /// The id that did not resolve
        id: i64,
    },

    /// A lost race or a state that forbids the operation (already processed, pool overdrawn,
    /// one-time promotion already claimed)
    #[error("Conflict: {message}")]
    Conflict {
        /// Description of the conflicting state
        message: String,
    },

    /// The balance cannot cover a debit
    #[error("Insufficient balance: available {available}, required {required}")]
    InsufficientBalance {
        /// Current balance of the account
        available: i64,
        /// Points the operation needed
        required: i64,
    },

    /// Configuration could not be loaded or parsed
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration problem
        message: String,
    },

    /// Underlying database failure
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl Error {
    /// Shorthand for a [`Error::Validation`] error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a [`Error::Authorization`] error.
    pub fn authorization(message: impl Into<String>) -> Self {
        Self::Authorization {
            message: message.into(),
        }
    }

    /// Shorthand for a [`Error::Conflict`] error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// True for conflicts, including insufficient balance which is a specialization of one.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::InsufficientBalance { .. })
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;

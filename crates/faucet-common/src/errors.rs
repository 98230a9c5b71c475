//! Error types for the faucet ledger and its collaborators

use thiserror::Error;

use crate::types::{IncomeSource, WithdrawalStatus};

#[derive(Debug, Error)]
pub enum Error {
    /// The external event was already credited. Callers treat this as success.
    #[error("Duplicate {income_source} event {external_key} for user {user_id}")]
    Duplicate {
        income_source: IncomeSource,
        external_key: String,
        user_id: i64,
    },

    #[error("Insufficient balance: user {user_id} cannot withdraw {requested}")]
    InsufficientBalance { user_id: i64, requested: i64 },

    #[error("Email already registered: {0}")]
    DuplicateEmail(String),

    #[error("Reward for user {0} is not due yet")]
    RewardNotDue(i64),

    #[error("Insufficient reference row: {0}")]
    InsufficientReferenceRow(String),

    #[error("Batch progress mismatch: expected {expected} rows, advanced {affected}")]
    BatchProgressMismatch { expected: u64, affected: u64 },

    #[error("Invalid withdrawal transition from {from} to {to}")]
    InvalidTransition {
        from: WithdrawalStatus,
        to: WithdrawalStatus,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    #[error("Invalid payout address: {0}")]
    InvalidAddress(String),

    #[error("Invalid income source: {0}")]
    InvalidSource(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Error::Duplicate { .. })
    }

    /// Whether a caller (or a partner retrying a callback) may try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Unknown(_)
                | Error::Io(_)
                | Error::InsufficientReferenceRow(_)
                | Error::BatchProgressMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let dup = Error::Duplicate {
            income_source: IncomeSource::Superrewards,
            external_key: "tx1".to_string(),
            user_id: 7,
        };
        assert!(dup.is_duplicate());
        assert!(!dup.is_retryable());
        assert_eq!(dup.to_string(), "Duplicate superrewards event tx1 for user 7");

        assert!(Error::Unknown("connection reset".into()).is_retryable());
        assert!(Error::BatchProgressMismatch { expected: 3, affected: 2 }.is_retryable());
        assert!(!Error::InsufficientBalance { user_id: 1, requested: 10 }.is_retryable());
        assert!(!Error::Config("empty band".into()).is_retryable());
        assert!(!Error::RewardNotDue(7).is_retryable());
        assert!(!Error::DuplicateEmail("a@example.com".into()).is_retryable());
    }
}

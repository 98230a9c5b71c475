use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
};

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Processing,
    Processed,
    Rejected,
}

impl WithdrawalStatus {
    pub fn code(&self) -> i16 {
        match self {
            WithdrawalStatus::Pending => 0,
            WithdrawalStatus::Processing => 1,
            WithdrawalStatus::Processed => 2,
            WithdrawalStatus::Rejected => 3,
        }
    }

    pub fn from_code(code: i16) -> Result<Self> {
        match code {
            0 => Ok(WithdrawalStatus::Pending),
            1 => Ok(WithdrawalStatus::Processing),
            2 => Ok(WithdrawalStatus::Processed),
            3 => Ok(WithdrawalStatus::Rejected),
            other => Err(Error::Unknown(format!("unknown withdrawal status code {}", other))),
        }
    }

    /// Withdrawals only ever move forward through the disbursement pipeline.
    pub fn can_advance_to(&self, to: WithdrawalStatus) -> bool {
        use WithdrawalStatus::*;
        matches!(
            (self, to),
            (Pending, Processing) | (Processing, Processed) | (Pending, Rejected) | (Processing, Rejected)
        )
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::Processed => "processed",
            WithdrawalStatus::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Withdrawal {
    pub id: i64,
    pub user_id: i64,
    pub address: String,
    pub amount: i64,
    pub status: WithdrawalStatus,
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWithdrawal {
    pub user_id: i64,
    pub address: String,
    pub amount: i64,
    pub now: DateTime<Utc>,
}

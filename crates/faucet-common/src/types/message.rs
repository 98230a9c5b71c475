use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use crate::types::{CreditReceipt, IncomeSource};

/// Broadcast payload describing one successful credit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeltaIncome {
    pub address: String,
    pub amount: i64,
    #[serde(rename = "type")]
    pub source: IncomeSource,
    pub time: DateTime<Utc>,
}

impl From<&CreditReceipt> for DeltaIncome {
    fn from(receipt: &CreditReceipt) -> Self {
        Self {
            address: receipt.user_address.clone(),
            amount: receipt.income.amount,
            source: receipt.income.source,
            time: receipt.income.created_at,
        }
    }
}

/// Frame sent to WebSocket clients. Absent fields are omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WebsocketMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users_online: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_incomes: Option<Vec<DeltaIncome>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_income: Option<DeltaIncome>,
}

impl WebsocketMessage {
    pub fn delta(delta: DeltaIncome) -> Self {
        Self {
            delta_income: Some(delta),
            ..Default::default()
        }
    }

    pub fn users_online(count: usize) -> Self {
        Self {
            users_online: Some(count),
            ..Default::default()
        }
    }
}

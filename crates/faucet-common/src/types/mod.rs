pub mod income;
pub mod message;
pub mod reward;
pub mod user;
pub mod withdrawal;

pub use income::{CreditReceipt, ExternalCredit, Income, IncomeSource, RewardCredit};
pub use message::{DeltaIncome, WebsocketMessage};
pub use reward::{RateBand, RewardRate, SystemConfig, TotalRewardDay};
pub use user::{NewUser, User};
pub use withdrawal::{NewWithdrawal, Withdrawal, WithdrawalStatus};

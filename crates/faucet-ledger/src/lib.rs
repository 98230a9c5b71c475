//! Income ledger for the faucet: reward selection, the rate cache, crediting,
//! withdrawal settlement, and the broadcast hub that fans credits out to
//! connected clients.

pub mod cache;
pub mod hub;
pub mod ledger;
pub mod rewards;
pub mod withdrawal;

pub use cache::RateCache;
pub use hub::{Connection, ConnectionId, Hub};
pub use ledger::LedgerService;
pub use rewards::{choose_reward, draw_reward};
pub use withdrawal::{WithdrawalSettlement, WithdrawalSweep};

//! This is the faucet-store crate - the balance store behind the income ledger
//!
//! Every credit, debit and withdrawal transition is one atomic unit executed
//! by the backend. Two backends are provided: [`postgres_store::PostgresStore`]
//! for production and [`memory_store::MemoryStore`] for tests and local runs.

pub mod factory;
pub mod memory_store;
pub mod postgres_store;
mod schema;
pub mod traits;

pub use factory::FaucetStorageFactory;
pub use memory_store::{FailPoint, MemoryStore};
pub use postgres_store::PostgresStore;
pub use traits::{LedgerStore, StorageFactory};

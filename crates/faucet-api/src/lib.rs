//! faucet-api - HTTP and WebSocket surface of the faucet
//!
//! Thin adapters over the income ledger: signup and referrals, reward claims,
//! partner callbacks, withdrawals and a live feed of credits.

pub mod health;
pub mod income_endpoints;
pub mod metrics;
pub mod rest;
pub mod types;
pub mod user_endpoints;
pub mod websocket;
pub mod withdrawal_endpoints;

pub use health::HealthService;
pub use metrics::MetricsService;
pub use rest::{create_router, ApiConfig, ApiServer, AppState};
pub use types::{ApiError, ApiResponse, HealthCheckResult, HealthResponse, HealthStatus, StatusResponse};

use {
    axum::{
        http::StatusCode,
        response::{IntoResponse, Response},
        Json,
    },
    faucet_common::{
        types::{Income, User, Withdrawal, WithdrawalStatus},
        Error,
    },
    serde::{Deserialize, Serialize},
    std::collections::HashMap,
};

/// Standard API response format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Success status
    pub success: bool,
    /// Optional result data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Optional error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// API error types
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests: {0}")]
    TooManyRequests(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Retryable failures are 5xx so partners and jobs try again; everything
/// else is the caller's to fix.
impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        if e.is_retryable() {
            return ApiError::Internal(e.to_string());
        }
        match e {
            Error::NotFound(_) => ApiError::NotFound(e.to_string()),
            Error::Duplicate { .. } | Error::DuplicateEmail(_) => ApiError::Conflict(e.to_string()),
            Error::RewardNotDue(_) => ApiError::TooManyRequests(e.to_string()),
            Error::Config(_) | Error::Json(_) => ApiError::Internal(e.to_string()),
            _ => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, Json(ApiResponse::<()>::error(self.to_string()))).into_response()
    }
}

/// Status response format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub name: String,
    pub version: String,
    /// Service uptime in seconds
    pub uptime: u64,
    /// Current time in ISO 8601 format
    pub timestamp: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub additional: HashMap<String, serde_json::Value>,
}

/// Health check response format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub checks: HashMap<String, HealthCheckResult>,
    /// Service uptime in seconds
    pub uptime: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PageParams {
    pub const DEFAULT_LIMIT: i64 = 20;
    pub const MAX_LIMIT: i64 = 100;

    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub address: String,
    /// An unknown referrer is dropped, not rejected
    pub referer_id: Option<i64>,
    pub reward_interval_secs: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefereePage {
    pub items: Vec<User>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomePage {
    pub count: i64,
    pub items: Vec<Income>,
}

/// Partner notification, already authenticated upstream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub external_key: String,
    pub user_id: i64,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub amount: i64,
    /// Defaults to the user's registered address
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvanceRequest {
    pub ids: Vec<i64>,
    pub from: WithdrawalStatus,
    pub to: WithdrawalStatus,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvanceResponse {
    pub advanced: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalPage {
    pub items: Vec<Withdrawal>,
}

#[cfg(test)]
mod tests {
    use {super::*, faucet_common::types::IncomeSource};

    #[test]
    fn test_error_mapping() {
        let cases = [
            (Error::NotFound("user 9".into()), StatusCode::NOT_FOUND),
            (
                Error::InsufficientBalance { user_id: 1, requested: 5 },
                StatusCode::BAD_REQUEST,
            ),
            (
                Error::Duplicate {
                    income_source: IncomeSource::Ptcwall,
                    external_key: "k".into(),
                    user_id: 1,
                },
                StatusCode::CONFLICT,
            ),
            (
                Error::BatchProgressMismatch { expected: 2, affected: 1 },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (Error::Unknown("db down".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (
                Error::InsufficientReferenceRow("user 9 not found".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (Error::RewardNotDue(1), StatusCode::TOO_MANY_REQUESTS),
            (Error::DuplicateEmail("a@example.com".into()), StatusCode::CONFLICT),
            (Error::InvalidAddress(String::new()), StatusCode::BAD_REQUEST),
            (Error::Config("no bands".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
    }

    #[test]
    fn test_page_params_are_clamped() {
        let params = PageParams {
            limit: Some(10_000),
            offset: Some(-3),
        };
        assert_eq!(params.limit(), PageParams::MAX_LIMIT);
        assert_eq!(params.offset(), 0);

        let defaults = PageParams { limit: None, offset: None };
        assert_eq!(defaults.limit(), PageParams::DEFAULT_LIMIT);
    }
}

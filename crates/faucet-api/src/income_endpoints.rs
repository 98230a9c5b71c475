use {
    crate::{
        rest::AppState,
        types::{ApiError, ApiResponse, CallbackPayload, IncomePage, PageParams},
    },
    axum::{
        extract::{Path, Query, State},
        http::HeaderMap,
        routing::{get, post},
        Json, Router,
    },
    chrono::Utc,
    faucet_common::types::{Income, IncomeSource},
    serde::Deserialize,
    tracing::warn,
};

pub const CALLBACK_TOKEN_HEADER: &str = "x-callback-token";

/// Body partners expect on an accepted, or already accepted, callback
const CALLBACK_ACK: &str = "1";

#[derive(Debug, Deserialize)]
pub struct IncomeQueryParams {
    pub source: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Run the scheduled draw; 429 until the user's interval has elapsed
pub async fn claim_reward(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<ApiResponse<Income>>, ApiError> {
    let income = state.ledger.draw_scheduled_reward(user_id, Utc::now()).await?;
    Ok(Json(ApiResponse::success(income)))
}

pub async fn list_incomes(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(params): Query<IncomeQueryParams>,
) -> Result<Json<ApiResponse<IncomePage>>, ApiError> {
    let source = params
        .source
        .as_deref()
        .map(str::parse::<IncomeSource>)
        .transpose()?;
    let page = PageParams {
        limit: params.limit,
        offset: params.offset,
    };

    state.store.get_user(user_id).await?;
    let count = state.store.count_incomes(user_id, source).await?;
    let items = state
        .store
        .list_incomes(user_id, source, page.limit(), page.offset())
        .await?;

    Ok(Json(ApiResponse::success(IncomePage { count, items })))
}

/// Scheduled rewards of one of the user's referees
pub async fn list_referee_rewards(
    State(state): State<AppState>,
    Path((user_id, referee_id)): Path<(i64, i64)>,
    Query(page): Query<PageParams>,
) -> Result<Json<ApiResponse<IncomePage>>, ApiError> {
    let referee = state.store.get_user(referee_id).await?;
    if referee.referer_id != Some(user_id) {
        return Err(ApiError::Forbidden(format!(
            "user {} was not referred by user {}",
            referee_id, user_id
        )));
    }

    let source = Some(IncomeSource::Reward);
    let count = state.store.count_incomes(referee_id, source).await?;
    let items = state
        .store
        .list_incomes(referee_id, source, page.limit(), page.offset())
        .await?;

    Ok(Json(ApiResponse::success(IncomePage { count, items })))
}

/// Partner webhook. Replays are acknowledged like first deliveries so the
/// partner stops retrying; any other failure is a 5xx so it retries later.
pub async fn partner_callback(
    State(state): State<AppState>,
    Path(source): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<CallbackPayload>,
) -> Result<&'static str, ApiError> {
    if let Some(expected) = &state.callback_token {
        let presented = headers
            .get(CALLBACK_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok());
        if presented != Some(expected.as_str()) {
            warn!("Rejected {} callback with a bad token", source);
            return Err(ApiError::Unauthorized("invalid callback token".to_string()));
        }
    }

    let source: IncomeSource = source.parse()?;
    match state
        .ledger
        .credit_external_income(source, &payload.external_key, payload.user_id, payload.amount)
        .await
    {
        Ok(_) => Ok(CALLBACK_ACK),
        Err(e) if e.is_duplicate() => Ok(CALLBACK_ACK),
        Err(e) => Err(e.into()),
    }
}

pub fn create_income_router() -> Router<AppState> {
    Router::new()
        .route("/users/:id/rewards", post(claim_reward))
        .route("/users/:id/incomes", get(list_incomes))
        .route(
            "/users/:id/referees/:referee_id/incomes",
            get(list_referee_rewards),
        )
        .route("/callbacks/:source", post(partner_callback))
}

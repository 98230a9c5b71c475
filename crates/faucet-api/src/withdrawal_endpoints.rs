use {
    crate::{
        rest::AppState,
        types::{
            AdvanceRequest, AdvanceResponse, ApiError, ApiResponse, PageParams, WithdrawalPage,
            WithdrawalRequest,
        },
    },
    axum::{
        extract::{Path, Query, State},
        routing::post,
        Json, Router,
    },
    faucet_common::types::Withdrawal,
};

pub async fn request_withdrawal(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(request): Json<WithdrawalRequest>,
) -> Result<Json<ApiResponse<Withdrawal>>, ApiError> {
    let address = match request.address {
        Some(address) => address,
        None => state.store.get_user(user_id).await?.address,
    };

    let withdrawal = state
        .settlement
        .request_withdrawal(user_id, &address, request.amount)
        .await?;
    Ok(Json(ApiResponse::success(withdrawal)))
}

pub async fn list_withdrawals(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(page): Query<PageParams>,
) -> Result<Json<ApiResponse<WithdrawalPage>>, ApiError> {
    let items = state
        .store
        .list_withdrawals(user_id, page.limit(), page.offset())
        .await?;
    Ok(Json(ApiResponse::success(WithdrawalPage { items })))
}

/// Used by the external disbursement job
pub async fn advance_withdrawals(
    State(state): State<AppState>,
    Json(request): Json<AdvanceRequest>,
) -> Result<Json<ApiResponse<AdvanceResponse>>, ApiError> {
    if request.ids.is_empty() {
        return Err(ApiError::BadRequest("no withdrawal ids given".to_string()));
    }

    let advanced = state
        .settlement
        .advance_batch(
            &request.ids,
            request.from,
            request.to,
            request.transaction_id.as_deref(),
        )
        .await?;
    Ok(Json(ApiResponse::success(AdvanceResponse { advanced })))
}

pub fn create_withdrawal_router() -> Router<AppState> {
    Router::new()
        .route(
            "/users/:id/withdrawals",
            post(request_withdrawal).get(list_withdrawals),
        )
        .route("/withdrawals/advance", post(advance_withdrawals))
}

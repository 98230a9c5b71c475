use {
    crate::{
        rest::AppState,
        types::{ApiError, ApiResponse, PageParams, RefereePage, SignupRequest},
    },
    axum::{
        extract::{Path, Query, State},
        routing::{get, post},
        Json, Router,
    },
    chrono::Utc,
    faucet_common::{
        types::{NewUser, User},
        Error,
    },
    tracing::info,
};

pub async fn signup(
    State(state): State<AppState>,
    Json(request): Json<SignupRequest>,
) -> Result<Json<ApiResponse<User>>, ApiError> {
    let email = request.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::BadRequest(format!("invalid email {:?}", request.email)));
    }
    let address = request.address.trim();
    if address.is_empty() {
        return Err(Error::InvalidAddress(address.to_string()).into());
    }
    let reward_interval_secs = request
        .reward_interval_secs
        .unwrap_or(NewUser::DEFAULT_REWARD_INTERVAL_SECS);
    if reward_interval_secs <= 0 {
        return Err(ApiError::BadRequest(format!(
            "reward interval must be positive, got {}",
            reward_interval_secs
        )));
    }

    let referer_id = match request.referer_id {
        Some(id) => match state.store.get_user(id).await {
            Ok(referer) => Some(referer.id),
            Err(Error::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        },
        None => None,
    };

    let user = state
        .store
        .create_user(
            NewUser {
                email: email.to_string(),
                address: address.to_string(),
                referer_id,
                reward_interval_secs,
            },
            Utc::now(),
        )
        .await?;

    info!(event = "signup", user_id = user.id, referer_id, "User registered");
    Ok(Json(ApiResponse::success(user)))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<ApiResponse<User>>, ApiError> {
    let user = state.store.get_user(user_id).await?;
    Ok(Json(ApiResponse::success(user)))
}

pub async fn list_referees(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(page): Query<PageParams>,
) -> Result<Json<ApiResponse<RefereePage>>, ApiError> {
    state.store.get_user(user_id).await?;
    let items = state
        .store
        .get_referees(user_id, page.limit(), page.offset())
        .await?;
    Ok(Json(ApiResponse::success(RefereePage { items })))
}

pub fn create_user_router() -> Router<AppState> {
    Router::new()
        .route("/users", post(signup))
        .route("/users/:id", get(get_user))
        .route("/users/:id/referees", get(list_referees))
}

use {
    crate::{
        health::HealthService,
        income_endpoints::create_income_router,
        metrics::MetricsService,
        types::{ApiResponse, HealthResponse, StatusResponse},
        user_endpoints::create_user_router,
        websocket::income_stream,
        withdrawal_endpoints::create_withdrawal_router,
    },
    axum::{
        extract::State,
        http::{header, HeaderName, Method},
        routing::get,
        Json, Router,
    },
    faucet_common::config::HttpConfig,
    faucet_ledger::{Hub, LedgerService, RateCache, WithdrawalSettlement},
    faucet_store::LedgerStore,
    std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Instant},
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub health: Arc<HealthService>,
    pub metrics: Arc<MetricsService>,
    pub start_time: Instant,
    pub service_name: String,
    pub version: String,
    pub store: Arc<dyn LedgerStore>,
    pub cache: Arc<RateCache>,
    pub hub: Arc<Hub>,
    pub ledger: Arc<LedgerService>,
    pub settlement: Arc<WithdrawalSettlement>,
    /// Shared secret partners must present, if configured
    pub callback_token: Option<String>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        cache: Arc<RateCache>,
        hub: Arc<Hub>,
        callback_token: Option<String>,
    ) -> Self {
        let ledger = Arc::new(LedgerService::new(store.clone(), cache.clone(), hub.clone()));
        let settlement = Arc::new(WithdrawalSettlement::new(store.clone()));

        Self {
            health: Arc::new(HealthService::new()),
            metrics: Arc::new(MetricsService::new()),
            start_time: Instant::now(),
            service_name: "faucet-api".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store,
            cache,
            hub,
            ledger,
            settlement,
            callback_token,
        }
    }
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub enable_metrics: bool,
    /// Prefix for the ledger routes; health, status and metrics stay at the root
    pub path_prefix: Option<String>,
}

impl ApiConfig {
    pub fn from_http(http: &HttpConfig) -> anyhow::Result<Self> {
        let prefix = http.path_prefix.trim_end_matches('/');
        Ok(Self {
            bind_addr: http.bind_address.parse()?,
            enable_metrics: true,
            path_prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
        })
    }
}

pub struct ApiServer {
    config: ApiConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ApiConfig, state: AppState) -> Self {
        Self { config, state }
    }

    pub fn health(&self) -> Arc<HealthService> {
        self.state.health.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsService> {
        self.state.metrics.clone()
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        tracing::info!("Starting {} API server on {}", self.state.service_name, self.config.bind_addr);

        let router = create_router(&self.config, self.state.clone());

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("Listening on {}", self.config.bind_addr);

        axum::serve(listener, router).await?;

        Ok(())
    }
}

pub fn create_router(config: &ApiConfig, state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(crate::income_endpoints::CALLBACK_TOKEN_HEADER),
        ])
        .allow_origin(Any);

    let api = Router::new()
        .route("/websocket", get(income_stream))
        .merge(create_user_router())
        .merge(create_income_router())
        .merge(create_withdrawal_router());

    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler));

    if config.enable_metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    router = match &config.path_prefix {
        Some(prefix) => router.nest(prefix, api),
        None => router.merge(api),
    };

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(state.health.check_all().await)
}

async fn status_handler(State(state): State<AppState>) -> Json<ApiResponse<StatusResponse>> {
    let mut additional = HashMap::new();
    additional.insert(
        "users_online".to_string(),
        serde_json::json!(state.hub.active_count().await),
    );
    additional.insert(
        "total_reward_today".to_string(),
        serde_json::json!(state.cache.total_reward_on(chrono::Utc::now()).await),
    );

    let status = StatusResponse {
        name: state.service_name.clone(),
        version: state.version.clone(),
        uptime: state.start_time.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        additional,
    };

    Json(ApiResponse::success(status))
}

async fn metrics_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.metrics.get_metrics().await)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        axum::{
            body::Body,
            http::{Request, StatusCode},
            response::Response,
        },
        chrono::Utc,
        faucet_common::types::{NewUser, RateBand, RewardRate, SystemConfig},
        faucet_store::MemoryStore,
        http_body_util::BodyExt,
        serde_json::{json, Value},
        std::time::Duration,
        tower::ServiceExt,
    };

    struct TestApp {
        store: Arc<MemoryStore>,
        router: Router,
    }

    async fn app(callback_token: Option<&str>) -> TestApp {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_config(SystemConfig {
                total_reward_threshold: 1_000,
                referer_reward_rate: 0.1,
                created_at: Utc::now(),
            })
            .unwrap();
        store
            .insert_reward_rate(RewardRate {
                band: RateBand::LowPool,
                min: 40,
                max: 40,
                weight: 1,
            })
            .unwrap();

        let cache = Arc::new(RateCache::new(10));
        cache.refresh(store.as_ref(), Utc::now()).await.unwrap();
        let hub = Arc::new(Hub::new(Duration::from_secs(1)));

        let state = AppState::new(store.clone(), cache, hub, callback_token.map(str::to_string));
        let config = ApiConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            enable_metrics: true,
            path_prefix: Some("/v1".to_string()),
        };
        TestApp {
            store,
            router: create_router(&config, state),
        }
    }

    async fn new_user(store: &MemoryStore) -> i64 {
        store
            .create_user(
                NewUser {
                    email: "a@example.com".to_string(),
                    address: "addr-a".to_string(),
                    referer_id: None,
                    reward_interval_secs: 3_600,
                },
                Utc::now(),
            )
            .await
            .unwrap()
            .id
    }

    async fn send(router: &Router, request: Request<Body>) -> Response {
        router.clone().oneshot(request).await.unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_str(&body_text(response).await).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_status() {
        let app = app(None).await;
        let response = send(&app.router, get("/health")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let status = body_json(send(&app.router, get("/status")).await).await;
        assert_eq!(status["data"]["name"], "faucet-api");
        assert_eq!(status["data"]["additional"]["users_online"], 0);
    }

    #[tokio::test]
    async fn test_callback_replay_is_acknowledged() {
        let app = app(None).await;
        let user = new_user(&app.store).await;
        let payload = json!({ "external_key": "tx1", "user_id": user, "amount": 50 });

        for _ in 0..2 {
            let response = send(&app.router, post_json("/v1/callbacks/offerwow", payload.clone())).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_text(response).await, "1");
        }
        assert_eq!(app.store.get_user(user).await.unwrap().balance, 50);

        let page = body_json(send(&app.router, get(&format!("/v1/users/{}/incomes?source=offerwow", user))).await).await;
        assert_eq!(page["data"]["count"], 1);
        assert_eq!(page["data"]["items"][0]["amount"], 50);
    }

    #[tokio::test]
    async fn test_callback_failures_are_not_acknowledged() {
        let app = app(Some("secret")).await;
        let user = new_user(&app.store).await;
        let payload = json!({ "external_key": "tx1", "user_id": user, "amount": 50 });

        let response = send(&app.router, post_json("/v1/callbacks/offerwow", payload.clone())).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let mut request = post_json("/v1/callbacks/paypal", payload.clone());
        request
            .headers_mut()
            .insert(crate::income_endpoints::CALLBACK_TOKEN_HEADER, "secret".parse().unwrap());
        assert_eq!(send(&app.router, request).await.status(), StatusCode::BAD_REQUEST);

        // unknown user: the credit unit aborts and the partner must retry
        let ghost = json!({ "external_key": "tx2", "user_id": 999, "amount": 50 });
        let mut request = post_json("/v1/callbacks/offerwow", ghost);
        request
            .headers_mut()
            .insert(crate::income_endpoints::CALLBACK_TOKEN_HEADER, "secret".parse().unwrap());
        assert_eq!(send(&app.router, request).await.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(app.store.get_user(user).await.unwrap().balance, 0);
    }

    #[tokio::test]
    async fn test_reward_claim_respects_interval() {
        let app = app(None).await;
        let user = new_user(&app.store).await;
        let uri = format!("/v1/users/{}/rewards", user);

        let first = send(&app.router, post_json(&uri, json!({}))).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(body_json(first).await["data"]["amount"], 40);

        let second = send(&app.router, post_json(&uri, json!({}))).await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

        let missing = send(&app.router, post_json("/v1/users/999/rewards", json!({}))).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_signup_and_referees() {
        let app = app(None).await;

        let referer = body_json(
            send(
                &app.router,
                post_json("/v1/users", json!({ "email": "r@example.com", "address": "addr-r" })),
            )
            .await,
        )
        .await;
        let referer_id = referer["data"]["id"].as_i64().unwrap();
        assert_eq!(referer["data"]["reward_interval_secs"], 300);

        let referee = body_json(
            send(
                &app.router,
                post_json(
                    "/v1/users",
                    json!({ "email": "e@example.com", "address": "addr-e", "referer_id": referer_id }),
                ),
            )
            .await,
        )
        .await;
        let referee_id = referee["data"]["id"].as_i64().unwrap();
        assert_eq!(
            app.store.get_user(referee_id).await.unwrap().referer_id,
            Some(referer_id)
        );

        // an unknown referrer is dropped
        let orphan = body_json(
            send(
                &app.router,
                post_json(
                    "/v1/users",
                    json!({ "email": "o@example.com", "address": "addr-o", "referer_id": 999 }),
                ),
            )
            .await,
        )
        .await;
        let orphan_id = orphan["data"]["id"].as_i64().unwrap();
        assert_eq!(app.store.get_user(orphan_id).await.unwrap().referer_id, None);

        let taken = send(
            &app.router,
            post_json("/v1/users", json!({ "email": "r@example.com", "address": "addr-x" })),
        )
        .await;
        assert_eq!(taken.status(), StatusCode::CONFLICT);
        let blank = send(
            &app.router,
            post_json("/v1/users", json!({ "email": "b@example.com", "address": " " })),
        )
        .await;
        assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

        let fetched = body_json(send(&app.router, get(&format!("/v1/users/{}", referer_id))).await).await;
        assert_eq!(fetched["data"]["email"], "r@example.com");
        let missing = send(&app.router, get("/v1/users/999")).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let referees = body_json(
            send(&app.router, get(&format!("/v1/users/{}/referees", referer_id))).await,
        )
        .await;
        let items = referees["data"]["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["id"], referee_id);
    }

    #[tokio::test]
    async fn test_referee_rewards_are_visible_to_the_referrer_only() {
        let app = app(None).await;
        let referer = new_user(&app.store).await;
        let referee = app
            .store
            .create_user(
                NewUser {
                    email: "e@example.com".to_string(),
                    address: "addr-e".to_string(),
                    referer_id: Some(referer),
                    reward_interval_secs: 3_600,
                },
                Utc::now(),
            )
            .await
            .unwrap()
            .id;
        send(&app.router, post_json(&format!("/v1/users/{}/rewards", referee), json!({}))).await;

        let uri = format!("/v1/users/{}/referees/{}/incomes", referer, referee);
        let page = body_json(send(&app.router, get(&uri)).await).await;
        assert_eq!(page["data"]["count"], 1);
        assert_eq!(page["data"]["items"][0]["amount"], 40);
        assert_eq!(page["data"]["items"][0]["referer_amount"], 4);

        // the referee is not its referrer's referrer
        let reversed = format!("/v1/users/{}/referees/{}/incomes", referee, referer);
        assert_eq!(send(&app.router, get(&reversed)).await.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_withdrawal_flow() {
        let app = app(None).await;
        let user = new_user(&app.store).await;
        send(&app.router, post_json(&format!("/v1/users/{}/rewards", user), json!({}))).await;

        let uri = format!("/v1/users/{}/withdrawals", user);
        let too_much = send(&app.router, post_json(&uri, json!({ "amount": 41 }))).await;
        assert_eq!(too_much.status(), StatusCode::BAD_REQUEST);

        let created = body_json(send(&app.router, post_json(&uri, json!({ "amount": 40 }))).await).await;
        assert_eq!(created["data"]["address"], "addr-a");
        assert_eq!(created["data"]["status"], "pending");
        let id = created["data"]["id"].as_i64().unwrap();

        let advance = json!({ "ids": [id], "from": "pending", "to": "processing" });
        let response = send(&app.router, post_json("/v1/withdrawals/advance", advance.clone())).await;
        assert_eq!(body_json(response).await["data"]["advanced"], 1);

        // the same batch again: nothing is in `pending` any more
        let replay = send(&app.router, post_json("/v1/withdrawals/advance", advance)).await;
        assert_eq!(replay.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let history = body_json(send(&app.router, get(&uri)).await).await;
        assert_eq!(history["data"]["items"][0]["status"], "processing");
    }
}

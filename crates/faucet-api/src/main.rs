use {
    anyhow::{Context, Result},
    chrono::Utc,
    clap::Parser,
    faucet_api::{ApiConfig, ApiServer, AppState},
    faucet_common::{config::WithdrawalJobConfig, ServiceConfig},
    faucet_ledger::{Hub, RateCache, WithdrawalSettlement},
    faucet_store::{FaucetStorageFactory, StorageFactory},
    std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration},
    tracing::{error, info, warn},
    tracing_subscriber::EnvFilter,
};

#[derive(Parser, Debug)]
#[clap(version, about = "Faucet reward ledger with partner callbacks and a live income feed")]
struct Args {
    /// JSON configuration file; defaults apply when absent
    #[clap(long, env = "FAUCET_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `http.bind_address`
    #[clap(long, env = "FAUCET_BIND")]
    bind: Option<String>,
}

fn spawn_withdrawal_job(settlement: Arc<WithdrawalSettlement>, job: WithdrawalJobConfig) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(job.interval());
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match settlement.create_scheduled_withdrawals(job.min_balance).await {
                Ok(sweep) => {
                    for (user_id, e) in &sweep.failed {
                        warn!("Scheduled withdrawal for user {} abandoned: {}", user_id, e);
                    }
                }
                Err(e) => error!("Scheduled withdrawal sweep failed: {}", e),
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServiceConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => ServiceConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.http.bind_address = bind;
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=warn", config.log_level)));
    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();

    info!("Using {:?} storage", config.storage.storage_type);
    let store = FaucetStorageFactory::new(config.storage.clone())
        .create_storage()
        .await
        .context("Failed to create ledger store")?;

    let cache = Arc::new(RateCache::new(config.cache.latest_incomes));
    if let Err(e) = cache.refresh(store.as_ref(), Utc::now()).await {
        warn!("Initial rate cache load failed, starting with an empty snapshot: {}", e);
    }
    let _refresher = cache.clone().spawn_refresher(store.clone(), config.cache.refresh_interval());

    let hub = Arc::new(Hub::new(config.hub.write_timeout()));
    let state = AppState::new(store.clone(), cache.clone(), hub.clone(), config.http.callback_token.clone());

    if config.withdrawal.enabled {
        info!(
            "Scheduled withdrawals every {}s for balances >= {}",
            config.withdrawal.interval_secs, config.withdrawal.min_balance
        );
        spawn_withdrawal_job(state.settlement.clone(), config.withdrawal.clone());
    }

    let server = ApiServer::new(ApiConfig::from_http(&config.http)?, state);

    server.health().register_store(store.clone()).await;

    let collector_hub = hub.clone();
    let collector_cache = cache.clone();
    server.metrics().register_collector(Duration::from_secs(10), move || {
        let hub = collector_hub.clone();
        let cache = collector_cache.clone();
        async move {
            let mut metrics = HashMap::new();
            metrics.insert("users_online".to_string(), serde_json::json!(hub.active_count().await));
            metrics.insert(
                "total_reward_today".to_string(),
                serde_json::json!(cache.total_reward_on(Utc::now()).await),
            );
            metrics
        }
    });

    tokio::select! {
        result = server.start() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    store.close().await?;
    Ok(())
}

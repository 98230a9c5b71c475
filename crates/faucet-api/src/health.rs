use {
    crate::types::{HealthCheckResult, HealthResponse, HealthStatus},
    faucet_store::LedgerStore,
    std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Instant},
    tokio::sync::RwLock,
};

pub type HealthFuture = Pin<Box<dyn Future<Output = HealthCheckResult> + Send>>;
pub type HealthCheckFn = Arc<dyn Fn() -> HealthFuture + Send + Sync>;

pub struct HealthService {
    checks: RwLock<HashMap<String, HealthCheckFn>>,
    start_time: Instant,
}

impl Default for HealthService {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthService {
    pub fn new() -> Self {
        Self {
            checks: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    pub async fn register(&self, name: &str, check: HealthCheckFn) {
        self.checks.write().await.insert(name.to_string(), check);
    }

    /// Report the ledger store as unhealthy while its round trip fails
    pub async fn register_store(&self, store: Arc<dyn LedgerStore>) {
        self.register(
            "storage",
            Arc::new(move || -> HealthFuture {
                let store = store.clone();
                Box::pin(async move {
                    match store.health_check().await {
                        Ok(()) => HealthCheckResult {
                            status: HealthStatus::Healthy,
                            details: None,
                        },
                        Err(e) => HealthCheckResult {
                            status: HealthStatus::Unhealthy,
                            details: Some(e.to_string()),
                        },
                    }
                })
            }),
        )
        .await;
    }

    pub async fn unregister(&self, name: &str) {
        self.checks.write().await.remove(name);
    }

    pub fn uptime(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub async fn check_all(&self) -> HealthResponse {
        // run checks without holding the lock
        let checks: Vec<(String, HealthCheckFn)> = self
            .checks
            .read()
            .await
            .iter()
            .map(|(name, check)| (name.clone(), check.clone()))
            .collect();

        let mut results = HashMap::new();
        let mut all_healthy = true;
        let mut any_healthy = checks.is_empty();

        for (name, check) in checks {
            let result = check().await;
            match result.status {
                HealthStatus::Healthy => any_healthy = true,
                HealthStatus::Degraded => {
                    all_healthy = false;
                    any_healthy = true;
                }
                HealthStatus::Unhealthy => all_healthy = false,
            }
            results.insert(name, result);
        }

        let status = if all_healthy {
            HealthStatus::Healthy
        } else if any_healthy {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        HealthResponse {
            status,
            checks: results,
            uptime: self.uptime(),
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, faucet_store::MemoryStore};

    fn fixed(status: HealthStatus) -> HealthCheckFn {
        Arc::new(move || -> HealthFuture {
            Box::pin(async move {
                HealthCheckResult {
                    status,
                    details: None,
                }
            })
        })
    }

    #[tokio::test]
    async fn test_overall_status() {
        let health = HealthService::new();
        health.register_store(Arc::new(MemoryStore::new())).await;
        assert_eq!(health.check_all().await.status, HealthStatus::Healthy);

        health.register("payout", fixed(HealthStatus::Unhealthy)).await;
        let response = health.check_all().await;
        assert_eq!(response.status, HealthStatus::Degraded);
        assert_eq!(response.checks.len(), 2);

        health.unregister("storage").await;
        assert_eq!(health.check_all().await.status, HealthStatus::Unhealthy);
    }
}

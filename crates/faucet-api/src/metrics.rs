use {
    serde_json::Value,
    std::{collections::HashMap, future::Future, sync::Arc, time::Duration},
    tokio::{sync::RwLock, task::JoinHandle},
};

/// Metrics service for collecting and retrieving metrics
#[derive(Debug, Default)]
pub struct MetricsService {
    metrics: Arc<RwLock<HashMap<String, Value>>>,
}

impl MetricsService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_metric(&self, key: &str, value: Value) {
        self.metrics.write().await.insert(key.to_string(), value);
    }

    pub async fn get_metric(&self, key: &str) -> Option<Value> {
        self.metrics.read().await.get(key).cloned()
    }

    pub async fn get_metrics(&self) -> Value {
        let metrics = self.metrics.read().await;
        serde_json::to_value(&*metrics).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
    }

    /// Run `collector` every `interval` and merge what it returns
    pub fn register_collector<F, Fut>(&self, interval: Duration, collector: F) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HashMap<String, Value>> + Send + 'static,
    {
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let collected = collector().await;

                let mut metrics = metrics.write().await;
                metrics.extend(collected);
            }
        })
    }
}

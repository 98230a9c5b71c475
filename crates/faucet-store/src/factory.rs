use {
    crate::{
        memory_store::MemoryStore,
        postgres_store::PostgresStore,
        traits::{LedgerStore, StorageFactory},
    },
    async_trait::async_trait,
    faucet_common::{
        config::{StorageConfig, StorageType},
        Error, Result,
    },
    std::sync::Arc,
};

/// Factory for creating the ledger store selected by configuration
pub struct FaucetStorageFactory {
    config: StorageConfig,
}

impl FaucetStorageFactory {
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StorageFactory for FaucetStorageFactory {
    async fn create_storage(&self) -> Result<Arc<dyn LedgerStore>> {
        match self.config.storage_type {
            StorageType::Memory => Ok(Arc::new(MemoryStore::new())),
            StorageType::Postgres => {
                let config = match &self.config.postgres {
                    Some(config) => config.clone(),
                    None => return Err(Error::Config("PostgreSQL configuration not provided".to_string())),
                };

                let store = PostgresStore::new(config).await?;
                Ok(Arc::new(store))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_is_default() {
        let factory = FaucetStorageFactory::new(StorageConfig::default());
        let store = factory.create_storage().await.unwrap();
        assert!(store.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_postgres_requires_config() {
        let factory = FaucetStorageFactory::new(StorageConfig {
            storage_type: StorageType::Postgres,
            postgres: None,
        });
        assert!(matches!(factory.create_storage().await, Err(Error::Config(_))));
    }
}

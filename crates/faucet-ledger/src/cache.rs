use {
    chrono::{DateTime, Utc},
    faucet_common::{
        types::{DeltaIncome, RateBand, RewardRate, SystemConfig, TotalRewardDay},
        utils::day_of,
        Result,
    },
    faucet_store::LedgerStore,
    std::{
        collections::{HashMap, VecDeque},
        sync::Arc,
        time::Duration,
    },
    tokio::{sync::RwLock, task::JoinHandle},
    tracing::{debug, error},
};

/// Read-mostly snapshot of config, reward bands and today's reward pool.
///
/// Each field has its own lock. The snapshot may lag the store by up to one
/// refresh interval; the daily pool is kept current in between by
/// [`RateCache::increment_total_reward`].
pub struct RateCache {
    config: RwLock<SystemConfig>,
    rates: RwLock<HashMap<RateBand, Vec<RewardRate>>>,
    total_reward: RwLock<TotalRewardDay>,
    latest_incomes: RwLock<VecDeque<DeltaIncome>>,
    latest_capacity: usize,
}

impl RateCache {
    pub fn new(latest_capacity: usize) -> Self {
        Self {
            config: RwLock::new(SystemConfig::default()),
            rates: RwLock::new(HashMap::new()),
            total_reward: RwLock::new(TotalRewardDay::empty(day_of(Utc::now()))),
            latest_incomes: RwLock::new(VecDeque::with_capacity(latest_capacity)),
            latest_capacity,
        }
    }

    pub async fn config(&self) -> SystemConfig {
        self.config.read().await.clone()
    }

    pub async fn set_config(&self, config: SystemConfig) {
        *self.config.write().await = config;
    }

    pub async fn rates(&self, band: RateBand) -> Vec<RewardRate> {
        self.rates.read().await.get(&band).cloned().unwrap_or_default()
    }

    pub async fn set_rates(&self, band: RateBand, rates: Vec<RewardRate>) {
        self.rates.write().await.insert(band, rates);
    }

    /// Pool total for `now`'s day; zero if the snapshot is from another day
    pub async fn total_reward_on(&self, now: DateTime<Utc>) -> i64 {
        let total = self.total_reward.read().await;
        if total.is_same_day(now) {
            total.total
        } else {
            0
        }
    }

    pub async fn set_total_reward(&self, total: TotalRewardDay) {
        *self.total_reward.write().await = total;
    }

    pub async fn increment_total_reward(&self, now: DateTime<Utc>, delta: i64) {
        let mut total = self.total_reward.write().await;
        if !total.is_same_day(now) {
            *total = TotalRewardDay::empty(day_of(now));
        }
        total.total += delta;
    }

    pub async fn insert_income(&self, income: DeltaIncome) {
        if self.latest_capacity == 0 {
            return;
        }
        let mut latest = self.latest_incomes.write().await;
        if latest.len() == self.latest_capacity {
            latest.pop_back();
        }
        latest.push_front(income);
    }

    /// Most recent first
    pub async fn latest_incomes(&self) -> Vec<DeltaIncome> {
        self.latest_incomes.read().await.iter().cloned().collect()
    }

    /// Reload every field from the store. A missing config row keeps the
    /// current one.
    pub async fn refresh(&self, store: &dyn LedgerStore, now: DateTime<Utc>) -> Result<()> {
        if let Some(config) = store.get_latest_config().await? {
            self.set_config(config).await;
        }

        for band in [RateBand::LowPool, RateBand::HighPool] {
            let rates = store.get_reward_rates(band).await?;
            self.set_rates(band, rates).await;
        }

        let total = store.get_total_reward(day_of(now)).await?;
        self.set_total_reward(total).await;

        debug!("Rate cache refreshed");
        Ok(())
    }

    pub fn spawn_refresher(
        self: Arc<Self>,
        store: Arc<dyn LedgerStore>,
        interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.refresh(store.as_ref(), Utc::now()).await {
                    error!("Rate cache refresh failed, keeping previous snapshot: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        chrono::TimeZone,
        faucet_common::types::IncomeSource,
        faucet_store::MemoryStore,
    };

    fn delta(amount: i64) -> DeltaIncome {
        DeltaIncome {
            address: "addr".to_string(),
            amount,
            source: IncomeSource::Reward,
            time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_total_reward_resets_on_new_day() {
        let cache = RateCache::new(10);
        let day_one = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let day_two = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 1).unwrap();

        cache.set_total_reward(TotalRewardDay::empty(day_of(day_one))).await;
        cache.increment_total_reward(day_one, 30).await;
        cache.increment_total_reward(day_one, 12).await;
        assert_eq!(cache.total_reward_on(day_one).await, 42);
        assert_eq!(cache.total_reward_on(day_two).await, 0);

        cache.increment_total_reward(day_two, 5).await;
        assert_eq!(cache.total_reward_on(day_two).await, 5);
    }

    #[tokio::test]
    async fn test_latest_incomes_is_bounded() {
        let cache = RateCache::new(3);
        for amount in 1..=5 {
            cache.insert_income(delta(amount)).await;
        }
        let amounts: Vec<i64> = cache.latest_incomes().await.iter().map(|d| d.amount).collect();
        assert_eq!(amounts, vec![5, 4, 3]);
    }

    #[tokio::test]
    async fn test_refresh_loads_store_snapshot() {
        let store = MemoryStore::new();
        store
            .insert_config(SystemConfig {
                total_reward_threshold: 500,
                referer_reward_rate: 0.2,
                created_at: Utc::now(),
            })
            .unwrap();
        store
            .insert_reward_rate(RewardRate {
                band: RateBand::HighPool,
                min: 1,
                max: 5,
                weight: 1,
            })
            .unwrap();

        let cache = RateCache::new(0);
        cache.refresh(&store, Utc::now()).await.unwrap();

        assert_eq!(cache.config().await.total_reward_threshold, 500);
        assert_eq!(cache.rates(RateBand::HighPool).await.len(), 1);
        assert!(cache.rates(RateBand::LowPool).await.is_empty());
        assert_eq!(cache.total_reward_on(Utc::now()).await, 0);
    }
}

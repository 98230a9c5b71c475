use {
    crate::{cache::RateCache, hub::Hub, rewards::draw_reward},
    chrono::{DateTime, Utc},
    faucet_common::{
        types::{
            CreditReceipt, DeltaIncome, ExternalCredit, Income, IncomeSource, RateBand, RewardCredit,
            WebsocketMessage,
        },
        utils::referer_share,
        Error, Result,
    },
    faucet_store::LedgerStore,
    std::sync::Arc,
    tracing::{debug, error, info},
};

/// Credits users from the scheduled draw and from partner callbacks.
///
/// Every successful credit is published once: to the cache's latest-income
/// ring and to the hub. Publishing never waits on clients.
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    cache: Arc<RateCache>,
    hub: Arc<Hub>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>, cache: Arc<RateCache>, hub: Arc<Hub>) -> Self {
        Self { store, cache, hub }
    }

    /// Pay one scheduled reward. `Error::RewardNotDue` if the user's interval
    /// has not elapsed; the store re-checks under the row lock.
    pub async fn draw_scheduled_reward(&self, user_id: i64, now: DateTime<Utc>) -> Result<Income> {
        let user = self.store.get_user(user_id).await?;
        if !user.reward_due(now) {
            return Err(Error::RewardNotDue(user_id));
        }

        let config = self.cache.config().await;
        let pool = self.cache.total_reward_on(now).await;
        let band = RateBand::for_pool(pool, config.total_reward_threshold);

        let rates = self.cache.rates(band).await;
        let amount = draw_reward(&rates)?;

        let referer_amount = if user.has_referer() {
            referer_share(amount, config.referer_reward_rate)
        } else {
            0
        };

        let receipt = self
            .store
            .create_reward_income(RewardCredit {
                user_id,
                amount,
                referer_amount,
                now,
            })
            .await
            .map_err(|e| {
                match &e {
                    Error::RewardNotDue(_) => {
                        debug!(event = "reward", user_id, "Concurrent claim lost the race")
                    }
                    _ => error!(event = "reward", user_id, amount, "Reward credit failed: {}", e),
                }
                e
            })?;

        self.cache.increment_total_reward(now, receipt.disbursed()).await;
        info!(
            event = "reward",
            user_id,
            amount,
            referer_amount = receipt.income.referer_amount,
            band = %band,
            "Scheduled reward credited"
        );

        self.publish(&receipt).await;
        Ok(receipt.income)
    }

    /// Credit a partner event exactly once. A replay yields `Error::Duplicate`
    /// with no balance change and no broadcast.
    pub async fn credit_external_income(
        &self,
        source: IncomeSource,
        external_key: &str,
        user_id: i64,
        amount: i64,
    ) -> Result<Income> {
        if !source.is_partner() {
            return Err(Error::InvalidSource(source.to_string()));
        }
        if amount <= 0 {
            return Err(Error::InvalidAmount(amount));
        }

        let config = self.cache.config().await;
        let referer_amount = referer_share(amount, config.referer_reward_rate);

        let result = self
            .store
            .create_external_income(ExternalCredit {
                source,
                external_key: external_key.to_string(),
                user_id,
                amount,
                referer_amount,
                now: Utc::now(),
            })
            .await;

        let receipt = match result {
            Ok(receipt) => receipt,
            Err(e) if e.is_duplicate() => {
                debug!(
                    event = "offerwall callback",
                    source = %source,
                    user_id,
                    external_key,
                    "Replayed callback ignored"
                );
                return Err(e);
            }
            Err(e) => {
                error!(
                    event = "offerwall callback",
                    source = %source,
                    user_id,
                    external_key,
                    "Callback credit failed: {}",
                    e
                );
                return Err(e);
            }
        };

        info!(
            event = "offerwall callback",
            source = %source,
            user_id,
            amount,
            referer_amount = receipt.income.referer_amount,
            "Callback credited"
        );

        self.publish(&receipt).await;
        Ok(receipt.income)
    }

    async fn publish(&self, receipt: &CreditReceipt) {
        let delta = DeltaIncome::from(receipt);
        self.cache.insert_income(delta.clone()).await;

        match serde_json::to_string(&WebsocketMessage::delta(delta)) {
            Ok(payload) => self.hub.broadcast(payload),
            Err(e) => error!("Failed to encode delta income: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::hub::Connection,
        async_trait::async_trait,
        faucet_common::{
            types::{NewUser, RewardRate, SystemConfig},
            utils::day_of,
        },
        faucet_store::{FailPoint, MemoryStore},
        std::{sync::Mutex, time::Duration},
    };

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Connection for Recorder {
        async fn write(&self, payload: &str) -> anyhow::Result<()> {
            self.frames.lock().unwrap().push(payload.to_string());
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        cache: Arc<RateCache>,
        hub: Arc<Hub>,
        ledger: LedgerService,
        recorder: Arc<Recorder>,
    }

    async fn fixture(rate: f64, min: i64, max: i64) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_config(SystemConfig {
                total_reward_threshold: 1_000,
                referer_reward_rate: rate,
                created_at: Utc::now(),
            })
            .unwrap();
        for band in [RateBand::LowPool, RateBand::HighPool] {
            store
                .insert_reward_rate(RewardRate { band, min, max, weight: 1 })
                .unwrap();
        }

        let cache = Arc::new(RateCache::new(10));
        cache.refresh(store.as_ref(), Utc::now()).await.unwrap();

        let hub = Arc::new(Hub::new(Duration::from_secs(1)));
        let recorder = Arc::new(Recorder::default());
        hub.subscribe(recorder.clone()).await;

        let ledger = LedgerService::new(store.clone(), cache.clone(), hub.clone());
        Fixture {
            store,
            cache,
            hub,
            ledger,
            recorder,
        }
    }

    async fn user(store: &MemoryStore, email: &str, referer_id: Option<i64>) -> i64 {
        store
            .create_user(
                NewUser {
                    email: email.to_string(),
                    address: format!("addr-{}", email),
                    referer_id,
                    reward_interval_secs: 60,
                },
                Utc::now(),
            )
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_scheduled_reward_credits_user_and_referer() {
        let f = fixture(0.1, 100, 100).await;
        let b = user(&f.store, "b", None).await;
        let a = user(&f.store, "a", Some(b)).await;
        let now = Utc::now();

        let income = f.ledger.draw_scheduled_reward(a, now).await.unwrap();
        assert_eq!(income.amount, 100);
        assert_eq!(income.referer_amount, 10);

        let a = f.store.get_user(a).await.unwrap();
        assert_eq!(a.balance, 100);
        assert_eq!(a.total_income, 100);
        let b = f.store.get_user(b).await.unwrap();
        assert_eq!(b.balance, 10);
        assert_eq!(b.total_income_from_referees, 10);

        assert_eq!(f.store.get_total_reward(day_of(now)).await.unwrap().total, 110);
        assert_eq!(f.cache.total_reward_on(now).await, 110);

        f.hub.flush().await;
        let frames = f.recorder.frames.lock().unwrap().clone();
        assert_eq!(frames.len(), 1);
        let frame: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(frame["delta_income"]["address"], "addr-a");
        assert_eq!(frame["delta_income"]["amount"], 100);
        assert_eq!(frame["delta_income"]["type"], "reward");
    }

    #[tokio::test]
    async fn test_reward_not_due_draws_nothing() {
        let f = fixture(0.0, 5, 5).await;
        let a = user(&f.store, "a", None).await;
        let now = Utc::now();

        f.ledger.draw_scheduled_reward(a, now).await.unwrap();
        let again = f.ledger.draw_scheduled_reward(a, now).await;
        assert!(matches!(again, Err(Error::RewardNotDue(id)) if id == a));

        assert_eq!(f.store.get_user(a).await.unwrap().balance, 5);
        assert_eq!(f.cache.total_reward_on(now).await, 5);
        f.hub.flush().await;
        assert_eq!(f.recorder.frames.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_high_pool_band_once_threshold_exceeded() {
        let f = fixture(0.0, 1, 1).await;
        f.cache
            .set_rates(
                RateBand::HighPool,
                vec![RewardRate {
                    band: RateBand::HighPool,
                    min: 7,
                    max: 7,
                    weight: 1,
                }],
            )
            .await;

        let a = user(&f.store, "a", None).await;
        let now = Utc::now();
        f.cache.increment_total_reward(now, 1_001).await;

        let income = f.ledger.draw_scheduled_reward(a, now).await.unwrap();
        assert_eq!(income.amount, 7);
    }

    #[tokio::test]
    async fn test_callback_replay_is_a_silent_duplicate() {
        let f = fixture(0.0, 1, 1).await;
        let a = user(&f.store, "a", None).await;

        let income = f
            .ledger
            .credit_external_income(IncomeSource::Superrewards, "tx1", a, 50)
            .await
            .unwrap();
        assert_eq!(income.amount, 50);

        let replay = f
            .ledger
            .credit_external_income(IncomeSource::Superrewards, "tx1", a, 50)
            .await;
        assert!(matches!(replay, Err(Error::Duplicate { .. })));

        assert_eq!(f.store.get_user(a).await.unwrap().balance, 50);
        assert_eq!(f.store.count_incomes(a, None).await.unwrap(), 1);
        f.hub.flush().await;
        assert_eq!(f.recorder.frames.lock().unwrap().len(), 1);
        assert_eq!(f.cache.latest_incomes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_credit_publishes_nothing() {
        let f = fixture(0.0, 1, 1).await;
        let a = user(&f.store, "a", None).await;

        f.store.fail_at(FailPoint::AfterDedupeInsert);
        let result = f
            .ledger
            .credit_external_income(IncomeSource::Kiwiwall, "k1", a, 20)
            .await;
        assert!(matches!(result, Err(Error::Unknown(_))));

        f.hub.flush().await;
        assert!(f.recorder.frames.lock().unwrap().is_empty());
        assert_eq!(f.store.get_user(a).await.unwrap().balance, 0);
    }

    #[tokio::test]
    async fn test_rejects_bad_callback_input() {
        let f = fixture(0.0, 1, 1).await;
        let a = user(&f.store, "a", None).await;

        let reward = f.ledger.credit_external_income(IncomeSource::Reward, "x", a, 5).await;
        assert!(matches!(reward, Err(Error::InvalidSource(_))));
        let zero = f.ledger.credit_external_income(IncomeSource::Offerwow, "x", a, 0).await;
        assert!(matches!(zero, Err(Error::InvalidAmount(0))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_replays_credit_once() {
        let f = fixture(0.0, 1, 1).await;
        let a = user(&f.store, "a", None).await;
        let ledger = Arc::new(f.ledger);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .credit_external_income(IncomeSource::Ptcwall, "race", a, 25)
                    .await
                    .is_ok()
            }));
        }

        let mut credited = 0;
        for handle in handles {
            if handle.await.unwrap() {
                credited += 1;
            }
        }
        assert_eq!(credited, 1);
        assert_eq!(f.store.get_user(a).await.unwrap().balance, 25);
    }
}

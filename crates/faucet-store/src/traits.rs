use {
    async_trait::async_trait,
    chrono::{DateTime, NaiveDate, Utc},
    faucet_common::{
        types::{
            CreditReceipt, ExternalCredit, Income, IncomeSource, NewUser, NewWithdrawal, RateBand,
            RewardCredit, RewardRate, SystemConfig, TotalRewardDay, User, Withdrawal,
            WithdrawalStatus,
        },
        Result,
    },
    std::sync::Arc,
};

/// The balance store behind the income ledger.
///
/// Write operations are atomic units: either every row they touch is
/// committed or none is. They never take application-level locks; concurrent
/// credits against the same user serialize on that user's row in the backend.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Register a user, `Error::DuplicateEmail` if the email is taken
    async fn create_user(&self, user: NewUser, now: DateTime<Utc>) -> Result<User>;

    /// Get user by id, `Error::NotFound` if absent
    async fn get_user(&self, id: i64) -> Result<User>;

    /// Users who signed up with `referer_id` as their referrer, oldest first
    async fn get_referees(&self, referer_id: i64, limit: i64, offset: i64) -> Result<Vec<User>>;

    /// Users whose balance is at least `min_balance` and worth paying out
    async fn get_withdrawable_users(&self, min_balance: i64) -> Result<Vec<User>>;

    /// Most recent system config row, if any
    async fn get_latest_config(&self) -> Result<Option<SystemConfig>>;

    /// Reward bands of one type, in a stable order
    async fn get_reward_rates(&self, band: RateBand) -> Result<Vec<RewardRate>>;

    /// Scheduled-reward total for a day, zero when nothing was paid yet
    async fn get_total_reward(&self, day: NaiveDate) -> Result<TotalRewardDay>;

    /// Insert a scheduled-reward income, credit the user (and referrer, if
    /// any), stamp `rewarded_at` and grow the day's reward total by the amount
    /// actually disbursed. Fails with `Error::RewardNotDue` if the user's
    /// interval has not elapsed at `credit.now`.
    async fn create_reward_income(&self, credit: RewardCredit) -> Result<CreditReceipt>;

    /// Insert the partner's dedupe record if absent, then the income and the
    /// balance updates. An existing dedupe record yields `Error::Duplicate`
    /// and leaves every row untouched.
    async fn create_external_income(&self, credit: ExternalCredit) -> Result<CreditReceipt>;

    /// Incomes of a user, newest first
    async fn list_incomes(
        &self,
        user_id: i64,
        source: Option<IncomeSource>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Income>>;

    async fn count_incomes(&self, user_id: i64, source: Option<IncomeSource>) -> Result<i64>;

    /// Debit `amount` if the balance covers it and create a pending withdrawal
    async fn create_withdrawal(&self, withdrawal: NewWithdrawal) -> Result<Withdrawal>;

    /// Move every listed withdrawal from `from` to `to`. Fails with
    /// `Error::BatchProgressMismatch` and changes nothing unless every id is
    /// currently in `from`.
    async fn advance_withdrawals(
        &self,
        ids: &[i64],
        from: WithdrawalStatus,
        to: WithdrawalStatus,
        transaction_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    /// Withdrawals of a user, newest first
    async fn list_withdrawals(&self, user_id: i64, limit: i64, offset: i64) -> Result<Vec<Withdrawal>>;

    /// Oldest withdrawals in a status, for the disbursement job
    async fn list_withdrawals_by_status(&self, status: WithdrawalStatus, limit: i64) -> Result<Vec<Withdrawal>>;

    /// Cheap round trip to the backend
    async fn health_check(&self) -> Result<()>;

    /// Close the storage (close connections, etc.)
    async fn close(&self) -> Result<()>;
}

/// Factory trait for creating storage instances
#[async_trait]
pub trait StorageFactory: Send + Sync + 'static {
    /// Create a new storage instance with the given configuration
    async fn create_storage(&self) -> Result<Arc<dyn LedgerStore>>;
}

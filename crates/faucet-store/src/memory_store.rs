use {
    crate::traits::LedgerStore,
    async_trait::async_trait,
    chrono::{DateTime, NaiveDate, Utc},
    faucet_common::{
        types::{
            CreditReceipt, ExternalCredit, Income, IncomeSource, NewUser, NewWithdrawal, RateBand,
            RewardCredit, RewardRate, SystemConfig, TotalRewardDay, User, Withdrawal,
            WithdrawalStatus,
        },
        utils::day_of,
        Error, Result,
    },
    std::{
        collections::{BTreeMap, BTreeSet, HashMap, HashSet},
        sync::Mutex,
    },
};

/// Points inside an atomic unit where a simulated failure can be injected.
///
/// An armed fail point fires once, aborting the unit it interrupts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    /// Income row written, balances not yet touched
    AfterIncomeInsert,
    /// Partner dedupe record written, income not yet inserted
    AfterDedupeInsert,
    /// Balance debited, withdrawal row not yet inserted
    AfterWithdrawalDebit,
}

#[derive(Debug, Default)]
struct State {
    users: BTreeMap<i64, User>,
    emails: HashMap<String, i64>,
    incomes: Vec<Income>,
    total_rewards: BTreeMap<NaiveDate, i64>,
    reward_rates: Vec<RewardRate>,
    configs: Vec<SystemConfig>,
    withdrawals: BTreeMap<i64, Withdrawal>,
    dedupe: HashMap<IncomeSource, HashSet<(String, i64)>>,
    next_user_id: i64,
    next_income_id: i64,
    next_withdrawal_id: i64,
}

/// Prior value of a keyed row written inside a unit
#[derive(Debug)]
enum Undo {
    User(i64, Option<User>),
    Withdrawal(i64, Option<Withdrawal>),
    TotalReward(NaiveDate, Option<i64>),
    Dedupe(IncomeSource, (String, i64)),
}

/// Lengths of the append-only tables and the id counters when a unit began
#[derive(Debug)]
struct Savepoint {
    incomes: usize,
    configs: usize,
    reward_rates: usize,
    next_user_id: i64,
    next_income_id: i64,
    next_withdrawal_id: i64,
}

/// One atomic unit over the shared state.
///
/// Keyed writes go through the accessors below, which journal the row they
/// replace. Appends are undone by truncating back to the savepoint. A unit
/// therefore costs what it touches, not the size of the ledger.
struct Unit<'a> {
    state: &'a mut State,
    undo: Vec<Undo>,
    savepoint: Savepoint,
}

impl<'a> Unit<'a> {
    fn begin(state: &'a mut State) -> Self {
        let savepoint = Savepoint {
            incomes: state.incomes.len(),
            configs: state.configs.len(),
            reward_rates: state.reward_rates.len(),
            next_user_id: state.next_user_id,
            next_income_id: state.next_income_id,
            next_withdrawal_id: state.next_withdrawal_id,
        };
        Self {
            state,
            undo: Vec::new(),
            savepoint,
        }
    }

    fn user(&self, id: i64) -> Option<&User> {
        self.state.users.get(&id)
    }

    fn user_mut(&mut self, id: i64) -> Option<&mut User> {
        let before = self.state.users.get(&id)?.clone();
        self.undo.push(Undo::User(id, Some(before)));
        self.state.users.get_mut(&id)
    }

    fn insert_user(&mut self, user: User) {
        let id = user.id;
        self.state.emails.insert(user.email.clone(), id);
        let before = self.state.users.insert(id, user);
        self.undo.push(Undo::User(id, before));
    }

    fn withdrawal_mut(&mut self, id: i64) -> Option<&mut Withdrawal> {
        let before = self.state.withdrawals.get(&id)?.clone();
        self.undo.push(Undo::Withdrawal(id, Some(before)));
        self.state.withdrawals.get_mut(&id)
    }

    fn insert_withdrawal(&mut self, withdrawal: Withdrawal) {
        let id = withdrawal.id;
        let before = self.state.withdrawals.insert(id, withdrawal);
        self.undo.push(Undo::Withdrawal(id, before));
    }

    fn add_total_reward(&mut self, day: NaiveDate, amount: i64) {
        let before = self.state.total_rewards.get(&day).copied();
        self.undo.push(Undo::TotalReward(day, before));
        *self.state.total_rewards.entry(day).or_insert(0) += amount;
    }

    /// InsertIfAbsent on a partner's dedupe set
    fn insert_dedupe(&mut self, source: IncomeSource, key: (String, i64)) -> bool {
        let inserted = self
            .state
            .dedupe
            .entry(source)
            .or_default()
            .insert(key.clone());
        if inserted {
            self.undo.push(Undo::Dedupe(source, key));
        }
        inserted
    }

    fn rollback(self) {
        let Unit {
            state,
            undo,
            savepoint,
        } = self;

        for entry in undo.into_iter().rev() {
            match entry {
                Undo::User(id, Some(user)) => {
                    state.users.insert(id, user);
                }
                Undo::User(id, None) => {
                    if let Some(user) = state.users.remove(&id) {
                        state.emails.remove(&user.email);
                    }
                }
                Undo::Withdrawal(id, Some(withdrawal)) => {
                    state.withdrawals.insert(id, withdrawal);
                }
                Undo::Withdrawal(id, None) => {
                    state.withdrawals.remove(&id);
                }
                Undo::TotalReward(day, Some(total)) => {
                    state.total_rewards.insert(day, total);
                }
                Undo::TotalReward(day, None) => {
                    state.total_rewards.remove(&day);
                }
                Undo::Dedupe(source, key) => {
                    if let Some(keys) = state.dedupe.get_mut(&source) {
                        keys.remove(&key);
                    }
                }
            }
        }

        state.incomes.truncate(savepoint.incomes);
        state.configs.truncate(savepoint.configs);
        state.reward_rates.truncate(savepoint.reward_rates);
        state.next_user_id = savepoint.next_user_id;
        state.next_income_id = savepoint.next_income_id;
        state.next_withdrawal_id = savepoint.next_withdrawal_id;
    }
}

/// In-process balance store.
///
/// Units run under one mutex and journal what they overwrite; a unit that
/// fails is rolled back before the lock is released, so readers never see a
/// partial write.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_point: Mutex<Option<FailPoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a fail point for the next unit that reaches it
    pub fn fail_at(&self, point: FailPoint) {
        if let Ok(mut armed) = self.fail_point.lock() {
            *armed = Some(point);
        }
    }

    pub fn insert_config(&self, config: SystemConfig) -> Result<()> {
        self.transact(|unit| {
            unit.state.configs.push(config);
            Ok(())
        })
    }

    pub fn insert_reward_rate(&self, rate: RewardRate) -> Result<()> {
        self.transact(|unit| {
            unit.state.reward_rates.push(rate);
            Ok(())
        })
    }

    fn check(&self, point: FailPoint) -> Result<()> {
        let mut armed = self
            .fail_point
            .lock()
            .map_err(|e| Error::Unknown(format!("Lock error: {}", e)))?;
        if *armed == Some(point) {
            *armed = None;
            return Err(Error::Unknown(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }

    fn read<T>(&self, query: impl FnOnce(&State) -> T) -> Result<T> {
        let state = self
            .state
            .lock()
            .map_err(|e| Error::Unknown(format!("Lock error: {}", e)))?;
        Ok(query(&state))
    }

    fn transact<T>(&self, work: impl FnOnce(&mut Unit<'_>) -> Result<T>) -> Result<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| Error::Unknown(format!("Lock error: {}", e)))?;
        let mut unit = Unit::begin(&mut *state);
        match work(&mut unit) {
            Ok(value) => Ok(value),
            Err(e) => {
                unit.rollback();
                Err(e)
            }
        }
    }

    /// Shared tail of both credit paths: referrer, income row, user balance.
    fn apply_credit(
        &self,
        unit: &mut Unit<'_>,
        source: IncomeSource,
        user_id: i64,
        amount: i64,
        offered_referer_amount: i64,
        now: DateTime<Utc>,
    ) -> Result<CreditReceipt> {
        let user = unit
            .user(user_id)
            .cloned()
            .ok_or_else(|| Error::InsufficientReferenceRow(format!("user {} not found", user_id)))?;
        if source == IncomeSource::Reward && !user.reward_due(now) {
            return Err(Error::RewardNotDue(user_id));
        }

        let referer_credited = match user.referer_id.and_then(|id| unit.user_mut(id)) {
            Some(referer) => {
                referer.balance += offered_referer_amount;
                referer.total_income_from_referees += offered_referer_amount;
                true
            }
            None => false,
        };
        let referer_amount = if referer_credited { offered_referer_amount } else { 0 };

        unit.state.next_income_id += 1;
        let income = Income {
            id: unit.state.next_income_id,
            user_id,
            referer_id: user.referer_id,
            source,
            amount,
            referer_amount,
            created_at: now,
        };
        unit.state.incomes.push(income.clone());

        self.check(FailPoint::AfterIncomeInsert)?;

        let row = unit
            .user_mut(user_id)
            .ok_or_else(|| Error::InsufficientReferenceRow(format!("user {} not found", user_id)))?;
        row.balance += amount;
        row.total_income += amount;
        row.referer_total_income += referer_amount;
        if source == IncomeSource::Reward {
            row.rewarded_at = Some(now);
        }

        Ok(CreditReceipt {
            income,
            user_address: user.address,
            referer_credited,
        })
    }
}

fn page<T: Clone>(items: impl Iterator<Item = T>, limit: i64, offset: i64) -> Vec<T> {
    items
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn create_user(&self, user: NewUser, now: DateTime<Utc>) -> Result<User> {
        self.transact(|unit| {
            if unit.state.emails.contains_key(&user.email) {
                return Err(Error::DuplicateEmail(user.email));
            }

            unit.state.next_user_id += 1;
            let created = User {
                id: unit.state.next_user_id,
                email: user.email,
                address: user.address,
                balance: 0,
                total_income: 0,
                total_income_from_referees: 0,
                referer_total_income: 0,
                referer_id: user.referer_id,
                reward_interval_secs: user.reward_interval_secs,
                rewarded_at: None,
                created_at: now,
            };
            unit.insert_user(created.clone());
            Ok(created)
        })
    }

    async fn get_user(&self, id: i64) -> Result<User> {
        self.read(|state| state.users.get(&id).cloned())?
            .ok_or_else(|| Error::NotFound(format!("user {}", id)))
    }

    async fn get_withdrawable_users(&self, min_balance: i64) -> Result<Vec<User>> {
        self.read(|state| {
            state
                .users
                .values()
                .filter(|u| u.balance > 0 && u.balance >= min_balance)
                .cloned()
                .collect()
        })
    }

    async fn get_latest_config(&self) -> Result<Option<SystemConfig>> {
        self.read(|state| state.configs.iter().max_by_key(|c| c.created_at).cloned())
    }

    async fn get_reward_rates(&self, band: RateBand) -> Result<Vec<RewardRate>> {
        self.read(|state| {
            state
                .reward_rates
                .iter()
                .filter(|r| r.band == band)
                .cloned()
                .collect()
        })
    }

    async fn get_total_reward(&self, day: NaiveDate) -> Result<TotalRewardDay> {
        self.read(|state| TotalRewardDay {
            day,
            total: state.total_rewards.get(&day).copied().unwrap_or(0),
        })
    }

    async fn create_reward_income(&self, credit: RewardCredit) -> Result<CreditReceipt> {
        self.transact(|unit| {
            let receipt = self.apply_credit(
                unit,
                IncomeSource::Reward,
                credit.user_id,
                credit.amount,
                credit.referer_amount,
                credit.now,
            )?;
            unit.add_total_reward(day_of(credit.now), receipt.disbursed());
            Ok(receipt)
        })
    }

    async fn create_external_income(&self, credit: ExternalCredit) -> Result<CreditReceipt> {
        if !credit.source.is_partner() {
            return Err(Error::InvalidSource(credit.source.to_string()));
        }

        self.transact(|unit| {
            if !unit.insert_dedupe(credit.source, (credit.external_key.clone(), credit.user_id)) {
                return Err(Error::Duplicate {
                    income_source: credit.source,
                    external_key: credit.external_key.clone(),
                    user_id: credit.user_id,
                });
            }

            self.check(FailPoint::AfterDedupeInsert)?;

            self.apply_credit(
                unit,
                credit.source,
                credit.user_id,
                credit.amount,
                credit.referer_amount,
                credit.now,
            )
        })
    }

    async fn list_incomes(
        &self,
        user_id: i64,
        source: Option<IncomeSource>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Income>> {
        self.read(|state| {
            let matching = state
                .incomes
                .iter()
                .rev()
                .filter(|i| i.user_id == user_id && source.map_or(true, |s| i.source == s))
                .cloned();
            page(matching, limit, offset)
        })
    }

    async fn count_incomes(&self, user_id: i64, source: Option<IncomeSource>) -> Result<i64> {
        self.read(|state| {
            state
                .incomes
                .iter()
                .filter(|i| i.user_id == user_id && source.map_or(true, |s| i.source == s))
                .count() as i64
        })
    }

    async fn create_withdrawal(&self, withdrawal: NewWithdrawal) -> Result<Withdrawal> {
        self.transact(|unit| {
            let user = unit
                .user_mut(withdrawal.user_id)
                .filter(|u| u.balance >= withdrawal.amount)
                .ok_or(Error::InsufficientBalance {
                    user_id: withdrawal.user_id,
                    requested: withdrawal.amount,
                })?;
            user.balance -= withdrawal.amount;

            self.check(FailPoint::AfterWithdrawalDebit)?;

            unit.state.next_withdrawal_id += 1;
            let created = Withdrawal {
                id: unit.state.next_withdrawal_id,
                user_id: withdrawal.user_id,
                address: withdrawal.address,
                amount: withdrawal.amount,
                status: WithdrawalStatus::Pending,
                transaction_id: None,
                created_at: withdrawal.now,
                updated_at: withdrawal.now,
            };
            unit.insert_withdrawal(created.clone());
            Ok(created)
        })
    }

    async fn advance_withdrawals(
        &self,
        ids: &[i64],
        from: WithdrawalStatus,
        to: WithdrawalStatus,
        transaction_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let ids: BTreeSet<i64> = ids.iter().copied().collect();

        self.transact(|unit| {
            let mut affected = 0u64;
            for id in &ids {
                if let Some(w) = unit.withdrawal_mut(*id).filter(|w| w.status == from) {
                    w.status = to;
                    if let Some(tx) = transaction_id {
                        w.transaction_id = Some(tx.to_string());
                    }
                    w.updated_at = now;
                    affected += 1;
                }
            }

            if affected != ids.len() as u64 {
                return Err(Error::BatchProgressMismatch {
                    expected: ids.len() as u64,
                    affected,
                });
            }
            Ok(affected)
        })
    }

    async fn get_referees(&self, referer_id: i64, limit: i64, offset: i64) -> Result<Vec<User>> {
        self.read(|state| {
            let matching = state
                .users
                .values()
                .filter(|u| u.referer_id == Some(referer_id))
                .cloned();
            page(matching, limit, offset)
        })
    }

    async fn list_withdrawals(&self, user_id: i64, limit: i64, offset: i64) -> Result<Vec<Withdrawal>> {
        self.read(|state| {
            let matching = state
                .withdrawals
                .values()
                .rev()
                .filter(|w| w.user_id == user_id)
                .cloned();
            page(matching, limit, offset)
        })
    }

    async fn list_withdrawals_by_status(&self, status: WithdrawalStatus, limit: i64) -> Result<Vec<Withdrawal>> {
        self.read(|state| {
            let matching = state.withdrawals.values().filter(|w| w.status == status).cloned();
            page(matching, limit, 0)
        })
    }

    async fn health_check(&self) -> Result<()> {
        self.read(|_| ())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

use {
    crate::{schema, traits::LedgerStore},
    async_trait::async_trait,
    chrono::{DateTime, NaiveDate, Utc},
    faucet_common::{
        config::PostgresConfig,
        types::{
            CreditReceipt, ExternalCredit, Income, IncomeSource, NewUser, NewWithdrawal, RateBand,
            RewardCredit, RewardRate, SystemConfig, TotalRewardDay, User, Withdrawal,
            WithdrawalStatus,
        },
        utils::day_of,
        Error, Result,
    },
    sqlx::{
        postgres::{PgPool, PgPoolOptions, PgRow},
        Postgres, Row, Transaction,
    },
    tracing::{debug, info},
};

const USER_COLUMNS: &str = "id, email, address, balance, total_income, total_income_from_referees, \
     referer_total_income, referer_id, reward_interval_secs, rewarded_at, created_at";

const WITHDRAWAL_COLUMNS: &str =
    "id, user_id, address, amount, status, transaction_id, created_at, updated_at";

fn db_err(context: &'static str) -> impl Fn(sqlx::Error) -> Error {
    move |e| Error::Unknown(format!("{}: {}", context, e))
}

/// Credit fields shared by both income paths.
struct CreditRequest<'a> {
    source: IncomeSource,
    user_id: i64,
    amount: i64,
    referer_amount: i64,
    now: DateTime<Utc>,
    external_key: Option<&'a str>,
}

/// PostgreSQL ledger store
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn new(config: PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_string)
            .await
            .map_err(db_err("connect"))?;

        let store = Self { pool };

        if config.create_tables {
            store.initialize_schema().await?;
        }

        info!("Connected to PostgreSQL ledger store");
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<()> {
        for statement in schema::TABLES {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err("create schema"))?;
        }

        for partner in IncomeSource::PARTNERS {
            if let Some(ddl) = schema::callback_table(partner) {
                sqlx::query(&ddl)
                    .execute(&self.pool)
                    .await
                    .map_err(db_err("create callback table"))?;
            }
        }

        debug!("Ledger schema initialized");
        Ok(())
    }

    /// Lock the user and referrer rows, credit the referrer if its row exists,
    /// record the income, then credit the user. Runs inside the caller's
    /// transaction.
    async fn credit(
        tx: &mut Transaction<'_, Postgres>,
        request: CreditRequest<'_>,
    ) -> Result<CreditReceipt> {
        let missing_user =
            || Error::InsufficientReferenceRow(format!("user {} not found", request.user_id));

        let referer_id: Option<i64> =
            sqlx::query_scalar::<_, Option<i64>>("SELECT referer_id FROM users WHERE id = $1")
                .bind(request.user_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(db_err("get referer"))?
                .ok_or_else(missing_user)?;

        // one statement, ascending ids: credits that reference each other
        // lock in the same order
        let ids: Vec<i64> = std::iter::once(request.user_id).chain(referer_id).collect();
        let rows = sqlx::query(&format!(
            "SELECT {} FROM users WHERE id = ANY($1) ORDER BY id FOR UPDATE",
            USER_COLUMNS
        ))
        .bind(&ids)
        .fetch_all(&mut **tx)
        .await
        .map_err(db_err("lock users"))?;

        let mut user = None;
        let mut referer_locked = false;
        for row in &rows {
            let locked = Self::user_from_row(row).map_err(db_err("decode user"))?;
            if Some(locked.id) == referer_id {
                referer_locked = true;
            }
            if locked.id == request.user_id {
                user = Some(locked);
            }
        }
        let user = user.ok_or_else(missing_user)?;

        if request.source == IncomeSource::Reward && !user.reward_due(request.now) {
            return Err(Error::RewardNotDue(request.user_id));
        }

        let referer_credited = match referer_id.filter(|_| referer_locked) {
            Some(referer_id) => {
                let result = sqlx::query(
                    r#"
                    UPDATE users SET
                        balance = balance + $1,
                        total_income_from_referees = total_income_from_referees + $1
                    WHERE id = $2
                    "#,
                )
                .bind(request.referer_amount)
                .bind(referer_id)
                .execute(&mut **tx)
                .await
                .map_err(db_err("credit referer"))?;
                result.rows_affected() == 1
            }
            None => false,
        };
        let referer_amount = if referer_credited { request.referer_amount } else { 0 };

        let income_row = sqlx::query(
            r#"
            INSERT INTO incomes (user_id, referer_id, source, amount, referer_amount, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(request.user_id)
        .bind(referer_id)
        .bind(request.source.as_str())
        .bind(request.amount)
        .bind(referer_amount)
        .bind(request.now)
        .fetch_one(&mut **tx)
        .await
        .map_err(db_err("insert income"))?;
        let income_id: i64 = income_row.try_get("id").map_err(db_err("decode income"))?;

        let rewarded_at = (request.source == IncomeSource::Reward).then_some(request.now);
        let updated = sqlx::query(
            r#"
            UPDATE users SET
                balance = balance + $1,
                total_income = total_income + $1,
                referer_total_income = referer_total_income + $2,
                rewarded_at = COALESCE($3, rewarded_at)
            WHERE id = $4
            "#,
        )
        .bind(request.amount)
        .bind(referer_amount)
        .bind(rewarded_at)
        .bind(request.user_id)
        .execute(&mut **tx)
        .await
        .map_err(db_err("credit user"))?;

        if updated.rows_affected() != 1 {
            return Err(Error::InsufficientReferenceRow(format!(
                "user {} vanished during credit",
                request.user_id
            )));
        }

        if let Some(key) = request.external_key {
            debug!(
                "Credited {} {} to user {} for {}",
                request.source, request.amount, request.user_id, key
            );
        }

        Ok(CreditReceipt {
            income: Income {
                id: income_id,
                user_id: request.user_id,
                referer_id,
                source: request.source,
                amount: request.amount,
                referer_amount,
                created_at: request.now,
            },
            user_address: user.address,
            referer_credited,
        })
    }

    fn user_from_row(row: &PgRow) -> std::result::Result<User, sqlx::Error> {
        Ok(User {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            address: row.try_get("address")?,
            balance: row.try_get("balance")?,
            total_income: row.try_get("total_income")?,
            total_income_from_referees: row.try_get("total_income_from_referees")?,
            referer_total_income: row.try_get("referer_total_income")?,
            referer_id: row.try_get("referer_id")?,
            reward_interval_secs: row.try_get("reward_interval_secs")?,
            rewarded_at: row.try_get("rewarded_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn income_from_row(row: &PgRow) -> Result<Income> {
        let source: String = row.try_get("source").map_err(db_err("decode income"))?;
        Ok(Income {
            id: row.try_get("id").map_err(db_err("decode income"))?,
            user_id: row.try_get("user_id").map_err(db_err("decode income"))?,
            referer_id: row.try_get("referer_id").map_err(db_err("decode income"))?,
            source: source.parse()?,
            amount: row.try_get("amount").map_err(db_err("decode income"))?,
            referer_amount: row.try_get("referer_amount").map_err(db_err("decode income"))?,
            created_at: row.try_get("created_at").map_err(db_err("decode income"))?,
        })
    }

    fn withdrawal_from_row(row: &PgRow) -> Result<Withdrawal> {
        let status: i16 = row.try_get("status").map_err(db_err("decode withdrawal"))?;
        Ok(Withdrawal {
            id: row.try_get("id").map_err(db_err("decode withdrawal"))?,
            user_id: row.try_get("user_id").map_err(db_err("decode withdrawal"))?,
            address: row.try_get("address").map_err(db_err("decode withdrawal"))?,
            amount: row.try_get("amount").map_err(db_err("decode withdrawal"))?,
            status: WithdrawalStatus::from_code(status)?,
            transaction_id: row.try_get("transaction_id").map_err(db_err("decode withdrawal"))?,
            created_at: row.try_get("created_at").map_err(db_err("decode withdrawal"))?,
            updated_at: row.try_get("updated_at").map_err(db_err("decode withdrawal"))?,
        })
    }
}

#[async_trait]
impl LedgerStore for PostgresStore {
    async fn create_user(&self, user: NewUser, now: DateTime<Utc>) -> Result<User> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO users (email, address, referer_id, reward_interval_secs, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(&user.email)
        .bind(&user.address)
        .bind(user.referer_id)
        .bind(user.reward_interval_secs)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_unique_violation() => Error::DuplicateEmail(user.email.clone()),
            _ => db_err("create user")(e),
        })?;

        Self::user_from_row(&row).map_err(db_err("decode user"))
    }

    async fn get_user(&self, id: i64) -> Result<User> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("get user"))?
            .ok_or_else(|| Error::NotFound(format!("user {}", id)))?;

        Self::user_from_row(&row).map_err(db_err("decode user"))
    }

    async fn get_referees(&self, referer_id: i64, limit: i64, offset: i64) -> Result<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM users WHERE referer_id = $1 ORDER BY id LIMIT $2 OFFSET $3",
            USER_COLUMNS
        ))
        .bind(referer_id)
        .bind(limit.max(0))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("get referees"))?;

        rows.iter()
            .map(|row| Self::user_from_row(row).map_err(db_err("decode user")))
            .collect()
    }

    async fn get_withdrawable_users(&self, min_balance: i64) -> Result<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM users WHERE balance > 0 AND balance >= $1 ORDER BY id",
            USER_COLUMNS
        ))
        .bind(min_balance)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("get withdrawable users"))?;

        rows.iter()
            .map(|row| Self::user_from_row(row).map_err(db_err("decode user")))
            .collect()
    }

    async fn get_latest_config(&self) -> Result<Option<SystemConfig>> {
        let row = sqlx::query(
            r#"
            SELECT total_reward_threshold, referer_reward_rate, created_at
            FROM configs
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("get config"))?;

        row.map(|row| -> std::result::Result<SystemConfig, sqlx::Error> {
            Ok(SystemConfig {
                total_reward_threshold: row.try_get("total_reward_threshold")?,
                referer_reward_rate: row.try_get("referer_reward_rate")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .transpose()
        .map_err(db_err("decode config"))
    }

    async fn get_reward_rates(&self, band: RateBand) -> Result<Vec<RewardRate>> {
        let rows = sqlx::query("SELECT min, max, weight FROM reward_rate_bands WHERE band = $1 ORDER BY id")
            .bind(band.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("get reward rates"))?;

        rows.iter()
            .map(|row| -> std::result::Result<RewardRate, sqlx::Error> {
                Ok(RewardRate {
                    band,
                    min: row.try_get("min")?,
                    max: row.try_get("max")?,
                    weight: row.try_get("weight")?,
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err("decode reward rate"))
    }

    async fn get_total_reward(&self, day: NaiveDate) -> Result<TotalRewardDay> {
        let total: Option<i64> = sqlx::query_scalar("SELECT total FROM total_reward_days WHERE day = $1")
            .bind(day)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("get total reward"))?;

        Ok(TotalRewardDay {
            day,
            total: total.unwrap_or(0),
        })
    }

    async fn create_reward_income(&self, credit: RewardCredit) -> Result<CreditReceipt> {
        let mut tx = self.pool.begin().await.map_err(db_err("begin"))?;

        let receipt = Self::credit(
            &mut tx,
            CreditRequest {
                source: IncomeSource::Reward,
                user_id: credit.user_id,
                amount: credit.amount,
                referer_amount: credit.referer_amount,
                now: credit.now,
                external_key: None,
            },
        )
        .await?;

        sqlx::query(
            r#"
            INSERT INTO total_reward_days (day, total)
            VALUES ($1, $2)
            ON CONFLICT (day) DO UPDATE SET total = total_reward_days.total + EXCLUDED.total
            "#,
        )
        .bind(day_of(credit.now))
        .bind(receipt.disbursed())
        .execute(&mut *tx)
        .await
        .map_err(db_err("update total reward"))?;

        tx.commit().await.map_err(db_err("commit"))?;
        Ok(receipt)
    }

    async fn create_external_income(&self, credit: ExternalCredit) -> Result<CreditReceipt> {
        let table = credit
            .source
            .dedupe_table()
            .ok_or_else(|| Error::InvalidSource(credit.source.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(db_err("begin"))?;

        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO {} (external_key, user_id, amount, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (external_key, user_id) DO NOTHING
            "#,
            table
        ))
        .bind(&credit.external_key)
        .bind(credit.user_id)
        .bind(credit.amount)
        .bind(credit.now)
        .execute(&mut *tx)
        .await
        .map_err(db_err("insert callback"))?;

        // dropping the transaction rolls it back
        if inserted.rows_affected() == 0 {
            return Err(Error::Duplicate {
                income_source: credit.source,
                external_key: credit.external_key,
                user_id: credit.user_id,
            });
        }

        let receipt = Self::credit(
            &mut tx,
            CreditRequest {
                source: credit.source,
                user_id: credit.user_id,
                amount: credit.amount,
                referer_amount: credit.referer_amount,
                now: credit.now,
                external_key: Some(credit.external_key.as_str()),
            },
        )
        .await?;

        tx.commit().await.map_err(db_err("commit"))?;
        Ok(receipt)
    }

    async fn list_incomes(
        &self,
        user_id: i64,
        source: Option<IncomeSource>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Income>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, referer_id, source, amount, referer_amount, created_at
            FROM incomes
            WHERE user_id = $1 AND ($2::TEXT IS NULL OR source = $2)
            ORDER BY id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id)
        .bind(source.map(|s| s.as_str()))
        .bind(limit.max(0))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list incomes"))?;

        rows.iter().map(Self::income_from_row).collect()
    }

    async fn count_incomes(&self, user_id: i64, source: Option<IncomeSource>) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM incomes WHERE user_id = $1 AND ($2::TEXT IS NULL OR source = $2)")
            .bind(user_id)
            .bind(source.map(|s| s.as_str()))
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("count incomes"))
    }

    async fn create_withdrawal(&self, withdrawal: NewWithdrawal) -> Result<Withdrawal> {
        let mut tx = self.pool.begin().await.map_err(db_err("begin"))?;

        let debited = sqlx::query("UPDATE users SET balance = balance - $1 WHERE id = $2 AND balance >= $1")
            .bind(withdrawal.amount)
            .bind(withdrawal.user_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err("debit user"))?;

        if debited.rows_affected() != 1 {
            return Err(Error::InsufficientBalance {
                user_id: withdrawal.user_id,
                requested: withdrawal.amount,
            });
        }

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO withdrawals (user_id, address, amount, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING {}
            "#,
            WITHDRAWAL_COLUMNS
        ))
        .bind(withdrawal.user_id)
        .bind(&withdrawal.address)
        .bind(withdrawal.amount)
        .bind(WithdrawalStatus::Pending.code())
        .bind(withdrawal.now)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err("insert withdrawal"))?;

        let created = Self::withdrawal_from_row(&row)?;
        tx.commit().await.map_err(db_err("commit"))?;
        Ok(created)
    }

    async fn advance_withdrawals(
        &self,
        ids: &[i64],
        from: WithdrawalStatus,
        to: WithdrawalStatus,
        transaction_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(db_err("begin"))?;

        let result = sqlx::query(
            r#"
            UPDATE withdrawals SET
                status = $1,
                transaction_id = COALESCE($2, transaction_id),
                updated_at = $3
            WHERE id = ANY($4) AND status = $5
            "#,
        )
        .bind(to.code())
        .bind(transaction_id)
        .bind(now)
        .bind(&ids)
        .bind(from.code())
        .execute(&mut *tx)
        .await
        .map_err(db_err("advance withdrawals"))?;

        let expected = ids.len() as u64;
        if result.rows_affected() != expected {
            return Err(Error::BatchProgressMismatch {
                expected,
                affected: result.rows_affected(),
            });
        }

        tx.commit().await.map_err(db_err("commit"))?;
        Ok(expected)
    }

    async fn list_withdrawals(&self, user_id: i64, limit: i64, offset: i64) -> Result<Vec<Withdrawal>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM withdrawals WHERE user_id = $1 ORDER BY id DESC LIMIT $2 OFFSET $3",
            WITHDRAWAL_COLUMNS
        ))
        .bind(user_id)
        .bind(limit.max(0))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list withdrawals"))?;

        rows.iter().map(Self::withdrawal_from_row).collect()
    }

    async fn list_withdrawals_by_status(&self, status: WithdrawalStatus, limit: i64) -> Result<Vec<Withdrawal>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM withdrawals WHERE status = $1 ORDER BY id LIMIT $2",
            WITHDRAWAL_COLUMNS
        ))
        .bind(status.code())
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list withdrawals by status"))?;

        rows.iter().map(Self::withdrawal_from_row).collect()
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err("health check"))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

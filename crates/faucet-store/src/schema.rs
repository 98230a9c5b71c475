use faucet_common::types::IncomeSource;

/// DDL for the ledger tables, one statement each.
///
/// `users.referer_id` is a weak reference: a missing referrer row means the
/// referrer is simply not credited.
pub(crate) const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        address TEXT NOT NULL,
        balance BIGINT NOT NULL DEFAULT 0 CHECK (balance >= 0),
        total_income BIGINT NOT NULL DEFAULT 0,
        total_income_from_referees BIGINT NOT NULL DEFAULT 0,
        referer_total_income BIGINT NOT NULL DEFAULT 0,
        referer_id BIGINT,
        reward_interval_secs BIGINT NOT NULL DEFAULT 300,
        rewarded_at TIMESTAMP WITH TIME ZONE,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    "CREATE INDEX IF NOT EXISTS users_referer_idx ON users(referer_id, id)",
    r#"
    CREATE TABLE IF NOT EXISTS incomes (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL REFERENCES users(id),
        referer_id BIGINT,
        source TEXT NOT NULL,
        amount BIGINT NOT NULL,
        referer_amount BIGINT NOT NULL DEFAULT 0,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    "CREATE INDEX IF NOT EXISTS incomes_user_source_idx ON incomes(user_id, source, id)",
    r#"
    CREATE TABLE IF NOT EXISTS total_reward_days (
        day DATE PRIMARY KEY,
        total BIGINT NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reward_rate_bands (
        id BIGSERIAL PRIMARY KEY,
        band TEXT NOT NULL,
        min BIGINT NOT NULL,
        max BIGINT NOT NULL,
        weight BIGINT NOT NULL CHECK (weight >= 0),
        CHECK (min <= max)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS configs (
        id BIGSERIAL PRIMARY KEY,
        total_reward_threshold BIGINT NOT NULL,
        referer_reward_rate DOUBLE PRECISION NOT NULL,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS withdrawals (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL REFERENCES users(id),
        address TEXT NOT NULL,
        amount BIGINT NOT NULL CHECK (amount > 0),
        status SMALLINT NOT NULL DEFAULT 0,
        transaction_id TEXT,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    "CREATE INDEX IF NOT EXISTS withdrawals_status_idx ON withdrawals(status, id)",
    "CREATE INDEX IF NOT EXISTS withdrawals_user_idx ON withdrawals(user_id, id)",
];

/// Dedupe relation of one partner. The unique key is what makes a replayed
/// callback a no-op.
pub(crate) fn callback_table(source: IncomeSource) -> Option<String> {
    source.dedupe_table().map(|table| {
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id BIGSERIAL PRIMARY KEY,
                external_key TEXT NOT NULL,
                user_id BIGINT NOT NULL,
                amount BIGINT NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (external_key, user_id)
            )
            "#
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_tables_carry_unique_key() {
        for partner in IncomeSource::PARTNERS {
            let ddl = callback_table(partner).unwrap();
            assert!(ddl.contains(partner.dedupe_table().unwrap()));
            assert!(ddl.contains("UNIQUE (external_key, user_id)"));
        }
        assert!(callback_table(IncomeSource::Reward).is_none());
    }

    #[test]
    fn test_statements_are_single() {
        for statement in TABLES {
            assert!(!statement.trim().trim_end_matches(';').contains(';'));
        }
    }
}

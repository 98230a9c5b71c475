use {
    chrono::{DateTime, Duration, Utc},
    serde::{Deserialize, Serialize},
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub email: String,
    /// Payout address, also shown in delta-income broadcasts
    pub address: String,
    pub balance: i64,
    pub total_income: i64,
    pub total_income_from_referees: i64,
    /// Total share this user has generated for its referrer
    pub referer_total_income: i64,
    #[serde(skip_serializing)]
    pub referer_id: Option<i64>,
    pub reward_interval_secs: i64,
    pub rewarded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn has_referer(&self) -> bool {
        self.referer_id.is_some()
    }

    /// A scheduled draw is due once `reward_interval_secs` have passed since the last one.
    pub fn reward_due(&self, now: DateTime<Utc>) -> bool {
        match self.rewarded_at {
            Some(last) => last + Duration::seconds(self.reward_interval_secs) <= now,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub address: String,
    pub referer_id: Option<i64>,
    pub reward_interval_secs: i64,
}

impl NewUser {
    /// Matches the `users.reward_interval_secs` column default
    pub const DEFAULT_REWARD_INTERVAL_SECS: i64 = 300;
}

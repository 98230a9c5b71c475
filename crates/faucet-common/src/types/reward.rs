use {
    chrono::{DateTime, NaiveDate, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// Which weighted band set the scheduled draw picks from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RateBand {
    /// Today's pool is still at or under the threshold
    LowPool,
    /// Today's pool has exceeded the threshold
    HighPool,
}

impl RateBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateBand::LowPool => "low-pool",
            RateBand::HighPool => "high-pool",
        }
    }

    pub fn for_pool(pool_total: i64, threshold: i64) -> Self {
        if pool_total > threshold {
            RateBand::HighPool
        } else {
            RateBand::LowPool
        }
    }
}

impl fmt::Display for RateBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewardRate {
    pub band: RateBand,
    pub min: i64,
    pub max: i64,
    pub weight: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemConfig {
    pub total_reward_threshold: i64,
    /// Fraction of every credit paid to the referrer
    pub referer_reward_rate: f64,
    pub created_at: DateTime<Utc>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            total_reward_threshold: 0,
            referer_reward_rate: 0.0,
            created_at: DateTime::<Utc>::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TotalRewardDay {
    pub day: NaiveDate,
    pub total: i64,
}

impl TotalRewardDay {
    pub fn empty(day: NaiveDate) -> Self {
        Self { day, total: 0 }
    }

    pub fn is_same_day(&self, now: DateTime<Utc>) -> bool {
        self.day == now.date_naive()
    }
}

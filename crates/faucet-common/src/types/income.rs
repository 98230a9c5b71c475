use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::{fmt, str::FromStr},
};

use crate::errors::Error;

/// Where an income came from: the scheduled draw or one of the offerwall partners.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum IncomeSource {
    Reward,
    Offerwow,
    Superrewards,
    Ptcwall,
    Clixwall,
    Personaly,
    Kiwiwall,
    Trialpay,
    AdscendMedia,
    AdgateMedia,
    Offertoro,
}

impl IncomeSource {
    pub const PARTNERS: [IncomeSource; 10] = [
        IncomeSource::Offerwow,
        IncomeSource::Superrewards,
        IncomeSource::Ptcwall,
        IncomeSource::Clixwall,
        IncomeSource::Personaly,
        IncomeSource::Kiwiwall,
        IncomeSource::Trialpay,
        IncomeSource::AdscendMedia,
        IncomeSource::AdgateMedia,
        IncomeSource::Offertoro,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IncomeSource::Reward => "reward",
            IncomeSource::Offerwow => "offerwow",
            IncomeSource::Superrewards => "superrewards",
            IncomeSource::Ptcwall => "ptcwall",
            IncomeSource::Clixwall => "clixwall",
            IncomeSource::Personaly => "personaly",
            IncomeSource::Kiwiwall => "kiwiwall",
            IncomeSource::Trialpay => "trialpay",
            IncomeSource::AdscendMedia => "adscend_media",
            IncomeSource::AdgateMedia => "adgate_media",
            IncomeSource::Offertoro => "offertoro",
        }
    }

    pub fn is_partner(&self) -> bool {
        !matches!(self, IncomeSource::Reward)
    }

    /// Name of the partner's dedupe relation. The scheduled draw has none.
    pub fn dedupe_table(&self) -> Option<&'static str> {
        match self {
            IncomeSource::Reward => None,
            IncomeSource::Offerwow => Some("offerwow_callbacks"),
            IncomeSource::Superrewards => Some("superrewards_callbacks"),
            IncomeSource::Ptcwall => Some("ptcwall_callbacks"),
            IncomeSource::Clixwall => Some("clixwall_callbacks"),
            IncomeSource::Personaly => Some("personaly_callbacks"),
            IncomeSource::Kiwiwall => Some("kiwiwall_callbacks"),
            IncomeSource::Trialpay => Some("trialpay_callbacks"),
            IncomeSource::AdscendMedia => Some("adscend_media_callbacks"),
            IncomeSource::AdgateMedia => Some("adgate_media_callbacks"),
            IncomeSource::Offertoro => Some("offertoro_callbacks"),
        }
    }
}

impl fmt::Display for IncomeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncomeSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        std::iter::once(IncomeSource::Reward)
            .chain(IncomeSource::PARTNERS)
            .find(|source| source.as_str() == s)
            .ok_or_else(|| Error::InvalidSource(s.to_string()))
    }
}

/// Immutable record of one successful credit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Income {
    pub id: i64,
    pub user_id: i64,
    pub referer_id: Option<i64>,
    pub source: IncomeSource,
    pub amount: i64,
    /// Referrer share actually applied; zero when no referrer was credited
    pub referer_amount: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RewardCredit {
    pub user_id: i64,
    pub amount: i64,
    /// Share offered to the referrer, applied only if the user has one
    pub referer_amount: i64,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ExternalCredit {
    pub source: IncomeSource,
    pub external_key: String,
    pub user_id: i64,
    pub amount: i64,
    pub referer_amount: i64,
    pub now: DateTime<Utc>,
}

/// Outcome of a committed credit unit.
#[derive(Debug, Clone)]
pub struct CreditReceipt {
    pub income: Income,
    pub user_address: String,
    pub referer_credited: bool,
}

impl CreditReceipt {
    /// Amount actually disbursed by this credit, user plus applied referrer share.
    pub fn disbursed(&self) -> i64 {
        self.income.amount + self.income.referer_amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_parsing() {
        assert_eq!("adscend_media".parse::<IncomeSource>().unwrap(), IncomeSource::AdscendMedia);
        assert_eq!("reward".parse::<IncomeSource>().unwrap(), IncomeSource::Reward);
        assert!(matches!("paypal".parse::<IncomeSource>(), Err(Error::InvalidSource(_))));
    }

    #[test]
    fn test_every_partner_has_a_distinct_dedupe_table() {
        let mut tables: Vec<_> = IncomeSource::PARTNERS
            .iter()
            .map(|p| p.dedupe_table().unwrap())
            .collect();
        tables.sort();
        tables.dedup();
        assert_eq!(tables.len(), IncomeSource::PARTNERS.len());
        assert!(IncomeSource::Reward.dedupe_table().is_none());
        assert!(!IncomeSource::Reward.is_partner());
    }

    #[test]
    fn test_source_serializes_like_display() {
        let json = serde_json::to_string(&IncomeSource::AdgateMedia).unwrap();
        assert_eq!(json, "\"adgate_media\"");
    }
}

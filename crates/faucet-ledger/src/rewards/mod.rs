//! Weighted reward selection for the scheduled draw

mod selector;

pub use selector::choose_reward;

use {
    faucet_common::{types::RewardRate, Result},
    rand::rngs::OsRng,
};

/// Draw from the operating system's CSPRNG, the source used for real payouts
pub fn draw_reward(bands: &[RewardRate]) -> Result<i64> {
    choose_reward(bands, &mut OsRng)
}

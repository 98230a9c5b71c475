use {
    faucet_common::{types::RewardRate, Error, Result},
    rand::{CryptoRng, Rng, RngCore},
};

/// Draw a reward amount from weighted bands.
///
/// A band is picked with probability proportional to its weight, then an
/// amount is drawn uniformly from `[min, max)`. A band with `min == max`
/// always yields `min`. Bands with a non-positive weight are never picked.
pub fn choose_reward<R>(bands: &[RewardRate], rng: &mut R) -> Result<i64>
where
    R: RngCore + CryptoRng,
{
    let total = bands
        .iter()
        .try_fold(0u64, |sum, b| sum.checked_add(b.weight.max(0) as u64))
        .ok_or_else(|| Error::Config("reward band weights overflow".to_string()))?;
    if total == 0 {
        return Err(Error::Config(format!(
            "reward bands have no positive weight ({} bands)",
            bands.len()
        )));
    }

    let mut remaining = rng.gen_range(0..total) as i128;
    let band = bands
        .iter()
        .filter(|b| b.weight > 0)
        .find(|b| {
            remaining -= b.weight as i128;
            remaining < 0
        })
        .ok_or_else(|| Error::Config("reward band walk ran past the last band".to_string()))?;

    if band.max <= band.min {
        return Ok(band.min);
    }
    Ok(rng.gen_range(band.min..band.max))
}

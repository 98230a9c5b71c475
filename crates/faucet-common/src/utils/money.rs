/// Referrer share of `amount`, rounded down. The rate is clamped to `[0, 1]`.
pub fn referer_share(amount: i64, rate: f64) -> i64 {
    if amount <= 0 || !rate.is_finite() {
        return 0;
    }
    let rate = rate.clamp(0.0, 1.0);
    (amount as f64 * rate).floor() as i64
}

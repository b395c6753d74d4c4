use rand::Rng;
use std::time::Duration;

/// Generates a jittered poll frequency within `base..=base + spread`.
///
/// Randomizing the gap between polls keeps a fleet of instances from
/// retrying negotiation in lockstep.
pub fn jittered_frequency(base: Duration, spread: Duration) -> Duration {
    if spread.is_zero() {
        return base;
    }
    let mut rng = rand::thread_rng();
    let extra_ms = rng.gen_range(0..=spread.as_millis() as u64);
    base + Duration::from_millis(extra_ms)
}

use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::ThreadRng;
use rand::{thread_rng, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::time::sleep;

use crate::config::PolitenessSection;

/// Produces the pause taken before a page action. Implementations decide how
/// far a base delay is perturbed.
pub trait DelaySource {
    fn delay_for(&self, base: Duration) -> Duration;
}

#[derive(Debug)]
enum JitterRng {
    Thread,
    Seeded(Mutex<ChaCha8Rng>),
}

/// `max(base + uniform(-jitter, +jitter), floor)`.
#[derive(Debug)]
pub struct HumanDelay {
    jitter_ms: u64,
    floor: Duration,
    rng: JitterRng,
}

impl HumanDelay {
    pub fn new(config: &PolitenessSection) -> Self {
        Self {
            jitter_ms: config.jitter_ms,
            floor: Duration::from_millis(config.floor_ms),
            rng: JitterRng::Thread,
        }
    }

    pub fn seeded(config: &PolitenessSection, seed: u64) -> Self {
        Self {
            jitter_ms: config.jitter_ms,
            floor: Duration::from_millis(config.floor_ms),
            rng: JitterRng::Seeded(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    fn offset_ms(&self) -> i64 {
        if self.jitter_ms == 0 {
            return 0;
        }
        let bound = self.jitter_ms as i64;
        match &self.rng {
            JitterRng::Thread => {
                let mut rng: ThreadRng = thread_rng();
                rng.gen_range(-bound..=bound)
            }
            JitterRng::Seeded(rng) => {
                let mut guard = rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                guard.gen_range(-bound..=bound)
            }
        }
    }
}

impl DelaySource for HumanDelay {
    fn delay_for(&self, base: Duration) -> Duration {
        let base_ms = base.as_millis() as i64;
        let perturbed = (base_ms + self.offset_ms()).max(0) as u64;
        Duration::from_millis(perturbed).max(self.floor)
    }
}

/// Always the same pause, regardless of base.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedDelay(pub Duration);

impl DelaySource for FixedDelay {
    fn delay_for(&self, _base: Duration) -> Duration {
        self.0
    }
}

pub async fn pause(delays: &dyn DelaySource, base: Duration) -> Duration {
    let delay = delays.delay_for(base);
    if !delay.is_zero() {
        sleep(delay).await;
    }
    delay
}

#[cfg(test)]
mod tests {
    use super::*;

    fn politeness(jitter_ms: u64, floor_ms: u64) -> PolitenessSection {
        PolitenessSection {
            base_delay_ms: 2000,
            jitter_ms,
            floor_ms,
            scroll_settle_ms: 0,
            page_settle_ms: 0,
        }
    }

    #[test]
    fn delays_stay_within_jitter_bounds() {
        let delays = HumanDelay::seeded(&politeness(1000, 100), 7);
        for _ in 0..500 {
            let delay = delays.delay_for(Duration::from_millis(2000));
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(3000));
        }
    }

    #[test]
    fn small_base_is_floored_above_zero() {
        let delays = HumanDelay::seeded(&politeness(1000, 100), 11);
        for _ in 0..200 {
            let delay = delays.delay_for(Duration::from_millis(0));
            assert!(delay >= Duration::from_millis(100));
        }
    }

    #[test]
    fn seeded_sources_repeat() {
        let config = politeness(1000, 100);
        let left = HumanDelay::seeded(&config, 42);
        let right = HumanDelay::seeded(&config, 42);
        let a: Vec<_> = (0..20)
            .map(|_| left.delay_for(Duration::from_secs(1)))
            .collect();
        let b: Vec<_> = (0..20)
            .map(|_| right.delay_for(Duration::from_secs(1)))
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn fixed_delay_ignores_base() {
        let fixed = FixedDelay(Duration::from_millis(5));
        assert_eq!(fixed.delay_for(Duration::from_secs(9)), Duration::from_millis(5));
    }
}

//! Busy-poll protection.
//!
//! A program that reads or writes the same property in a tight loop gets
//! nothing new between ticks. Accesses closer together than the window
//! extend a per-name burst; once the burst reaches the threshold, every
//! further access in it forces a full round trip.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;
use crate::state::lock;

/// Outcome of one access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    /// The caller must wait a tick. `advise` is set the first time a name
    /// trips the limit.
    Throttle { advise: bool },
}

#[derive(Debug)]
struct Burst {
    last: Instant,
    count: u32,
    advised: bool,
}

#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    threshold: u32,
    bursts: Mutex<HashMap<String, Burst>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            window: config.window(),
            threshold: config.threshold,
            bursts: Mutex::new(HashMap::new()),
        }
    }

    /// Record an access to `name` at `now`.
    pub fn hit(&self, name: &str, now: Instant) -> Verdict {
        let mut bursts = lock(&self.bursts);
        let Some(burst) = bursts.get_mut(name) else {
            bursts.insert(
                name.to_string(),
                Burst {
                    last: now,
                    count: 0,
                    advised: false,
                },
            );
            return Verdict::Pass;
        };

        if now.saturating_duration_since(burst.last) >= self.window {
            burst.last = now;
            burst.count = 0;
            return Verdict::Pass;
        }

        let previous = burst.count;
        burst.last = now;
        burst.count = burst.count.saturating_add(1);
        if previous < self.threshold {
            return Verdict::Pass;
        }
        let advise = !burst.advised;
        burst.advised = true;
        Verdict::Throttle { advise }
    }

    pub fn clear(&self) {
        lock(&self.bursts).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            window_us: 3000,
            threshold: 3,
        })
    }

    #[test]
    fn spaced_access_never_throttles() {
        let rl = limiter();
        let mut now = Instant::now();
        for _ in 0..50 {
            assert_eq!(rl.hit("A.a.X", now), Verdict::Pass);
            now += Duration::from_millis(5);
        }
    }

    #[test]
    fn burst_trips_threshold_and_advises_once() {
        let rl = limiter();
        let now = Instant::now();
        let verdicts: Vec<Verdict> = (0..7).map(|_| rl.hit("A.a.X", now)).collect();
        assert_eq!(&verdicts[..4], &[Verdict::Pass; 4]);
        assert_eq!(verdicts[4], Verdict::Throttle { advise: true });
        assert_eq!(verdicts[5], Verdict::Throttle { advise: false });
        assert_eq!(verdicts[6], Verdict::Throttle { advise: false });
    }

    #[test]
    fn names_are_independent() {
        let rl = limiter();
        let now = Instant::now();
        for _ in 0..10 {
            rl.hit("A.a.X", now);
        }
        assert_eq!(rl.hit("A.a.Y", now), Verdict::Pass);
    }

    #[test]
    fn pause_resets_burst() {
        let rl = limiter();
        let now = Instant::now();
        for _ in 0..10 {
            rl.hit("A.a.X", now);
        }
        assert_eq!(rl.hit("A.a.X", now + Duration::from_millis(10)), Verdict::Pass);
    }
}

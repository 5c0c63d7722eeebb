//! Politeness throttle.
//!
//! Keeps a randomised minimum gap between consecutive requests. The gap is
//! re-drawn from `[min_delay, max_delay]` every time an attempt finishes.

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::sleep;

const MIN_DELAY_FLOOR: Duration = Duration::from_millis(1);

/// Randomised inter-request delay.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_delay: Duration,
    max_delay: Duration,
    last_tick: Option<Instant>,
    next_delay: Duration,
}

impl RateLimiter {
    /// Build a limiter, correcting bounds that make no sense: `min_delay` is
    /// at least one millisecond and `max_delay` strictly above it.
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        let (min_delay, max_delay) = normalize_bounds(min_delay, max_delay);
        Self {
            min_delay,
            max_delay,
            last_tick: None,
            next_delay: Duration::ZERO,
        }
    }

    pub fn bounds(&self) -> (Duration, Duration) {
        (self.min_delay, self.max_delay)
    }

    pub fn next_delay(&self) -> Duration {
        self.next_delay
    }

    /// Time left before the next request may go out.
    pub fn remaining(&self) -> Duration {
        match self.last_tick {
            Some(tick) => self.next_delay.saturating_sub(tick.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Sleep until the current window has elapsed. Returns the time slept.
    pub async fn wait(&self) -> Duration {
        let remaining = self.remaining();
        if remaining > Duration::ZERO {
            log::debug!("throttling for {}ms", remaining.as_millis());
            sleep(remaining).await;
        }
        remaining
    }

    /// Mark an attempt as finished and draw the next window.
    pub fn advance(&mut self) {
        self.last_tick = Some(Instant::now());
        let min = millis(self.min_delay);
        let max = millis(self.max_delay);
        self.next_delay = Duration::from_millis(rand::thread_rng().gen_range(min..=max));
    }
}

/// Clamp delay bounds to `0 < min < max`, at millisecond resolution.
pub fn normalize_bounds(min_delay: Duration, max_delay: Duration) -> (Duration, Duration) {
    let floor = millis(MIN_DELAY_FLOOR);
    let min_ms = millis(min_delay).clamp(floor, u64::MAX - 1);
    let max_ms = millis(max_delay);
    let max_ms = if max_ms > min_ms {
        max_ms
    } else {
        min_ms.saturating_add(1)
    };
    (Duration::from_millis(min_ms), Duration::from_millis(max_ms))
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrects_invalid_bounds() {
        let limiter = RateLimiter::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(
            limiter.bounds(),
            (Duration::from_millis(1), Duration::from_millis(2))
        );

        let limiter = RateLimiter::new(Duration::from_millis(500), Duration::from_millis(200));
        assert_eq!(
            limiter.bounds(),
            (Duration::from_millis(500), Duration::from_millis(501))
        );
    }

    #[test]
    fn huge_bounds_saturate_instead_of_wrapping() {
        let (min, max) = normalize_bounds(Duration::MAX, Duration::MAX);
        assert_eq!(min, Duration::from_millis(u64::MAX - 1));
        assert_eq!(max, Duration::from_millis(u64::MAX));
        assert!(max > min);
    }

    #[test]
    fn first_request_is_not_delayed() {
        let limiter = RateLimiter::new(Duration::from_millis(300), Duration::from_millis(400));
        assert_eq!(limiter.remaining(), Duration::ZERO);
    }

    #[test]
    fn next_delay_stays_within_bounds() {
        let mut limiter = RateLimiter::new(Duration::from_millis(10), Duration::from_millis(15));
        for _ in 0..500 {
            limiter.advance();
            let delay = limiter.next_delay();
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(15));
        }
    }

    #[tokio::test]
    async fn consecutive_requests_are_spaced() {
        let mut limiter = RateLimiter::new(Duration::from_millis(30), Duration::from_millis(40));
        limiter.wait().await;
        let finished = Instant::now();
        limiter.advance();
        let drawn = limiter.next_delay();

        limiter.wait().await;
        assert!(finished.elapsed() >= drawn);
        assert_eq!(limiter.remaining(), Duration::ZERO);
    }
}

//! Reconnect delays: exponential from 500 ms, capped at 30 s, with ±10%
//! jitter. A connection that stayed up for five minutes resets the attempt
//! counter.

use std::time::{Duration, Instant};

use rand::Rng;

pub const BASE_DELAY: Duration = Duration::from_millis(500);
pub const MAX_DELAY: Duration = Duration::from_secs(30);
pub const RESET_AFTER: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Default)]
pub struct Backoff {
    attempt: u32,
    connected_at: Option<Instant>,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn on_connected(&mut self, now: Instant) {
        self.connected_at = Some(now);
    }

    pub fn on_disconnected(&mut self, now: Instant) {
        if let Some(since) = self.connected_at.take() {
            if now.duration_since(since) >= RESET_AFTER {
                self.attempt = 0;
            }
        }
    }

    /// Delay before the next attempt, advancing the counter.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let delay_ms = base_delay_ms(self.attempt);
        let jitter_window = (delay_ms / 10).max(1);
        let offset = rand::thread_rng().gen_range(0..=jitter_window * 2);
        Duration::from_millis(delay_ms.saturating_sub(jitter_window).saturating_add(offset))
    }
}

/// Un-jittered delay of the given (1-based) attempt.
fn base_delay_ms(attempt: u32) -> u64 {
    let pow = 2u64.saturating_pow(attempt.saturating_sub(1).min(16));
    (BASE_DELAY.as_millis() as u64)
        .saturating_mul(pow)
        .min(MAX_DELAY.as_millis() as u64)
}

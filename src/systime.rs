//! The host's monotonic clock, counted in milliseconds since startup.
use morel::{Clock, Ticks};
use std::{sync::OnceLock, time::{Duration, Instant}};

static EPOCH: OnceLock<Instant> = OnceLock::new();

pub const CLOCK: Clock = Clock::millis(now).named("monotonic");

/// Milliseconds since the clock was first read.
pub fn now() -> Ticks {
    let elapsed = EPOCH.get_or_init(Instant::now).elapsed();
    Ticks::try_from(elapsed.as_millis()).unwrap_or(Ticks::MAX)
}

/// How long to wait until `deadline`.
pub fn until(deadline: Ticks) -> Duration {
    Duration::from_millis(deadline.saturating_sub(now()))
}

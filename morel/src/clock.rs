//! [`Clock`]s provide a mechanism for tracking the current time.
//!
//! See the documentation for the [`Clock`] type for more details.
use core::time::Duration;

/// A hardware clock definition.
///
/// A `Clock` consists of a function that returns the hardware clock's current
/// timestamp in [`Ticks`] (`now()`), and a [`Duration`] that defines the amount
/// of time represented by a single tick of the clock.
///
/// A `Clock` must be provided when [constructing a
/// `Scheduler`](crate::Scheduler::new). The scheduler samples it once at the
/// start of every dispatch pass and again after every task invocation, so that
/// the time a task spends running is accounted for when rescheduling the tasks
/// after it. Task rates and delays are always given in milliseconds; the
/// scheduler converts them to ticks of its clock.
///
/// # Implementing `now()`
///
/// Constructing a [new `Clock` definition](Self::new) takes a function, called
/// `now()`, that returns the current hardware timestamp in a 64-bit number of
/// _ticks_. The period of time represented by a tick is indicated by the
/// `tick_duration` argument to [`Clock::new`]. Most control loops count whole
/// milliseconds; [`Clock::millis`] is a shorthand for that case.
///
/// ## Monotonicity
///
/// Implementations of `now()` MUST ensure that timestamps returned by
/// `now()` are [monotonically non-decreasing][monotonic]. This means that
/// a call to `now()` MUST NOT ever return a value less than the value returned
/// by a previous call to `now()`.
///
/// Timestamps are also expected never to overflow. The scheduler performs no
/// wrap-around handling: if the hardware counter is narrower than 64 bits, the
/// `now()` implementation is responsible for extending it, for example by
/// counting overflows in the timer interrupt.
///
/// ## Examples
///
/// A clock driven by a periodic 1ms timer interrupt that increments a
/// counter:
///
/// ```rust
/// use morel::Clock;
/// use core::sync::atomic::{AtomicU64, Ordering};
///
/// // A counter that is incremented by the hardware timer interrupt.
/// static SYSTICKS: AtomicU64 = AtomicU64::new(0);
///
/// // The hardware timer interrupt handler.
/// fn systick_handler() {
///     SYSTICKS.fetch_add(1, Ordering::Relaxed);
/// }
///
/// fn now() -> u64 {
///     SYSTICKS.load(Ordering::Relaxed)
/// }
///
/// let clock = Clock::millis(now).named("systick");
/// # systick_handler();
/// assert_eq!(clock.now(), 1);
/// ```
///
/// [monotonic]: https://en.wikipedia.org/wiki/Monotonic_function
#[derive(Clone, Debug)]
pub struct Clock {
    now: fn() -> Ticks,
    tick_duration: Duration,
    name: &'static str,
}

/// [`Clock`] ticks are always counted by a 64-bit unsigned integer.
pub type Ticks = u64;

const NANOS_PER_MILLI: u128 = 1_000_000;

impl Clock {
    /// Returns a new [`Clock`] with the provided tick [`Duration`] and `now()`
    /// function.
    ///
    /// See the [type-level documentation for `Clock`](Self#implementing-now)
    /// for details on implementing the `now()` function.
    ///
    /// # Panics
    ///
    /// If `tick_duration` is zero.
    #[must_use]
    pub const fn new(tick_duration: Duration, now: fn() -> Ticks) -> Self {
        assert!(!tick_duration.is_zero(), "a clock tick must have a duration");
        Self {
            now,
            tick_duration,
            name: "<unnamed mystery clock>",
        }
    }

    /// Returns a new [`Clock`] whose ticks are one millisecond long.
    #[must_use]
    pub const fn millis(now: fn() -> Ticks) -> Self {
        Self::new(Duration::from_millis(1), now)
    }

    /// Add an arbitrary user-defined name to this `Clock`.
    ///
    /// This is generally used to describe the hardware time source used by the
    /// `now()` function for this `Clock`.
    #[must_use]
    pub const fn named(self, name: &'static str) -> Self {
        Self { name, ..self }
    }

    /// Returns the current `now` timestamp, in [`Ticks`] of this clock's base
    /// tick duration.
    #[must_use]
    #[inline]
    pub fn now(&self) -> Ticks {
        (self.now)()
    }

    /// Returns the [`Duration`] of one tick of this clock.
    #[must_use]
    pub fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    /// Returns this `Clock`'s name, if it was given one using the [`Clock::named`]
    /// method.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Converts a number of milliseconds into ticks of this clock.
    ///
    /// Partial ticks are rounded up, so that a nonzero number of milliseconds
    /// is never converted into zero ticks. Durations too long to be counted in
    /// [`Ticks`] saturate.
    #[must_use]
    pub fn ms_to_ticks(&self, ms: u32) -> Ticks {
        let nanos = ms as u128 * NANOS_PER_MILLI;
        let ticks = nanos.div_ceil(self.tick_duration.as_nanos());
        Ticks::try_from(ticks).unwrap_or(Ticks::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zero() -> Ticks {
        0
    }

    #[test]
    fn millis_is_identity() {
        let clock = Clock::millis(zero);
        assert_eq!(clock.ms_to_ticks(0), 0);
        assert_eq!(clock.ms_to_ticks(1), 1);
        assert_eq!(clock.ms_to_ticks(250), 250);
        assert_eq!(clock.ms_to_ticks(u32::MAX), u32::MAX as Ticks);
    }

    #[test]
    fn coarse_ticks_round_up() {
        let clock = Clock::new(Duration::from_millis(10), zero);
        assert_eq!(clock.ms_to_ticks(0), 0);
        assert_eq!(clock.ms_to_ticks(1), 1);
        assert_eq!(clock.ms_to_ticks(10), 1);
        assert_eq!(clock.ms_to_ticks(11), 2);
    }

    #[test]
    fn fine_ticks() {
        let clock = Clock::new(Duration::from_micros(100), zero);
        assert_eq!(clock.ms_to_ticks(3), 30);
    }

    #[test]
    fn named() {
        let clock = Clock::millis(zero);
        assert_eq!(clock.name(), "<unnamed mystery clock>");
        let clock = clock.named("rtc");
        assert_eq!(clock.name(), "rtc");
        assert_eq!(clock.tick_duration(), Duration::from_millis(1));
    }

    #[test]
    #[should_panic]
    fn zero_tick_duration() {
        let _ = Clock::new(Duration::ZERO, zero);
    }
}

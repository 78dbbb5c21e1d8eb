#[cfg(not(test))]
macro_rules! test_trace {
    ($($args:tt)+) => {};
}

#[cfg(test)]
macro_rules! test_trace {
    ($($args:tt)+) => {
        tracing::trace!(
            location = %core::panic::Location::caller(),
            $($args)+
        );
    };
}

/// `maitake-sync`'s mutexes can't be constructed in a `const fn` when they are
/// backed by `loom`.
macro_rules! loom_const_fn {
    (
        $(#[$meta:meta])*
        $vis:vis fn $name:ident($($arg:ident: $T:ty),*) -> $Ret:ty $body:block
    ) => {
        $(#[$meta])*
        #[cfg(not(loom))]
        $vis const fn $name($($arg: $T),*) -> $Ret $body

        $(#[$meta])*
        #[cfg(loom)]
        $vis fn $name($($arg: $T),*) -> $Ret $body
    }
}

#[cfg(test)]
pub(crate) mod test {
    use crate::clock::{Clock, Ticks};
    use core::cell::Cell;

    std::thread_local! {
        static NOW: Cell<Ticks> = const { Cell::new(0) };
    }

    /// A manually advanced millisecond clock.
    ///
    /// Every test runs on its own thread, so the thread-local counter gives
    /// each test an independent timeline.
    pub(crate) fn clock() -> Clock {
        Clock::millis(now).named("test-clock")
    }

    pub(crate) fn now() -> Ticks {
        NOW.with(Cell::get)
    }

    pub(crate) fn set(ticks: Ticks) {
        NOW.with(|now| {
            assert!(ticks >= now.get(), "test clock must not go backwards");
            now.set(ticks)
        })
    }

    pub(crate) fn advance(ticks: Ticks) {
        NOW.with(|now| now.set(now.get() + ticks))
    }

    #[cfg(not(loom))]
    pub(crate) fn trace_init() -> impl Drop {
        use tracing_subscriber::{prelude::*, EnvFilter};
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trace"));
        tracing_subscriber::fmt()
            .with_test_writer()
            .without_time()
            .with_env_filter(filter)
            .with_thread_names(true)
            .set_default()
    }

    #[cfg(loom)]
    pub(crate) fn trace_init() -> impl Drop {
        use tracing_subscriber::{prelude::*, EnvFilter};
        let filter = EnvFilter::from_env("LOOM_LOG");
        tracing_subscriber::fmt()
            .with_test_writer()
            .without_time()
            .with_env_filter(filter)
            .set_default()
    }
}

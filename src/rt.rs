//! The host control loop.
use crate::systime;
use morel::{Pass, Scheduler};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering::*},
        OnceLock,
    },
    thread,
};

pub type HostScheduler = Scheduler<'static, ()>;

/// Drives a [`Scheduler`] from a single thread, sleeping until the next
/// deadline between dispatch passes.
pub struct Core {
    scheduler: &'static HostScheduler,

    /// Set to `false` if the loop should shut down.
    running: AtomicBool,
}

/// The thread running [`Core::run`].
static DRIVER: OnceLock<thread::Thread> = OnceLock::new();

/// Wakes the control loop early, so that it picks up newly scheduled work.
///
/// This is the scheduler's wake source.
pub fn wake() {
    if let Some(driver) = DRIVER.get() {
        driver.unpark();
    }
}

impl Core {
    pub const fn new(scheduler: &'static HostScheduler) -> Self {
        Self {
            scheduler,
            running: AtomicBool::new(false),
        }
    }

    /// Runs one dispatch pass.
    pub fn tick(&self) -> Pass {
        let pass = self.scheduler.dispatch();
        if pass.invoked > 0 {
            tracing::trace!(
                pass.invoked,
                pass.finished,
                pass.freed,
                pass.delayed,
                pass.dropped_periods,
                next_wake = ?pass.next_wake,
            );
        }
        pass
    }

    /// Returns `true` if the loop is currently running.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Acquire)
    }

    /// Stops the loop if it is currently running.
    ///
    /// # Returns
    ///
    /// - `true` if the loop was running and is now stopping
    /// - `false` if the loop was not running.
    pub fn stop(&self) -> bool {
        let was_running = self
            .running
            .compare_exchange(true, false, AcqRel, Acquire)
            .is_ok();
        tracing::info!(was_running, "stopping");
        wake();
        was_running
    }

    /// Runs the loop on the current thread until [`Core::stop`] is called.
    pub fn run(&self) {
        let _span = tracing::info_span!("core", clock = self.scheduler.clock().name()).entered();
        if DRIVER.set(thread::current()).is_err() {
            tracing::error!("the control loop was already started on another thread!");
            return;
        }

        if self
            .running
            .compare_exchange(false, true, AcqRel, Acquire)
            .is_err()
        {
            tracing::error!("the control loop is already running!");
            return;
        }

        tracing::info!("started control loop");

        while self.is_running() {
            let pass = self.tick();
            if !self.is_running() {
                break;
            }

            match pass.next_wake {
                Some(deadline) => thread::park_timeout(systime::until(deadline)),
                None => thread::park(),
            }
        }

        tracing::info!("stop signal received, shutting down");
    }
}

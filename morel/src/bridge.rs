//! Delivering the results of asynchronous operations to coroutines.
//!
//! A [`Coroutine`](crate::Coroutine) that starts a long-running operation
//! (a DMA transfer, a flash erase, a request to a peripheral) hands the
//! operation a [`Setter`], then suspends with
//! [`Step::Wait`](crate::Step::Wait). When the operation completes, it calls
//! [`Setter::set`] with its result, which stores the result in the
//! coroutine's [`Semaphore`] and registers the coroutine with the scheduler so
//! that it resumes on the next dispatch pass.
//!
//! Completions may be delivered from a different execution context than the
//! one driving the scheduler, such as an interrupt handler or another thread.
//! The semaphore and the scheduler's slot table are each guarded by a
//! blocking mutex for this reason.
use crate::{
    scheduler::{CapacityExceeded, Mode, Schedule},
    task::TaskRef,
};
use core::fmt;
use maitake_sync::blocking::Mutex;


/// A ready flag paired with a delivered value.
///
/// This is not a counting semaphore: it holds at most one value, and setting
/// it again before the value is consumed overwrites the previous one.
pub struct Semaphore<V> {
    signal: Mutex<Signal<V>>,
}

struct Signal<V> {
    ready: bool,
    value: Option<V>,
}

/// A callback that delivers a value to a [`Coroutine`](crate::Coroutine) and
/// re-arms it.
///
/// `Setter`s are created by
/// [`Coroutine::setter`](crate::Coroutine::setter). They are `Copy`, and may be
/// sent to other threads as long as the scheduler's context type is `Send`.
pub struct Setter<'a, T, V> {
    semaphore: &'a Semaphore<V>,
    task: TaskRef<'a, T>,
    scheduler: &'a dyn Schedule<'a, T>,
    context: T,
}

// === impl Semaphore ===

impl<V> Semaphore<V> {
    loom_const_fn! {
        /// Returns a new `Semaphore` that is not ready and holds no value.
        #[must_use]
        pub fn new() -> Self {
            Self {
                signal: Mutex::new(Signal {
                    ready: false,
                    value: None,
                }),
            }
        }
    }

    /// Stores `value` and raises the ready flag.
    ///
    /// Any value that has not yet been consumed is dropped.
    pub fn set(&self, value: V) {
        self.signal.with_lock(|signal| {
            signal.ready = true;
            signal.value = Some(value);
        });
    }

    /// Returns `true` if a value was delivered since the coroutine last
    /// suspended or resumed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.signal.with_lock(|signal| signal.ready)
    }

    /// Lowers the ready flag, leaving any delivered value in place.
    pub(crate) fn clear(&self) {
        self.signal.with_lock(|signal| signal.ready = false);
    }

    /// Lowers the ready flag and moves the delivered value out.
    pub(crate) fn take(&self) -> Option<V> {
        self.signal.with_lock(|signal| {
            signal.ready = false;
            signal.value.take()
        })
    }
}

impl<V> Default for Semaphore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: fmt::Debug> fmt::Debug for Semaphore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Semaphore");
        let locked = self
            .signal
            .try_with_lock(|signal| {
                s.field("ready", &signal.ready).field("value", &signal.value);
            })
            .is_none();
        if locked {
            s.field("signal", &format_args!("<locked>"));
        }
        s.finish()
    }
}

// === impl Setter ===

impl<'a, T: Copy, V> Setter<'a, T, V> {
    pub(crate) fn new(
        semaphore: &'a Semaphore<V>,
        task: TaskRef<'a, T>,
        scheduler: &'a dyn Schedule<'a, T>,
        context: T,
    ) -> Self {
        Self {
            semaphore,
            task,
            scheduler,
            context,
        }
    }

    /// Delivers `value` to the coroutine, and registers it in
    /// [`Mode::MultiSchedule`] with no delay so that it resumes on the next
    /// dispatch pass.
    ///
    /// # Returns
    ///
    /// - [`Ok`]`(slot)` with the index of the slot the coroutine was bound to.
    /// - [`Err`]`(`[`CapacityExceeded`]`)` if the scheduler had no free slot.
    ///   The value is still stored, but the coroutine will not resume unless
    ///   something else schedules it.
    pub fn set(&self, value: V) -> Result<usize, CapacityExceeded> {
        self.semaphore.set(value);
        self.scheduler
            .schedule(self.task, Mode::MultiSchedule, 0, self.context)
            .inspect_err(|error| {
                tracing::warn!(
                    task = self.task.name(),
                    %error,
                    "value delivered, but the waiting task could not be re-armed"
                );
            })
    }

    /// Returns the handle of the task this setter re-arms.
    #[must_use]
    pub fn task(&self) -> TaskRef<'a, T> {
        self.task
    }
}

impl<T: Copy, V> Clone for Setter<'_, T, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Copy, V> Copy for Setter<'_, T, V> {}

impl<T: fmt::Debug, V> fmt::Debug for Setter<'_, T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setter")
            .field("task", &self.task)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

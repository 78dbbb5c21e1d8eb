//! Task identity.
//!
//! A [`Task`] is anything the [`Scheduler`](crate::Scheduler) can invoke.
//! Tasks are registered by reference, and the reference doubles as the task's
//! handle: two [`TaskRef`]s are the same task if and only if they point at the
//! same task instance. Each task instance therefore has exactly one live
//! logical instance as far as the scheduler is concerned; registering it again
//! (in any mode but [`MultiSchedule`]) rebinds the slot it already holds.
//!
//! [`MultiSchedule`]: crate::Mode::MultiSchedule
use crate::scheduler::Context;
use core::{fmt, ptr};

/// A unit of work that can be dispatched by a [`Scheduler`](crate::Scheduler).
///
/// Every invocation receives a [`Context`] carrying the opaque context value
/// the task was registered with, and giving access to the scheduler so that
/// the task may register or cancel tasks (including itself).
///
/// # Return value
///
/// [`run`](Self::run) returns the number of milliseconds after which the task
/// wants to be invoked again, or `0` if it is finished for now. What
/// "finished" means depends on the [`Mode`](crate::Mode) the task is bound
/// with: a [`Once`](crate::Mode::Once) or
/// [`MultiSchedule`](crate::Mode::MultiSchedule) slot is freed, while a
/// [`FixedRate`](crate::Mode::FixedRate) slot is kept and the task runs again
/// at its next period.
///
/// # Identity
///
/// Tasks are identified by address. A task type must not be zero-sized, since
/// distinct zero-sized values may live at the same address.
///
/// Tasks are `Sync` because a completion delivered from another execution
/// context (see [`Setter`](crate::Setter)) may hold a reference to them.
pub trait Task<T = ()>: Sync {
    /// Runs one slice of this task.
    fn run(&self, cx: &mut Context<'_, '_, T>) -> u32;

    /// A human-readable name for this task, used in diagnostics.
    fn name(&self) -> &'static str {
        core::any::type_name::<Self>()
    }
}

/// The handle of a registered [`Task`].
pub struct TaskRef<'t, T = ()>(&'t dyn Task<T>);

// === impl TaskRef ===

impl<'t, T> TaskRef<'t, T> {
    /// Returns a handle for `task`.
    #[must_use]
    #[inline]
    pub const fn new(task: &'t dyn Task<T>) -> Self {
        Self(task)
    }

    /// Returns the name of the referenced task.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    #[inline]
    pub(crate) fn run(&self, cx: &mut Context<'_, 't, T>) -> u32 {
        self.0.run(cx)
    }

    #[inline]
    fn addr(&self) -> *const () {
        ptr::from_ref(self.0).cast()
    }
}

impl<'t, T, K: Task<T> + 't> From<&'t K> for TaskRef<'t, T> {
    #[inline]
    fn from(task: &'t K) -> Self {
        Self(task)
    }
}

impl<T> Clone for TaskRef<'_, T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TaskRef<'_, T> {}

impl<T> PartialEq for TaskRef<'_, T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl<T> Eq for TaskRef<'_, T> {}

impl<T> fmt::Debug for TaskRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRef")
            .field("task", &format_args!("{}", self.name()))
            .field("addr", &self.addr())
            .finish()
    }
}

impl<T> fmt::Pointer for TaskRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.addr(), f)
    }
}

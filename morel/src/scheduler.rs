//! The dispatch loop.
//!
//! A [`Scheduler`] owns a fixed-capacity table of slots, each of which binds
//! one [`TaskOrder`] to the absolute time at which the task should next run.
//! Tasks are registered with [`Scheduler::schedule`], removed with
//! [`Scheduler::cancel`], and invoked by [`Scheduler::dispatch`], which an
//! external driver calls repeatedly from its control loop.
//!
//! # Driving the scheduler
//!
//! Since `morel` is intended for bare-metal platforms without an operating
//! system, nothing runs unless the driver asks it to. Each call to
//! [`dispatch`](Scheduler::dispatch) performs one *pass* over the slot table,
//! invoking every task that is due, and returns a [`Pass`] describing what
//! happened. [`Pass::next_wake`] is the earliest time at which any task is
//! due; the driver must call `dispatch` again no later than that, and may put
//! the processor to sleep until then. Calling `dispatch` earlier, or on every
//! tick of a periodic timer, is always safe: tasks that are not yet due are
//! left alone.
//!
//! When a task is registered, the scheduler calls its *wake source* (see
//! [`Scheduler::with_wake_source`]), so that a driver sleeping until an old
//! `next_wake` can be woken early to pick up new work.
//!
//! # Modes
//!
//! The [`Mode`] a task is registered with decides what happens to its slot
//! when it returns `0`:
//!
//! - [`Mode::Once`] and [`Mode::MultiSchedule`] slots are freed.
//! - [`Mode::FixedRate`] slots are kept, and the task runs again at the start
//!   of its next period. If the task (or the rest of the control loop) was so
//!   slow that one or more whole periods have already elapsed, those periods
//!   are **dropped**: the period anchor skips forward to the first period
//!   boundary in the future, and the missed runs never happen. The number of
//!   dropped periods is reported in [`Pass::dropped_periods`].
//!
//! A task returning a nonzero delay keeps its slot regardless of its mode,
//! and is invoked again once the delay has elapsed.
//!
//! # Concurrency
//!
//! Dispatch is cooperative: a task runs until it returns, and nothing
//! interrupts it on behalf of another task. `dispatch` is not reentrant and
//! must always be driven from the same execution context.
//!
//! The slot table itself is guarded by a [blocking mutex], which is never held
//! while a task runs or while the wake source is notified. Tasks can
//! therefore register and cancel tasks from within [`Task::run`], and
//! [`schedule`](Scheduler::schedule) may be called from other execution
//! contexts (such as an interrupt handler delivering a completion through a
//! [`Setter`](crate::Setter)). When completions are delivered from interrupt
//! handlers, enable the `critical-section` feature so that the table is
//! guarded by a critical section rather than a spinlock.
//!
//! [`Task::run`]: crate::Task::run
//! [blocking mutex]: maitake_sync::blocking::Mutex
use crate::{
    clock::{Clock, Ticks},
    task::TaskRef,
};
use core::fmt;
use maitake_sync::blocking::Mutex;


/// The number of slots in a [`Scheduler`] unless otherwise specified.
pub const DEFAULT_CAPACITY: usize = 16;

/// A task scheduler with a fixed number of slots.
///
/// See the [module-level documentation](self) for details.
///
/// # Type Parameters
///
/// - `'t`: the lifetime of the registered [`Task`](crate::Task)s.
/// - `T`: the opaque context value passed to a task on every invocation.
/// - `N`: the number of slots. This is a hard bound: registering a task when
///   all slots are occupied fails with [`CapacityExceeded`].
pub struct Scheduler<'t, T = (), const N: usize = DEFAULT_CAPACITY> {
    clock: Clock,
    on_change: fn(),
    slots: Mutex<[Option<Entry<'t, T>>; N]>,
}

/// How a task's slot is reused.
///
/// See [the module-level documentation](self#modes) for details.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Mode {
    /// Run once. The slot is freed when the task returns `0`.
    ///
    /// Registering a task that is already bound rebinds its existing slot.
    Once,
    /// Run periodically, every `rate` milliseconds. The slot is never freed by
    /// the task finishing, only by cancelling it.
    ///
    /// Registering a task that is already bound rebinds its existing slot.
    FixedRate,
    /// Run once, in a freshly allocated slot, even if the task is already
    /// bound to another slot.
    MultiSchedule,
}

/// What to run, when, and with which context.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TaskOrder<'t, T = ()> {
    /// The task to run.
    pub task: TaskRef<'t, T>,
    /// The delay before the task's first invocation, in milliseconds. For
    /// [`Mode::FixedRate`] tasks, this is also the period.
    pub rate: u32,
    /// How the task's slot is reused.
    pub mode: Mode,
    /// The context value passed to the task on every invocation.
    pub context: T,
}

/// One bound slot of a [`Scheduler`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Entry<'t, T = ()> {
    order: TaskOrder<'t, T>,
    /// Start of the current period. Only meaningful for fixed-rate tasks.
    period_start: Ticks,
    next_run: Ticks,
}

/// Describes a single pass of [`Scheduler::dispatch`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct Pass {
    /// The time at which the earliest remaining task is due, or `None` if no
    /// tasks remain scheduled.
    ///
    /// This may already be in the past, if a task registered another task
    /// into a slot the pass had already visited.
    pub next_wake: Option<Ticks>,

    /// The number of task invocations during this pass.
    pub invoked: usize,

    /// The number of invocations that returned `0`.
    pub finished: usize,

    /// The number of slots freed because a [`Mode::Once`] or
    /// [`Mode::MultiSchedule`] task finished.
    pub freed: usize,

    /// The number of invocations that asked to be resumed after a delay.
    pub delayed: usize,

    /// The number of fixed-rate periods skipped because they had already
    /// elapsed by the time their task finished.
    pub dropped_periods: u64,
}

/// The scheduling operations available to tasks and completion callbacks.
///
/// This is implemented by [`Scheduler`], and is the interface through which a
/// [`Context`] or a [`Setter`](crate::Setter) reaches the scheduler without
/// knowing its capacity.
///
/// Implementations are `Sync`, since completions may be delivered from other
/// execution contexts.
pub trait Schedule<'t, T = ()>: Sync {
    /// Binds `task` to a slot. See [`Scheduler::schedule`].
    fn schedule(
        &self,
        task: TaskRef<'t, T>,
        mode: Mode,
        rate: u32,
        context: T,
    ) -> Result<usize, CapacityExceeded>;

    /// Frees the first slot bound to `task`. See [`Scheduler::cancel`].
    fn cancel(&self, task: TaskRef<'t, T>) -> Result<usize, NotFound>;
}

/// The context of a single task invocation.
///
/// A `Context` is passed to [`Task::run`](crate::Task::run) on every
/// invocation.
pub struct Context<'a, 't, T = ()> {
    scheduler: &'a dyn Schedule<'t, T>,
    order: TaskOrder<'t, T>,
    slot: usize,
    now: Ticks,
}

/// Error returned by [`Scheduler::schedule`] when every slot is occupied.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("all {capacity} scheduler slots are occupied")]
pub struct CapacityExceeded {
    capacity: usize,
}

/// Error returned by [`Scheduler::cancel`] when the task is not scheduled.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("task is not scheduled")]
pub struct NotFound(());

fn no_wake_source() {}

// === impl Scheduler ===

impl<'t, T, const N: usize> Scheduler<'t, T, N> {
    loom_const_fn! {
        /// Returns a new `Scheduler` with every slot empty, driven by the
        /// provided [`Clock`].
        #[must_use]
        pub fn new(clock: Clock) -> Self {
            Self::with_wake_source(clock, no_wake_source)
        }
    }

    loom_const_fn! {
        /// Returns a new `Scheduler` with every slot empty, driven by the
        /// provided [`Clock`], which calls `on_change` whenever a task is bound
        /// to a slot.
        ///
        /// `on_change` is called synchronously from [`Scheduler::schedule`],
        /// possibly from an interrupt handler. It must not block, and must not
        /// call back into the scheduler. Typically, it wakes the driver's
        /// control loop so that it calls [`Scheduler::dispatch`] again before
        /// the previously reported [`Pass::next_wake`].
        #[must_use]
        pub fn with_wake_source(clock: Clock, on_change: fn()) -> Self {
            Self {
                clock,
                on_change,
                slots: Mutex::new([const { None }; N]),
            }
        }
    }

    /// Returns the number of slots in this scheduler.
    #[must_use]
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Borrows the [`Clock`] driving this scheduler.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }
}

impl<'t, T: Copy + Send, const N: usize> Scheduler<'t, T, N> {
    /// Clears every slot.
    ///
    /// This may be called at any time, any number of times, but never from
    /// within a task.
    pub fn init(&self) {
        self.slots.with_lock(|slots| slots.fill(None));
        tracing::debug!(capacity = N, clock = self.clock.name(), "scheduler initialized");
    }

    /// Binds `task` to a slot.
    ///
    /// The task will first be invoked `rate` milliseconds from now. Unless
    /// `mode` is [`Mode::MultiSchedule`], a task that is already bound to a
    /// slot is *rebound*: its existing slot is overwritten with the new order
    /// and deadline, rather than a second slot being allocated. Otherwise, the
    /// task is bound to the first free slot.
    ///
    /// On success, the wake source is notified once the table is updated.
    ///
    /// # Returns
    ///
    /// - [`Ok`]`(slot)` with the index of the slot the task was bound to.
    /// - [`Err`]`(`[`CapacityExceeded`]`)` if the task needed a free slot and
    ///   there was none. No slot is modified.
    pub fn schedule(
        &self,
        task: TaskRef<'t, T>,
        mode: Mode,
        rate: u32,
        context: T,
    ) -> Result<usize, CapacityExceeded> {
        let now = self.clock.now();
        let next_run = now.saturating_add(self.clock.ms_to_ticks(rate));
        let entry = Entry {
            order: TaskOrder {
                task,
                rate,
                mode,
                context,
            },
            period_start: next_run,
            next_run,
        };

        let bound = self.slots.with_lock(|slots| {
            if mode != Mode::MultiSchedule {
                if let Some(slot) = slots.iter().position(|e| is_bound_to(e, task)) {
                    slots[slot] = Some(entry);
                    return Some((slot, true));
                }
            }

            let slot = slots.iter().position(Option::is_none)?;
            slots[slot] = Some(entry);
            Some((slot, false))
        });

        let Some((slot, rebound)) = bound else {
            tracing::warn!(
                task = task.name(),
                ?mode,
                rate,
                capacity = N,
                "cannot schedule task: no free slots"
            );
            return Err(CapacityExceeded { capacity: N });
        };

        tracing::debug!(
            slot,
            task = task.name(),
            ?mode,
            rate,
            next_run,
            rebound,
            "task scheduled"
        );
        (self.on_change)();
        Ok(slot)
    }

    /// Frees the first slot bound to `task`.
    ///
    /// Only one slot is freed, even if `task` was registered several times in
    /// [`Mode::MultiSchedule`]. Slots are searched in index order. To free
    /// every slot bound to a task, use [`Scheduler::cancel_all`].
    ///
    /// # Returns
    ///
    /// - [`Ok`]`(slot)` with the index of the freed slot.
    /// - [`Err`]`(`[`NotFound`]`)` if `task` was not bound to any slot.
    pub fn cancel(&self, task: TaskRef<'t, T>) -> Result<usize, NotFound> {
        let freed = self.slots.with_lock(|slots| {
            let slot = slots.iter().position(|e| is_bound_to(e, task))?;
            slots[slot] = None;
            Some(slot)
        });

        match freed {
            Some(slot) => {
                tracing::debug!(slot, task = task.name(), "task cancelled");
                Ok(slot)
            }
            None => {
                test_trace!(task = task.name(), "cancelled task was not scheduled");
                Err(NotFound(()))
            }
        }
    }

    /// Frees every slot bound to `task`, returning how many were freed.
    pub fn cancel_all(&self, task: TaskRef<'t, T>) -> usize {
        let freed = self.slots.with_lock(|slots| {
            let mut freed = 0;
            for entry in slots.iter_mut().filter(|e| is_bound_to(e, task)) {
                *entry = None;
                freed += 1;
            }
            freed
        });
        tracing::debug!(task = task.name(), freed, "cancelled all instances of task");
        freed
    }

    /// Performs one pass over the slot table, invoking every task that is due.
    ///
    /// Slots are visited in index order. The clock is sampled at the start of
    /// the pass, and again after every task invocation, so time spent running
    /// a task counts against the tasks after it. A task that registers a task
    /// into a slot the pass has not yet reached may see that task invoked
    /// during the same pass, if it is already due.
    ///
    /// Once a task returns, its result is applied to its slot:
    ///
    /// - a nonzero delay keeps the slot, and the task is due again after that
    ///   many milliseconds;
    /// - `0` frees [`Mode::Once`] and [`Mode::MultiSchedule`] slots, and
    ///   advances [`Mode::FixedRate`] slots to their next period, dropping any
    ///   periods that have already elapsed.
    ///
    /// If the task cancelled its own slot while it was running (or the slot
    /// was freed and reused by another task), the result is discarded. If the
    /// task rebound its own slot, the result is applied according to the new
    /// order's mode.
    ///
    /// # Returns
    ///
    /// A [`Pass`] describing what happened. [`Pass::next_wake`] is the
    /// earliest deadline among the slots still occupied after the pass, or
    /// `None` if every slot is free.
    pub fn dispatch(&self) -> Pass {
        let mut pass = Pass::default();
        let mut now = self.clock.now();

        for slot in 0..N {
            let due = self.slots.with_lock(|slots| match slots[slot] {
                Some(ref entry) if entry.next_run <= now => Some(entry.order),
                _ => None,
            });
            let Some(order) = due else {
                continue;
            };

            test_trace!(slot, task = order.task.name(), now, "invoking task");
            let mut cx = Context {
                scheduler: self,
                order,
                slot,
                now,
            };
            let delay = order.task.run(&mut cx);
            now = self.clock.now();
            pass.invoked += 1;

            self.slots.with_lock(|slots| {
                let entry = match slots[slot] {
                    Some(ref mut entry) if entry.order.task == order.task => entry,
                    _ => {
                        tracing::trace!(
                            slot,
                            task = order.task.name(),
                            delay,
                            "slot released while its task was running"
                        );
                        return;
                    }
                };

                if delay != 0 {
                    entry.next_run = now.saturating_add(self.clock.ms_to_ticks(delay));
                    pass.delayed += 1;
                    test_trace!(slot, delay, next_run = entry.next_run, "task delayed");
                    return;
                }

                pass.finished += 1;
                let mode = entry.order.mode;
                match mode {
                    Mode::FixedRate => {
                        let period = self.clock.ms_to_ticks(entry.order.rate);
                        let dropped = advance_period(entry, period, now);
                        if dropped > 0 {
                            tracing::debug!(
                                slot,
                                task = order.task.name(),
                                dropped,
                                now,
                                next_run = entry.next_run,
                                "fixed-rate task overran its period; dropping missed runs"
                            );
                        }
                        pass.dropped_periods += dropped;
                    }
                    Mode::Once | Mode::MultiSchedule => {
                        slots[slot] = None;
                        pass.freed += 1;
                    }
                }
            });
        }

        pass.next_wake = self.next_wake();
        if pass.invoked > 0 {
            tracing::trace!(
                pass.invoked,
                pass.finished,
                pass.freed,
                pass.delayed,
                pass.dropped_periods,
                next_wake = ?pass.next_wake,
                "dispatch pass complete"
            );
        }
        pass
    }

    /// Returns the earliest deadline among occupied slots, or `None` if every
    /// slot is free.
    #[must_use]
    pub fn next_wake(&self) -> Option<Ticks> {
        self.slots
            .with_lock(|slots| slots.iter().flatten().map(|e| e.next_run).min())
    }

    /// Returns a copy of the entry bound to `slot`, if any.
    #[must_use]
    pub fn entry(&self, slot: usize) -> Option<Entry<'t, T>> {
        self.slots.with_lock(|slots| slots.get(slot).copied().flatten())
    }

    /// Returns a copy of the whole slot table.
    #[must_use]
    pub fn entries(&self) -> [Option<Entry<'t, T>>; N] {
        self.slots.with_lock(|slots| *slots)
    }

    /// Returns the number of occupied slots.
    #[must_use]
    pub fn occupied(&self) -> usize {
        self.slots
            .with_lock(|slots| slots.iter().filter(|e| e.is_some()).count())
    }
}

impl<'t, T: Copy + Send, const N: usize> Schedule<'t, T> for Scheduler<'t, T, N> {
    #[inline]
    fn schedule(
        &self,
        task: TaskRef<'t, T>,
        mode: Mode,
        rate: u32,
        context: T,
    ) -> Result<usize, CapacityExceeded> {
        Scheduler::schedule(self, task, mode, rate, context)
    }

    #[inline]
    fn cancel(&self, task: TaskRef<'t, T>) -> Result<usize, NotFound> {
        Scheduler::cancel(self, task)
    }
}

impl<T, const N: usize> fmt::Debug for Scheduler<'_, T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("clock", &self.clock)
            .field("capacity", &N)
            .finish_non_exhaustive()
    }
}

#[inline]
fn is_bound_to<'t, T>(entry: &Option<Entry<'t, T>>, task: TaskRef<'t, T>) -> bool {
    matches!(entry, Some(entry) if entry.order.task == task)
}

/// Moves a finished fixed-rate entry to the start of its next period that is
/// strictly in the future, returning the number of periods skipped.
fn advance_period<T>(entry: &mut Entry<'_, T>, period: Ticks, now: Ticks) -> u64 {
    if period == 0 {
        entry.period_start = now;
        entry.next_run = now;
        return 0;
    }

    let mut start = entry.period_start.saturating_add(period);
    let mut dropped = 0;
    if start <= now {
        dropped = (now - start) / period + 1;
        start = start.saturating_add(dropped.saturating_mul(period));
    }
    entry.period_start = start;
    entry.next_run = start;
    dropped
}

// === impl Entry ===

impl<'t, T: Copy> Entry<'t, T> {
    /// Returns the order bound to this slot.
    #[must_use]
    pub fn order(&self) -> TaskOrder<'t, T> {
        self.order
    }

    /// Returns the task bound to this slot.
    #[must_use]
    pub fn task(&self) -> TaskRef<'t, T> {
        self.order.task
    }

    /// Returns the mode the task is bound with.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.order.mode
    }

    /// Returns the context value passed to the task.
    #[must_use]
    pub fn context(&self) -> T {
        self.order.context
    }

    /// Returns the start of the current period.
    ///
    /// For tasks not bound with [`Mode::FixedRate`], this is the time of the
    /// first invocation after the task was (re)bound.
    #[must_use]
    pub fn period_start(&self) -> Ticks {
        self.period_start
    }

    /// Returns the time at which the task is next due.
    #[must_use]
    pub fn next_run(&self) -> Ticks {
        self.next_run
    }
}

// === impl Pass ===

impl Pass {
    /// Returns `true` if no tasks remain scheduled after this pass.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.next_wake.is_none()
    }
}

// === impl Context ===

impl<'a, 't, T: Copy> Context<'a, 't, T> {
    /// Returns the context value the task was registered with.
    #[must_use]
    #[inline]
    pub fn context(&self) -> T {
        self.order.context
    }

    /// Returns the handle of the task being invoked.
    #[must_use]
    #[inline]
    pub fn task(&self) -> TaskRef<'t, T> {
        self.order.task
    }

    /// Returns the mode the task is bound with.
    #[must_use]
    #[inline]
    pub fn mode(&self) -> Mode {
        self.order.mode
    }

    /// Returns the rate the task is bound with, in milliseconds.
    #[must_use]
    #[inline]
    pub fn rate(&self) -> u32 {
        self.order.rate
    }

    /// Returns the index of the slot being dispatched.
    #[must_use]
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Returns the time at which this invocation began.
    #[must_use]
    #[inline]
    pub fn now(&self) -> Ticks {
        self.now
    }

    /// Returns the scheduler that invoked the task.
    #[must_use]
    #[inline]
    pub fn scheduler(&self) -> &'a dyn Schedule<'t, T> {
        self.scheduler
    }

    /// Binds `task` to a slot. See [`Scheduler::schedule`].
    #[inline]
    pub fn schedule(
        &self,
        task: TaskRef<'t, T>,
        mode: Mode,
        rate: u32,
        context: T,
    ) -> Result<usize, CapacityExceeded> {
        self.scheduler.schedule(task, mode, rate, context)
    }

    /// Binds the task being invoked to a slot, with its current context
    /// value.
    ///
    /// Note that, unless `mode` is [`Mode::MultiSchedule`], this rebinds the
    /// slot being dispatched, and the value returned by the task is then
    /// applied according to the new `mode`.
    #[inline]
    pub fn reschedule(&self, mode: Mode, rate: u32) -> Result<usize, CapacityExceeded> {
        self.scheduler
            .schedule(self.order.task, mode, rate, self.order.context)
    }

    /// Frees the first slot bound to `task`. See [`Scheduler::cancel`].
    #[inline]
    pub fn cancel(&self, task: TaskRef<'t, T>) -> Result<usize, NotFound> {
        self.scheduler.cancel(task)
    }
}

impl<T: fmt::Debug> fmt::Debug for Context<'_, '_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("order", &self.order)
            .field("slot", &self.slot)
            .field("now", &self.now)
            .finish_non_exhaustive()
    }
}

// === impl CapacityExceeded ===

impl CapacityExceeded {
    /// Returns the number of slots of the scheduler that was full.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

//! Suspendable routines.
//!
//! A task is re-entered from the top every time it is dispatched: there is no
//! saved stack to return to. A [`Routine`] that needs to pause partway through
//! its logic (to wait for some time to pass, or for an asynchronous operation
//! to complete) therefore records *where* it paused, and jumps straight back
//! there the next time it is invoked. [`Coroutine`] stores that resume point
//! alongside the routine's state, and implements [`Task`] so that the whole
//! thing can be handed to a [`Scheduler`].
//!
//! # Resume points
//!
//! Each routine defines its own [`Routine::Point`] type, usually a fieldless
//! enum with one variant per place the routine can suspend. On every
//! invocation, [`Routine::resume`] receives a [`Resume`] telling it where to
//! continue from:
//!
//! - [`Resume::Begin`] on the very first invocation, and on the first
//!   invocation after the routine ended;
//! - [`Resume::Slept`] after a timed suspension;
//! - [`Resume::Woken`] after waiting for an external event, along with the
//!   value delivered to the coroutine's [`Semaphore`].
//!
//! Any state that must survive a suspension lives in the routine itself, as
//! `&mut self` is the only thing that outlives the call.
//!
//! # Suspending
//!
//! [`Routine::resume`] returns a [`Step`], which tells the coroutine what to
//! do next:
//!
//! - [`Step::Sleep`] records the resume point and asks the scheduler to invoke
//!   the coroutine again after a number of milliseconds. The coroutine keeps
//!   its slot.
//! - [`Step::Wait`] records the resume point, clears the semaphore's ready
//!   flag and returns `0` to the scheduler. A coroutine bound with
//!   [`Mode::Once`] or [`Mode::MultiSchedule`] gives up its slot entirely, and
//!   is only invoked again once a [`Setter`] delivers a value and re-arms it.
//! - [`Step::Done`] and [`Step::Finalize`] end the routine, running its
//!   [`finally`](Routine::finally) section first.
//! - [`Step::Exit`] ends the routine immediately, without cleanup.
//!
//! When the routine ends, the resume point goes back to [`ResumePoint::Begin`]
//! and `0` is returned to the scheduler. A coroutine bound with
//! [`Mode::FixedRate`] starts over at its next period; otherwise, it stays
//! idle until it is scheduled again.
//!
//! A coroutine waiting for a value that never arrives stays suspended forever.
//! Nothing detects this; a routine that needs a timeout should arrange to be
//! woken some other way.
//!
//! # Examples
//!
//! A routine that blinks a light three times:
//!
//! ```rust
//! use morel::{Clock, Context, Coroutine, Mode, Resume, Routine, Scheduler, Step};
//! use core::sync::atomic::{AtomicU64, Ordering};
//!
//! static NOW: AtomicU64 = AtomicU64::new(0);
//!
//! fn now() -> u64 {
//!     NOW.load(Ordering::Relaxed)
//! }
//!
//! #[derive(Copy, Clone, Debug, PartialEq, Eq)]
//! enum Blink {
//!     On,
//!     Off,
//! }
//!
//! struct Blinker {
//!     blinks: u32,
//! }
//!
//! impl Routine for Blinker {
//!     type Point = Blink;
//!     type Value = ();
//!
//!     fn resume(&mut self, from: Resume<Blink, ()>, _: &mut Context<'_, '_>) -> Step<Blink> {
//!         match from {
//!             Resume::Begin | Resume::Slept(Blink::Off) => {
//!                 if self.blinks == 3 {
//!                     return Step::Done;
//!                 }
//!                 // turn the light on...
//!                 Step::Sleep(Blink::On, 100)
//!             }
//!             Resume::Slept(Blink::On) => {
//!                 // ...and off again.
//!                 self.blinks += 1;
//!                 Step::Sleep(Blink::Off, 100)
//!             }
//!             Resume::Woken(..) => unreachable!("this routine never waits"),
//!         }
//!     }
//! }
//!
//! static SCHEDULER: Scheduler = Scheduler::new(Clock::millis(now));
//! static BLINKER: Coroutine<Blinker> = Coroutine::new(Blinker { blinks: 0 });
//!
//! SCHEDULER.schedule((&BLINKER).into(), Mode::Once, 0, ()).unwrap();
//!
//! // a very impatient control loop, which skips straight to the next deadline
//! while let Some(next_wake) = SCHEDULER.dispatch().next_wake {
//!     NOW.store(next_wake, Ordering::Relaxed);
//! }
//!
//! assert_eq!(BLINKER.with_routine(|blinker| blinker.blinks), 3);
//! assert_eq!(now(), 600);
//! ```
//!
//! [`Scheduler`]: crate::Scheduler
//! [`Mode::Once`]: crate::Mode::Once
//! [`Mode::MultiSchedule`]: crate::Mode::MultiSchedule
//! [`Mode::FixedRate`]: crate::Mode::FixedRate
use crate::{
    bridge::{Semaphore, Setter},
    scheduler::{Context, Schedule},
    task::{Task, TaskRef},
};
use core::{any, fmt, marker::PhantomData};
use maitake_sync::blocking::Mutex;

#[cfg(all(test, not(loom)))]
mod tests;

/// A routine that can suspend itself partway through, and pick up where it
/// left off on its next invocation.
///
/// See the [module-level documentation](self) for details.
pub trait Routine<T = ()>: Send {
    /// Identifies the places where this routine can suspend.
    ///
    /// Each suspension point needs its own value, so that [`resume`] can jump
    /// straight back to it.
    ///
    /// [`resume`]: Self::resume
    type Point: Copy + Eq + fmt::Debug + Send;

    /// The value delivered to the coroutine's [`Semaphore`] when an external
    /// event completes.
    type Value: Send;

    /// Runs the routine from `from` until it suspends or ends.
    fn resume(
        &mut self,
        from: Resume<Self::Point, Self::Value>,
        cx: &mut Context<'_, '_, T>,
    ) -> Step<Self::Point>;

    /// Cleans up after the routine, when it returns [`Step::Done`] or
    /// [`Step::Finalize`].
    ///
    /// By default, this does nothing.
    fn finally(&mut self, cx: &mut Context<'_, '_, T>) {
        let _ = cx;
    }
}

/// Where a [`Routine`] resumes from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Resume<P, V> {
    /// The start of the routine.
    Begin,
    /// The point at which the routine returned [`Step::Sleep`].
    Slept(P),
    /// The point at which the routine returned [`Step::Wait`], along with the
    /// value delivered to the coroutine's [`Semaphore`].
    ///
    /// The value is moved out of the semaphore, so it is observed exactly
    /// once. It is `None` if the coroutine was invoked before any value was
    /// delivered, such as by its next [fixed-rate] period.
    ///
    /// [fixed-rate]: crate::Mode::FixedRate
    Woken(P, Option<V>),
}

/// What a [`Routine`] does next.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[must_use]
pub enum Step<P> {
    /// Suspend at the given point for a number of milliseconds.
    ///
    /// A delay of `0` is treated as `1`, since returning `0` to the scheduler
    /// would release the coroutine's slot.
    Sleep(P, u32),
    /// Suspend at the given point until a value is delivered to the
    /// coroutine's [`Semaphore`].
    Wait(P),
    /// The routine reached its end. Runs [`Routine::finally`].
    Done,
    /// Skip the rest of the routine. Runs [`Routine::finally`].
    Finalize,
    /// End the routine immediately, without running [`Routine::finally`].
    Exit,
}

/// Where a [`Coroutine`] will resume from when it is next invoked.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResumePoint<P> {
    /// The routine will start from the beginning.
    Begin,
    /// The routine is suspended at the given point.
    At(P),
}

/// A [`Task`] that drives a [`Routine`].
///
/// A coroutine owns its routine, the routine's current resume point, and the
/// [`Semaphore`] through which external events deliver values to it. Like any
/// other task, it is identified by its address, so there is exactly one
/// logical instance of each coroutine.
///
/// # Locking
///
/// The routine runs with the coroutine's state locked. Calling
/// [`resume_point`](Self::resume_point), [`reset`](Self::reset) or
/// [`with_routine`](Self::with_routine) on a coroutine from inside its own
/// routine will deadlock. Creating a [`Setter`] for it, or delivering a value
/// through one, does not touch that lock and is always fine.
pub struct Coroutine<R: Routine<T>, T = ()> {
    state: Mutex<State<R::Point, R>>,
    semaphore: Semaphore<R::Value>,
    _context: PhantomData<fn(T)>,
}

struct State<P, R> {
    point: Suspended<P>,
    routine: R,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Suspended<P> {
    Begin,
    Sleeping(P),
    Waiting(P),
}

// === impl Coroutine ===

impl<R: Routine<T>, T> Coroutine<R, T> {
    loom_const_fn! {
        /// Returns a new coroutine that will start `routine` from the
        /// beginning when it is first invoked.
        #[must_use]
        pub fn new(routine: R) -> Self {
            Self {
                state: Mutex::new(State {
                    point: Suspended::Begin,
                    routine,
                }),
                semaphore: Semaphore::new(),
                _context: PhantomData,
            }
        }
    }

    /// Returns where the routine will resume from on its next invocation.
    #[must_use]
    pub fn resume_point(&self) -> ResumePoint<R::Point> {
        self.state.with_lock(|state| match state.point {
            Suspended::Begin => ResumePoint::Begin,
            Suspended::Sleeping(point) | Suspended::Waiting(point) => ResumePoint::At(point),
        })
    }

    /// Borrows this coroutine's [`Semaphore`].
    #[must_use]
    pub fn semaphore(&self) -> &Semaphore<R::Value> {
        &self.semaphore
    }

    /// Returns a [`Setter`] that delivers values to this coroutine and
    /// re-arms it on `scheduler`, invoking it with `context`.
    ///
    /// Hand the setter to an asynchronous operation before returning
    /// [`Step::Wait`].
    #[must_use]
    pub fn setter<'a>(
        &'a self,
        scheduler: &'a dyn Schedule<'a, T>,
        context: T,
    ) -> Setter<'a, T, R::Value>
    where
        R: 'a,
        T: Copy + 'a,
    {
        Setter::new(&self.semaphore, TaskRef::from(self), scheduler, context)
    }

    /// Sends the routine back to its beginning and discards any undelivered
    /// value, without running [`Routine::finally`].
    ///
    /// This does not cancel any slot the coroutine is bound to.
    pub fn reset(&self) {
        self.state.with_lock(|state| state.point = Suspended::Begin);
        let _ = self.semaphore.take();
        tracing::debug!(routine = any::type_name::<R>(), "coroutine reset");
    }

    /// Calls `f` with exclusive access to the routine.
    pub fn with_routine<U>(&self, f: impl FnOnce(&mut R) -> U) -> U {
        self.state.with_lock(|state| f(&mut state.routine))
    }
}

impl<R: Routine<T>, T> Task<T> for Coroutine<R, T> {
    fn run(&self, cx: &mut Context<'_, '_, T>) -> u32 {
        self.state.with_lock(|state| {
            let from = match state.point {
                Suspended::Begin => Resume::Begin,
                Suspended::Sleeping(point) => Resume::Slept(point),
                Suspended::Waiting(point) => Resume::Woken(point, self.semaphore.take()),
            };
            test_trace!(routine = any::type_name::<R>(), point = ?state.point, "resuming");

            match state.routine.resume(from, cx) {
                Step::Sleep(point, ms) => {
                    state.point = Suspended::Sleeping(point);
                    ms.max(1)
                }
                Step::Wait(point) => {
                    state.point = Suspended::Waiting(point);
                    self.semaphore.clear();
                    0
                }
                step @ (Step::Done | Step::Finalize) => {
                    tracing::trace!(routine = any::type_name::<R>(), ?step, "routine ended");
                    state.routine.finally(cx);
                    state.point = Suspended::Begin;
                    0
                }
                Step::Exit => {
                    tracing::trace!(routine = any::type_name::<R>(), "routine exited");
                    state.point = Suspended::Begin;
                    0
                }
            }
        })
    }

    fn name(&self) -> &'static str {
        any::type_name::<R>()
    }
}

impl<R: Routine<T>, T> fmt::Debug for Coroutine<R, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Coroutine");
        s.field("routine", &format_args!("{}", any::type_name::<R>()));
        let locked = self
            .state
            .try_with_lock(|state| {
                s.field("point", &state.point);
            })
            .is_none();
        if locked {
            s.field("point", &format_args!("<locked>"));
        }
        s.field("ready", &self.semaphore.is_ready()).finish()
    }
}

use super::*;
use crate::{
    scheduler::{Mode, Scheduler},
    util::test as clock,
};
use std::{boxed::Box, collections::VecDeque, vec::Vec};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Point {
    A,
    B,
}

/// Replays a fixed sequence of steps, recording where it was resumed from.
struct Script {
    steps: VecDeque<Step<Point>>,
    seen: Vec<Resume<Point, i32>>,
    finally: usize,
    before_next: Option<Box<dyn FnOnce() + Send>>,
}

impl Script {
    fn new(steps: impl IntoIterator<Item = Step<Point>>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            seen: Vec::new(),
            finally: 0,
            before_next: None,
        }
    }
}

impl Routine for Script {
    type Point = Point;
    type Value = i32;

    fn resume(&mut self, from: Resume<Point, i32>, _: &mut Context<'_, '_>) -> Step<Point> {
        tracing::info!(?from, "script resumed");
        self.seen.push(from);
        if let Some(f) = self.before_next.take() {
            f();
        }
        self.steps.pop_front().expect("script ran out of steps")
    }

    fn finally(&mut self, _: &mut Context<'_, '_>) {
        self.finally += 1;
    }
}

fn seen(co: &Coroutine<Script>) -> Vec<Resume<Point, i32>> {
    co.with_routine(|script| script.seen.clone())
}

fn finally_calls(co: &Coroutine<Script>) -> usize {
    co.with_routine(|script| script.finally)
}

fn leak<K>(value: K) -> &'static K {
    Box::leak(Box::new(value))
}

#[test]
fn sleep_keeps_the_slot() {
    let _trace = clock::trace_init();
    let co = Coroutine::new(Script::new([
        Step::Sleep(Point::A, 50),
        Step::Sleep(Point::B, 20),
        Step::Done,
    ]));
    let sched = Scheduler::<(), 4>::new(clock::clock());

    assert_eq!(co.resume_point(), ResumePoint::Begin);
    sched.schedule(TaskRef::from(&co), Mode::Once, 0, ()).unwrap();

    let pass = sched.dispatch();
    assert_eq!(pass.next_wake, Some(50));
    assert_eq!(co.resume_point(), ResumePoint::At(Point::A));
    assert_eq!(sched.occupied(), 1);

    clock::set(50);
    assert_eq!(sched.dispatch().next_wake, Some(70));
    assert_eq!(co.resume_point(), ResumePoint::At(Point::B));

    clock::set(70);
    let pass = sched.dispatch();
    assert!(pass.is_idle());
    assert_eq!(co.resume_point(), ResumePoint::Begin);
    assert_eq!(finally_calls(&co), 1);

    assert_eq!(
        seen(&co),
        vec![
            Resume::Begin,
            Resume::Slept(Point::A),
            Resume::Slept(Point::B)
        ]
    );
}

#[test]
fn zero_sleep_is_not_done() {
    let _trace = clock::trace_init();
    let co = Coroutine::new(Script::new([Step::Sleep(Point::A, 0), Step::Exit]));
    let sched = Scheduler::<(), 4>::new(clock::clock());

    sched.schedule(TaskRef::from(&co), Mode::Once, 0, ()).unwrap();
    let pass = sched.dispatch();
    assert_eq!(pass.freed, 0);
    assert_eq!(pass.next_wake, Some(1));

    clock::set(1);
    assert!(sched.dispatch().is_idle());
    assert_eq!(seen(&co), vec![Resume::Begin, Resume::Slept(Point::A)]);
}

#[test]
fn wait_releases_the_slot_until_set() {
    let _trace = clock::trace_init();
    let co = Coroutine::new(Script::new([Step::Wait(Point::A), Step::Done]));
    let sched = Scheduler::<(), 4>::new(clock::clock());

    sched.schedule(TaskRef::from(&co), Mode::Once, 0, ()).unwrap();
    let pass = sched.dispatch();
    assert!(pass.is_idle(), "a waiting coroutine holds no slot");
    assert_eq!(co.resume_point(), ResumePoint::At(Point::A));
    assert!(!co.semaphore().is_ready());

    clock::set(500);
    let setter = co.setter(&sched, ());
    assert_eq!(setter.task(), TaskRef::from(&co));
    assert_eq!(setter.set(42), Ok(0));
    assert!(co.semaphore().is_ready());

    let pass = sched.dispatch();
    assert_eq!(pass.invoked, 1);
    assert!(pass.is_idle());
    assert!(!co.semaphore().is_ready());
    assert_eq!(finally_calls(&co), 1);
    assert_eq!(
        seen(&co),
        vec![Resume::Begin, Resume::Woken(Point::A, Some(42))]
    );
}

#[test]
fn delivered_value_is_observed_once() {
    let _trace = clock::trace_init();
    let co = Coroutine::new(Script::new([
        Step::Wait(Point::A),
        Step::Wait(Point::B),
        Step::Done,
    ]));
    let sched = Scheduler::<(), 4>::new(clock::clock());
    let setter = co.setter(&sched, ());

    sched.schedule(TaskRef::from(&co), Mode::Once, 0, ()).unwrap();
    sched.dispatch();
    setter.set(7).unwrap();
    sched.dispatch();
    assert_eq!(co.resume_point(), ResumePoint::At(Point::B));

    // woken by something other than the setter
    sched.schedule(TaskRef::from(&co), Mode::Once, 0, ()).unwrap();
    sched.dispatch();

    assert_eq!(
        seen(&co),
        vec![
            Resume::Begin,
            Resume::Woken(Point::A, Some(7)),
            Resume::Woken(Point::B, None),
        ]
    );
}

#[test]
fn latest_value_wins() {
    let _trace = clock::trace_init();
    let co = Coroutine::new(Script::new([Step::Wait(Point::A), Step::Done]));
    let sched = Scheduler::<(), 4>::new(clock::clock());
    let setter = co.setter(&sched, ());

    sched.schedule(TaskRef::from(&co), Mode::Once, 0, ()).unwrap();
    sched.dispatch();

    assert_eq!(setter.set(1), Ok(0));
    assert_eq!(setter.set(2), Ok(1));

    // the second slot finds the routine back at the beginning, with the
    // value already consumed
    co.with_routine(|script| script.steps.push_back(Step::Exit));
    let pass = sched.dispatch();
    assert_eq!(pass.invoked, 2);
    assert_eq!(
        seen(&co),
        vec![
            Resume::Begin,
            Resume::Woken(Point::A, Some(2)),
            Resume::Begin
        ]
    );
}

#[test]
fn synchronous_completion_survives_wait() {
    let _trace = clock::trace_init();
    let co = leak(Coroutine::new(Script::new([
        Step::Wait(Point::A),
        Step::Done,
    ])));
    let sched = leak(Scheduler::<(), 4>::new(clock::clock()));
    let setter = co.setter(sched, ());

    // the operation completes before the routine even suspends
    co.with_routine(|script| {
        script.before_next = Some(Box::new(move || {
            setter.set(5).unwrap();
        }))
    });

    sched.schedule(TaskRef::from(co), Mode::Once, 0, ()).unwrap();
    let pass = sched.dispatch();

    // re-armed into a later slot, so it resumes in the same pass
    assert_eq!(pass.invoked, 2);
    assert!(pass.is_idle());
    assert_eq!(
        seen(co),
        vec![Resume::Begin, Resume::Woken(Point::A, Some(5))]
    );
}

#[test]
fn finalize_runs_cleanup_and_exit_does_not() {
    let _trace = clock::trace_init();
    let co = Coroutine::new(Script::new([
        Step::Sleep(Point::A, 10),
        Step::Finalize,
        Step::Sleep(Point::B, 10),
        Step::Exit,
    ]));
    let sched = Scheduler::<(), 4>::new(clock::clock());
    let task = TaskRef::from(&co);

    sched.schedule(task, Mode::Once, 0, ()).unwrap();
    sched.dispatch();
    clock::set(10);
    sched.dispatch();
    assert_eq!(co.resume_point(), ResumePoint::Begin);
    assert_eq!(finally_calls(&co), 1);

    sched.schedule(task, Mode::Once, 0, ()).unwrap();
    sched.dispatch();
    assert_eq!(co.resume_point(), ResumePoint::At(Point::B));
    clock::set(20);
    assert!(sched.dispatch().is_idle());
    assert_eq!(co.resume_point(), ResumePoint::Begin);
    assert_eq!(finally_calls(&co), 1, "exiting skips cleanup");
}

#[test]
fn fixed_rate_coroutine_restarts_every_period() {
    let _trace = clock::trace_init();
    let co = Coroutine::new(Script::new([
        Step::Sleep(Point::A, 10),
        Step::Done,
        Step::Sleep(Point::A, 10),
        Step::Exit,
    ]));
    let sched = Scheduler::<(), 4>::new(clock::clock());

    sched.schedule(TaskRef::from(&co), Mode::FixedRate, 100, ()).unwrap();
    for (t, next) in [(100, 110), (110, 200), (200, 210), (210, 300)] {
        clock::set(t);
        assert_eq!(sched.dispatch().next_wake, Some(next));
    }

    assert_eq!(sched.occupied(), 1);
    assert_eq!(
        seen(&co),
        vec![
            Resume::Begin,
            Resume::Slept(Point::A),
            Resume::Begin,
            Resume::Slept(Point::A)
        ]
    );
}

#[test]
fn reset_discards_progress() {
    let _trace = clock::trace_init();
    let co = Coroutine::new(Script::new([Step::Wait(Point::A), Step::Exit]));
    let sched = Scheduler::<(), 4>::new(clock::clock());
    let setter = co.setter(&sched, ());

    sched.schedule(TaskRef::from(&co), Mode::Once, 0, ()).unwrap();
    sched.dispatch();
    setter.set(9).unwrap();

    co.reset();
    assert_eq!(co.resume_point(), ResumePoint::Begin);
    assert!(!co.semaphore().is_ready());

    sched.dispatch();
    assert_eq!(seen(&co), vec![Resume::Begin, Resume::Begin]);
    assert_eq!(finally_calls(&co), 0);
}

#[test]
fn setter_reports_a_full_scheduler() {
    let _trace = clock::trace_init();
    let co = Coroutine::new(Script::new([Step::Wait(Point::A)]));
    let other = Coroutine::new(Script::new([]));
    let sched = Scheduler::<(), 1>::new(clock::clock());

    sched.schedule(TaskRef::from(&co), Mode::Once, 0, ()).unwrap();
    sched.dispatch();
    sched.schedule(TaskRef::from(&other), Mode::Once, 1000, ()).unwrap();

    let err = co.setter(&sched, ()).set(3).unwrap_err();
    assert_eq!(err.capacity(), 1);
    assert!(co.semaphore().is_ready(), "the value is still delivered");
}

#[test]
fn named_after_the_routine() {
    let co = Coroutine::new(Script::new([]));
    let task = TaskRef::<()>::from(&co);
    assert!(task.name().ends_with("Script"), "{}", task.name());

    let debug = format!("{co:?}");
    assert!(debug.contains("Coroutine"), "{debug}");
    assert!(debug.contains("Begin"), "{debug}");
}

#[test]
fn debug_does_not_need_a_debug_value() {
    /// Deliberately not `Debug`.
    struct Opaque;

    struct Quiet;

    impl Routine for Quiet {
        type Point = ();
        type Value = Opaque;

        fn resume(&mut self, _: Resume<(), Opaque>, _: &mut Context<'_, '_>) -> Step<()> {
            Step::Exit
        }
    }

    let co = Coroutine::new(Quiet);
    co.semaphore().set(Opaque);
    let debug = format!("{co:?}");
    assert!(debug.contains("Quiet"), "{debug}");
    assert!(debug.contains("ready: true"), "{debug}");
}

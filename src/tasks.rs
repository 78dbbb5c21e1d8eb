//! The tasks run by the demo control loop.
use crate::{
    cli::Options,
    rt::{Core, HostScheduler},
};
use color_eyre::eyre::{Result, WrapErr};
use morel::{Context, Coroutine, Resume, Routine, Step, Task};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering::Relaxed},
        mpsc,
    },
    thread,
    time::Duration,
};

/// The number of bytes moved by each DMA request.
pub const CHUNK_BYTES: usize = 4096;

/// Blinks a status light at a fixed rate.
pub struct Heartbeat {
    beats: AtomicU64,
}

/// Stops the control loop.
pub struct Shutdown {
    core: &'static Core,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("DMA fault while reading chunk {chunk}")]
pub struct DmaFault {
    chunk: u32,
}

/// Copies a number of chunks through the simulated DMA engine, pausing
/// between them.
pub struct Transfer {
    requests: mpsc::Sender<u32>,
    chunks: u32,
    pace: u32,
    next: u32,
    bytes: usize,
    outcome: Option<Result<usize, DmaFault>>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Point {
    /// Waiting for a DMA request to complete.
    Read,
    /// Pausing between chunks.
    Pace,
}

// === impl Heartbeat ===

impl Heartbeat {
    pub const fn new() -> Self {
        Self {
            beats: AtomicU64::new(0),
        }
    }

    pub fn beats(&self) -> u64 {
        self.beats.load(Relaxed)
    }
}

impl Task for Heartbeat {
    fn run(&self, cx: &mut Context<'_, '_>) -> u32 {
        let beat = self.beats.fetch_add(1, Relaxed) + 1;
        tracing::info!(beat, now = cx.now(), "ba-dum");
        0
    }

    fn name(&self) -> &'static str {
        "heartbeat"
    }
}

// === impl Shutdown ===

impl Shutdown {
    pub const fn new(core: &'static Core) -> Self {
        Self { core }
    }
}

impl Task for Shutdown {
    fn run(&self, cx: &mut Context<'_, '_>) -> u32 {
        tracing::info!(now = cx.now(), "time's up");
        self.core.stop();
        0
    }

    fn name(&self) -> &'static str {
        "shutdown"
    }
}

// === impl Transfer ===

impl Transfer {
    /// Starts the simulated DMA engine, and returns the coroutine that drives
    /// it. The coroutine still has to be scheduled.
    pub fn spawn(
        opts: &Options,
        scheduler: &'static HostScheduler,
    ) -> Result<&'static Coroutine<Transfer>> {
        let (requests, engine) = mpsc::channel();
        let transfer: &'static Coroutine<Transfer> =
            Box::leak(Box::new(Coroutine::new(Transfer {
                requests,
                chunks: opts.chunks,
                pace: opts.pace,
                next: 0,
                bytes: 0,
                outcome: None,
            })));
        let setter = transfer.setter(scheduler, ());
        let latency = Duration::from_millis(opts.latency);
        let fail_at = opts.fail_at;

        thread::Builder::new()
            .name("dma".into())
            .spawn(move || {
                for chunk in engine {
                    thread::sleep(latency);
                    let result = match fail_at {
                        Some(fail_at) if fail_at == chunk => Err(DmaFault { chunk }),
                        _ => Ok(CHUNK_BYTES),
                    };
                    tracing::debug!(chunk, ?result, "DMA request complete");
                    if let Err(error) = setter.set(result) {
                        tracing::error!(chunk, %error, "DMA completion was lost");
                    }
                }
                tracing::debug!("DMA engine shutting down");
            })
            .context("spawning the DMA engine thread")?;

        Ok(transfer)
    }

    /// Returns the number of bytes transferred, or the fault that aborted the
    /// transfer, if the transfer has ended.
    pub fn outcome(&self) -> Option<Result<usize, DmaFault>> {
        self.outcome
    }

    fn request(&mut self) -> Step<Point> {
        match self.requests.send(self.next) {
            Ok(()) => Step::Wait(Point::Read),
            Err(_) => {
                tracing::warn!(chunk = self.next, "DMA engine hung up");
                Step::Exit
            }
        }
    }
}

impl Routine for Transfer {
    type Point = Point;
    type Value = Result<usize, DmaFault>;

    fn resume(&mut self, from: Resume<Point, Self::Value>, cx: &mut Context<'_, '_>) -> Step<Point> {
        match from {
            Resume::Begin => {
                tracing::info!(chunks = self.chunks, now = cx.now(), "starting transfer");
                self.next = 0;
                self.bytes = 0;
                self.outcome = None;
                if self.chunks == 0 {
                    return Step::Done;
                }
                self.request()
            }
            Resume::Woken(Point::Read, Some(Ok(bytes))) => {
                self.bytes += bytes;
                self.next += 1;
                tracing::debug!(chunk = self.next, bytes = self.bytes, "chunk read");
                if self.next == self.chunks {
                    return Step::Done;
                }
                Step::Sleep(Point::Pace, self.pace)
            }
            Resume::Woken(Point::Read, Some(Err(fault))) => {
                self.outcome = Some(Err(fault));
                Step::Finalize
            }
            // resumed before the engine answered
            Resume::Woken(Point::Read, None) => Step::Wait(Point::Read),
            Resume::Slept(Point::Pace) => self.request(),
            from => {
                tracing::error!(?from, "transfer resumed from an unexpected point");
                Step::Exit
            }
        }
    }

    fn finally(&mut self, cx: &mut Context<'_, '_>) {
        match *self.outcome.get_or_insert(Ok(self.bytes)) {
            Ok(bytes) => tracing::info!(bytes, now = cx.now(), "transfer complete"),
            Err(error) => tracing::warn!(%error, bytes = self.bytes, "transfer aborted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::systime;
    use morel::{Mode, Scheduler, TaskRef};

    fn transfer(chunks: u32) -> (Transfer, mpsc::Receiver<u32>) {
        let (requests, engine) = mpsc::channel();
        let transfer = Transfer {
            requests,
            chunks,
            pace: 0,
            next: 0,
            bytes: 0,
            outcome: None,
        };
        (transfer, engine)
    }

    #[test]
    fn empty_transfer_completes_without_requests() {
        let (transfer, engine) = transfer(0);
        let co = Coroutine::new(transfer);
        let sched = Scheduler::<(), 4>::new(systime::CLOCK);

        sched.schedule(TaskRef::from(&co), Mode::Once, 0, ()).unwrap();
        assert!(sched.dispatch().is_idle());

        assert_eq!(co.with_routine(|t| t.outcome()), Some(Ok(0)));
        assert!(engine.try_recv().is_err(), "no DMA request was made");
    }

    #[test]
    fn transfer_waits_for_the_engine() {
        let (transfer, engine) = transfer(1);
        let co = Coroutine::new(transfer);
        let sched = Scheduler::<(), 4>::new(systime::CLOCK);

        sched.schedule(TaskRef::from(&co), Mode::Once, 0, ()).unwrap();
        assert!(sched.dispatch().is_idle());
        assert_eq!(engine.try_recv(), Ok(0));

        co.setter(&sched, ()).set(Ok(CHUNK_BYTES)).unwrap();
        sched.dispatch();
        assert_eq!(co.with_routine(|t| t.outcome()), Some(Ok(CHUNK_BYTES)));
    }
}

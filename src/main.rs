use clap::Parser;
use color_eyre::{
    eyre::{format_err, Result, WrapErr},
    Help,
};
use morel::{Mode, Scheduler, TaskRef};

mod cli;
mod rt;
mod systime;
mod tasks;

static SCHEDULER: rt::HostScheduler = Scheduler::with_wake_source(systime::CLOCK, rt::wake);
static CORE: rt::Core = rt::Core::new(&SCHEDULER);
static HEARTBEAT: tasks::Heartbeat = tasks::Heartbeat::new();
static SHUTDOWN: tasks::Shutdown = tasks::Shutdown::new(&CORE);

fn main() -> Result<()> {
    color_eyre::install()?;

    let opts = cli::Options::parse();
    opts.trace_init()?;

    tracing::info!("growing hyphae!");
    tracing::debug!(?opts, "configuration");

    SCHEDULER.init();
    let transfer = tasks::Transfer::spawn(&opts, &SCHEDULER)?;

    SCHEDULER
        .schedule(TaskRef::from(&HEARTBEAT), Mode::FixedRate, opts.heartbeat, ())
        .context("scheduling the heartbeat")?;
    SCHEDULER
        .schedule(TaskRef::from(transfer), Mode::Once, 0, ())
        .context("scheduling the transfer")?;
    SCHEDULER
        .schedule(TaskRef::from(&SHUTDOWN), Mode::Once, opts.run_for, ())
        .context("scheduling shutdown")?;

    CORE.run();

    let outcome = transfer.with_routine(|transfer| transfer.outcome());
    tracing::info!(beats = HEARTBEAT.beats(), ?outcome, "control loop stopped");

    match outcome {
        Some(Ok(_)) => Ok(()),
        Some(Err(fault)) => Err(fault)
            .context("the transfer failed")
            .suggestion("run without `--fail-at` for a clean transfer"),
        None => Err(format_err!("the transfer did not finish before shutdown"))
            .suggestion("try a longer `--run-for`, or a shorter `--latency`"),
    }
}

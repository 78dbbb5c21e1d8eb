use color_eyre::eyre::Result;

/// Runs a simulated firmware control loop on the host: a fixed-rate
/// heartbeat, and a chunked transfer through a DMA engine that completes its
/// requests on another thread.
#[derive(Debug, clap::Parser)]
#[clap(name = "hyphae", version)]
pub struct Options {
    /// Configures logging.
    #[clap(short, long, env = "RUST_LOG", default_value = "hyphae=info,morel=info,warn")]
    log: String,

    /// How long to run the control loop for, in milliseconds.
    #[clap(long, default_value_t = 2_000)]
    pub run_for: u32,

    /// The heartbeat period, in milliseconds.
    #[clap(long, default_value_t = 250)]
    pub heartbeat: u32,

    /// How many chunks to transfer.
    #[clap(long, default_value_t = 8)]
    pub chunks: u32,

    /// How long the simulated DMA engine takes to complete a request, in
    /// milliseconds.
    #[clap(long, default_value_t = 20)]
    pub latency: u64,

    /// How long the transfer pauses between chunks, in milliseconds.
    #[clap(long, default_value_t = 10)]
    pub pace: u32,

    /// Makes the DMA engine fail when reading this chunk.
    #[clap(long)]
    pub fail_at: Option<u32>,
}

impl Options {
    pub fn trace_init(&self) -> Result<()> {
        use tracing_subscriber::prelude::*;

        let filter = self.log.parse::<tracing_subscriber::EnvFilter>()?;
        let fmt = tracing_subscriber::fmt::layer()
            .with_thread_names(true)
            .with_writer(std::io::stderr);

        tracing_subscriber::registry()
            .with(fmt)
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()?;
        Ok(())
    }
}

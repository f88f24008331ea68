//! The `track` command.

use std::path::Path;

use clap::Args;
use locotrack::source::CommandLocationSource;
use locotrack::tracker::{Tracker, UdpTransport};
use tracing::info;

use crate::error::CliError;
use crate::runner::{load_config, CliRunner};

/// Arguments for the track command.
#[derive(Debug, Args)]
pub struct TrackArgs {
    /// Fail instead of stopping a tracker that is already running
    #[arg(long)]
    pub no_preempt: bool,
}

/// Run the tracker until its time to live expires or it is interrupted.
pub fn run(config_path: Option<&Path>, args: TrackArgs) -> Result<(), CliError> {
    let config = load_config(config_path)?;
    let settings = config.tracker()?;

    let runner = CliRunner::new(&settings.logging)?;
    runner.log_startup("track");

    let shutdown = runner.shutdown_flag()?;
    let runtime = runner.runtime()?;

    let source = CommandLocationSource::new(settings.location_cmd.clone());
    let transport = UdpTransport::from_settings(settings);
    let mut tracker = Tracker::new(settings, source, transport);
    tracker.start(!args.no_preempt)?;

    let stats = runtime.block_on(tracker.run(&shutdown))?;
    info!(
        samples = stats.samples,
        sends = stats.sends,
        persisted = stats.persisted_on_exit,
        "Tracker finished"
    );
    Ok(())
}

//! The `ingest` command.

use std::path::Path;

use locotrack::ingest::IngestService;

use crate::error::CliError;
use crate::runner::{load_config, CliRunner};

/// Serve datagrams until interrupted.
pub fn run(config_path: Option<&Path>) -> Result<(), CliError> {
    let config = load_config(config_path)?;
    let settings = config.ingest()?;

    let runner = CliRunner::new(&settings.logging)?;
    runner.log_startup("ingest");

    let shutdown = runner.shutdown_flag()?;
    let runtime = runner.runtime()?;

    runtime.block_on(async {
        let socket = IngestService::bind(settings.listen_addr()).await?;
        let service = IngestService::from_settings(settings).await;
        service.run(socket, &shutdown).await?;
        Ok::<(), CliError>(())
    })
}

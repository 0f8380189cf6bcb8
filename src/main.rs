use anyhow::{ensure, Context, Result};
use clap::Parser;
use log::{debug, LevelFilter};

use face_restore_rs::{
    build_restorer, init_logging, model::accelerator_available, BatchDriver, Cli, RunConfig,
};

fn main() -> Result<()> {
    init_logging(LevelFilter::Info);
    let config = RunConfig::resolve(Cli::parse(), accelerator_available);

    ensure!(
        config.model_path.exists(),
        "Model path does not exist: {}",
        config.model_path.display()
    );
    ensure!(
        config.input_dir.is_dir(),
        "Input directory does not exist: {}",
        config.input_dir.display()
    );

    let restorer = build_restorer(&config).context("Failed to set up the restorer")?;
    let report = BatchDriver::new(restorer, config).run()?;
    debug!(
        "{} image(s) processed, {} entries skipped",
        report.processed, report.skipped
    );

    Ok(())
}

pub mod batch;
pub mod config;
pub mod errors;
pub mod model;
pub mod router;
pub mod traits;
pub mod upsampler;

pub mod mocks;

use log::LevelFilter;

pub use batch::{BatchDriver, ImageEntry, RunReport};
pub use config::{Cli, ExtensionPolicy, RunConfig};
pub use errors::{FaceRestoreError, Result};
pub use model::GfpganRestorer;
pub use router::OutputSet;
pub use traits::*;
pub use upsampler::RealEsrganUpsampler;

/// Initialize logging once.
///
/// `RUST_LOG` takes precedence over `default_filter` when set.
pub fn init_logging(default_filter: LevelFilter) {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter.as_str()),
    );

    if builder.try_init().is_err() {
        // Logger already initialized; nothing to do.
    }
}

/// Build the restorer and its optional background upsampler from a resolved config.
pub fn build_restorer(config: &RunConfig) -> Result<GfpganRestorer> {
    let bg_upsampler = config
        .bg_upsampler
        .as_ref()
        .map(|settings| RealEsrganUpsampler::new(settings, config.device_id))
        .transpose()?
        .map(|upsampler| Box::new(upsampler) as Box<dyn BackgroundUpsampler>);

    GfpganRestorer::new(config, bg_upsampler)
}

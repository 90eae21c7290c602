pub mod artifact;
pub mod config;
mod error;
pub mod export;
pub mod imaging;
pub mod locator;
pub mod pipeline;
pub mod store;

pub use config::{default_config, Config, ConfigError};
pub use error::PipelineError;
pub use pipeline::{Pipeline, PipelineSettings, ProjectOutcome, ProjectReport};

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the `info` default.
///
/// Logs go to stderr so that `--json` output on stdout stays machine-readable.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

use std::io;

use anyhow::{anyhow, Result};
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// stderr logging settings. stdout is reserved for the JSON report.
#[derive(Debug, Clone, Copy)]
pub struct LogConfig {
    pub level: Level,
    pub with_ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: Level::INFO, with_ansi: false }
    }
}

impl LogConfig {
    /// `0` is info, `-v` debug, `-vv` and beyond trace.
    #[must_use]
    pub fn from_verbosity(verbosity: u8) -> Self {
        let level = match verbosity {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        Self { level, ..Self::default() }
    }
}

/// Install the global subscriber writing to stderr.
///
/// # Errors
/// Returns an error when a global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    init_logging_with_writer(config, io::stderr)
}

fn init_logging_with_writer<W>(config: &LogConfig, writer: W) -> Result<()>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_ansi(config.with_ansi).with_target(false);
    tracing_subscriber::registry()
        .with(build_env_filter(config.level))
        .with(layer)
        .try_init()
        .map_err(|err| anyhow!("failed to install log subscriber: {err}"))
}

/// `RUST_LOG` wins over the verbosity flag; other crates stay at warn.
fn build_env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = level.as_str().to_lowercase();
        EnvFilter::new(format!(
            "warn,zotsync={level},zotsync_core={level},zotsync_store_api={level},zotsync_store_sqlite={level}"
        ))
    })
}

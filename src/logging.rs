use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Settings;
use crate::error::{EngineError, Result};

/// Initialise logging to stderr. `--log-level` wins over `RUST_LOG`, which wins over the settings file.
pub fn init_logging(settings: &Settings, cli_level: Option<&str>) -> Result<()> {
    let crate_name = env!("CARGO_CRATE_NAME");
    let directive = match cli_level {
        Some(level) => format!("{crate_name}={level}"),
        None => std::env::var("RUST_LOG").unwrap_or_else(|_| format!("{crate_name}={}", settings.log_level)),
    };
    let filter = EnvFilter::try_new(&directive)
        .map_err(|e| EngineError::Configuration(format!("bad log filter '{directive}': {e}")))?;

    let subscriber = tracing_subscriber::registry().with(filter);
    let result = match settings.log_format.as_str() {
        "compact" => subscriber
            .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
            .try_init(),
        _ => subscriber
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init(),
    };
    result.map_err(|e| EngineError::Configuration(format!("logging already initialised: {e}")))
}

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt};

use crate::LitScoutError;
use crate::config::LoggingConfig;

static TELEMETRY_GUARD: OnceLock<()> = OnceLock::new();

/// Options for [`init_telemetry`].
#[derive(Debug, Clone)]
pub struct TelemetryOptions {
    /// Configured directive string; `RUST_LOG` wins over this when set.
    pub env_filter: Option<String>,
    /// Explicit directive (the `--log-level` flag); wins over `RUST_LOG`.
    pub override_filter: Option<String>,
    pub with_ansi: bool,
    /// Log to stderr so stdout carries only answers.
    pub to_stderr: bool,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            env_filter: None,
            override_filter: None,
            with_ansi: true,
            to_stderr: true,
        }
    }
}

impl TelemetryOptions {
    pub fn from_logging(config: &LoggingConfig) -> Self {
        Self {
            env_filter: Some(config.level.clone()),
            ..Self::default()
        }
    }
}

fn resolve_directives(options: &TelemetryOptions, rust_log: Option<String>) -> String {
    options
        .override_filter
        .clone()
        .or(rust_log)
        .or_else(|| options.env_filter.clone())
        .unwrap_or_else(|| "info".to_string())
}

/// Install the global tracing subscriber. Only the first call has an effect.
pub fn init_telemetry(options: TelemetryOptions) -> Result<(), LitScoutError> {
    if TELEMETRY_GUARD.get().is_some() {
        return Ok(());
    }

    let directives = resolve_directives(&options, std::env::var("RUST_LOG").ok());
    let filter = EnvFilter::try_new(&directives).map_err(|err| {
        LitScoutError::Configuration(format!("invalid log filter `{directives}`: {err}"))
    })?;

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_ansi(options.with_ansi);
    let installed = if options.to_stderr {
        builder.with_writer(std::io::stderr).try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|err| {
        LitScoutError::Configuration(format!("telemetry init failed: {err}"))
    })?;

    TELEMETRY_GUARD.get_or_init(|| ());
    Ok(())
}

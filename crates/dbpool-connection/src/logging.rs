//! Logging and tracing setup for dbpool processes
//!
//! Builds a `tracing` subscriber with:
//! - A pretty console layer for development
//! - An optional JSON file layer with daily rotation
//! - `RUST_LOG` taking precedence over the configured default filter

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::settings::AppEnv;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory for JSON log files; `None` disables file output
    pub log_dir: Option<PathBuf>,

    /// Whether to enable pretty console output
    pub enable_console_logs: bool,

    /// Whether to include file/line information in console logs
    pub include_location: bool,

    /// Whether to log span open/close (for acquire and connect timings)
    pub enable_spans: bool,

    /// Default log level filter
    pub default_filter: String,
}

impl LoggingConfig {
    /// Terse console output, warnings plus pool lifecycle events
    pub fn production() -> Self {
        Self {
            log_dir: None,
            enable_console_logs: true,
            include_location: false,
            enable_spans: false,
            default_filter:
                "warn,dbpool_core=info,dbpool_drivers=info,dbpool_driver_mysql=info,dbpool_connection=info,dbpool=info"
                    .to_string(),
        }
    }

    /// Verbose console output with spans and source locations
    pub fn development() -> Self {
        Self {
            log_dir: None,
            enable_console_logs: true,
            include_location: true,
            enable_spans: true,
            default_filter:
                "info,dbpool_core=debug,dbpool_drivers=debug,dbpool_driver_mysql=debug,dbpool_connection=debug,dbpool=debug"
                    .to_string(),
        }
    }

    /// Console only, everything at debug
    pub fn testing() -> Self {
        Self {
            log_dir: None,
            enable_console_logs: true,
            include_location: true,
            enable_spans: true,
            default_filter: "debug".to_string(),
        }
    }

    pub fn for_app_env(env: AppEnv) -> Self {
        match env {
            AppEnv::Development => Self::development(),
            AppEnv::Production => Self::production(),
        }
    }

    /// Also write JSON logs to `dir`
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::production()
    }
}

/// Keeps the file writer flushing; drop it only at process exit
#[must_use = "dropping the guard stops file logging"]
#[derive(Debug, Default)]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber.
///
/// Fails if a subscriber is already installed or the log directory
/// cannot be created.
pub fn init(config: LoggingConfig) -> anyhow::Result<LoggingGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    // NEW/CLOSE rather than ENTER: an awaited future re-enters its span on every poll
    let span_events = if config.enable_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let mut layers = Vec::new();
    let mut guard = LoggingGuard::default();

    if config.enable_console_logs {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_span_events(span_events.clone())
            .with_ansi(true)
            .pretty()
            .with_filter(env_filter.clone())
            .boxed();

        layers.push(console_layer);
    }

    if let Some(log_dir) = &config.log_dir {
        std::fs::create_dir_all(log_dir)?;
        let file_appender = tracing_appender::rolling::daily(log_dir, "dbpool.log");
        let (non_blocking, worker) = tracing_appender::non_blocking(file_appender);
        guard._file = Some(worker);

        let json_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(span_events)
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(non_blocking)
            .with_filter(env_filter)
            .boxed();

        layers.push(json_layer);
    }

    tracing_subscriber::registry().with(layers).try_init()?;

    tracing::info!(
        log_dir = ?config.log_dir,
        console_enabled = config.enable_console_logs,
        "logging initialized"
    );

    Ok(guard)
}

/// Initialize logging for `APP_ENV`, writing JSON files to `DB_POOL_LOG_DIR` if set
pub fn init_from_env() -> anyhow::Result<LoggingGuard> {
    let mut config = LoggingConfig::for_app_env(AppEnv::from_env());
    if let Some(dir) = std::env::var_os("DB_POOL_LOG_DIR").filter(|d| !d.is_empty()) {
        config = config.with_log_dir(dir);
    }
    init(config)
}

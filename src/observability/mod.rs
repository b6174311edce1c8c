//! Logging setup.
//!
//! Logs go to stderr (or a file) so that hook output on stdout stays a single
//! JSON document. Counters and histograms are emitted through the `metrics`
//! facade; no exporter is installed here, so they are no-ops unless the
//! embedding process installs a recorder.

use crate::config::{LogFormat, LoggingSettings};
use crate::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static OBSERVABILITY_INIT: OnceLock<()> = OnceLock::new();

/// Resolved logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Level filter.
    pub filter: EnvFilter,
    /// Optional log file.
    pub file: Option<std::path::PathBuf>,
}

impl LoggingConfig {
    /// Builds the logging configuration from settings and `RUST_LOG`.
    #[must_use]
    pub fn from_settings(settings: &LoggingSettings, verbose: bool) -> Self {
        let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
        Self::resolve(settings, rust_log.as_deref(), verbose)
    }

    /// Builds the logging configuration with an explicit `RUST_LOG` value.
    ///
    /// The filter comes from the configured directive (`ADVISORY_LOG` lands
    /// there), then `rust_log`, then `advisory=warn`. Unparsable directives
    /// are skipped. `verbose` adds `advisory=debug` on top of any of them.
    #[must_use]
    pub fn resolve(settings: &LoggingSettings, rust_log: Option<&str>, verbose: bool) -> Self {
        let mut filter = [settings.filter.as_deref(), rust_log]
            .into_iter()
            .flatten()
            .filter(|directive| !directive.trim().is_empty())
            .find_map(|directive| EnvFilter::try_new(directive).ok())
            .unwrap_or_else(|| EnvFilter::new("advisory=warn"));
        if verbose && let Ok(debug) = "advisory=debug".parse::<Directive>() {
            filter = filter.add_directive(debug);
        }

        Self {
            format: settings.format,
            filter,
            file: settings.file.clone(),
        }
    }
}

/// Initializes the global subscriber.
///
/// # Errors
///
/// Returns an error if logging was already initialized or the log file
/// cannot be opened.
pub fn init(settings: &LoggingSettings, verbose: bool) -> Result<()> {
    if OBSERVABILITY_INIT.get().is_some() {
        return Err(Error::failed(
            "observability_init",
            "observability already initialized",
        ));
    }

    let config = LoggingConfig::from_settings(settings, verbose);

    match (&config.file, config.format) {
        (Some(log_file), LogFormat::Json) => {
            let writer = open_log_file(log_file)?;
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(writer)
                        .with_current_span(true)
                        .with_target(true),
                )
                .with(config.filter)
                .try_init()
                .map_err(init_error)?;
        },
        (Some(log_file), LogFormat::Pretty) => {
            let writer = open_log_file(log_file)?;
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(true),
                )
                .with(config.filter)
                .try_init()
                .map_err(init_error)?;
        },
        (None, LogFormat::Json) => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(io::stderr)
                        .with_current_span(true)
                        .with_target(true),
                )
                .with(config.filter)
                .try_init()
                .map_err(init_error)?;
        },
        (None, LogFormat::Pretty) => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(io::stderr)
                        .with_target(true),
                )
                .with(config.filter)
                .try_init()
                .map_err(init_error)?;
        },
    }

    OBSERVABILITY_INIT
        .set(())
        .map_err(|()| Error::failed("observability_init", "failed to mark initialized"))
}

/// Thread-safe file writer for logging.
#[derive(Clone)]
struct LogFileWriter {
    file: Arc<Mutex<File>>,
}

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .file
            .lock()
            .map_err(|e| io::Error::other(e.to_string()))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .file
            .lock()
            .map_err(|e| io::Error::other(e.to_string()))?;
        guard.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogFileWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn open_log_file(path: &Path) -> Result<LogFileWriter> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::failed("create_log_dir", e))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::failed("open_log_file", format!("{}: {e}", path.display())))?;

    Ok(LogFileWriter {
        file: Arc::new(Mutex::new(file)),
    })
}

#[allow(clippy::needless_pass_by_value)]
fn init_error(e: tracing_subscriber::util::TryInitError) -> Error {
    Error::failed("observability_init", e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_falls_back() {
        let settings = LoggingSettings {
            filter: Some("[[[not a directive".to_string()),
            ..LoggingSettings::default()
        };
        let config = LoggingConfig::resolve(&settings, None, true);
        assert!(config.filter.to_string().contains("debug"));
    }

    #[test]
    fn test_rust_log_used_without_configured_filter() {
        let config = LoggingConfig::resolve(&LoggingSettings::default(), Some("advisory=info"), false);
        assert!(config.filter.to_string().contains("advisory=info"));

        let fallback = LoggingConfig::resolve(&LoggingSettings::default(), None, false);
        assert!(fallback.filter.to_string().contains("advisory=warn"));
    }

    #[test]
    fn test_configured_filter_wins_over_rust_log() {
        let settings = LoggingSettings {
            filter: Some("advisory=trace".to_string()),
            ..LoggingSettings::default()
        };
        let config = LoggingConfig::resolve(&settings, Some("advisory=info"), false);
        assert!(config.filter.to_string().contains("advisory=trace"));
        assert!(!config.filter.to_string().contains("advisory=info"));
    }

    #[test]
    fn test_verbose_applies_over_configured_filter() {
        let settings = LoggingSettings {
            filter: Some("warn".to_string()),
            ..LoggingSettings::default()
        };
        let config = LoggingConfig::resolve(&settings, None, true);
        let rendered = config.filter.to_string();
        assert!(rendered.contains("warn"));
        assert!(rendered.contains("advisory=debug"));
    }

    #[test]
    fn test_settings_carry_through() {
        let settings = LoggingSettings {
            format: LogFormat::Json,
            filter: Some("advisory=trace".to_string()),
            file: Some("/tmp/advisory.log".into()),
        };
        let config = LoggingConfig::resolve(&settings, None, false);
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.file.is_some());
        assert!(config.filter.to_string().contains("trace"));
    }
}

//! Process-wide logging for the sync tools.
//!
//! # Responsibility
//! - Start one rotating file logger per process and keep its handle alive.
//! - Optionally copy warnings to stderr for interactive runs.
//! - Record panics as a single sanitized log event.
//!
//! # Invariants
//! - A second start with the same level and directory is a no-op.
//! - A second start with a different level or directory is an error.
//! - Nothing in here panics.

use flexi_logger::{
    Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming, WriteMode,
};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "catsync";
const ROTATE_AT_BYTES: u64 = 10 * 1024 * 1024;
const KEEP_LOG_FILES: usize = 5;
const PANIC_PAYLOAD_LIMIT: usize = 160;
const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

struct ActiveLogger {
    settings: LogSettings,
    _handle: LoggerHandle,
}

/// Why logging could not be started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggingError {
    UnknownLevel(String),
    /// Log directory is empty or relative.
    BadDirectory(String),
    /// Logging is already running with a different `field`.
    Conflict {
        field: &'static str,
        active: String,
        requested: String,
    },
    Backend(String),
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownLevel(level) => write!(
                f,
                "unsupported log level `{level}`; expected one of {}",
                LEVELS.join("|")
            ),
            Self::BadDirectory(message) => write!(f, "invalid log directory: {message}"),
            Self::Conflict {
                field,
                active,
                requested,
            } => write!(
                f,
                "logging already running with {field} `{active}`; refusing to switch to `{requested}`"
            ),
            Self::Backend(message) => write!(f, "log backend failed: {message}"),
        }
    }
}

impl Error for LoggingError {}

/// Validated logger settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: &'static str,
    pub log_dir: PathBuf,
    pub echo_warnings: bool,
}

impl LogSettings {
    pub fn parse(level: &str, log_dir: &str, echo_warnings: bool) -> Result<Self, LoggingError> {
        let wanted = match level.trim().to_ascii_lowercase().as_str() {
            "warning" => "warn".to_string(),
            other => other.to_string(),
        };
        let level = LEVELS
            .iter()
            .copied()
            .find(|known| *known == wanted)
            .ok_or(LoggingError::UnknownLevel(wanted))?;

        let log_dir = log_dir.trim();
        if log_dir.is_empty() {
            return Err(LoggingError::BadDirectory("path is empty".to_string()));
        }
        if !Path::new(log_dir).is_absolute() {
            return Err(LoggingError::BadDirectory(format!(
                "`{log_dir}` is not an absolute path"
            )));
        }
        Ok(Self {
            level,
            log_dir: PathBuf::from(log_dir),
            echo_warnings,
        })
    }

    /// Checks `requested` against these (running) settings. The echo flag
    /// is fixed by the first start and never conflicts.
    fn check_compatible(&self, requested: &Self) -> Result<(), LoggingError> {
        if self.log_dir != requested.log_dir {
            return Err(LoggingError::Conflict {
                field: "directory",
                active: self.log_dir.display().to_string(),
                requested: requested.log_dir.display().to_string(),
            });
        }
        if self.level != requested.level {
            return Err(LoggingError::Conflict {
                field: "level",
                active: self.level.to_string(),
                requested: requested.level.to_string(),
            });
        }
        Ok(())
    }

    fn start(&self) -> Result<LoggerHandle, LoggingError> {
        std::fs::create_dir_all(&self.log_dir).map_err(|err| {
            LoggingError::BadDirectory(format!("cannot create `{}`: {err}", self.log_dir.display()))
        })?;
        let duplicate = if self.echo_warnings {
            Duplicate::Warn
        } else {
            Duplicate::None
        };
        Logger::try_with_str(self.level)
            .map_err(|err| LoggingError::Backend(err.to_string()))?
            .log_to_file(
                FileSpec::default()
                    .directory(self.log_dir.as_path())
                    .basename(LOG_FILE_BASENAME),
            )
            .rotate(
                Criterion::Size(ROTATE_AT_BYTES),
                Naming::Numbers,
                Cleanup::KeepLogFiles(KEEP_LOG_FILES),
            )
            .write_mode(WriteMode::BufferAndFlush)
            .append()
            .format_for_files(flexi_logger::detailed_format)
            .duplicate_to_stderr(duplicate)
            .start()
            .map_err(|err| LoggingError::Backend(err.to_string()))
    }
}

/// Starts file logging at `level` into the absolute directory `log_dir`.
///
/// # Errors
/// - Unknown level, empty or relative directory.
/// - Logging already running with another level or directory.
/// - The directory cannot be created or the backend fails to start.
pub fn init_logging(level: &str, log_dir: &str) -> Result<(), LoggingError> {
    init_logging_with_echo(level, log_dir, false)
}

/// [`init_logging`], also copying warnings and errors to stderr when
/// `echo_warnings` is set.
pub fn init_logging_with_echo(level: &str, log_dir: &str, echo_warnings: bool) -> Result<(), LoggingError> {
    let requested = LogSettings::parse(level, log_dir, echo_warnings)?;
    if let Some(active) = ACTIVE.get() {
        return active.settings.check_compatible(&requested);
    }

    let active = ACTIVE.get_or_try_init(|| {
        let handle = requested.start()?;
        install_panic_hook();
        info!(
            "event=logging_started module=logging status=ok version={} os={} level={} log_dir={} echo_warnings={}",
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            requested.level,
            requested.log_dir.display(),
            requested.echo_warnings
        );
        Ok::<_, LoggingError>(ActiveLogger {
            settings: requested.clone(),
            _handle: handle,
        })
    })?;
    // Another thread may have won the race with different settings.
    active.settings.check_compatible(&requested)
}

/// `(level, log_dir)` of the running logger.
pub fn logging_status() -> Option<(&'static str, PathBuf)> {
    ACTIVE
        .get()
        .map(|active| (active.settings.level, active.settings.log_dir.clone()))
}

pub fn warnings_echoed() -> bool {
    ACTIVE
        .get()
        .is_some_and(|active| active.settings.echo_warnings)
}

/// `debug` for debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn install_panic_hook() {
    if PANIC_HOOK.set(()).is_err() {
        return;
    }
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map_or_else(|| "unknown".to_string(), |loc| format!("{}:{}", loc.file(), loc.line()));
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|message| message.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!(
            "event=panic module=logging status=error location={location} payload={}",
            single_line(&payload, PANIC_PAYLOAD_LIMIT)
        );
        previous(info);
    }));
}

// Panic payloads may quote neuron names or tokens.
fn single_line(text: &str, limit: usize) -> String {
    let flat = text.replace(['\n', '\r'], " ");
    if flat.chars().count() <= limit {
        return flat;
    }
    let mut cut: String = flat.chars().take(limit).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::{
        init_logging, init_logging_with_echo, logging_status, single_line, warnings_echoed,
        LogSettings, LoggingError,
    };

    #[test]
    fn settings_normalize_level_names() {
        let settings = LogSettings::parse(" WARNING ", "/var/log/catsync", true).unwrap();
        assert_eq!(settings.level, "warn");
        assert!(settings.echo_warnings);
        assert!(matches!(
            LogSettings::parse("loud", "/tmp", false),
            Err(LoggingError::UnknownLevel(_))
        ));
    }

    #[test]
    fn settings_reject_relative_directory() {
        let err = LogSettings::parse("info", "logs/dev", false).unwrap_err();
        assert!(matches!(err, LoggingError::BadDirectory(_)));
        assert!(err.to_string().contains("absolute"));
    }

    #[test]
    fn single_line_flattens_and_caps() {
        assert_eq!(single_line("a\nb", 10), "a b");
        assert_eq!(single_line("line1\rline2", 4), "line...");
    }

    // Only test in this crate that starts the global logger.
    #[test]
    fn second_start_must_match_the_first() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let first_dir = first.path().to_string_lossy().into_owned();
        let second_dir = second.path().to_string_lossy().into_owned();

        init_logging("info", &first_dir).unwrap();
        init_logging("info", &first_dir).unwrap();

        let err = init_logging("debug", &first_dir).unwrap_err();
        assert!(matches!(err, LoggingError::Conflict { field: "level", .. }));
        let err = init_logging("info", &second_dir).unwrap_err();
        assert!(matches!(err, LoggingError::Conflict { field: "directory", .. }));

        init_logging_with_echo("info", &first_dir, true).unwrap();
        assert!(!warnings_echoed());
        assert_eq!(logging_status(), Some(("info", first.path().to_path_buf())));
    }
}

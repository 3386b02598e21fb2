//! Core logging bootstrap and event-line policy.
//!
//! # Responsibility
//! - Initialize file-based rolling logs exactly once per process.
//! - Render metadata-only `event=... module=... status=...` lines for
//!   Space, migration and boundary operations.
//!
//! # Invariants
//! - Logging init is idempotent for the same level and directory, never
//!   panics, and rejects reconfiguration.
//! - Event lines only carry fields from [`EVENT_FIELDS`]; any other field
//!   value is written as `<redacted>`, so note bodies, titles and setting
//!   values cannot reach a log file through this module.
//! - Field values are flattened to one line and capped in length.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::Level;
use once_cell::sync::OnceCell;
use std::fmt::{Display, Write as _};
use std::path::{Path, PathBuf};
use std::time::Instant;

const LOG_FILE_BASENAME: &str = "spacenote";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;
const MAX_FIELD_CHARS: usize = 160;
const REDACTED: &str = "<redacted>";

/// Field names an event line may carry.
///
/// Identifiers, counts, kinds, timings and error descriptions only. Content
/// columns (`title`, `content_json`, `content_text`, setting `value`) are
/// not listed.
pub const EVENT_FIELDS: &[&str] = &[
    "applied",
    "archived",
    "build_mode",
    "column",
    "command",
    "comments_deleted",
    "duration_ms",
    "error",
    "error_code",
    "error_kind",
    "id",
    "idempotent",
    "kind",
    "latest",
    "level",
    "location",
    "method",
    "mode",
    "name",
    "notes_deleted",
    "payload",
    "pending",
    "platform",
    "references_deleted",
    "reversible",
    "reverted",
    "rows",
    "version",
];

static LOGGING_STATE: OnceCell<LoggingState> = OnceCell::new();
static PANIC_HOOK_INSTALLED: OnceCell<()> = OnceCell::new();

struct LoggingState {
    config: LogConfig,
    _logger: LoggerHandle,
}

/// Severity accepted by [`init_logging`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parses a case-insensitive level name; `warning` is accepted for `warn`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!(
                "unsupported log level `{other}`; expected trace|debug|info|warn|error"
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// `debug` for debug builds, `info` for release builds.
    pub fn for_build() -> Self {
        if cfg!(debug_assertions) {
            Self::Debug
        } else {
            Self::Info
        }
    }
}

/// Validated logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: LogLevel,
    pub dir: PathBuf,
}

impl LogConfig {
    /// Validates a level name and an absolute, non-empty log directory.
    pub fn parse(level: &str, log_dir: &str) -> Result<Self, String> {
        let level = LogLevel::parse(level)?;
        let trimmed = log_dir.trim();
        if trimmed.is_empty() {
            return Err("log_dir cannot be empty".to_string());
        }
        let dir = Path::new(trimmed);
        if !dir.is_absolute() {
            return Err(format!("log_dir must be an absolute path, got `{trimmed}`"));
        }
        Ok(Self {
            level,
            dir: dir.to_path_buf(),
        })
    }

    fn start_logger(&self) -> Result<LoggerHandle, String> {
        std::fs::create_dir_all(&self.dir).map_err(|err| {
            format!(
                "failed to create log directory `{}`: {err}",
                self.dir.display()
            )
        })?;

        Logger::try_with_str(self.level.as_str())
            .map_err(|err| format!("invalid log level `{}`: {err}", self.level.as_str()))?
            .log_to_file(
                FileSpec::default()
                    .directory(self.dir.as_path())
                    .basename(LOG_FILE_BASENAME),
            )
            .rotate(
                Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                Naming::Numbers,
                Cleanup::KeepLogFiles(MAX_LOG_FILES),
            )
            .write_mode(WriteMode::BufferAndFlush)
            .append()
            .format_for_files(flexi_logger::detailed_format)
            .start()
            .map_err(|err| format!("failed to start logger: {err}"))
    }

    fn conflict_with(&self, active: &LogConfig) -> Option<String> {
        if active.dir != self.dir {
            return Some(format!(
                "logging already initialized at `{}`; refusing to switch to `{}`",
                active.dir.display(),
                self.dir.display()
            ));
        }
        if active.level != self.level {
            return Some(format!(
                "logging already initialized with level `{}`; refusing to switch to `{}`",
                active.level.as_str(),
                self.level.as_str()
            ));
        }
        None
    }
}

/// Initializes core logging with level and directory.
///
/// Returns `Ok(())` when logging is active with exactly this configuration,
/// or a human-readable error string.
pub fn init_logging(level: &str, log_dir: &str) -> Result<(), String> {
    let config = LogConfig::parse(level, log_dir)?;
    let state = LOGGING_STATE.get_or_try_init(|| -> Result<LoggingState, String> {
        let logger = config.start_logger()?;
        install_panic_hook_once();
        EventLine::ok("core_init", "core")
            .field("platform", std::env::consts::OS)
            .field("build_mode", if cfg!(debug_assertions) { "debug" } else { "release" })
            .field("version", env!("CARGO_PKG_VERSION"))
            .field("level", config.level.as_str())
            .emit();
        Ok(LoggingState {
            config: config.clone(),
            _logger: logger,
        })
    })?;

    match config.conflict_with(&state.config) {
        Some(conflict) => Err(conflict),
        None => Ok(()),
    }
}

/// Returns `(level, log_dir)` once logging is active.
pub fn logging_status() -> Option<(&'static str, PathBuf)> {
    LOGGING_STATE
        .get()
        .map(|state| (state.config.level.as_str(), state.config.dir.clone()))
}

/// Returns the default log level name for the current build mode.
pub fn default_log_level() -> &'static str {
    LogLevel::for_build().as_str()
}

/// Phase of the operation an event line reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Start,
    Ok,
    Error,
}

impl EventStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// One `key=value` diagnostic record.
///
/// ```
/// use spacenote_core::EventLine;
///
/// let line = EventLine::ok("space_open", "space").field("applied", 2);
/// assert_eq!(line.as_str(), "event=space_open module=space status=ok applied=2");
/// ```
#[derive(Debug, Clone)]
pub struct EventLine {
    level: Level,
    line: String,
}

impl EventLine {
    pub fn new(event: &str, module: &str, status: EventStatus) -> Self {
        let level = match status {
            EventStatus::Error => Level::Error,
            EventStatus::Start | EventStatus::Ok => Level::Info,
        };
        Self {
            level,
            line: format!("event={event} module={module} status={}", status.as_str()),
        }
    }

    pub fn start(event: &str, module: &str) -> Self {
        Self::new(event, module, EventStatus::Start)
    }

    pub fn ok(event: &str, module: &str) -> Self {
        Self::new(event, module, EventStatus::Ok)
    }

    pub fn error(event: &str, module: &str) -> Self {
        Self::new(event, module, EventStatus::Error)
    }

    /// Overrides the severity chosen from the status.
    pub fn at(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Appends `key=value`, redacting keys outside [`EVENT_FIELDS`].
    pub fn field(mut self, key: &str, value: impl Display) -> Self {
        let _ = if EVENT_FIELDS.contains(&key) {
            write!(
                self.line,
                " {key}={}",
                sanitize_value(&value.to_string(), MAX_FIELD_CHARS)
            )
        } else {
            write!(self.line, " {key}={REDACTED}")
        };
        self
    }

    pub fn elapsed(self, started_at: Instant) -> Self {
        self.field("duration_ms", started_at.elapsed().as_millis())
    }

    pub fn as_str(&self) -> &str {
        &self.line
    }

    pub fn emit(self) {
        log::log!(self.level, "{}", self.line);
    }
}

fn install_panic_hook_once() {
    if PANIC_HOOK_INSTALLED.set(()).is_err() {
        return;
    }

    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_info
            .payload()
            .downcast_ref::<&str>()
            .map(|message| (*message).to_string())
            .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        EventLine::error("panic_captured", "core")
            .field("location", location)
            .field("payload", payload)
            .emit();
        previous_hook(panic_info);
    }));
}

fn sanitize_value(value: &str, max_chars: usize) -> String {
    let flattened = value.replace(['\n', '\r'], " ");
    let mut capped = flattened.chars().take(max_chars).collect::<String>();
    if flattened.chars().count() > max_chars {
        capped.push_str("...");
    }
    capped
}

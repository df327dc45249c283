//! Structured logging and tracing for vigil
//!
//! Provides structured logging with console and rotating file sinks, and a
//! broadcast channel of formatted lines so the Display component can show a
//! recent-log banner without depending on the tracing registry directly.

use crate::config::LoggingConfig;
use crate::error::{Result, VigilError};
use once_cell::sync::OnceCell;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Once;
use std::sync::RwLock as StdRwLock;
use tokio::sync::broadcast;
use tracing::{Level, debug, error, info, trace, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::MakeWriter;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// Keep the non-blocking worker guard alive for the entire process lifetime
static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static INIT_ONCE: Once = Once::new();
static INIT_ERROR: OnceCell<String> = OnceCell::new();
static LOG_BROADCAST_TX: OnceCell<broadcast::Sender<String>> = OnceCell::new();
static DISPLAY_LOG_LEVEL: OnceCell<StdRwLock<Level>> = OnceCell::new();

#[derive(Clone)]
struct BroadcastMakeWriter {
    tx: broadcast::Sender<String>,
}

struct BroadcastWriter {
    tx: broadcast::Sender<String>,
    buffer: Vec<u8>,
}

impl<'a> MakeWriter<'a> for BroadcastMakeWriter {
    type Writer = BroadcastWriter;
    fn make_writer(&'a self) -> Self::Writer {
        BroadcastWriter {
            tx: self.tx.clone(),
            buffer: Vec::with_capacity(256),
        }
    }
}

impl Write for BroadcastWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for BroadcastWriter {
    fn drop(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let mut line = String::from_utf8_lossy(&self.buffer).to_string();
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        let _ = self.tx.send(line);
    }
}

fn get_or_init_log_tx() -> broadcast::Sender<String> {
    LOG_BROADCAST_TX
        .get_or_init(|| {
            let (tx, _rx) = broadcast::channel::<String>(1024);
            tx
        })
        .clone()
}

/// Initialize logging system based on configuration
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    INIT_ONCE.call_once(|| {
        let init_result = (|| -> Result<()> {
            let base_level = parse_log_level(&config.level)?;

            let console_level = config
                .console_level
                .as_ref()
                .and_then(|s| parse_log_level(s).ok())
                .unwrap_or(base_level);
            let file_level = config
                .file_level
                .as_ref()
                .and_then(|s| parse_log_level(s).ok())
                .unwrap_or(base_level);
            let display_level = config
                .display_level
                .as_ref()
                .and_then(|s| parse_log_level(s).ok())
                .unwrap_or(base_level);

            let most_verbose = min_level(min_level(console_level, file_level), display_level);
            let filter = build_env_filter(most_verbose);

            if should_use_console_only() {
                init_console_only_logging(filter, config.json_format, console_level);
                let _ = DISPLAY_LOG_LEVEL.set(StdRwLock::new(display_level));
                return Ok(());
            }

            init_file_logging(config, filter, console_level, file_level)?;
            let _ = DISPLAY_LOG_LEVEL.set(StdRwLock::new(display_level));
            Ok(())
        })();

        if let Err(e) = init_result {
            let _ = INIT_ERROR.set(e.to_string());
        }
    });

    if let Some(err) = INIT_ERROR.get() {
        return Err(VigilError::config(err.clone()));
    }
    Ok(())
}

fn build_env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| format!("vigil={}", level).into())
}

fn should_use_console_only() -> bool {
    cfg!(test) || std::env::var_os("VIGIL_DISABLE_FILE_LOG").is_some()
}

fn init_console_only_logging(filter: EnvFilter, json_format: bool, console_level: Level) {
    let console_layer = {
        let layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false);
        if json_format {
            layer
                .json()
                .with_filter(LevelFilter::from_level(console_level))
                .boxed()
        } else {
            layer
                .with_filter(LevelFilter::from_level(console_level))
                .boxed()
        }
    };

    let broadcast_layer = {
        let make = BroadcastMakeWriter {
            tx: get_or_init_log_tx(),
        };
        let base = fmt::layer()
            .with_writer(make)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false);
        if json_format {
            base.json().with_filter(LevelFilter::TRACE).boxed()
        } else {
            base.with_filter(LevelFilter::TRACE).boxed()
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(broadcast_layer)
        .init();

    info!(
        "Logging initialized - console_level: {:?}, console-only",
        console_level
    );
}

fn init_file_logging(
    config: &LoggingConfig,
    filter: EnvFilter,
    console_level: Level,
    file_level: Level,
) -> Result<()> {
    let registry = tracing_subscriber::registry().with(filter);

    let file_appender = rolling::Builder::new()
        .rotation(rolling::Rotation::DAILY)
        .filename_prefix("service")
        .filename_suffix("log")
        .max_log_files(config.backup_count as usize)
        .build({
            let p = Path::new(&config.file);
            if p.extension().is_some() {
                p.parent().unwrap_or(p)
            } else {
                p
            }
        })
        .map_err(|e| VigilError::io(format!("failed to create log file appender: {}", e)))?;

    let (non_blocking_appender, guard) = non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let file_layer = {
        let base = fmt::layer()
            .with_writer(non_blocking_appender)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false);
        if config.json_format {
            base.json()
                .with_filter(LevelFilter::from_level(file_level))
                .boxed()
        } else {
            base.with_filter(LevelFilter::from_level(file_level))
                .boxed()
        }
    };

    let broadcast_layer = {
        let make = BroadcastMakeWriter {
            tx: get_or_init_log_tx(),
        };
        let base = fmt::layer()
            .with_writer(make)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false);
        if config.json_format {
            base.json().with_filter(LevelFilter::TRACE).boxed()
        } else {
            base.with_filter(LevelFilter::TRACE).boxed()
        }
    };

    let subscriber = registry.with(file_layer).with(broadcast_layer);

    if config.console_output {
        let console_layer = {
            let base = fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false);
            if config.json_format {
                base.json()
                    .with_filter(LevelFilter::from_level(console_level))
                    .boxed()
            } else {
                base.with_filter(LevelFilter::from_level(console_level))
                    .boxed()
            }
        };
        subscriber.with(console_layer).init();
    } else {
        subscriber.init();
    }

    info!(
        "Logging initialized - console_level: {:?}, file_level: {:?}, file: {}",
        console_level, file_level, config.file
    );
    Ok(())
}

/// Parse log level string to tracing Level
fn parse_log_level(level_str: &str) -> Result<Level> {
    match level_str.to_uppercase().as_str() {
        "TRACE" => Ok(Level::TRACE),
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARN" | "WARNING" => Ok(Level::WARN),
        "ERROR" => Ok(Level::ERROR),
        _ => Err(VigilError::config(format!(
            "invalid log level: {}",
            level_str
        ))),
    }
}

/// Context information for log messages
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Component name (e.g., "orchestrator", "poller", "store")
    pub component: String,

    /// Drive session id for tracking a single drive's events
    pub session_id: Option<String>,

    /// Additional context fields
    pub extra_fields: std::collections::HashMap<String, String>,
}

impl LogContext {
    /// Create a new log context
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            session_id: None,
            extra_fields: std::collections::HashMap::new(),
        }
    }

    /// Set session ID
    pub fn with_session_id(mut self, session_id: String) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Add extra field
    pub fn with_field(mut self, key: &str, value: String) -> Self {
        self.extra_fields.insert(key.to_string(), value);
        self
    }
}

/// Structured logger with context
#[derive(Clone)]
pub struct StructuredLogger {
    context: LogContext,
}

impl StructuredLogger {
    /// Create a new structured logger with context
    pub fn new(context: LogContext) -> Self {
        Self { context }
    }

    /// Log an info message with context
    pub fn info(&self, message: &str) {
        let fields = self.format_fields();
        info!(%fields, "{}", message);
    }

    /// Log a warning message with context
    pub fn warn(&self, message: &str) {
        let fields = self.format_fields();
        warn!(%fields, "{}", message);
    }

    /// Log an error message with context
    pub fn error(&self, message: &str) {
        let fields = self.format_fields();
        error!(%fields, "{}", message);
    }

    /// Log a debug message with context
    pub fn debug(&self, message: &str) {
        let fields = self.format_fields();
        debug!(%fields, "{}", message);
    }

    /// Log a trace message with context
    pub fn trace(&self, message: &str) {
        let fields = self.format_fields();
        trace!(%fields, "{}", message);
    }

    fn format_fields(&self) -> String {
        let mut fields = vec![format!("component={}", self.context.component)];

        if let Some(ref session_id) = self.context.session_id {
            fields.push(format!("session_id={}", session_id));
        }

        for (key, value) in &self.context.extra_fields {
            fields.push(format!("{}={}", key, value));
        }

        fields.join(",")
    }
}

/// Create a logger for a specific component
pub fn get_logger(component: &str) -> StructuredLogger {
    let context = LogContext::new(component);
    StructuredLogger::new(context)
}

/// Create a logger with full context
pub fn get_logger_with_context(context: LogContext) -> StructuredLogger {
    StructuredLogger::new(context)
}

/// Subscribe to a stream of formatted log lines (consumed by Display)
pub fn subscribe_log_lines() -> broadcast::Receiver<String> {
    get_or_init_log_tx().subscribe()
}

/// Set the runtime level threshold used to decide whether a line reaches Display
pub fn set_display_log_level(new_level: Level) {
    if let Some(lock) = DISPLAY_LOG_LEVEL.get() {
        if let Ok(mut guard) = lock.write() {
            *guard = new_level;
        }
    } else {
        let _ = DISPLAY_LOG_LEVEL.set(StdRwLock::new(new_level));
    }
}

/// Get the current runtime display log level. Defaults to INFO if unset.
pub fn get_display_log_level() -> Level {
    DISPLAY_LOG_LEVEL
        .get()
        .and_then(|lock| lock.read().ok().map(|g| *g))
        .unwrap_or(Level::INFO)
}

fn level_rank(level: Level) -> u8 {
    match level {
        Level::TRACE => 0,
        Level::DEBUG => 1,
        Level::INFO => 2,
        Level::WARN => 3,
        Level::ERROR => 4,
    }
}

fn min_level(a: Level, b: Level) -> Level {
    if level_rank(a) <= level_rank(b) { a } else { b }
}

/// Try to parse a level out of a formatted log line
pub fn parse_line_level(line: &str) -> Option<Level> {
    if line.contains("\"level\":\"TRACE\"") {
        return Some(Level::TRACE);
    }
    if line.contains("\"level\":\"DEBUG\"") {
        return Some(Level::DEBUG);
    }
    if line.contains("\"level\":\"INFO\"") {
        return Some(Level::INFO);
    }
    if line.contains("\"level\":\"WARN\"") {
        return Some(Level::WARN);
    }
    if line.contains("\"level\":\"ERROR\"") {
        return Some(Level::ERROR);
    }

    if line.contains(" TRACE ") {
        return Some(Level::TRACE);
    }
    if line.contains(" DEBUG ") {
        return Some(Level::DEBUG);
    }
    if line.contains(" INFO ") {
        return Some(Level::INFO);
    }
    if line.contains(" WARN ") {
        return Some(Level::WARN);
    }
    if line.contains(" ERROR ") {
        return Some(Level::ERROR);
    }
    None
}

/// Whether a formatted line should be surfaced to Display given the runtime level
pub fn should_emit_to_display(line: &str) -> bool {
    let current = get_display_log_level();
    match parse_line_level(line) {
        Some(line_lvl) => level_rank(line_lvl) >= level_rank(current),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn init_test_logging() {
        INIT.call_once(|| {
            let config = LoggingConfig::default();
            init_logging(&config).ok();
        });
    }

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("ERROR").unwrap(), Level::ERROR);
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_log_context() {
        let context = LogContext::new("test")
            .with_session_id("session_123".to_string())
            .with_field("key", "value".to_string());

        assert_eq!(context.component, "test");
        assert_eq!(context.session_id, Some("session_123".to_string()));
        assert_eq!(context.extra_fields.get("key"), Some(&"value".to_string()));
    }

    #[test]
    fn test_structured_logger() {
        init_test_logging();

        let context = LogContext::new("test_component");
        let logger = StructuredLogger::new(context);

        logger.info("Test info message");
        logger.debug("Test debug message");
        logger.warn("Test warning message");
        logger.error("Test error message");
    }

    #[test]
    fn test_get_logger() {
        let logger = get_logger("test_component");
        assert_eq!(logger.context.component, "test_component");
    }
}

//! Structured Logging
//!
//! Global `log::Log` implementation with two output formats: human-readable
//! text for interactive use and JSON lines for ingestion. JSON records carry
//! the task-local trace and request ids so every line emitted while handling
//! an event or HTTP request can be correlated.
//!
//! The logger is installed once and reconfigured in place; `log::set_logger`
//! only works a single time per process.

use crate::core::trace;
use log::{LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
struct LogConfig {
    level: LevelFilter,
    format_json: bool,
    file_path: Option<String>,
}

struct JsonLineLogger {
    config: Arc<Mutex<LogConfig>>,
    file_writer: Arc<Mutex<Option<File>>>,
}

impl JsonLineLogger {
    fn new() -> Self {
        Self {
            config: Arc::new(Mutex::new(LogConfig {
                level: LevelFilter::Info,
                format_json: true,
                file_path: None,
            })),
            file_writer: Arc::new(Mutex::new(None)),
        }
    }

    fn reconfigure(
        &self,
        log_level: Option<&str>,
        log_format: Option<&str>,
        log_file: Option<&str>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let level = match log_level {
            Some(level_str) => match level_str.to_lowercase().as_str() {
                "trace" => LevelFilter::Trace,
                "debug" => LevelFilter::Debug,
                "info" => LevelFilter::Info,
                "warn" => LevelFilter::Warn,
                "error" => LevelFilter::Error,
                "off" => LevelFilter::Off,
                _ => LevelFilter::Info,
            },
            None => LevelFilter::Info,
        };

        let format_json = log_format != Some("text");
        let file_path = log_file.map(|s| s.to_string());

        // Handle file writer changes
        match &file_path {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                *self.file_writer.lock().unwrap() = Some(file);
            }
            None => {
                *self.file_writer.lock().unwrap() = None;
            }
        }

        *self.config.lock().unwrap() = LogConfig {
            level,
            format_json,
            file_path,
        };

        log::set_max_level(level);

        Ok(())
    }

    fn format_message(&self, record: &Record, config: &LogConfig) -> String {
        if config.format_json {
            format_json_record(record)
        } else {
            format!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.target(),
                record.level(),
                record.args()
            )
        }
    }
}

/// Build one JSON object for a log record.
///
/// Field set: timestamp (RFC 3339 with offset), level, message, logger,
/// module, line, plus trace_id/request_id when a trace context is installed
/// on the current task. serde_json handles escaping; never assemble the line
/// with string formatting.
fn format_json_record(record: &Record) -> String {
    let mut obj = serde_json::Map::new();
    obj.insert(
        "timestamp".into(),
        serde_json::Value::String(chrono::Local::now().to_rfc3339()),
    );
    obj.insert(
        "level".into(),
        serde_json::Value::String(record.level().to_string()),
    );
    obj.insert(
        "message".into(),
        serde_json::Value::String(record.args().to_string()),
    );
    obj.insert(
        "logger".into(),
        serde_json::Value::String(record.target().to_string()),
    );
    if let Some(module) = record.module_path() {
        obj.insert("module".into(), serde_json::Value::String(module.into()));
    }
    if let Some(line) = record.line() {
        obj.insert("line".into(), serde_json::Value::Number(line.into()));
    }
    if let Some(ctx) = trace::current() {
        obj.insert("trace_id".into(), serde_json::Value::String(ctx.trace_id));
        obj.insert(
            "request_id".into(),
            serde_json::Value::String(ctx.request_id),
        );
    }
    serde_json::Value::Object(obj).to_string()
}

impl Log for JsonLineLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        let config = self.config.lock().unwrap();
        metadata.level() <= config.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let config = self.config.lock().unwrap();
        let message = self.format_message(record, &config);

        // Console output
        println!("{}", message);

        // File output (only if the file_path is set, and file_writer exists)
        if config.file_path.is_some() {
            if let Ok(mut file_opt) = self.file_writer.lock() {
                if let Some(ref mut file) = file_opt.as_mut() {
                    let _ = writeln!(file, "{}", message);
                    let _ = file.flush();
                }
            }
        }
    }

    fn flush(&self) {
        if let Ok(mut file_opt) = self.file_writer.lock() {
            if let Some(ref mut file) = file_opt.as_mut() {
                let _ = file.flush();
            }
        }
    }
}

// Global static logger
static LOGGER: std::sync::OnceLock<JsonLineLogger> = std::sync::OnceLock::new();

pub fn init_logging(
    log_level: Option<&str>,
    log_format: Option<&str>,
    log_file: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let logger = LOGGER.get_or_init(JsonLineLogger::new);

    // Set as the global logger (only works once)
    log::set_logger(logger)?;

    logger.reconfigure(log_level, log_format, log_file)?;

    Ok(())
}

pub fn reconfigure_logging(
    log_level: Option<&str>,
    log_format: Option<&str>,
    log_file: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(logger) = LOGGER.get() {
        logger.reconfigure(log_level, log_format, log_file)?;
        Ok(())
    } else {
        Err("Logger is not initialised. Call init_logging first.".into())
    }
}

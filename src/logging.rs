//! Structured logging for fixture mutations and timer firings.
//!
//! Records carry a category (`"dom"`, `"timer"`, `"mutator"`, `"wait"`) and
//! optional JSON auxiliary data. They go to an external sink when one is
//! configured, otherwise to the `log` facade. Failures inside timer callbacks
//! cannot be returned to anyone, so an error record is how they surface.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Verbosity;

/// Convenience alias for external logging callbacks.
pub type LogCallback = Arc<dyn Fn(&FixtureLogRecord) + Send + Sync + 'static>;

/// Logging configuration shared by the mutator and the page facade.
#[derive(Clone)]
pub struct LogConfig {
    pub verbose: Verbosity,
    pub external_logger: Option<LogCallback>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            verbose: Verbosity::Medium,
            external_logger: None,
        }
    }
}

impl LogConfig {
    pub fn new(verbose: Verbosity) -> Self {
        Self {
            verbose,
            ..Default::default()
        }
    }

    pub fn should_log(&self, level: LogLevel) -> bool {
        level == LogLevel::Error || level.as_u8() <= self.verbose.as_u8()
    }
}

/// Log severity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error = 0,
    Info = 1,
    Debug = 2,
}

impl LogLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    fn as_log_level(self) -> log::Level {
        match self {
            LogLevel::Error => log::Level::Error,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
        }
    }
}

/// Structured log entry shared with external callbacks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixtureLogRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auxiliary: Option<Value>,
}

impl FixtureLogRecord {
    pub fn new(
        message: impl Into<String>,
        level: LogLevel,
        category: Option<String>,
        auxiliary: Option<Value>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            level,
            category,
            auxiliary,
        }
    }
}

/// Default handler: forwards the record to the `log` facade.
pub fn default_log_handler(record: &FixtureLogRecord) {
    let target = match &record.category {
        Some(category) => format!("fixture_page::{category}"),
        None => "fixture_page".to_string(),
    };
    match record.auxiliary.as_ref().filter(|aux| !aux.is_null()) {
        Some(aux) => log::log!(
            target: target.as_str(),
            record.level.as_log_level(),
            "{} {}",
            record.message,
            aux
        ),
        None => log::log!(target: target.as_str(), record.level.as_log_level(), "{}", record.message),
    }
}

/// Fixture logger with verbosity gating and an optional external sink.
pub struct FixtureLogger {
    config: LogConfig,
    default_handler: LogCallback,
}

impl fmt::Debug for FixtureLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixtureLogger")
            .field("verbosity", &self.config.verbose)
            .field("external_logger", &self.config.external_logger.is_some())
            .finish()
    }
}

impl Default for FixtureLogger {
    fn default() -> Self {
        Self::with_config(LogConfig::default())
    }
}

impl FixtureLogger {
    pub fn with_config(config: LogConfig) -> Self {
        Self {
            config,
            default_handler: Arc::new(default_log_handler),
        }
    }

    pub fn new(verbose: Verbosity) -> Self {
        Self::with_config(LogConfig::new(verbose))
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub fn set_external_logger(&mut self, logger: Option<LogCallback>) {
        self.config.external_logger = logger;
    }

    pub fn log(
        &self,
        message: impl Into<String>,
        level: LogLevel,
        category: Option<&str>,
        auxiliary: Option<Value>,
    ) {
        if !self.config.should_log(level) {
            return;
        }

        let record =
            FixtureLogRecord::new(message, level, category.map(|c| c.to_string()), auxiliary);

        if let Some(callback) = &self.config.external_logger {
            callback(&record);
        } else {
            (self.default_handler)(&record);
        }
    }

    pub fn error(&self, message: impl Into<String>, category: Option<&str>, auxiliary: Option<Value>) {
        self.log(message, LogLevel::Error, category, auxiliary);
    }

    pub fn info(&self, message: impl Into<String>, category: Option<&str>, auxiliary: Option<Value>) {
        self.log(message, LogLevel::Info, category, auxiliary);
    }

    pub fn debug(&self, message: impl Into<String>, category: Option<&str>, auxiliary: Option<Value>) {
        self.log(message, LogLevel::Debug, category, auxiliary);
    }
}

/// Build a logger whose records are collected into the returned vector.
///
/// Used by tests to observe timer failures, which are only ever reported
/// through the logger.
#[cfg(test)]
pub(crate) fn capturing_logger(
    verbose: Verbosity,
) -> (FixtureLogger, Arc<std::sync::Mutex<Vec<FixtureLogRecord>>>) {
    let records = Arc::new(std::sync::Mutex::new(Vec::new()));
    let capture = Arc::clone(&records);
    let callback: LogCallback = Arc::new(move |record| {
        capture.lock().unwrap().push(record.clone());
    });
    let mut logger = FixtureLogger::new(verbose);
    logger.set_external_logger(Some(callback));
    (logger, records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respects_verbosity() {
        let logger = FixtureLogger::new(Verbosity::Minimal);
        assert!(logger.config().should_log(LogLevel::Error));
        assert!(!logger.config().should_log(LogLevel::Info));
        assert!(!logger.config().should_log(LogLevel::Debug));

        let logger = FixtureLogger::new(Verbosity::Detailed);
        assert!(logger.config().should_log(LogLevel::Debug));
    }

    #[test]
    fn external_logger_is_invoked() {
        let (logger, records) = capturing_logger(Verbosity::Detailed);

        logger.info("hello", Some("timer"), Some(serde_json::json!({ "delay_ms": 5 })));

        let values = records.lock().unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].message, "hello");
        assert_eq!(values[0].category.as_deref(), Some("timer"));
        assert_eq!(values[0].level, LogLevel::Info);
        assert_eq!(
            values[0].auxiliary.as_ref().unwrap(),
            &serde_json::json!({ "delay_ms": 5 })
        );
    }

    #[test]
    fn filtered_records_never_reach_the_sink() {
        let (logger, records) = capturing_logger(Verbosity::Minimal);

        logger.debug("noise", Some("dom"), None);
        logger.info("chatter", None, None);
        logger.error("boom", Some("timer"), None);

        let values = records.lock().unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].message, "boom");
    }

    #[test]
    fn record_serializes_without_empty_fields() {
        let record = FixtureLogRecord::new("plain", LogLevel::Debug, None, None);
        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(value["level"], "debug");
        assert!(value.get("category").is_none());
        assert!(value.get("auxiliary").is_none());
    }
}

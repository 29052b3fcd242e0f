//! Logging initialization and configuration
//!
//! Structured logging with `tracing`. Two sinks:
//! - Text logs to stdout, JSON for production or pretty-printed for development,
//!   written through a non-blocking appender.
//! - The backend [`StoreLayer`], which records events at or above
//!   `log.backend.level` into the [`LogStore`] so tasks and endpoints can
//!   query them later.
//!
//! Events carry their context as fields. `course_id`, `assignment_id` and
//! `user_email` become the matching [`LogRecord`] columns; every other field
//! lands in `attributes`.

use crate::config::{options, Config};
use crate::model::{LogLevel, LogRecord};
use crate::services::LogStore;
use crate::timestamp::Timestamp;
use anyhow::{Context, Result};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log format: JSON for production, pretty-print for development
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Text log level: trace/debug/info/warn/error
    pub text_level: LogLevel,
    pub format: LogFormat,
    /// Minimum level recorded into the log store
    pub backend_level: LogLevel,
    /// Write text logs through a background thread
    pub async_logging: bool,
    /// Include file:line location (dev only)
    pub include_location: bool,
}

impl LogConfig {
    pub fn from_config(config: &Config) -> Self {
        let testing = options::UNIT_TESTING_MODE.get(config);
        Self {
            text_level: parse_level(&options::LOG_TEXT_LEVEL.get(config)),
            format: LogFormat::parse(&options::LOG_TEXT_FORMAT.get(config)),
            backend_level: parse_level(&options::LOG_BACKEND_LEVEL.get(config)),
            async_logging: !testing,
            include_location: testing,
        }
    }
}

fn parse_level(s: &str) -> LogLevel {
    s.parse().unwrap_or(LogLevel::Info)
}

fn to_tracing_level(level: LogLevel) -> Level {
    match level {
        LogLevel::Trace => Level::TRACE,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Info => Level::INFO,
        LogLevel::Warn => Level::WARN,
        LogLevel::Error => Level::ERROR,
    }
}

/// Records every event it sees into a [`LogStore`].
pub struct StoreLayer {
    store: Arc<dyn LogStore>,
}

impl StoreLayer {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self { store }
    }
}

#[derive(Default)]
struct RecordVisitor {
    record: LogRecord,
}

impl RecordVisitor {
    fn set(&mut self, field: &Field, value: Value) {
        match field.name() {
            "message" => self.record.message = value_text(value),
            "course_id" => self.record.course_id = value_text(value),
            "assignment_id" => self.record.assignment_id = value_text(value),
            "user_email" => self.record.user_email = value_text(value),
            name => {
                self.record.attributes.insert(name.to_string(), value);
            }
        }
    }
}

fn value_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.set(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.set(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.set(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.set(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.set(field, Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.set(field, Value::from(format!("{value:?}")));
    }
}

impl<S> Layer<S> for StoreLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: LayerContext<'_, S>) {
        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        let mut record = visitor.record;
        record.level = LogLevel::from(*event.metadata().level());
        record.timestamp = Timestamp::now();

        if let Err(e) = self.store.record(record) {
            // Logging through tracing here would re-enter this layer.
            eprintln!("Failed to store log record: {e:#}");
        }
    }
}

/// Initialize the global subscriber.
///
/// With `store`, events at or above `backend_level` are also recorded there.
/// Fails if a global subscriber is already set.
pub fn init_logging(config: &LogConfig, store: Option<Arc<dyn LogStore>>) -> Result<()> {
    let level = to_tracing_level(config.text_level);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()))
        // Client disconnects are reported at debug/info; keep warn+.
        .add_directive("may_minihttp::http_server=warn".parse()?);

    let store_layer = store.map(|store| {
        StoreLayer::new(store).with_filter(LevelFilter::from_level(to_tracing_level(
            config.backend_level,
        )))
    });

    if config.async_logging {
        let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());

        let fmt_layer = match config.format {
            LogFormat::Json => tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true)
                .with_thread_names(true)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_writer(non_blocking)
                .boxed(),
            LogFormat::Pretty => tracing_subscriber::fmt::layer()
                .pretty()
                .with_target(true)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_writer(non_blocking)
                .boxed(),
        };

        tracing_subscriber::registry()
            .with(fmt_layer.with_filter(env_filter))
            .with(store_layer)
            .try_init()
            .context("Failed to initialize async logging")?;

        // The guard flushes on drop; keep it for the life of the process.
        std::mem::forget(guard);
    } else {
        let fmt_layer = match config.format {
            LogFormat::Json => tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true)
                .with_thread_names(true)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .boxed(),
            LogFormat::Pretty => tracing_subscriber::fmt::layer()
                .pretty()
                .with_target(true)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .boxed(),
        };

        tracing_subscriber::registry()
            .with(fmt_layer.with_filter(env_filter))
            .with(store_layer)
            .try_init()
            .context("Failed to initialize sync logging")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogQuery;
    use crate::services::memory::MemoryLogStore;
    use tracing::{debug, error, info};

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("invalid"), LogFormat::Json);
    }

    #[test]
    fn test_log_config_from_config() {
        let mut config = Config::new();
        config.set("log.text.level", "debug");
        config.set("log.text.format", "pretty");
        config.set("log.backend.level", "nonsense");

        let log = LogConfig::from_config(&config);
        assert_eq!(log.text_level, LogLevel::Debug);
        assert_eq!(log.format, LogFormat::Pretty);
        assert_eq!(log.backend_level, LogLevel::Info);
        assert!(log.async_logging);
    }

    #[test]
    fn test_store_layer_records_context_fields() {
        let store = Arc::new(MemoryLogStore::default());
        let subscriber = tracing_subscriber::registry().with(
            StoreLayer::new(store.clone()).with_filter(LevelFilter::INFO),
        );

        tracing::subscriber::with_default(subscriber, || {
            debug!(course_id = "course101", "below the backend level");
            info!(
                course_id = "course101",
                user_email = "student@test.com",
                attempts = 3u64,
                "Submission graded"
            );
            error!(assignment_id = "hw0", reason = %"timeout", "Grading failed");
        });

        assert_eq!(store.len(), 2);

        let records = store
            .query(&LogQuery {
                level: LogLevel::Info,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(records[0].message, "Submission graded");
        assert_eq!(records[0].course_id, "course101");
        assert_eq!(records[0].user_email, "student@test.com");
        assert_eq!(records[0].attributes.get("attempts"), Some(&Value::from(3u64)));

        assert_eq!(records[1].level, LogLevel::Error);
        assert_eq!(records[1].assignment_id, "hw0");
        assert_eq!(
            records[1].attributes.get("reason"),
            Some(&Value::from("timeout"))
        );
    }
}

use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => LogLevel::Trace,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// A log event persisted by the backend log layer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: Timestamp,
    #[serde(rename = "course-id", default, skip_serializing_if = "String::is_empty")]
    pub course_id: String,
    #[serde(rename = "assignment-id", default, skip_serializing_if = "String::is_empty")]
    pub assignment_id: String,
    #[serde(rename = "user-email", default, skip_serializing_if = "String::is_empty")]
    pub user_email: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
}

impl Display for LogRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {} {}", self.level, self.timestamp, self.message)?;
        if !self.course_id.is_empty() {
            write!(f, " course-id={}", self.course_id)?;
        }
        if !self.assignment_id.is_empty() {
            write!(f, " assignment-id={}", self.assignment_id)?;
        }
        if !self.user_email.is_empty() {
            write!(f, " user-email={}", self.user_email)?;
        }
        for (key, value) in &self.attributes {
            write!(f, " {key}={value}")?;
        }
        Ok(())
    }
}

/// Filter over stored log records.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub after: Timestamp,
    #[serde(rename = "course-id", default, skip_serializing_if = "String::is_empty")]
    pub course_id: String,
    #[serde(rename = "assignment-id", default, skip_serializing_if = "String::is_empty")]
    pub assignment_id: String,
    #[serde(rename = "user-email", default, skip_serializing_if = "String::is_empty")]
    pub user_email: String,
}

impl LogQuery {
    pub fn matches(&self, record: &LogRecord) -> bool {
        record.level >= self.level
            && record.timestamp >= self.after
            && (self.course_id.is_empty() || record.course_id == self.course_id)
            && (self.assignment_id.is_empty() || record.assignment_id == self.assignment_id)
            && (self.user_email.is_empty() || record.user_email == self.user_email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(level: LogLevel, ts: i64, course: &str, user: &str) -> LogRecord {
        LogRecord {
            level,
            message: "m".into(),
            timestamp: Timestamp(ts),
            course_id: course.into(),
            user_email: user.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_query_matches() {
        let query = LogQuery {
            level: LogLevel::Warn,
            after: Timestamp(100),
            course_id: "course101".into(),
            ..Default::default()
        };

        assert!(query.matches(&record(LogLevel::Error, 150, "course101", "")));
        assert!(!query.matches(&record(LogLevel::Info, 150, "course101", "")));
        assert!(!query.matches(&record(LogLevel::Error, 50, "course101", "")));
        assert!(!query.matches(&record(LogLevel::Error, 150, "course102", "")));

        let query = LogQuery {
            user_email: "a@test.com".into(),
            ..Default::default()
        };
        assert!(query.matches(&record(LogLevel::Info, 1, "", "a@test.com")));
        assert!(!query.matches(&record(LogLevel::Info, 1, "", "b@test.com")));
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
        assert!(LogLevel::Trace < LogLevel::Error);
    }
}

use super::{LogQuery, ScheduledTime};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt::{Debug, Display, Formatter};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A periodic course operation.
///
/// The id is `courseID::name` and is assigned when the task is bound to a
/// course. Clones share the logical lock, so every timer of a task serializes
/// on the same mutex.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub name: String,
    #[serde(default)]
    pub disable: bool,
    #[serde(default)]
    pub when: Vec<ScheduledTime>,
    #[serde(flatten)]
    pub kind: TaskKind,

    #[serde(skip)]
    pub id: String,
    #[serde(skip)]
    pub course_id: String,
    #[serde(skip)]
    lock: Arc<Mutex<()>>,
}

impl ScheduledTask {
    pub fn new(name: impl Into<String>, kind: TaskKind, when: Vec<ScheduledTime>) -> Self {
        Self {
            name: name.into(),
            disable: false,
            when,
            kind,
            id: String::new(),
            course_id: String::new(),
            lock: Arc::default(),
        }
    }

    pub fn bind(&mut self, course_id: &str) {
        self.course_id = course_id.to_string();
        self.id = format!("{course_id}::{}", self.name);
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            bail!("no name provided to the task");
        }
        for (i, when) in self.when.iter().enumerate() {
            when.validate()
                .with_context(|| format!("failed to validate when entry {i} of task '{}'", self.name))?;
        }
        Ok(())
    }

    /// The logical lock shared by all timers of this task.
    pub fn lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.lock)
    }

    /// Smallest period over all `when` entries, `None` without entries.
    pub fn min_period(&self) -> Option<Duration> {
        self.when.iter().map(ScheduledTime::period).min()
    }

    pub fn has_every(&self) -> bool {
        self.when.iter().any(ScheduledTime::is_every)
    }
}

impl Display for ScheduledTask {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let times: Vec<String> = self.when.iter().map(ToString::to_string).collect();
        let disabled = if self.disable { " (disabled)" } else { "" };
        write!(
            f,
            "Task ({}, {}){} scheduled for [{}]",
            self.name,
            self.kind.name(),
            disabled,
            times.join(", ")
        )
    }
}

/// The concrete body a task runs, with its parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TaskKind {
    Backup(BackupParams),
    CourseUpdate,
    EmailLogs(EmailLogsParams),
    Report(ReportParams),
    ScoringUpload,
    #[serde(skip)]
    Test(TestTask),
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Backup(_) => "backup",
            TaskKind::CourseUpdate => "course-update",
            TaskKind::EmailLogs(_) => "email-logs",
            TaskKind::Report(_) => "report",
            TaskKind::ScoringUpload => "scoring-upload",
            TaskKind::Test(_) => "test",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailLogsParams {
    pub to: Vec<String>,
    #[serde(default)]
    pub query: LogQuery,
    #[serde(rename = "send-empty", default)]
    pub send_empty: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportParams {
    pub to: Vec<String>,
}

pub type TestPayload = Arc<dyn Any + Send + Sync>;
pub type TestFn = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Result<()> + Send + Sync>;

/// A caller-supplied body and payload. Never serialized.
#[derive(Clone)]
pub struct TestTask {
    pub func: TestFn,
    pub payload: TestPayload,
}

impl TestTask {
    pub fn new<F>(payload: TestPayload, func: F) -> Self
    where
        F: Fn(&(dyn Any + Send + Sync)) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            payload,
        }
    }

    pub fn call(&self) -> Result<()> {
        (self.func)(self.payload.as_ref())
    }
}

impl Debug for TestTask {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestTask").finish_non_exhaustive()
    }
}

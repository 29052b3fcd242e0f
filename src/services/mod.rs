//! # Request-level collaborators
//!
//! The request core and the task engine consume persistence, grading, LMS,
//! email, time and randomness only through the traits in this module. A
//! [`Services`] value bundles one implementation of each and is shared by the
//! dispatcher, the binder and the task engine.
//!
//! [`memory`] holds in-memory implementations used by tests and by servers
//! started with test data; [`system`] holds the real clock, OS randomness and
//! a log-only emailer.

pub mod memory;
pub mod system;

use crate::api::NonceStore;
use crate::config::Config;
use crate::model::{Course, LogQuery, LogRecord, User};
use crate::timestamp::Timestamp;
use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Course membership storage. Emails are compared exactly.
pub trait UserStore: Send + Sync {
    fn get_user(&self, course_id: &str, email: &str) -> Result<Option<User>>;
    fn get_users(&self, course_id: &str) -> Result<BTreeMap<String, User>>;
    fn upsert_user(&self, course_id: &str, user: User) -> Result<()>;
    /// Returns true if the user existed.
    fn remove_user(&self, course_id: &str, email: &str) -> Result<bool>;
}

pub trait CourseStore: Send + Sync {
    fn get_course(&self, course_id: &str) -> Result<Option<Arc<Course>>>;
    fn get_courses(&self) -> Result<Vec<Arc<Course>>>;
    fn save_course(&self, course: Course) -> Result<()>;
    /// Write everything needed to restore the course into `dir`.
    fn dump_course(&self, course_id: &str, dir: &Path) -> Result<()>;
    /// Reload the course from its source spec and return the refreshed course.
    fn update_from_source(&self, course_id: &str) -> Result<Arc<Course>>;
}

pub trait TaskStore: Send + Sync {
    /// Zero when the task never completed.
    fn last_completion(&self, course_id: &str, task_id: &str) -> Result<Timestamp>;
    fn log_completion(&self, course_id: &str, task_id: &str, when: Timestamp) -> Result<()>;
}

pub trait LogStore: Send + Sync {
    fn record(&self, record: LogRecord) -> Result<()>;
    fn query(&self, query: &LogQuery) -> Result<Vec<LogRecord>>;
}

/// The grading sandbox, kept opaque.
pub trait Grader: Send + Sync {
    fn build_images(&self, course: &Course) -> Result<()>;
    /// Final scores keyed by user email.
    fn assignment_scores(&self, course: &Course, assignment_id: &str)
        -> Result<BTreeMap<String, f64>>;
}

pub trait Lms: Send + Sync {
    fn sync_users(&self, course: &Course) -> Result<()>;
    /// `scores` pairs LMS user ids with points.
    fn upload_scores(
        &self,
        course: &Course,
        assignment_lms_id: &str,
        scores: &[(String, f64)],
    ) -> Result<()>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Email {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub html: bool,
}

pub trait Emailer: Send + Sync {
    fn send(&self, email: &Email) -> Result<()>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

pub trait Randomness: Send + Sync {
    fn fill(&self, buf: &mut [u8]) -> Result<()>;

    /// `len` random bytes, hex encoded.
    fn hex(&self, len: usize) -> Result<String> {
        let mut buf = vec![0u8; len];
        self.fill(&mut buf)?;
        Ok(hex::encode(buf))
    }
}

/// One implementation of every collaborator, cheap to clone.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub users: Arc<dyn UserStore>,
    pub courses: Arc<dyn CourseStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub logs: Arc<dyn LogStore>,
    pub grader: Arc<dyn Grader>,
    pub lms: Arc<dyn Lms>,
    pub emailer: Arc<dyn Emailer>,
    pub clock: Arc<dyn Clock>,
    pub random: Arc<dyn Randomness>,
    pub nonces: Arc<NonceStore>,
}

impl Services {
    /// In-memory stores with the system clock and OS randomness.
    pub fn in_memory(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            users: Arc::new(memory::MemoryUserStore::default()),
            courses: Arc::new(memory::MemoryCourseStore::default()),
            tasks: Arc::new(memory::MemoryTaskStore::default()),
            logs: Arc::new(memory::MemoryLogStore::default()),
            grader: Arc::new(memory::MemoryGrader::default()),
            lms: Arc::new(memory::MemoryLms::default()),
            emailer: Arc::new(system::LogEmailer),
            clock: Arc::new(system::SystemClock),
            random: Arc::new(system::OsRandomness),
            nonces: Arc::new(NonceStore::new()),
        }
    }

    pub fn with_users(mut self, users: Arc<dyn UserStore>) -> Self {
        self.users = users;
        self
    }

    pub fn with_courses(mut self, courses: Arc<dyn CourseStore>) -> Self {
        self.courses = courses;
        self
    }

    pub fn with_tasks(mut self, tasks: Arc<dyn TaskStore>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_logs(mut self, logs: Arc<dyn LogStore>) -> Self {
        self.logs = logs;
        self
    }

    pub fn with_grader(mut self, grader: Arc<dyn Grader>) -> Self {
        self.grader = grader;
        self
    }

    pub fn with_lms(mut self, lms: Arc<dyn Lms>) -> Self {
        self.lms = lms;
        self
    }

    pub fn with_emailer(mut self, emailer: Arc<dyn Emailer>) -> Self {
        self.emailer = emailer;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_random(mut self, random: Arc<dyn Randomness>) -> Self {
        self.random = random;
        self
    }
}

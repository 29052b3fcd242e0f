//! Domain types shared by the request core and the task engine.

mod course;
mod log;
mod role;
mod schedule;
mod task;
mod user;

pub use course::{normalize_id, validate_id, Assignment, Course, LmsAdapter};
pub use log::{LogLevel, LogQuery, LogRecord};
pub use role::{AdminRole, GraderRole, Role, RoleMarker};
pub use schedule::{DurationSpec, ScheduledTime, TimeOfDay};
pub use task::{
    BackupParams, EmailLogsParams, ReportParams, ScheduledTask, TaskKind, TestFn, TestPayload,
    TestTask,
};
pub use user::{sha256_hex, User, ROOT_EMAIL};

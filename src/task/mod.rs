//! # Scheduled Task Engine
//!
//! Per-course timers that run [`ScheduledTask`](crate::model::ScheduledTask)
//! bodies on OS threads.
//!
//! ## Key Components
//!
//! - [`TaskEngine`] - the timer registry: schedule, stop, stop-all
//! - [`kinds`] - the task bodies (backup, course update, email logs,
//!   scoring upload, report, test)
//! - [`backup`] - course dump into a zip archive
//!
//! ## Firing rules
//!
//! | Rule | Behaviour |
//! |------|-----------|
//! | Single flight | All timers of one task share the task's logical lock |
//! | Minimum rest | A run within `tasks.minrest` seconds of the last completion is skipped but rescheduled |
//! | Catch-up | A missed `every` period fires `taskID::catchup` once, 5ms after scheduling |
//! | Errors | Logged; a failing or panicking body keeps its timer |
//! | Stop | `stop(course)` returns after every in-flight body of the course has finished |

pub mod backup;
mod engine;
pub mod kinds;

pub use engine::{TaskEngine, TimerInfo, CATCHUP_DELAY, CATCHUP_SUFFIX};
pub use kinds::RunContext;

use std::fmt;

/// Several errors from one multi-step operation.
#[derive(Debug)]
pub struct JoinedError(pub Vec<anyhow::Error>);

impl JoinedError {
    /// `Ok` when `errors` is empty, the error itself when there is one.
    pub fn into_result(mut errors: Vec<anyhow::Error>) -> anyhow::Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(JoinedError(errors).into()),
        }
    }
}

impl fmt::Display for JoinedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error:#}")?;
        }
        Ok(())
    }
}

impl std::error::Error for JoinedError {}

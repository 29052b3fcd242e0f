//! Task bodies.
//!
//! Every body gets the run context, the current course and the task, and
//! returns whether its timer should fire again.

use super::{backup, JoinedError, TaskEngine};
use crate::model::{
    BackupParams, Course, EmailLogsParams, ReportParams, Role, ScheduledTask, TaskKind, User,
};
use crate::services::{Email, Services};
use anyhow::{anyhow, bail, Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// What a body may reach while it runs.
pub struct RunContext<'a> {
    pub engine: &'a TaskEngine,
    pub services: &'a Services,
    /// Id of the timer that fired this run.
    pub timer_id: &'a str,
}

pub fn run(ctx: &RunContext<'_>, course: &Arc<Course>, task: &ScheduledTask) -> Result<bool> {
    match &task.kind {
        TaskKind::Backup(params) => run_backup(ctx, course, params),
        TaskKind::CourseUpdate => run_course_update(ctx, course),
        TaskKind::EmailLogs(params) => run_email_logs(ctx, course, params),
        TaskKind::Report(params) => run_report(ctx, course, params),
        TaskKind::ScoringUpload => run_scoring_upload(ctx, course),
        TaskKind::Test(test) => test.call().map(|()| true),
    }
}

fn run_backup(ctx: &RunContext<'_>, course: &Course, params: &BackupParams) -> Result<bool> {
    let dest = match params.dest.as_deref() {
        Some(dest) if !dest.is_empty() => PathBuf::from(dest),
        _ => ctx.services.config.backup_dir(),
    };

    let now = ctx.services.clock.now();
    let path = backup::backup_course(ctx.services.courses.as_ref(), &course.id, &dest, now)?;
    info!(course_id = %course.id, path = %path.display(), "Course backed up");
    Ok(true)
}

/// Reload the course and replace all of its timers. The fresh timers take
/// over, so this timer never reschedules itself.
fn run_course_update(ctx: &RunContext<'_>, course: &Arc<Course>) -> Result<bool> {
    let services = ctx.services;
    let mut errors = Vec::new();

    ctx.engine.stop_except_self(&course.id, ctx.timer_id);

    let updated = match services.courses.update_from_source(&course.id) {
        Ok(updated) => updated,
        Err(e) => {
            errors.push(e.context(format!("Failed to update course '{}'", course.id)));
            Arc::clone(course)
        }
    };

    if updated.has_lms_adapter() {
        if let Err(e) = services.lms.sync_users(&updated) {
            errors.push(e.context("Failed to sync LMS users"));
        }
    }

    if let Err(e) = services.grader.build_images(&updated) {
        errors.push(e.context("Failed to build grader images"));
    }

    for task in &updated.tasks {
        ctx.engine.schedule(&updated, task);
    }

    JoinedError::into_result(errors).map(|()| false)
}

fn run_email_logs(ctx: &RunContext<'_>, course: &Course, params: &EmailLogsParams) -> Result<bool> {
    let services = ctx.services;
    if params.to.is_empty() {
        bail!("no recipients for log email in course '{}'", course.id);
    }

    let mut query = params.query.clone();
    query.course_id = course.id.clone();

    if !query.assignment_id.is_empty() && course.assignment(&query.assignment_id).is_none() {
        bail!(
            "unknown assignment '{}' in course '{}'",
            query.assignment_id,
            course.id
        );
    }

    if !query.user_email.is_empty() {
        let user = services
            .users
            .get_user(&course.id, &query.user_email)
            .context("Failed to get log query user")?;
        if user.is_none() {
            bail!(
                "unknown user '{}' in course '{}'",
                query.user_email,
                course.id
            );
        }
    }

    let records = services.logs.query(&query).context("Failed to query logs")?;
    if records.is_empty() && !params.send_empty {
        debug!(course_id = %course.id, "No logs to email");
        return Ok(true);
    }

    let body = if records.is_empty() {
        "No logs found.".to_string()
    } else {
        records
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    };

    let email = Email {
        to: params.to.clone(),
        subject: format!("Autograder Logs for '{}'", course.id),
        body,
        html: false,
    };
    services.emailer.send(&email).context("Failed to send log email")?;

    info!(course_id = %course.id, records = records.len(), "Log email sent");
    Ok(true)
}

fn run_scoring_upload(ctx: &RunContext<'_>, course: &Course) -> Result<bool> {
    let services = ctx.services;
    if !course.has_lms_adapter() {
        bail!("course '{}' has no LMS adapter", course.id);
    }

    let users = services
        .users
        .get_users(&course.id)
        .context("Failed to get course users")?;

    let mut errors = Vec::new();
    for assignment in course.assignments.values() {
        let Some(lms_id) = assignment.lms_id.as_deref().filter(|id| !id.is_empty()) else {
            continue;
        };

        let result = services
            .grader
            .assignment_scores(course, &assignment.id)
            .and_then(|scores| {
                let pairs = lms_scores(&scores, &users);
                services.lms.upload_scores(course, lms_id, &pairs)
            });
        if let Err(e) = result {
            errors.push(e.context(format!("Failed to upload scores for '{}'", assignment.id)));
        }
    }

    JoinedError::into_result(errors).map(|()| true)
}

/// Pair scores with LMS ids. Users without an LMS id are left out.
fn lms_scores(scores: &BTreeMap<String, f64>, users: &BTreeMap<String, User>) -> Vec<(String, f64)> {
    scores
        .iter()
        .filter_map(|(email, score)| {
            let user = users.get(email)?;
            if user.lms_id.is_empty() {
                debug!(email = %email, "User has no LMS id, skipping score");
                return None;
            }
            Some((user.lms_id.clone(), *score))
        })
        .collect()
}

/// Score summary for one assignment.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AssignmentStats {
    pub assignment_id: String,
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
}

impl AssignmentStats {
    pub fn compute(assignment_id: &str, scores: impl IntoIterator<Item = f64>) -> Self {
        let mut scores: Vec<f64> = scores.into_iter().collect();
        scores.sort_by(f64::total_cmp);

        let count = scores.len();
        if count == 0 {
            return Self {
                assignment_id: assignment_id.to_string(),
                ..Default::default()
            };
        }

        let mid = count / 2;
        let median = if count % 2 == 0 {
            (scores[mid - 1] + scores[mid]) / 2.0
        } else {
            scores[mid]
        };

        Self {
            assignment_id: assignment_id.to_string(),
            count,
            mean: scores.iter().sum::<f64>() / count as f64,
            median,
            min: scores[0],
            max: scores[count - 1],
        }
    }
}

fn render_report(course: &Course, stats: &[AssignmentStats]) -> String {
    let mut html = String::new();
    html.push_str(&format!("<h2>Scoring Report for {}</h2>\n<table>\n", course.name));
    html.push_str(
        "<tr><th>Assignment</th><th>Count</th><th>Mean</th><th>Median</th><th>Min</th><th>Max</th></tr>\n",
    );
    for s in stats {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td></tr>\n",
            s.assignment_id, s.count, s.mean, s.median, s.min, s.max
        ));
    }
    html.push_str("</table>\n");
    html
}

/// Expand role names and `*` against the course users. Anything else is an
/// email address.
pub fn resolve_recipients(to: &[String], users: &BTreeMap<String, User>) -> Vec<String> {
    let mut emails = BTreeSet::new();
    for entry in to {
        if entry == "*" {
            emails.extend(users.keys().cloned());
            continue;
        }

        match entry.parse::<Role>() {
            Ok(role) if role.is_course_role() => emails.extend(
                users
                    .values()
                    .filter(|user| user.role == role)
                    .map(|user| user.email.clone()),
            ),
            _ => {
                emails.insert(entry.clone());
            }
        }
    }
    emails.into_iter().collect()
}

fn run_report(ctx: &RunContext<'_>, course: &Course, params: &ReportParams) -> Result<bool> {
    let services = ctx.services;
    let users = services
        .users
        .get_users(&course.id)
        .context("Failed to get course users")?;

    let to = resolve_recipients(&params.to, &users);
    if to.is_empty() {
        info!(course_id = %course.id, "No report recipients, skipping report");
        return Ok(true);
    }

    let stats = course
        .assignments
        .values()
        .map(|assignment| {
            services
                .grader
                .assignment_scores(course, &assignment.id)
                .map(|scores| AssignmentStats::compute(&assignment.id, scores.into_values()))
                .map_err(|e| anyhow!("failed to get scores for '{}': {e:#}", assignment.id))
        })
        .collect::<Result<Vec<_>>>()?;

    let email = Email {
        to,
        subject: format!("Autograder Scoring Report for {}", course.name),
        body: render_report(course, &stats),
        html: true,
    };
    services.emailer.send(&email).context("Failed to send report")?;

    info!(course_id = %course.id, assignments = stats.len(), "Report sent");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{Assignment, LmsAdapter, LogLevel, LogQuery, LogRecord};
    use crate::services::memory::{MemoryEmailer, MemoryGrader, MemoryLms};
    use crate::timestamp::Timestamp;

    struct Fixture {
        services: Services,
        engine: TaskEngine,
        emailer: Arc<MemoryEmailer>,
        grader: Arc<MemoryGrader>,
        lms: Arc<MemoryLms>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let emailer = Arc::new(MemoryEmailer::default());
        let grader = Arc::new(MemoryGrader::default());
        let lms = Arc::new(MemoryLms::default());
        let services = Services::in_memory(Config::for_testing(dir.path()))
            .with_emailer(emailer.clone())
            .with_grader(grader.clone())
            .with_lms(lms.clone());

        for (email, role, lms_id) in [
            ("student@test.com", Role::Student, "s1"),
            ("admin@test.com", Role::Admin, ""),
        ] {
            let mut user = User::new(email, email, role);
            user.lms_id = lms_id.to_string();
            services.users.upsert_user("course101", user).unwrap();
        }

        Fixture {
            engine: TaskEngine::new(services.clone()),
            services,
            emailer,
            grader,
            lms,
            _dir: dir,
        }
    }

    fn course() -> Arc<Course> {
        let mut hw0 = Assignment::new("hw0", "Homework 0", 10.0);
        hw0.lms_id = Some("lms-hw0".to_string());
        let mut course = Course::new("course101", "Course 101").with_assignment(hw0);
        course.lms_adapter = Some(LmsAdapter::default());
        Arc::new(course)
    }

    fn ctx<'a>(f: &'a Fixture) -> RunContext<'a> {
        RunContext {
            engine: &f.engine,
            services: &f.services,
            timer_id: "course101::t::000",
        }
    }

    #[test]
    fn test_stats() {
        let stats = AssignmentStats::compute("hw0", [4.0, 1.0, 3.0, 2.0]);
        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean, 2.5);
        assert_eq!(stats.median, 2.5);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);

        let empty = AssignmentStats::compute("hw1", []);
        assert_eq!(empty.count, 0);
    }

    #[test]
    fn test_resolve_recipients() {
        let f = fixture();
        let users = f.services.users.get_users("course101").unwrap();

        let to = resolve_recipients(&["admin".to_string(), "x@test.com".to_string()], &users);
        assert_eq!(to, vec!["admin@test.com", "x@test.com"]);

        let all = resolve_recipients(&["*".to_string()], &users);
        assert_eq!(all, vec!["admin@test.com", "student@test.com"]);
    }

    #[test]
    fn test_report_sends_html() {
        let f = fixture();
        f.grader.set_score("course101", "hw0", "student@test.com", 8.0);

        let params = ReportParams {
            to: vec!["admin".to_string()],
        };
        assert!(run_report(&ctx(&f), &course(), &params).unwrap());

        let sent = f.emailer.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].html);
        assert_eq!(sent[0].to, vec!["admin@test.com"]);
        assert!(sent[0].body.contains("<td>hw0</td><td>1</td><td>8.00</td>"));
    }

    #[test]
    fn test_scoring_upload_maps_lms_ids() {
        let f = fixture();
        f.grader.set_score("course101", "hw0", "student@test.com", 9.0);
        f.grader.set_score("course101", "hw0", "admin@test.com", 10.0);

        assert!(run_scoring_upload(&ctx(&f), &course()).unwrap());
        let uploads = f.lms.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].1, "lms-hw0");
        assert_eq!(uploads[0].2, vec![("s1".to_string(), 9.0)]);

        let no_lms = Course::new("course101", "Course 101");
        assert!(run_scoring_upload(&ctx(&f), &no_lms).is_err());
    }

    #[test]
    fn test_email_logs() {
        let f = fixture();
        let params = EmailLogsParams {
            to: vec!["admin@test.com".to_string()],
            query: LogQuery {
                level: LogLevel::Warn,
                ..Default::default()
            },
            send_empty: false,
        };

        assert!(run_email_logs(&ctx(&f), &course(), &params).unwrap());
        assert!(f.emailer.sent().is_empty());

        f.services
            .logs
            .record(LogRecord {
                level: LogLevel::Error,
                message: "grading failed".to_string(),
                timestamp: Timestamp(5),
                course_id: "course101".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert!(run_email_logs(&ctx(&f), &course(), &params).unwrap());
        let sent = f.emailer.sent();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].html);
        assert!(sent[0].body.contains("grading failed"));

        let mut bad = params.clone();
        bad.query.assignment_id = "zzz".to_string();
        assert!(run_email_logs(&ctx(&f), &course(), &bad).is_err());

        let mut bad = params;
        bad.query.user_email = "nobody@test.com".to_string();
        assert!(run_email_logs(&ctx(&f), &course(), &bad).is_err());
    }

    #[test]
    fn test_course_update_does_not_reschedule() {
        let f = fixture();
        let course = course();
        f.services.courses.save_course((*course).clone()).unwrap();

        assert!(!run_course_update(&ctx(&f), &course).unwrap());
        assert_eq!(f.lms.sync_count(), 1);
        assert_eq!(f.grader.build_count(), 1);
    }

    #[test]
    fn test_backup_writes_zip() {
        let f = fixture();
        let course = course();
        f.services.courses.save_course((*course).clone()).unwrap();

        let dest = f._dir.path().join("backups");
        let params = BackupParams {
            dest: Some(dest.to_string_lossy().into_owned()),
        };
        assert!(run_backup(&ctx(&f), &course, &params).unwrap());

        let zips: Vec<_> = std::fs::read_dir(&dest).unwrap().collect();
        assert_eq!(zips.len(), 1);
    }
}

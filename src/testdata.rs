//! Seed data for servers started with `testdata.load` and for tests.
//!
//! One course, `course101`, with one assignment, `hw0`, and one user per
//! course role: `<role>@test.com` whose cleartext password is the role name.
//! Clients send the SHA-256 hex of the cleartext as `user-pass`.

use crate::model::{sha256_hex, Assignment, Course, Role, User};
use crate::services::Services;
use anyhow::{Context, Result};
use tracing::info;

pub const TEST_COURSE_ID: &str = "course101";
pub const TEST_ASSIGNMENT_ID: &str = "hw0";

pub fn test_email(role: Role) -> String {
    format!("{role}@test.com")
}

/// The `user-pass` value for the seeded user of `role`.
pub fn test_pass(role: Role) -> String {
    sha256_hex(role.as_str())
}

pub fn test_course() -> Course {
    Course::new(TEST_COURSE_ID, "Course 101").with_assignment(Assignment::new(
        TEST_ASSIGNMENT_ID,
        "Homework 0",
        100.0,
    ))
}

pub fn test_users() -> Result<Vec<User>> {
    Role::COURSE_ROLES
        .iter()
        .map(|&role| {
            let mut user = User::new(test_email(role), format!("course101-{role}"), role);
            user.set_password(&test_pass(role))
                .with_context(|| format!("Failed to set password for {role}"))?;
            Ok(user)
        })
        .collect()
}

pub fn seed(services: &Services) -> Result<()> {
    services
        .courses
        .save_course(test_course())
        .context("Failed to save test course")?;

    for user in test_users()? {
        services
            .users
            .upsert_user(TEST_COURSE_ID, user)
            .context("Failed to save test user")?;
    }

    info!(course_id = TEST_COURSE_ID, "Loaded test data");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_seed() {
        let dir = tempfile::tempdir().unwrap();
        let services = Services::in_memory(Config::for_testing(dir.path()));
        seed(&services).unwrap();

        let course = services.courses.get_course(TEST_COURSE_ID).unwrap().unwrap();
        assert!(course.assignment(TEST_ASSIGNMENT_ID).is_some());

        let users = services.users.get_users(TEST_COURSE_ID).unwrap();
        assert_eq!(users.len(), Role::COURSE_ROLES.len());

        let admin = &users["admin@test.com"];
        assert_eq!(admin.role, Role::Admin);
        assert!(admin.check_password(&test_pass(Role::Admin)));
        assert!(!admin.check_password(&test_pass(Role::Student)));
    }
}

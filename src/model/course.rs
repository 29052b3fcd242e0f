use super::ScheduledTask;
use crate::timestamp::Timestamp;
use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// Letters and digits with single interior separators.
static ID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]+([._-][a-z0-9]+)*$").expect("course id regex should be valid")
});

/// Check that `id` is a valid course or assignment id.
pub fn validate_id(id: &str) -> Result<()> {
    if !ID_REGEX.is_match(id) {
        bail!("illegal id '{id}': must be lower-case letters and digits with single interior '.', '_' or '-' separators");
    }
    Ok(())
}

/// Normalize a free-form id (lower-case, trimmed) and validate it.
pub fn normalize_id(id: &str) -> Result<String> {
    let id = id.trim().to_lowercase();
    validate_id(&id)?;
    Ok(id)
}

/// LMS adapter settings attached to a course.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LmsAdapter {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "course-id", default)]
    pub lms_course_id: String,
    #[serde(rename = "base-url", default, skip_serializing_if = "String::is_empty")]
    pub base_url: String,
    #[serde(rename = "sync-user-attributes", default)]
    pub sync_user_attributes: bool,
    #[serde(rename = "sync-add-users", default)]
    pub sync_add_users: bool,
    #[serde(rename = "sync-remove-users", default)]
    pub sync_remove_users: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "max-points", default)]
    pub max_points: f64,
    #[serde(rename = "due-at", default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<Timestamp>,
    #[serde(rename = "lms-id", default, skip_serializing_if = "Option::is_none")]
    pub lms_id: Option<String>,
}

impl Assignment {
    pub fn new(id: impl Into<String>, name: impl Into<String>, max_points: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            max_points,
            ..Default::default()
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "source", default, skip_serializing_if = "String::is_empty")]
    pub source_spec: String,
    #[serde(rename = "lms", default, skip_serializing_if = "Option::is_none")]
    pub lms_adapter: Option<LmsAdapter>,
    #[serde(default)]
    pub assignments: BTreeMap<String, Assignment>,
    #[serde(default)]
    pub tasks: Vec<ScheduledTask>,
}

impl Course {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_assignment(mut self, assignment: Assignment) -> Self {
        self.assignments.insert(assignment.id.clone(), assignment);
        self
    }

    pub fn with_task(mut self, mut task: ScheduledTask) -> Self {
        task.bind(&self.id);
        self.tasks.push(task);
        self
    }

    pub fn assignment(&self, id: &str) -> Option<&Assignment> {
        self.assignments.get(id)
    }

    pub fn has_lms_adapter(&self) -> bool {
        self.lms_adapter.is_some()
    }

    /// Validate ids and bind every task to this course.
    pub fn validate(&mut self) -> Result<()> {
        self.id = normalize_id(&self.id)?;
        if self.name.is_empty() {
            self.name = self.id.clone();
        }

        for (key, assignment) in self.assignments.iter_mut() {
            validate_id(key)?;
            if assignment.id.is_empty() {
                assignment.id = key.clone();
            } else if &assignment.id != key {
                bail!(
                    "assignment key '{key}' does not match assignment id '{}'",
                    assignment.id
                );
            }
        }

        let course_id = self.id.clone();
        for task in self.tasks.iter_mut() {
            task.validate()
                .with_context(|| format!("invalid task in course '{course_id}'"))?;
            task.bind(&course_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        for id in ["course101", "cse-140", "a.b_c-d", "x", "2024"] {
            assert!(validate_id(id).is_ok(), "{id} should be valid");
        }
        for id in ["", "-abc", "abc-", "a--b", "a.-b", "ABC", "a b", "a/b"] {
            assert!(validate_id(id).is_err(), "{id} should be invalid");
        }
    }

    #[test]
    fn test_normalize_id() {
        assert_eq!(normalize_id("  Course101 ").unwrap(), "course101");
        assert!(normalize_id("bad id").is_err());
    }

    #[test]
    fn test_validate_fills_assignment_ids() {
        let mut course = Course::new("COURSE101", "");
        course
            .assignments
            .insert("hw0".into(), Assignment::new("", "Homework 0", 100.0));
        course.validate().unwrap();
        assert_eq!(course.id, "course101");
        assert_eq!(course.name, "course101");
        assert_eq!(course.assignment("hw0").unwrap().id, "hw0");
    }

    #[test]
    fn test_validate_rejects_mismatched_assignment() {
        let mut course =
            Course::new("course101", "C").with_assignment(Assignment::new("hw0", "", 10.0));
        course
            .assignments
            .insert("hw1".into(), Assignment::new("hw2", "", 10.0));
        assert!(course.validate().is_err());
    }
}

//! Special fields the binder fills after the context validates.

use crate::model::{AdminRole, GraderRole, Role, RoleMarker, User};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A binder-visible handle on one special field.
pub enum FieldSlot<'a> {
    CourseUsers(&'a mut CourseUsers),
    TargetUser(&'a mut TargetUser),
    TargetUserSelfOr(&'a mut TargetUser, Role),
    PostFiles(&'a mut PostFiles),
    NonEmptyString(&'a mut NonEmptyString),
}

/// Implemented by every special field type; the derive macro calls it on each
/// field marked `#[api(special)]`.
pub trait SpecialField {
    fn slot(&mut self) -> FieldSlot<'_>;
}

/// The course's users keyed by email. Never read from JSON; mark it `#[serde(skip)]`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CourseUsers(pub BTreeMap<String, User>);

impl Deref for CourseUsers {
    type Target = BTreeMap<String, User>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl SpecialField for CourseUsers {
    fn slot(&mut self) -> FieldSlot<'_> {
        FieldSlot::CourseUsers(self)
    }
}

/// An email naming another course member. The email is required; the lookup
/// may miss, in which case `user` stays `None`. JSON `null`, `""` and `"null"`
/// all read as no email.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TargetUser {
    pub email: String,
    pub user: Option<User>,
}

impl TargetUser {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            user: None,
        }
    }

    pub fn found(&self) -> bool {
        self.user.is_some()
    }
}

impl Serialize for TargetUser {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.email)
    }
}

impl<'de> Deserialize<'de> for TargetUser {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let email = Option::<String>::deserialize(deserializer)?
            .filter(|email| email != "null")
            .unwrap_or_default();
        Ok(TargetUser::new(email))
    }
}

impl SpecialField for TargetUser {
    fn slot(&mut self) -> FieldSlot<'_> {
        FieldSlot::TargetUser(self)
    }
}

/// A target that defaults to the caller. Targeting anyone else requires the
/// caller to hold at least `R::ROLE`.
pub struct TargetUserSelfOr<R: RoleMarker> {
    pub target: TargetUser,
    role: PhantomData<fn() -> R>,
}

pub type TargetUserSelfOrGrader = TargetUserSelfOr<GraderRole>;
pub type TargetUserSelfOrAdmin = TargetUserSelfOr<AdminRole>;

impl<R: RoleMarker> TargetUserSelfOr<R> {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            target: TargetUser::new(email),
            role: PhantomData,
        }
    }
}

impl<R: RoleMarker> Default for TargetUserSelfOr<R> {
    fn default() -> Self {
        Self::new("")
    }
}

impl<R: RoleMarker> Clone for TargetUserSelfOr<R> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            role: PhantomData,
        }
    }
}

impl<R: RoleMarker> fmt::Debug for TargetUserSelfOr<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetUserSelfOr")
            .field("role", &R::ROLE)
            .field("target", &self.target)
            .finish()
    }
}

impl<R: RoleMarker> Deref for TargetUserSelfOr<R> {
    type Target = TargetUser;

    fn deref(&self) -> &Self::Target {
        &self.target
    }
}

impl<R: RoleMarker> DerefMut for TargetUserSelfOr<R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.target
    }
}

impl<R: RoleMarker> Serialize for TargetUserSelfOr<R> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.target.serialize(serializer)
    }
}

impl<'de, R: RoleMarker> Deserialize<'de> for TargetUserSelfOr<R> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self {
            target: TargetUser::deserialize(deserializer)?,
            role: PhantomData,
        })
    }
}

impl<R: RoleMarker> SpecialField for TargetUserSelfOr<R> {
    fn slot(&mut self) -> FieldSlot<'_> {
        FieldSlot::TargetUserSelfOr(&mut self.target, R::ROLE)
    }
}

/// Files uploaded with a multipart request, stored in a temp dir owned by the
/// request. The dir goes away on [`PostFiles::cleanup`] or on drop.
#[derive(Debug, Default)]
pub struct PostFiles {
    dir: Option<TempDir>,
    filenames: Vec<String>,
}

impl PostFiles {
    pub(crate) fn fill(&mut self, dir: TempDir, filenames: Vec<String>) {
        self.dir = Some(dir);
        self.filenames = filenames;
    }

    pub fn temp_dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(TempDir::path)
    }

    pub fn filenames(&self) -> &[String] {
        &self.filenames
    }

    /// Full paths of the stored files.
    pub fn paths(&self) -> Vec<PathBuf> {
        match self.temp_dir() {
            Some(dir) => self.filenames.iter().map(|name| dir.join(name)).collect(),
            None => Vec::new(),
        }
    }

    /// Remove the temp dir. Safe to call more than once.
    pub fn cleanup(&mut self) -> io::Result<()> {
        self.filenames.clear();
        match self.dir.take() {
            Some(dir) => dir.close(),
            None => Ok(()),
        }
    }
}

impl SpecialField for PostFiles {
    fn slot(&mut self) -> FieldSlot<'_> {
        FieldSlot::PostFiles(self)
    }
}

/// A string that must be present and non-empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NonEmptyString(pub String);

impl Deref for NonEmptyString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for NonEmptyString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl SpecialField for NonEmptyString {
    fn slot(&mut self) -> FieldSlot<'_> {
        FieldSlot::NonEmptyString(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_user_accepts_null() {
        let target: TargetUser = serde_json::from_str("null").unwrap();
        assert_eq!(target.email, "");
        let target: TargetUser = serde_json::from_str(r#""a@test.com""#).unwrap();
        assert_eq!(target.email, "a@test.com");
        assert!(!target.found());
        assert_eq!(serde_json::to_string(&target).unwrap(), r#""a@test.com""#);
    }

    #[test]
    fn test_target_user_null_string_is_absent() {
        let target: TargetUser = serde_json::from_str(r#""null""#).unwrap();
        assert_eq!(target.email, "");
        let target: TargetUser = serde_json::from_str(r#""""#).unwrap();
        assert_eq!(target.email, "");

        let target: TargetUserSelfOrGrader = serde_json::from_str(r#""null""#).unwrap();
        assert_eq!(target.email, "");
    }

    #[test]
    fn test_self_or_slot_carries_role() {
        let mut target: TargetUserSelfOrAdmin = serde_json::from_str(r#""x@test.com""#).unwrap();
        match target.slot() {
            FieldSlot::TargetUserSelfOr(inner, role) => {
                assert_eq!(inner.email, "x@test.com");
                assert_eq!(role, Role::Admin);
            }
            _ => panic!("wrong slot"),
        }
        assert_eq!(target.email, "x@test.com");
    }

    #[test]
    fn test_post_files_cleanup() {
        let dir = tempfile::Builder::new()
            .prefix("api-request-files-")
            .tempdir()
            .unwrap();
        let path = dir.path().to_path_buf();
        std::fs::write(path.join("a.txt"), "a\n").unwrap();

        let mut files = PostFiles::default();
        files.fill(dir, vec!["a.txt".into()]);
        assert_eq!(files.paths(), vec![path.join("a.txt")]);

        files.cleanup().unwrap();
        assert!(!path.exists());
        assert!(files.temp_dir().is_none());
        files.cleanup().unwrap();
    }

    #[test]
    fn test_non_empty_string_transparent() {
        let value: NonEmptyString = serde_json::from_str(r#""abc""#).unwrap();
        assert_eq!(&*value, "abc");
    }
}

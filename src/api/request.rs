//! Request contexts and the [`ApiRequest`] trait the binder drives.
//!
//! Every API request type embeds exactly one context: [`ApiRequestBase`],
//! [`CourseUserContext`] or [`AssignmentContext`]. The context carries the
//! identity fields read from JSON plus the resolved course, user and
//! assignment, which are never (de)serialized.

use super::fields::FieldSlot;
use crate::ids::RequestId;
use crate::model::{Assignment, Course, Role, User};
use crate::timestamp::Timestamp;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Fields every request carries. Filled during validation, never read from JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiRequestBase {
    #[serde(skip, default = "RequestId::nil")]
    pub request_id: RequestId,
    #[serde(skip)]
    pub endpoint: String,
    #[serde(skip)]
    pub timestamp: Timestamp,
    #[serde(skip)]
    pub testing_mode: bool,
}

impl Default for ApiRequestBase {
    fn default() -> Self {
        Self {
            request_id: RequestId::nil(),
            endpoint: String::new(),
            timestamp: Timestamp::ZERO,
            testing_mode: false,
        }
    }
}

impl ApiRequestBase {
    /// Assign a fresh request id and stamp the start time.
    pub fn validate(&mut self, endpoint: &str, testing_mode: bool) {
        self.request_id = RequestId::new();
        self.endpoint = endpoint.to_string();
        self.timestamp = Timestamp::now();
        self.testing_mode = testing_mode;
    }
}

/// Identity fields for requests made on behalf of a course member.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CourseUserContext {
    #[serde(flatten)]
    pub base: ApiRequestBase,
    #[serde(rename = "course-id", default)]
    pub course_id: String,
    #[serde(rename = "user-email", default)]
    pub user_email: String,
    #[serde(rename = "user-pass", default)]
    pub user_pass: String,
    #[serde(
        rename = "root-user-nonce",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub root_user_nonce: String,

    #[serde(skip)]
    course: Arc<Course>,
    #[serde(skip)]
    user: User,
    #[serde(skip)]
    resolved: bool,
}

impl CourseUserContext {
    pub fn new(
        course_id: impl Into<String>,
        user_email: impl Into<String>,
        user_pass: impl Into<String>,
    ) -> Self {
        Self {
            course_id: course_id.into(),
            user_email: user_email.into(),
            user_pass: user_pass.into(),
            ..Default::default()
        }
    }

    pub fn course(&self) -> &Course {
        &self.course
    }

    pub fn course_arc(&self) -> Arc<Course> {
        Arc::clone(&self.course)
    }

    /// The authenticated caller.
    pub fn user(&self) -> &User {
        &self.user
    }

    pub(crate) fn set_course(&mut self, course: Arc<Course>) {
        self.course = course;
    }

    pub(crate) fn set_user(&mut self, user: User) {
        self.user = user;
        self.resolved = true;
    }
}

impl Deref for CourseUserContext {
    type Target = ApiRequestBase;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl DerefMut for CourseUserContext {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

/// Course member context narrowed to one assignment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AssignmentContext {
    #[serde(flatten)]
    pub course_user: CourseUserContext,
    #[serde(rename = "assignment-id", default)]
    pub assignment_id: String,

    #[serde(skip)]
    assignment: Assignment,
}

impl AssignmentContext {
    pub fn new(course_user: CourseUserContext, assignment_id: impl Into<String>) -> Self {
        Self {
            course_user,
            assignment_id: assignment_id.into(),
            assignment: Assignment::default(),
        }
    }

    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    pub(crate) fn set_assignment(&mut self, assignment: Assignment) {
        self.assignment = assignment;
    }
}

impl Deref for AssignmentContext {
    type Target = CourseUserContext;

    fn deref(&self) -> &Self::Target {
        &self.course_user
    }
}

impl DerefMut for AssignmentContext {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.course_user
    }
}

/// What an error needs to know about the request that raised it.
pub trait RequestInfo {
    fn base(&self) -> &ApiRequestBase;

    fn course_id(&self) -> Option<&str> {
        None
    }

    fn assignment_id(&self) -> Option<&str> {
        None
    }

    fn user_email(&self) -> Option<&str> {
        None
    }

    /// Role of the authenticated caller, once known.
    fn user_role(&self) -> Option<Role> {
        None
    }
}

impl RequestInfo for ApiRequestBase {
    fn base(&self) -> &ApiRequestBase {
        self
    }
}

impl RequestInfo for CourseUserContext {
    fn base(&self) -> &ApiRequestBase {
        &self.base
    }

    fn course_id(&self) -> Option<&str> {
        Some(&self.course_id)
    }

    fn user_email(&self) -> Option<&str> {
        Some(&self.user_email)
    }

    fn user_role(&self) -> Option<Role> {
        self.resolved.then_some(self.user.role)
    }
}

impl RequestInfo for AssignmentContext {
    fn base(&self) -> &ApiRequestBase {
        &self.course_user.base
    }

    fn course_id(&self) -> Option<&str> {
        self.course_user.course_id()
    }

    fn assignment_id(&self) -> Option<&str> {
        Some(&self.assignment_id)
    }

    fn user_email(&self) -> Option<&str> {
        self.course_user.user_email()
    }

    fn user_role(&self) -> Option<Role> {
        self.course_user.user_role()
    }
}

/// Mutable view of the one context a request embeds.
pub enum ContextMut<'a> {
    Base(&'a mut ApiRequestBase),
    CourseUser(&'a mut CourseUserContext),
    Assignment(&'a mut AssignmentContext),
}

/// Shared view of the one context a request embeds.
#[derive(Clone, Copy)]
pub enum ContextRef<'a> {
    Base(&'a ApiRequestBase),
    CourseUser(&'a CourseUserContext),
    Assignment(&'a AssignmentContext),
}

impl<'a> ContextRef<'a> {
    /// The course/user layer, if this context has one.
    pub fn course_user(self) -> Option<&'a CourseUserContext> {
        match self {
            ContextRef::Base(_) => None,
            ContextRef::CourseUser(ctx) => Some(ctx),
            ContextRef::Assignment(ctx) => Some(&ctx.course_user),
        }
    }

    fn info(self) -> &'a dyn RequestInfo {
        match self {
            ContextRef::Base(ctx) => ctx,
            ContextRef::CourseUser(ctx) => ctx,
            ContextRef::Assignment(ctx) => ctx,
        }
    }
}

impl RequestInfo for ContextRef<'_> {
    fn base(&self) -> &ApiRequestBase {
        self.info().base()
    }

    fn course_id(&self) -> Option<&str> {
        self.info().course_id()
    }

    fn assignment_id(&self) -> Option<&str> {
        self.info().assignment_id()
    }

    fn user_email(&self) -> Option<&str> {
        self.info().user_email()
    }

    fn user_role(&self) -> Option<Role> {
        self.info().user_role()
    }
}

/// Implemented by the three context types; the derive macro calls it on the
/// field marked `#[api(context)]`.
pub trait AsContext {
    fn as_context_mut(&mut self) -> ContextMut<'_>;
    fn as_context(&self) -> ContextRef<'_>;
}

impl AsContext for ApiRequestBase {
    fn as_context_mut(&mut self) -> ContextMut<'_> {
        ContextMut::Base(self)
    }

    fn as_context(&self) -> ContextRef<'_> {
        ContextRef::Base(self)
    }
}

impl AsContext for CourseUserContext {
    fn as_context_mut(&mut self) -> ContextMut<'_> {
        ContextMut::CourseUser(self)
    }

    fn as_context(&self) -> ContextRef<'_> {
        ContextRef::CourseUser(self)
    }
}

impl AsContext for AssignmentContext {
    fn as_context_mut(&mut self) -> ContextMut<'_> {
        ContextMut::Assignment(self)
    }

    fn as_context(&self) -> ContextRef<'_> {
        ContextRef::Assignment(self)
    }
}

/// A request type the binder can populate.
///
/// Usually derived with `#[derive(ApiRequest)]`:
///
/// - `#[api(min_role = Admin)]` on the struct, repeatable; the highest role wins.
/// - `#[api(context)]` on exactly one field of a context type.
/// - `#[api(special)]` on each special field, optionally `#[api(special = "json-name")]`.
pub trait ApiRequest: DeserializeOwned + Send + 'static {
    /// Roles declared on the request. Empty is a registration error caught at bind time.
    const MIN_ROLES: &'static [Role];

    fn context_mut(&mut self) -> Option<ContextMut<'_>>;

    fn context(&self) -> Option<ContextRef<'_>>;

    /// Special fields in declaration order, with their JSON names.
    fn special_fields(&mut self) -> Vec<(&'static str, FieldSlot<'_>)>;

    /// The gate role: the maximum of [`Self::MIN_ROLES`].
    fn min_role() -> Option<Role> {
        Self::MIN_ROLES.iter().copied().max()
    }
}

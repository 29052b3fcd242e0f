use super::request::RequestInfo;
use super::response::ApiResponse;
use crate::model::{LogLevel, Role};
use crate::timestamp::Timestamp;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

pub const HTTP_STATUS_GOOD: u16 = 200;
pub const HTTP_STATUS_BAD_REQUEST: u16 = 400;
pub const HTTP_STATUS_AUTH_ERROR: u16 = 401;
pub const HTTP_STATUS_PERMISSIONS_ERROR: u16 = 403;
pub const HTTP_STATUS_SERVER_ERROR: u16 = 500;

pub const AUTH_FAILURE_TEXT: &str = "Authentication failure, check email and password.";
pub const PERMISSION_DENIED_TEXT: &str =
    "You have insufficient permissions for the requested operation.";

/// A structured API failure, built with the constructors below and refined
/// with the builder methods.
///
/// ```rust,ignore
/// return Err(ApiError::internal(locator::USER_LOOKUP, &ctx, "Failed to get user.")
///     .err(e)
///     .add("target", email));
/// ```
#[derive(Debug, Error)]
#[error("API Error [{locator}] ({http_status}) {internal_text}")]
pub struct ApiError {
    pub request_id: String,
    pub locator: &'static str,
    pub endpoint: String,
    pub timestamp: Timestamp,
    pub level: LogLevel,
    pub http_status: u16,
    pub internal_text: String,
    pub response_text: String,
    pub wrapped: Vec<anyhow::Error>,
    pub course_id: String,
    pub assignment_id: String,
    pub user_email: String,
    pub details: BTreeMap<String, Value>,
}

impl ApiError {
    fn from_info(
        locator: &'static str,
        info: &dyn RequestInfo,
        http_status: u16,
        level: LogLevel,
        internal_text: String,
        response_text: String,
    ) -> Self {
        let base = info.base();
        Self {
            request_id: base.request_id.to_string(),
            locator,
            endpoint: base.endpoint.clone(),
            timestamp: base.timestamp,
            level,
            http_status,
            internal_text,
            response_text,
            wrapped: Vec::new(),
            course_id: info.course_id().unwrap_or_default().to_string(),
            assignment_id: info.assignment_id().unwrap_or_default().to_string(),
            user_email: info.user_email().unwrap_or_default().to_string(),
            details: BTreeMap::new(),
        }
    }

    // Raised before a request id exists; the locator stands in as the id.
    fn bare(
        locator: &'static str,
        endpoint: &str,
        http_status: u16,
        level: LogLevel,
        internal_text: String,
        response_text: String,
    ) -> Self {
        Self {
            request_id: locator.to_string(),
            locator,
            endpoint: endpoint.to_string(),
            timestamp: Timestamp::now(),
            level,
            http_status,
            internal_text,
            response_text,
            wrapped: Vec::new(),
            course_id: String::new(),
            assignment_id: String::new(),
            user_email: String::new(),
            details: BTreeMap::new(),
        }
    }

    pub fn bad_request(
        locator: &'static str,
        info: &dyn RequestInfo,
        text: impl Into<String>,
    ) -> Self {
        let text = text.into();
        Self::from_info(
            locator,
            info,
            HTTP_STATUS_BAD_REQUEST,
            LogLevel::Info,
            text.clone(),
            text,
        )
    }

    pub fn bare_bad_request(locator: &'static str, endpoint: &str, text: impl Into<String>) -> Self {
        let text = text.into();
        Self::bare(
            locator,
            endpoint,
            HTTP_STATUS_BAD_REQUEST,
            LogLevel::Info,
            text.clone(),
            text,
        )
    }

    pub fn auth_failure(
        locator: &'static str,
        info: &dyn RequestInfo,
        internal_text: impl AsRef<str>,
    ) -> Self {
        Self::from_info(
            locator,
            info,
            HTTP_STATUS_AUTH_ERROR,
            LogLevel::Info,
            format!("Authentication failure: '{}'.", internal_text.as_ref()),
            AUTH_FAILURE_TEXT.to_string(),
        )
    }

    pub fn permission_denied(
        locator: &'static str,
        info: &dyn RequestInfo,
        min_role: Role,
        internal_text: impl AsRef<str>,
    ) -> Self {
        let actual = info.user_role().unwrap_or_default();
        Self::from_info(
            locator,
            info,
            HTTP_STATUS_PERMISSIONS_ERROR,
            LogLevel::Info,
            format!("Insufficient Permissions: '{}'.", internal_text.as_ref()),
            PERMISSION_DENIED_TEXT.to_string(),
        )
        .add("actual-role", actual)
        .add("min-role", min_role)
    }

    pub fn internal(
        locator: &'static str,
        info: &dyn RequestInfo,
        internal_text: impl Into<String>,
    ) -> Self {
        let id = info.base().request_id.to_string();
        Self::from_info(
            locator,
            info,
            HTTP_STATUS_SERVER_ERROR,
            LogLevel::Error,
            internal_text.into(),
            contact_admin_text(&id),
        )
    }

    pub fn bare_internal(
        locator: &'static str,
        endpoint: &str,
        internal_text: impl Into<String>,
    ) -> Self {
        Self::bare(
            locator,
            endpoint,
            HTTP_STATUS_SERVER_ERROR,
            LogLevel::Error,
            internal_text.into(),
            contact_admin_text(locator),
        )
    }

    /// Attach a detail. Values that fail to serialize are recorded as strings.
    pub fn add(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(&value)
            .unwrap_or_else(|e| Value::String(format!("<unserializable: {e}>")));
        self.details.insert(key.to_string(), value);
        self
    }

    /// Wrap a cause. Several causes are kept in order.
    pub fn err(mut self, e: impl Into<anyhow::Error>) -> Self {
        self.wrapped.push(e.into());
        self
    }

    pub fn course(mut self, course_id: impl Into<String>) -> Self {
        self.course_id = course_id.into();
        self
    }

    pub fn assignment(mut self, assignment_id: impl Into<String>) -> Self {
        self.assignment_id = assignment_id.into();
        self
    }

    pub fn user(mut self, email: impl Into<String>) -> Self {
        self.user_email = email.into();
        self
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn is_internal(&self) -> bool {
        self.http_status == HTTP_STATUS_SERVER_ERROR
    }

    /// Convert to an envelope. `content` is null and 401 blanks the locator.
    pub fn to_response(&self) -> ApiResponse {
        let locator = if self.http_status == HTTP_STATUS_AUTH_ERROR {
            ""
        } else {
            self.locator
        };
        ApiResponse::failure(
            self.request_id.clone(),
            locator.to_string(),
            self.timestamp,
            self.http_status,
            self.response_text.clone(),
        )
    }

    fn wrapped_text(&self) -> String {
        self.wrapped
            .iter()
            .map(|e| format!("{e:#}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Emit one structured event at the error's level. The locator is always logged.
    pub fn log(&self) {
        let wrapped = self.wrapped_text();
        let details = Value::Object(self.details.clone().into_iter().collect()).to_string();

        macro_rules! emit {
            ($lvl:ident) => {
                tracing::$lvl!(
                    request_id = %self.request_id,
                    locator = self.locator,
                    endpoint = %self.endpoint,
                    timestamp = %self.timestamp,
                    http_status = self.http_status,
                    course_id = %self.course_id,
                    assignment_id = %self.assignment_id,
                    user_email = %self.user_email,
                    internal_text = %self.internal_text,
                    response_text = %self.response_text,
                    error = %wrapped,
                    details = %details,
                    "API Error"
                )
            };
        }

        match self.level {
            LogLevel::Trace => emit!(trace),
            LogLevel::Debug => emit!(debug),
            LogLevel::Info => emit!(info),
            LogLevel::Warn => emit!(warn),
            LogLevel::Error => emit!(error),
        }
    }
}

fn contact_admin_text(id: &str) -> String {
    format!(
        "The server failed to process your request. Please contact an administrator with this ID '{id}'."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{locator, ApiRequestBase, CourseUserContext};
    use crate::model::User;

    fn context() -> CourseUserContext {
        let mut ctx = CourseUserContext::default();
        ctx.base.endpoint = "/api/v03/test".into();
        ctx.course_id = "course101".into();
        ctx.user_email = "student@test.com".into();
        ctx.set_user(User::new("student@test.com", "", Role::Student));
        ctx
    }

    #[test]
    fn test_bad_request_texts_match() {
        let err = ApiError::bad_request(locator::EMPTY_COURSE_ID, &context(), "No course ID specified.");
        assert_eq!(err.http_status, 400);
        assert_eq!(err.internal_text, err.response_text);
        assert_eq!(err.course_id, "course101");
        assert_eq!(err.user_email, "student@test.com");
    }

    #[test]
    fn test_auth_failure_hides_locator() {
        let err = ApiError::auth_failure(locator::AUTH_BAD_PASS, &context(), "Bad password.");
        assert_eq!(err.locator, "-203");
        assert_eq!(err.response_text, AUTH_FAILURE_TEXT);

        let response = err.to_response();
        assert_eq!(response.status(), 401);
        assert_eq!(response.locator(), "");
        assert!(!response.success());
        assert!(response.content().is_null());
    }

    #[test]
    fn test_permission_denied_details() {
        let err = ApiError::permission_denied(locator::ROLE_GATE, &context(), Role::Admin, "");
        assert_eq!(err.http_status, 403);
        assert_eq!(err.details["min-role"], "admin");
        assert_eq!(err.details["actual-role"], "student");
        assert_eq!(err.to_response().locator(), "-020");
    }

    #[test]
    fn test_internal_mentions_request_id() {
        let mut base = ApiRequestBase::default();
        base.request_id = crate::ids::RequestId::new();
        let id = base.request_id.to_string();
        let err = ApiError::internal(locator::USER_LOOKUP, &base, "boom")
            .err(anyhow::anyhow!("disk on fire"))
            .err(anyhow::anyhow!("and the backup"));
        assert!(err.response_text.contains(&id));
        assert_eq!(err.wrapped.len(), 2);
        assert_eq!(err.wrapped_text(), "disk on fire; and the backup");
        assert_eq!(err.to_response().id(), id);
    }

    #[test]
    fn test_bare_errors_use_locator_as_id() {
        let err = ApiError::bare_bad_request(locator::BAD_JSON, "/x", "bad json");
        assert_eq!(err.request_id, "-105");
        let response = err.to_response();
        assert_eq!(response.id(), "-105");
        assert_eq!(response.status(), 400);

        let err = ApiError::bare_internal(locator::HANDLER_PANIC, "/x", "panic");
        assert!(err.response_text.contains("-101"));
    }
}

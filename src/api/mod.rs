//! # API request core
//!
//! Request types, the binder that fills them and the envelope they answer with.
//!
//! A request type embeds one context and any number of special fields, and
//! derives [`ApiRequest`](request::ApiRequest):
//!
//! | Piece | Where it comes from |
//! |---|---|
//! | [`ApiRequestBase`] | request id, endpoint, start time; never JSON |
//! | [`CourseUserContext`] | `course-id`, `user-email`, `user-pass`, `root-user-nonce` |
//! | [`AssignmentContext`] | the above plus `assignment-id` |
//! | [`CourseUsers`], [`PostFiles`] | injected by the binder |
//! | [`TargetUser`], [`TargetUserSelfOr`], [`NonEmptyString`] | JSON, then checked |
//!
//! Failures are [`ApiError`]s carrying a stable [`locator`] code.

pub mod auth;
pub mod binder;
pub mod error;
pub mod fields;
pub mod handler;
pub mod locator;
pub mod request;
pub mod response;

pub use auth::{authenticate, NonceStore, UserIdentity};
pub use binder::{cleanup_api_request, create_api_request, CONTENT_KEY, POST_FILES_DIR_PREFIX};
pub use error::ApiError;
pub use fields::{
    CourseUsers, FieldSlot, NonEmptyString, PostFiles, SpecialField, TargetUser, TargetUserSelfOr,
    TargetUserSelfOrAdmin, TargetUserSelfOrGrader,
};
pub use handler::{wrap_api_handler, ApiHandlerFn};
pub use request::{
    ApiRequest, ApiRequestBase, AsContext, AssignmentContext, ContextMut, ContextRef,
    CourseUserContext, RequestInfo,
};
pub use response::ApiResponse;

/// Version prefix shared by every API endpoint.
pub const API_PREFIX: &str = "/api/v03";

/// `api_path("courses/users/list") == "/api/v03/courses/users/list"`.
pub fn api_path(suffix: &str) -> String {
    format!("{API_PREFIX}/{}", suffix.trim_start_matches('/'))
}

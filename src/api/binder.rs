//! Turns an HTTP request into a validated, authenticated request value.
//!
//! The steps run in a fixed order. An earlier failure always wins over a later one:
//!
//! 1. read the `content` form field and decode it as JSON into `R`
//! 2. validate the embedded context (base, then course/user, then assignment)
//! 3. authenticate and apply the role gate
//! 4. populate special fields in declaration order

use super::auth::authenticate;
use super::error::ApiError;
use super::fields::{FieldSlot, PostFiles};
use super::locator;
use super::request::{
    ApiRequest, ApiRequestBase, AssignmentContext, ContextMut, ContextRef, CourseUserContext,
    RequestInfo,
};
use crate::config::options;
use crate::model::{Course, Role, User};
use crate::server::request::{HttpRequest, UploadedFile};
use crate::services::Services;
use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use tracing::{debug, warn};

/// Form key that carries the JSON payload.
pub const CONTENT_KEY: &str = "content";

/// Prefix of the temp dirs holding uploaded files.
pub const POST_FILES_DIR_PREFIX: &str = "api-request-files-";

/// Build a fully bound `R` from `request`, or the error to answer with.
pub fn create_api_request<R: ApiRequest>(
    request: &HttpRequest,
    endpoint: &str,
    services: &Services,
) -> Result<R, ApiError> {
    let form = request.form().map_err(|e| {
        ApiError::bare_bad_request(
            locator::BAD_MULTIPART,
            endpoint,
            "POST request has a malformed multipart form.",
        )
        .err(e)
    })?;

    let content = form.field(CONTENT_KEY).unwrap_or_default();
    if content.is_empty() {
        return Err(ApiError::bare_bad_request(
            locator::EMPTY_CONTENT,
            endpoint,
            format!("JSON payload for POST form key '{CONTENT_KEY}' is empty."),
        ));
    }

    let mut api_request: R = serde_json::from_str(content).map_err(|e| {
        ApiError::bare_bad_request(
            locator::BAD_JSON,
            endpoint,
            format!("JSON payload for POST form key '{CONTENT_KEY}' is not valid JSON."),
        )
        .err(e)
    })?;

    let testing_mode = options::UNIT_TESTING_MODE.get(&services.config);
    match api_request.context_mut() {
        Some(ctx) => validate_context(ctx, endpoint, testing_mode, R::min_role(), services)?,
        None => {
            return Err(ApiError::bare_internal(
                locator::NO_CONTEXT,
                endpoint,
                "Request type does not embed a request context.",
            ));
        }
    }

    let snapshot = match api_request.context() {
        Some(ctx) => Snapshot::of(ctx),
        None => {
            return Err(ApiError::bare_internal(
                locator::NO_CONTEXT,
                endpoint,
                "Request type does not embed a request context.",
            ));
        }
    };

    populate_special_fields(&mut api_request, &form.files, &snapshot, services)?;

    debug!(
        request_id = %snapshot.base.request_id,
        endpoint = %endpoint,
        course_id = ?snapshot.course_id,
        user_email = ?snapshot.user_email,
        "API request bound"
    );

    Ok(api_request)
}

/// Release per-request resources. Runs on every exit path of the API wrapper.
pub fn cleanup_api_request<R: ApiRequest>(request: &mut R) {
    for (name, slot) in request.special_fields() {
        if let FieldSlot::PostFiles(files) = slot {
            if let Err(e) = files.cleanup() {
                warn!(field = name, error = %e, "Failed to remove request files");
            }
        }
    }
}

fn validate_context(
    ctx: ContextMut<'_>,
    endpoint: &str,
    testing_mode: bool,
    min_role: Option<Role>,
    services: &Services,
) -> Result<(), ApiError> {
    match ctx {
        ContextMut::Base(base) => {
            base.validate(endpoint, testing_mode);
            Ok(())
        }
        ContextMut::CourseUser(ctx) => {
            validate_course_user(ctx, endpoint, testing_mode, min_role, services)
        }
        ContextMut::Assignment(ctx) => {
            validate_course_user(
                &mut ctx.course_user,
                endpoint,
                testing_mode,
                min_role,
                services,
            )?;
            validate_assignment(ctx)
        }
    }
}

fn validate_course_user(
    ctx: &mut CourseUserContext,
    endpoint: &str,
    testing_mode: bool,
    min_role: Option<Role>,
    services: &Services,
) -> Result<(), ApiError> {
    ctx.base.validate(endpoint, testing_mode);

    if ctx.course_id.is_empty() {
        return Err(ApiError::bad_request(
            locator::EMPTY_COURSE_ID,
            ctx,
            "No course ID specified.",
        ));
    }

    // A root nonce names its own identity, so email and password are optional.
    if ctx.user_email.is_empty() && ctx.root_user_nonce.is_empty() {
        return Err(ApiError::bad_request(
            locator::EMPTY_USER_EMAIL,
            ctx,
            "No user email specified.",
        ));
    }

    if ctx.user_pass.is_empty() && ctx.root_user_nonce.is_empty() {
        return Err(ApiError::bad_request(
            locator::EMPTY_USER_PASS,
            ctx,
            "No user password specified.",
        ));
    }

    let course = match services.courses.get_course(&ctx.course_id) {
        Ok(Some(course)) => course,
        Ok(None) => {
            return Err(ApiError::bad_request(
                locator::COURSE_NOT_FOUND,
                ctx,
                format!("Could not find course '{}'.", ctx.course_id),
            ));
        }
        Err(e) => {
            return Err(
                ApiError::internal(locator::COURSE_LOOKUP, ctx, "Failed to get course.").err(e),
            );
        }
    };
    ctx.set_course(course);

    authenticate(ctx, services.users.as_ref(), &services.nonces)?;

    let Some(min_role) = min_role else {
        return Err(ApiError::internal(
            locator::NO_MIN_ROLE,
            ctx,
            "No role found for request. All request structs require a minimum role.",
        ));
    };

    if ctx.user().role < min_role {
        return Err(ApiError::permission_denied(
            locator::ROLE_GATE,
            ctx,
            min_role,
            "Base API Request",
        ));
    }

    Ok(())
}

fn validate_assignment(ctx: &mut AssignmentContext) -> Result<(), ApiError> {
    if ctx.assignment_id.is_empty() {
        return Err(ApiError::bad_request(
            locator::EMPTY_ASSIGNMENT_ID,
            ctx,
            "No assignment ID specified.",
        ));
    }

    let Some(assignment) = ctx.course().assignment(&ctx.assignment_id).cloned() else {
        return Err(ApiError::bad_request(
            locator::ASSIGNMENT_NOT_FOUND,
            ctx,
            format!("Could not find assignment '{}'.", ctx.assignment_id),
        )
        .add("assignment-id", &ctx.assignment_id));
    };

    ctx.set_assignment(assignment);
    Ok(())
}

/// Owned copy of the validated context, so special fields can be filled
/// while the request is mutably borrowed.
struct Snapshot {
    base: ApiRequestBase,
    course_id: Option<String>,
    assignment_id: Option<String>,
    user_email: Option<String>,
    course: Option<Arc<Course>>,
    user: Option<User>,
}

impl Snapshot {
    fn of(ctx: ContextRef<'_>) -> Self {
        let course_user = ctx.course_user();
        Self {
            base: ctx.base().clone(),
            course_id: ctx.course_id().map(str::to_string),
            assignment_id: ctx.assignment_id().map(str::to_string),
            user_email: ctx.user_email().map(str::to_string),
            course: course_user.map(CourseUserContext::course_arc),
            user: course_user.map(|c| c.user().clone()),
        }
    }
}

impl RequestInfo for Snapshot {
    fn base(&self) -> &ApiRequestBase {
        &self.base
    }

    fn course_id(&self) -> Option<&str> {
        self.course_id.as_deref()
    }

    fn assignment_id(&self) -> Option<&str> {
        self.assignment_id.as_deref()
    }

    fn user_email(&self) -> Option<&str> {
        self.user_email.as_deref()
    }

    fn user_role(&self) -> Option<Role> {
        self.user.as_ref().map(|u| u.role)
    }
}

/// Course users, fetched at most once per request.
struct UserCache<'a> {
    snapshot: &'a Snapshot,
    services: &'a Services,
    users: Option<BTreeMap<String, User>>,
}

impl<'a> UserCache<'a> {
    fn get(&mut self, field: &str) -> Result<&BTreeMap<String, User>, ApiError> {
        if self.users.is_none() {
            let Some(course) = self.snapshot.course.as_ref() else {
                return Err(ApiError::internal(
                    locator::COURSE_USERS_NO_CONTEXT,
                    self.snapshot,
                    "A special field that needs course users was used without a course context.",
                )
                .add("field-name", field));
            };

            let users = self.services.users.get_users(&course.id).map_err(|e| {
                ApiError::internal(
                    locator::COURSE_USERS_FETCH,
                    self.snapshot,
                    "Failed to fetch course users.",
                )
                .add("field-name", field)
                .err(e)
            })?;
            self.users = Some(users);
        }

        Ok(self.users.get_or_insert_with(BTreeMap::new))
    }

    fn caller(&self, field: &str) -> Result<&User, ApiError> {
        self.snapshot.user.as_ref().ok_or_else(|| {
            ApiError::internal(
                locator::COURSE_USERS_NO_CONTEXT,
                self.snapshot,
                "A target user field was used without a course context.",
            )
            .add("field-name", field)
        })
    }
}

fn populate_special_fields<R: ApiRequest>(
    request: &mut R,
    files: &[UploadedFile],
    snapshot: &Snapshot,
    services: &Services,
) -> Result<(), ApiError> {
    let max_size_kb = options::WEB_MAX_FILE_SIZE_KB.get(&services.config);
    let mut cache = UserCache {
        snapshot,
        services,
        users: None,
    };

    for (name, slot) in request.special_fields() {
        match slot {
            FieldSlot::CourseUsers(field) => {
                field.0 = cache.get(name)?.clone();
            }
            FieldSlot::TargetUser(target) => {
                if target.email.is_empty() {
                    return Err(ApiError::bad_request(
                        locator::TARGET_USER_EMPTY,
                        snapshot,
                        format!(
                            "Field '{name}' requires a non-empty string, empty or null provided."
                        ),
                    )
                    .add("field-name", name));
                }
                target.user = cache.get(name)?.get(&target.email).cloned();
            }
            FieldSlot::TargetUserSelfOr(target, role) => {
                let caller = cache.caller(name)?.clone();
                if target.email.is_empty() {
                    target.email = caller.email.clone();
                }

                if target.email != caller.email && caller.role < role {
                    return Err(ApiError::permission_denied(
                        locator::TARGET_SELF_OR_ROLE,
                        snapshot,
                        role,
                        "Non-Self Target User",
                    )
                    .add("field-name", name)
                    .add("target-user", &target.email));
                }
                target.user = cache.get(name)?.get(&target.email).cloned();
            }
            FieldSlot::PostFiles(field) => {
                store_post_files(field, files, max_size_kb, name, snapshot)?;
            }
            FieldSlot::NonEmptyString(value) => {
                if value.0.is_empty() {
                    return Err(ApiError::bad_request(
                        locator::EMPTY_STRING_FIELD,
                        snapshot,
                        format!(
                            "Field '{name}' requires a non-empty string, empty or null provided."
                        ),
                    )
                    .add("field-name", name));
                }
            }
        }
    }

    Ok(())
}

/// Store every uploaded file in a fresh temp dir. On failure the dir is
/// dropped, which removes it.
fn store_post_files(
    field: &mut PostFiles,
    files: &[UploadedFile],
    max_size_kb: i64,
    name: &str,
    snapshot: &Snapshot,
) -> Result<(), ApiError> {
    if files.is_empty() {
        return Err(ApiError::bad_request(
            locator::POST_FILES_MISSING,
            snapshot,
            "Endpoint requires files to be provided in POST body in a multipart form.",
        )
        .add("field-name", name));
    }

    let dir = tempfile::Builder::new()
        .prefix(POST_FILES_DIR_PREFIX)
        .tempdir()
        .map_err(|e| {
            ApiError::internal(
                locator::POST_FILES_IO,
                snapshot,
                "Failed to create a temp dir for POST files.",
            )
            .err(e)
        })?;

    let max_bytes = u64::try_from(max_size_kb.max(0))
        .unwrap_or(0)
        .saturating_mul(1024);
    let mut filenames = Vec::with_capacity(files.len());
    for file in files {
        let size = file.data.len() as u64;
        if size > max_bytes {
            return Err(ApiError::bad_request(
                locator::POST_FILE_TOO_LARGE,
                snapshot,
                format!(
                    "File '{}' is {} KB, the limit is {} KB.",
                    file.display_name(),
                    size / 1024,
                    max_size_kb
                ),
            )
            .add("filename", file.display_name())
            .add("file-size-kb", size / 1024)
            .add("max-file-size-kb", max_size_kb));
        }

        let stored_name = sanitize_filename(file.display_name());
        let path = dir.path().join(&stored_name);
        fs::write(&path, &file.data).map_err(|e| {
            ApiError::internal(locator::POST_FILES_IO, snapshot, "Failed to store POST file.")
                .add("filename", &stored_name)
                .err(e)
        })?;
        filenames.push(stored_name);
    }

    field.fill(dir, filenames);
    Ok(())
}

/// Reduce a client-supplied name to a single safe path component.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "file".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a.txt"), "a.txt");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("dir\\sub\\x y.py"), "x_y.py");
        assert_eq!(sanitize_filename(".."), "file");
        assert_eq!(sanitize_filename(""), "file");
    }
}

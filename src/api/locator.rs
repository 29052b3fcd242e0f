//! Stable locator codes. Each names the check that produced an error; they
//! appear in logs always and in envelopes except for 401 responses.

// Dispatch and intake.
pub const HANDLER_PANIC: &str = "-101";
pub const RESPONSE_SERIALIZE: &str = "-102";
pub const BAD_MULTIPART: &str = "-103";
pub const EMPTY_CONTENT: &str = "-104";
pub const BAD_JSON: &str = "-105";

// Handler contract. Registration is generic, so these are unreachable and
// stay reserved.
pub const HANDLER_NOT_FUNCTION: &str = "-106";
pub const HANDLER_INPUT_COUNT: &str = "-107";
pub const HANDLER_INPUT_NOT_POINTER: &str = "-108";
pub const HANDLER_OUTPUT_COUNT: &str = "-109";
pub const HANDLER_OUTPUT_NOT_POINTER: &str = "-110";
pub const HANDLER_OUTPUT_NOT_ERROR: &str = "-111";

// Context validation.
pub const EMPTY_COURSE_ID: &str = "-015";
pub const EMPTY_USER_EMAIL: &str = "-016";
pub const EMPTY_USER_PASS: &str = "-017";
pub const COURSE_NOT_FOUND: &str = "-018";
pub const NO_MIN_ROLE: &str = "-019";
pub const ROLE_GATE: &str = "-020";
pub const EMPTY_ASSIGNMENT_ID: &str = "-021";
pub const ASSIGNMENT_NOT_FOUND: &str = "-022";
pub const NO_CONTEXT: &str = "-024";

// Special fields.
pub const COURSE_USERS_NO_CONTEXT: &str = "-025";
pub const COURSE_USERS_NOT_EXPORTED: &str = "-026";
pub const COURSE_USERS_FETCH: &str = "-027";
pub const POST_FILES_NOT_EXPORTED: &str = "-028";
pub const POST_FILES_IO: &str = "-029";
pub const POST_FILES_MISSING: &str = "-030";
pub const USER_LOOKUP: &str = "-031";
pub const COURSE_LOOKUP: &str = "-032";
/// Shared with [`COURSE_LOOKUP`]; the HTTP status tells them apart.
pub const EMPTY_STRING_FIELD: &str = "-032";
pub const TARGET_SELF_OR_ROLE: &str = "-033";
pub const TARGET_USER_EMPTY: &str = "-034";
pub const POST_FILE_TOO_LARGE: &str = "-036";

// Authentication.
pub const AUTH_NO_USER: &str = "-202";
pub const AUTH_BAD_PASS: &str = "-203";
pub const AUTH_BAD_NONCE: &str = "-204";

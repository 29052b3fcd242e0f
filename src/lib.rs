//! # autograder
//!
//! The request-processing core and scheduled-task engine of an autograding
//! service, running on `may` coroutines and `may_minihttp`.
//!
//! ## Architecture
//!
//! - **[`api`]** - request contexts, special fields, the binder, the error
//!   taxonomy and the response envelope
//! - **[`router`]** - the ordered route table (redirect, raw and api routes)
//! - **[`dispatcher`]** - method/path dispatch and the API handler wrapper
//! - **[`server`]** - HTTP service over `may_minihttp`, the unix-socket admin
//!   channel and the status file
//! - **[`task`]** - per-course timers with catch-up, single-flight execution,
//!   minimum rest and graceful stop
//! - **[`services`]** - the collaborators the core consumes (stores, grader,
//!   LMS, email, clock, randomness) with in-memory implementations
//! - **[`config`]** - typed options layered from files, environment and CLI
//! - **[`model`]** - roles, users, courses, assignments and scheduled tasks
//!
//! ### Request Handling Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant Server as HttpListener<br/>(may_minihttp)
//!     participant Dispatcher
//!     participant Binder as create_api_request
//!     participant Handler
//!
//!     Client->>Server: POST /api/v03/...<br/>content={json}
//!     Server->>Dispatcher: dispatch(HttpRequest)
//!     Dispatcher->>Dispatcher: scan routes in order
//!     alt No Route Match
//!         Dispatcher-->>Client: 404 Not Found
//!     end
//!     Dispatcher->>Binder: decode JSON, validate context
//!     Binder->>Binder: course, auth, role gate,<br/>assignment, special fields
//!     alt Validation Failed
//!         Binder-->>Client: 400 / 401 / 403 / 500 envelope
//!     end
//!     Binder->>Handler: handler(&mut request)
//!     alt Handler Panics
//!         Handler-->>Client: 500 envelope (-101)
//!     end
//!     Handler-->>Dispatcher: Result<T, ApiError>
//!     Dispatcher->>Dispatcher: cleanup temp dirs
//!     Dispatcher-->>Client: 200 envelope
//! ```
//!
//! ## Defining an endpoint
//!
//! ```rust,ignore
//! use autograder::api::{ApiError, CourseUserContext, TargetUserSelfOrGrader};
//! use autograder::ApiRequest;
//!
//! #[derive(serde::Deserialize, ApiRequest)]
//! #[api(min_role = Student)]
//! struct PeekRequest {
//!     #[api(context)]
//!     #[serde(flatten)]
//!     ctx: CourseUserContext,
//!     #[api(special = "target-email")]
//!     #[serde(rename = "target-email", default)]
//!     target: TargetUserSelfOrGrader,
//! }
//!
//! fn peek(req: &mut PeekRequest) -> Result<String, ApiError> {
//!     Ok(req.target.email.clone())
//! }
//! ```
//!
//! ## Runtime Considerations
//!
//! HTTP handlers run in `may` coroutines; the coroutine stack size comes from
//! the `server.stacksize` option. Task timers, task bodies and the unix-socket
//! listener run on named OS threads.

extern crate self as autograder;

pub mod api;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod ids;
pub mod logging;
pub mod model;
pub mod router;
pub mod runtime_config;
pub mod server;
pub mod services;
pub mod task;
pub mod testdata;
pub mod timestamp;

pub use api::{ApiError, ApiResponse};
pub use autograder_macros::ApiRequest;
pub use config::Config;
pub use model::Role;
pub use services::Services;

/// Server version reported in every envelope.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

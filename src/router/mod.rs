//! # Router Module
//!
//! An ordered table of routes. Each route pairs a method and an anchored
//! path regex with one of three behaviors:
//!
//! - **redirect** - answer 301 with a `Location` header
//! - **raw** - a handler that builds its own [`HttpReply`](crate::dispatcher::HttpReply)
//! - **api** - a typed endpoint run through the binder and the envelope wrapper
//!
//! Routes are scanned in order and the first match wins. The table lives in an
//! `ArcSwap`, so lookups never take a lock.
//!
//! ## Example
//!
//! ```rust,ignore
//! use autograder::router::{Route, Router};
//! use http::Method;
//!
//! let router = Router::with_core_routes(vec![
//!     Route::redirect(Method::GET, "/", "/index.html")?,
//!     Route::api(&api_path("courses/users/list"), "List course users.", list_users)?,
//! ])?;
//!
//! assert!(router.match_route(&Method::POST, "/api/v03/describe").is_some());
//! ```

mod core;
mod describe;

pub use core::{EndpointDescription, RawHandler, Route, RouteKind, Router};
pub use describe::{DescribeRequest, DescribeResponse, DESCRIBE_ENDPOINT};

//! # Server Module
//!
//! The HTTP listener over `may_minihttp`, the unix-socket admin channel and
//! the status file that gives one server ownership of a work directory.
//!
//! ## Key Components
//!
//! - [`AppServer`] - the whole server: status claim, HTTP, admin socket, tasks
//! - [`HttpListener`] - bind, wait for, and stop the HTTP accept loop
//! - [`AppService`] - the `HttpService` that feeds requests to the dispatcher
//! - [`HttpRequest`] - owned request with form and multipart decoding
//! - [`StatusFile`] - `status.json` claim and stale-file recovery
//! - `unix_socket` - length-framed local requests authenticated by root nonce

pub mod app;
pub mod http_server;
pub mod request;
pub mod response;
pub mod service;
pub mod status;
#[cfg(unix)]
pub mod unix_socket;

pub use app::AppServer;
pub use http_server::HttpListener;
pub use request::{FormError, HttpRequest, RequestForm, UploadedFile};
pub use response::write_reply;
pub use service::AppService;
pub use status::{ServerInitiator, StatusError, StatusFile, StatusGuard, StatusInfo};
#[cfg(unix)]
pub use unix_socket::{SocketError, UnixSocketServer};

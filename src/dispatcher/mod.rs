//! # Dispatcher Module
//!
//! Matches a request against the [`Router`](crate::router::Router) and runs
//! the matched route:
//!
//! | Route | Reply |
//! |---|---|
//! | none | 404 |
//! | redirect | 301 with `Location` |
//! | raw | the handler's reply; 500 "Server Error" on error or panic |
//! | api | a JSON envelope (see [`crate::api::handler`]) |
//!
//! The dispatcher is transport-agnostic: it consumes an
//! [`HttpRequest`](crate::server::request::HttpRequest) and produces an
//! [`HttpReply`]. The `may_minihttp` service and the tests both drive it.

mod core;

pub use core::{Dispatcher, HttpReply};

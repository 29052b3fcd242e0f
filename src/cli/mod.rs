//! # CLI Module
//!
//! The `autograder` binary.
//!
//! ## Commands
//!
//! ### `server`
//!
//! Run the primary server until SIGINT or SIGTERM:
//!
//! ```bash
//! autograder server -c web.http.port=9090
//! ```
//!
//! ### `call`
//!
//! Send one request over the local admin socket. The request runs as root.
//! Without a running server, a temporary one is started for the call:
//!
//! ```bash
//! autograder call describe
//! autograder call courses/users/list --request '{"course-id": "course101"}' --test
//! ```
//!
//! ### `status`
//!
//! Print the status file of the running server, if any.
//!
//! ### `options`
//!
//! List every config option with its description.
//!
//! ## Config
//!
//! Every command accepts repeated `-c key=value` overrides, applied after
//! `config.json`, `secrets.json` and `AUTOGRADER__*` environment variables.

mod commands;


pub use commands::{run_cli, Cli, Commands};

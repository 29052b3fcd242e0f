//! # Runtime Configuration Module
//!
//! Settings for the `may` coroutine runtime, read from the `server.stacksize`
//! option.
//!
//! ## Stack size
//!
//! Accepts decimal (`32768`) or hexadecimal (`0x8000`). Default: `0x8000` (32 KB).
//!
//! - Memory usage is `stack_size × concurrent_coroutines`
//! - Too small overflows inside argon2 or serde; too large wastes memory
//!
//! ```bash
//! export AUTOGRADER__SERVER__STACKSIZE=0x10000
//! autograder server
//! ```

use crate::config::{options, Config};
use tracing::{info, warn};

/// Smallest stack accepted. Anything below is raised to this.
pub const MIN_STACK_SIZE: usize = 0x4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Stack size for coroutines in bytes.
    pub stack_size: usize,
}

impl RuntimeConfig {
    pub fn from_config(config: &Config) -> Self {
        let configured = options::SERVER_STACK_SIZE.get(config);
        let stack_size = match usize::try_from(configured) {
            Ok(size) if size >= MIN_STACK_SIZE => size,
            _ => {
                warn!(
                    configured = configured,
                    minimum = MIN_STACK_SIZE,
                    "Coroutine stack size too small, using minimum"
                );
                MIN_STACK_SIZE
            }
        };
        RuntimeConfig { stack_size }
    }

    /// Configure the global `may` runtime. Call once, before starting the server.
    pub fn apply(&self) {
        may::config().set_stack_size(self.stack_size);
        info!(stack_size = self.stack_size, "Coroutine runtime configured");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_and_hex() {
        let mut config = Config::new();
        assert_eq!(RuntimeConfig::from_config(&config).stack_size, 0x8000);

        config.set("server.stacksize", "0x10000");
        assert_eq!(RuntimeConfig::from_config(&config).stack_size, 0x10000);

        config.set("server.stacksize", 100);
        assert_eq!(RuntimeConfig::from_config(&config).stack_size, MIN_STACK_SIZE);
    }
}

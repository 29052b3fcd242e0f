use super::{Clock, Email, Emailer, Randomness};
use crate::timestamp::Timestamp;
use anyhow::{anyhow, Result};
use rand::RngCore;
use tracing::info;

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Operating-system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandomness;

impl Randomness for OsRandomness {
    fn fill(&self, buf: &mut [u8]) -> Result<()> {
        rand::rngs::OsRng
            .try_fill_bytes(buf)
            .map_err(|e| anyhow!("failed to read OS randomness: {e}"))
    }
}

/// Emailer that only logs. SMTP transport lives outside this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEmailer;

impl Emailer for LogEmailer {
    fn send(&self, email: &Email) -> Result<()> {
        info!(
            to = ?email.to,
            subject = %email.subject,
            html = email.html,
            body_bytes = email.body.len(),
            "Email sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_randomness_hex() {
        let a = OsRandomness.hex(64).unwrap();
        let b = OsRandomness.hex(64).unwrap();
        assert_eq!(a.len(), 128);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_system_clock_advances() {
        let a = SystemClock.now();
        let b = SystemClock.now();
        assert!(b >= a);
    }
}

use super::Role;
use anyhow::{anyhow, Context, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;

pub const SALT_LENGTH_BYTES: usize = 16;
pub const ARGON2_KEY_LEN_BYTES: usize = 32;
pub const ARGON2_MEM_KB: u32 = 64 * 1024;
pub const ARGON2_THREADS: u32 = 4;
pub const ARGON2_TIME: u32 = 1;

/// Email of the synthetic user a root nonce authenticates as.
pub const ROOT_EMAIL: &str = "root";

/// A course member (or the server-scope root user).
///
/// `salt` and `pass` are hex strings. `pass` is the argon2id hash of the
/// client's pre-hash (lower-case hex SHA-256 of the cleartext).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub email: String,
    #[serde(rename = "display-name", default)]
    pub display_name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(rename = "lms-id", default, skip_serializing_if = "String::is_empty")]
    pub lms_id: String,
    #[serde(default)]
    pub salt: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<String>,
}

impl User {
    pub fn new(email: impl Into<String>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            email: email.into(),
            display_name: display_name.into(),
            role,
            ..Default::default()
        }
    }

    /// The identity bound to a root nonce.
    pub fn root() -> Self {
        Self::new(ROOT_EMAIL, "Root", Role::Root)
    }

    /// Set the password from a pre-hash, generating a fresh salt.
    pub fn set_password(&mut self, prehash: &str) -> Result<()> {
        let mut salt = [0u8; SALT_LENGTH_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut salt);

        let hash = generate_hash(prehash, &salt)?;
        self.salt = hex::encode(salt);
        self.pass = hex::encode(hash);
        Ok(())
    }

    /// Set a random password and return its cleartext.
    pub fn set_random_password(&mut self) -> Result<String> {
        let mut bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let cleartext = hex::encode(bytes);
        self.set_password(&sha256_hex(&cleartext))?;
        Ok(cleartext)
    }

    /// Constant-time comparison of a pre-hash against the stored hash.
    ///
    /// Malformed stored values are logged and treated as a mismatch.
    pub fn check_password(&self, prehash: &str) -> bool {
        let stored = match hex::decode(&self.pass) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(user = %self.email, error = %e, "Bad password hash for user");
                return false;
            }
        };
        let salt = match hex::decode(&self.salt) {
            Ok(salt) => salt,
            Err(e) => {
                warn!(user = %self.email, error = %e, "Bad salt for user");
                return false;
            }
        };

        match generate_hash(prehash, &salt) {
            Ok(candidate) => bool::from(stored.as_slice().ct_eq(candidate.as_slice())),
            Err(e) => {
                warn!(user = %self.email, error = %e, "Could not hash password for user");
                false
            }
        }
    }

    /// Merge non-empty fields of `other` into this user. The email never changes.
    ///
    /// Returns true if anything changed.
    pub fn merge(&mut self, other: &User) -> bool {
        let mut changed = false;

        if !other.display_name.is_empty() && self.display_name != other.display_name {
            self.display_name = other.display_name.clone();
            changed = true;
        }

        if !other.pass.is_empty() && self.pass != other.pass {
            self.pass = other.pass.clone();
            self.salt = other.salt.clone();
            changed = true;
        }

        if other.role != Role::Unknown && self.role != other.role {
            self.role = other.role;
            changed = true;
        }

        if !other.lms_id.is_empty() && self.lms_id != other.lms_id {
            self.lms_id = other.lms_id.clone();
            changed = true;
        }

        changed
    }
}

fn generate_hash(prehash: &str, salt: &[u8]) -> Result<[u8; ARGON2_KEY_LEN_BYTES]> {
    let params = Params::new(
        ARGON2_MEM_KB,
        ARGON2_TIME,
        ARGON2_THREADS,
        Some(ARGON2_KEY_LEN_BYTES),
    )
    .map_err(|e| anyhow!("invalid argon2 parameters: {e}"))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut out = [0u8; ARGON2_KEY_LEN_BYTES];
    argon
        .hash_password_into(prehash.as_bytes(), salt, &mut out)
        .map_err(|e| anyhow!("argon2 failure: {e}"))
        .context("Failed to hash password")?;
    Ok(out)
}

/// Lower-case hex SHA-256, the client-side password pre-hash.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex("student"),
            "264c8c381bf16c982a4e59b0dd4c6f7808c51a05f64c35db42cc78a2a72875bb"
        );
    }

    #[test]
    fn test_password_round_trip() {
        let mut user = User::new("a@test.com", "A", Role::Student);
        user.set_password(&sha256_hex("secret")).unwrap();
        assert_eq!(user.salt.len(), SALT_LENGTH_BYTES * 2);
        assert_eq!(user.pass.len(), ARGON2_KEY_LEN_BYTES * 2);
        assert!(user.check_password(&sha256_hex("secret")));
        assert!(!user.check_password(&sha256_hex("secretZ")));
    }

    #[test]
    fn test_bad_stored_hash_is_mismatch() {
        let mut user = User::new("a@test.com", "A", Role::Student);
        user.pass = "zz".into();
        user.salt = "00".repeat(SALT_LENGTH_BYTES);
        assert!(!user.check_password(&sha256_hex("secret")));
    }

    #[test]
    fn test_merge_skips_empty() {
        let mut user = User::new("a@test.com", "A", Role::Student);
        user.lms_id = "lms-1".into();

        let other = User::new("other@test.com", "", Role::Unknown);
        assert!(!user.merge(&other));

        let other = User::new("other@test.com", "Alice", Role::Grader);
        assert!(user.merge(&other));
        assert_eq!(user.email, "a@test.com");
        assert_eq!(user.display_name, "Alice");
        assert_eq!(user.role, Role::Grader);
        assert_eq!(user.lms_id, "lms-1");
    }

    #[test]
    fn test_json_field_names() {
        let mut user = User::new("a@test.com", "A", Role::Admin);
        user.lms_id = "7".into();
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["display-name"], "A");
        assert_eq!(json["lms-id"], "7");
        assert_eq!(json["role"], "admin");
        assert!(json.get("tokens").is_none());
    }
}

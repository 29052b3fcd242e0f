use super::error::ApiError;
use super::locator;
use super::request::CourseUserContext;
use crate::model::{Role, User, ROOT_EMAIL};
use crate::services::UserStore;
use dashmap::DashMap;
use tracing::debug;

/// Who a root nonce authenticates as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserIdentity {
    pub email: String,
    pub role: Role,
}

impl UserIdentity {
    pub fn root() -> Self {
        Self {
            email: ROOT_EMAIL.to_string(),
            role: Role::Root,
        }
    }

    fn to_user(&self) -> User {
        User::new(self.email.clone(), "", self.role)
    }
}

/// One-shot tokens that stand in for a password.
///
/// The unix-socket channel issues a nonce per connection and revokes it when
/// the connection is done; a request that presents it consumes it.
#[derive(Debug, Default)]
pub struct NonceStore {
    live: DashMap<String, UserIdentity>,
}

impl NonceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, nonce: impl Into<String>, identity: UserIdentity) {
        self.live.insert(nonce.into(), identity);
    }

    /// Remove and return the identity. A second call with the same nonce misses.
    pub fn consume(&self, nonce: &str) -> Option<UserIdentity> {
        self.live.remove(nonce).map(|(_, identity)| identity)
    }

    pub fn revoke(&self, nonce: &str) {
        self.live.remove(nonce);
    }

    pub fn is_live(&self, nonce: &str) -> bool {
        self.live.contains_key(nonce)
    }
}

/// Authenticate the caller of a course/user context and store the user on it.
///
/// A presented root nonce is checked first and never falls back to the
/// password. The 401 text is the same for every failure; only the locator in
/// the log tells them apart.
pub fn authenticate(
    ctx: &mut CourseUserContext,
    users: &dyn UserStore,
    nonces: &NonceStore,
) -> Result<(), ApiError> {
    if !ctx.root_user_nonce.is_empty() {
        let Some(identity) = nonces.consume(&ctx.root_user_nonce) else {
            return Err(ApiError::auth_failure(
                locator::AUTH_BAD_NONCE,
                ctx,
                "Bad root user nonce.",
            ));
        };

        debug!(
            request_id = %ctx.request_id,
            email = %identity.email,
            "Authenticated with root nonce"
        );
        if ctx.user_email.is_empty() {
            ctx.user_email = identity.email.clone();
        }
        ctx.set_user(identity.to_user());
        return Ok(());
    }

    let user = match users.get_user(&ctx.course_id, &ctx.user_email) {
        Ok(user) => user,
        Err(e) => {
            return Err(
                ApiError::internal(locator::USER_LOOKUP, ctx, "Failed to get user.").err(e),
            );
        }
    };

    let Some(user) = user else {
        return Err(ApiError::auth_failure(
            locator::AUTH_NO_USER,
            ctx,
            "Unknown user.",
        ));
    };

    if !user.check_password(&ctx.user_pass) {
        return Err(ApiError::auth_failure(
            locator::AUTH_BAD_PASS,
            ctx,
            "Bad password.",
        ));
    }

    ctx.set_user(user);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::sha256_hex;
    use crate::services::memory::MemoryUserStore;

    fn store() -> MemoryUserStore {
        let store = MemoryUserStore::default();
        let mut user = User::new("student@test.com", "", Role::Student);
        user.set_password(&sha256_hex("student")).unwrap();
        store.upsert_user("course101", user).unwrap();
        store
    }

    #[test]
    fn test_nonce_is_one_shot() {
        let nonces = NonceStore::new();
        nonces.issue("abc", UserIdentity::root());
        assert!(nonces.is_live("abc"));
        assert_eq!(nonces.consume("abc"), Some(UserIdentity::root()));
        assert_eq!(nonces.consume("abc"), None);

        nonces.issue("def", UserIdentity::root());
        nonces.revoke("def");
        assert!(!nonces.is_live("def"));
    }

    #[test]
    fn test_password_auth() {
        let store = store();
        let nonces = NonceStore::new();

        let mut ctx = CourseUserContext::new("course101", "student@test.com", sha256_hex("student"));
        authenticate(&mut ctx, &store, &nonces).unwrap();
        assert_eq!(ctx.user().role, Role::Student);

        let mut ctx = CourseUserContext::new("course101", "student@test.com", sha256_hex("nope"));
        let err = authenticate(&mut ctx, &store, &nonces).unwrap_err();
        assert_eq!(err.locator, locator::AUTH_BAD_PASS);
        assert_eq!(err.http_status, 401);

        let mut ctx = CourseUserContext::new("course101", "ghost@test.com", sha256_hex("student"));
        let err = authenticate(&mut ctx, &store, &nonces).unwrap_err();
        assert_eq!(err.locator, locator::AUTH_NO_USER);
    }

    #[test]
    fn test_nonce_auth_skips_password() {
        let store = store();
        let nonces = NonceStore::new();
        nonces.issue("n1", UserIdentity::root());

        let mut ctx = CourseUserContext::new("course101", "root", "");
        ctx.root_user_nonce = "n1".into();
        authenticate(&mut ctx, &store, &nonces).unwrap();
        assert_eq!(ctx.user().role, Role::Root);
        assert_eq!(ctx.user().email, ROOT_EMAIL);

        // Replayed nonce.
        let mut ctx = CourseUserContext::new("course101", "student@test.com", sha256_hex("student"));
        ctx.root_user_nonce = "n1".into();
        let err = authenticate(&mut ctx, &store, &nonces).unwrap_err();
        assert_eq!(err.locator, locator::AUTH_BAD_NONCE);
    }
}

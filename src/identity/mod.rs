//! Identity provider and session store.
//!
//! The identity provider issues credentials; the session store turns a
//! successful sign-in into a session context that every handler receives
//! explicitly through application state.

mod provider;
mod session;

pub use provider::SqliteIdentityProvider;
pub use session::{SessionContext, SessionStore};

use async_trait::async_trait;

use crate::models::Role;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Failures reported by the identity provider. Surfaced verbatim, never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("An account with this email already exists")]
    EmailAlreadyInUse,
    #[error("Password must be at least 6 characters")]
    WeakPassword,
    #[error("Email address is not valid")]
    InvalidEmail,
    #[error("Identity service unavailable: {0}")]
    NetworkUnavailable(String),
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Identity backend error: {:?}", err);
        AuthError::NetworkUnavailable(err.to_string())
    }
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(err: argon2::password_hash::Error) -> Self {
        tracing::error!("Password hashing error: {}", err);
        AuthError::NetworkUnavailable(err.to_string())
    }
}

/// An account as held by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub display_name: String,
}

/// Credential-issuing API.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn create_account(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<Account, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Account, AuthError>;

    async fn sign_out(&self, account_id: &str) -> Result<(), AuthError>;

    async fn update_display_name(
        &self,
        account_id: &str,
        display_name: &str,
    ) -> Result<Account, AuthError>;

    async fn delete_account(&self, account_id: &str) -> Result<(), AuthError>;
}

/// Decides which email is bootstrapped into the admin role.
#[derive(Debug, Clone, Default)]
pub struct AdminPolicy {
    admin_email: Option<String>,
}

impl AdminPolicy {
    pub fn new(admin_email: Option<String>) -> Self {
        Self {
            admin_email: admin_email.map(|e| normalize_email(&e)),
        }
    }

    pub fn is_admin(&self, email: &str) -> bool {
        self.admin_email
            .as_deref()
            .is_some_and(|admin| admin == normalize_email(email))
    }

    pub fn role_for(&self, email: &str) -> Role {
        if self.is_admin(email) {
            Role::Admin
        } else {
            Role::Member
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Check sign-up input before it reaches the provider.
pub fn validate_credentials(email: &str, password: &str) -> Result<(), AuthError> {
    let email = email.trim();
    let valid_email = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        None => false,
    };
    if !valid_email || email.contains(char::is_whitespace) {
        return Err(AuthError::InvalidEmail);
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_policy_matches_configured_email_only() {
        let policy = AdminPolicy::new(Some("Media@Example.org".to_string()));
        assert!(policy.is_admin("media@example.org"));
        assert!(policy.is_admin("  MEDIA@example.org "));
        assert!(!policy.is_admin("member@example.org"));
        assert_eq!(policy.role_for("media@example.org"), Role::Admin);
        assert_eq!(policy.role_for("member@example.org"), Role::Member);
    }

    #[test]
    fn test_admin_policy_without_address_grants_nobody() {
        let policy = AdminPolicy::default();
        assert!(!policy.is_admin("media@example.org"));
    }

    #[test]
    fn test_validate_credentials() {
        assert_eq!(validate_credentials("a@b.org", "secret"), Ok(()));
        assert_eq!(
            validate_credentials("a@b.org", "short"),
            Err(AuthError::WeakPassword)
        );
        assert_eq!(
            validate_credentials("not-an-email", "secret"),
            Err(AuthError::InvalidEmail)
        );
        assert_eq!(
            validate_credentials("a b@c.org", "secret"),
            Err(AuthError::InvalidEmail)
        );
    }
}

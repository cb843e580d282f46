//! SQLite-backed identity provider.
//!
//! Passwords are stored as argon2id hashes in PHC string format, so the
//! salt and cost parameters travel with each hash.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use super::{normalize_email, validate_credentials, Account, AuthError, IdentityProvider};

#[derive(Clone)]
pub struct SqliteIdentityProvider {
    pool: SqlitePool,
}

impl SqliteIdentityProvider {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, account_id: &str) -> Result<Account, AuthError> {
        let row = sqlx::query("SELECT id, email, display_name FROM accounts WHERE id = ?")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        Ok(Account {
            id: row.get("id"),
            email: row.get("email"),
            display_name: row.get("display_name"),
        })
    }
}

#[async_trait]
impl IdentityProvider for SqliteIdentityProvider {
    async fn create_account(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<Account, AuthError> {
        validate_credentials(email, password)?;

        let id = uuid::Uuid::new_v4().to_string();
        let email = normalize_email(email);
        let password_hash = hash_password(password)?;
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            "INSERT INTO accounts (id, email, display_name, password_hash, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&email)
        .bind(display_name)
        .bind(&password_hash)
        .bind(&now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(AuthError::EmailAlreadyInUse);
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(account_id = %id, "Account created");

        Ok(Account {
            id,
            email,
            display_name: display_name.to_string(),
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Account, AuthError> {
        let row = sqlx::query(
            "SELECT id, email, display_name, password_hash FROM accounts WHERE email = ?",
        )
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await?;

        // Unknown email and wrong password are indistinguishable to the caller
        let Some(row) = row else {
            return Err(AuthError::InvalidCredentials);
        };

        let stored: String = row.get("password_hash");
        if !verify_password(password, &stored)? {
            return Err(AuthError::InvalidCredentials);
        }

        let id: String = row.get("id");
        sqlx::query("UPDATE accounts SET last_sign_in_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(&id)
            .execute(&self.pool)
            .await?;

        Ok(Account {
            id,
            email: row.get("email"),
            display_name: row.get("display_name"),
        })
    }

    async fn sign_out(&self, account_id: &str) -> Result<(), AuthError> {
        tracing::debug!(account_id, "Account signed out");
        Ok(())
    }

    async fn update_display_name(
        &self,
        account_id: &str,
        display_name: &str,
    ) -> Result<Account, AuthError> {
        sqlx::query("UPDATE accounts SET display_name = ? WHERE id = ?")
            .bind(display_name)
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        self.fetch(account_id).await
    }

    async fn delete_account(&self, account_id: &str) -> Result<(), AuthError> {
        sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())?;
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Check a password against a stored PHC hash. A malformed hash is an error, a mismatch is `false`.
fn verify_password(password: &str, stored: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(stored)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::init_database;
    use tempfile::TempDir;

    async fn provider() -> (SqliteIdentityProvider, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("identity.sqlite")).await.unwrap();
        (SqliteIdentityProvider::new(pool), dir)
    }

    #[test]
    fn test_password_hash_is_salted_argon2id() {
        let first = hash_password("secret").unwrap();
        let second = hash_password("secret").unwrap();

        assert!(first.starts_with("$argon2id$"));
        assert_ne!(first, second);
        assert!(verify_password("secret", &first).unwrap());
        assert!(verify_password("secret", &second).unwrap());
        assert!(!verify_password("Secret", &first).unwrap());
    }

    #[test]
    fn test_malformed_stored_hash_is_an_error() {
        assert!(matches!(
            verify_password("secret", "not-a-phc-string"),
            Err(AuthError::NetworkUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_stored_password_is_not_plaintext() {
        let (provider, _dir) = provider().await;
        let account = provider
            .create_account("ruth@example.org", "gleaner", "Ruth")
            .await
            .unwrap();

        let row = sqlx::query("SELECT password_hash FROM accounts WHERE id = ?")
            .bind(&account.id)
            .fetch_one(&provider.pool)
            .await
            .unwrap();
        let stored: String = row.get("password_hash");
        assert!(stored.starts_with("$argon2id$"));
        assert!(!stored.contains("gleaner"));
    }

    #[tokio::test]
    async fn test_create_and_sign_in() {
        let (provider, _dir) = provider().await;
        let account = provider
            .create_account("Grace@Example.org", "amazing", "Grace")
            .await
            .unwrap();
        assert_eq!(account.email, "grace@example.org");

        let signed_in = provider.sign_in("grace@example.org", "amazing").await.unwrap();
        assert_eq!(signed_in.id, account.id);

        assert_eq!(
            provider.sign_in("grace@example.org", "wrong-pass").await,
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(
            provider.sign_in("nobody@example.org", "amazing").await,
            Err(AuthError::InvalidCredentials)
        );
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let (provider, _dir) = provider().await;
        provider
            .create_account("dup@example.org", "secret1", "One")
            .await
            .unwrap();
        assert_eq!(
            provider
                .create_account("DUP@example.org", "secret2", "Two")
                .await,
            Err(AuthError::EmailAlreadyInUse)
        );
    }
}

//! Session store.
//!
//! Constructed once at startup and shared through application state. A
//! session is created by sign-up or sign-in and removed by sign-out, expiry,
//! or the account being deleted.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tokio::sync::RwLock;

use super::{Account, AdminPolicy, IdentityProvider};
use crate::errors::AppError;
use crate::models::{Identity, Role, UserProfile};
use crate::store::{to_body, Collection, DocumentStore, FieldOp, Query};

/// The identity a request acts as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub token: String,
    pub identity: Identity,
    pub expires_at: DateTime<Utc>,
}

pub struct SessionStore {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn DocumentStore>,
    policy: AdminPolicy,
    ttl: Duration,
    sessions: RwLock<HashMap<String, SessionContext>>,
}

impl SessionStore {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn DocumentStore>,
        policy: AdminPolicy,
        ttl: Duration,
    ) -> Self {
        Self {
            provider,
            store,
            policy,
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create an account and its empty profile, then open a session.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<SessionContext, AppError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(AppError::Validation("Display name is required".to_string()));
        }

        let account = self
            .provider
            .create_account(email, password, display_name)
            .await?;

        let profile = UserProfile::new(
            &account.id,
            &account.email,
            &account.display_name,
            self.policy.role_for(&account.email),
        );

        let created = self
            .store
            .create(Collection::Users, &account.id, to_body(&profile)?)
            .await;

        if let Err(e) = created {
            // Sign-up is all-or-nothing: drop the account again
            if let Err(cleanup) = self.provider.delete_account(&account.id).await {
                tracing::error!(account_id = %account.id, "Failed to roll back account: {}", cleanup);
            }
            return Err(AppError::write(e));
        }

        tracing::info!(user_id = %account.id, role = ?profile.role, "User signed up");
        Ok(self.establish(&profile).await)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SessionContext, AppError> {
        let account = self.provider.sign_in(email, password).await?;
        let profile = self.load_profile(&account).await?;

        tracing::info!(user_id = %account.id, "User signed in");
        Ok(self.establish(&profile).await)
    }

    /// End a session. Unknown tokens are ignored.
    pub async fn sign_out(&self, token: &str) -> Result<(), AppError> {
        let removed = self.sessions.write().await.remove(token);
        if let Some(session) = removed {
            self.provider.sign_out(&session.identity.id).await?;
            tracing::info!(user_id = %session.identity.id, "User signed out");
        }
        Ok(())
    }

    /// Resolve a token to its live session.
    pub async fn current(&self, token: &str) -> Option<SessionContext> {
        let session = self.sessions.read().await.get(token).cloned()?;
        if session.expires_at <= Utc::now() {
            self.sessions.write().await.remove(token);
            tracing::debug!(user_id = %session.identity.id, "Session expired");
            return None;
        }
        Some(session)
    }

    pub async fn update_display_name(
        &self,
        session: &SessionContext,
        display_name: &str,
    ) -> Result<Identity, AppError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(AppError::Validation("Display name is required".to_string()));
        }

        let user_id = session.identity.id.as_str();
        self.provider
            .update_display_name(user_id, display_name)
            .await?;
        self.store
            .update(
                Collection::Users,
                user_id,
                &[FieldOp::set("displayName", display_name)],
            )
            .await
            .map_err(AppError::write)?;

        let mut sessions = self.sessions.write().await;
        for live in sessions.values_mut().filter(|s| s.identity.id == user_id) {
            live.identity.display_name = display_name.to_string();
        }

        let mut identity = session.identity.clone();
        identity.display_name = display_name.to_string();
        Ok(identity)
    }

    /// Drop every session of one user. Returns how many were removed.
    pub async fn revoke_user(&self, user_id: &str) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.identity.id != user_id);
        before - sessions.len()
    }

    /// Remove the credentials of a deleted user.
    pub async fn remove_account(&self, user_id: &str) -> Result<(), AppError> {
        let revoked = self.revoke_user(user_id).await;
        self.provider.delete_account(user_id).await?;
        tracing::info!(user_id, revoked, "Account removed");
        Ok(())
    }

    /// Bring every stored role in line with the configured admin address.
    pub async fn bootstrap_admin_role(&self) -> Result<usize, AppError> {
        let profiles = self.store.query(&Query::collection(Collection::Users)).await?;

        let mut changed = 0;
        for doc in profiles.documents {
            let profile: UserProfile = doc.decode()?;
            let desired = self.policy.role_for(&profile.email);
            if profile.role != desired {
                self.store
                    .update(Collection::Users, &profile.id, &[FieldOp::set("role", json!(desired))])
                    .await
                    .map_err(AppError::write)?;
                tracing::info!(user_id = %profile.id, role = ?desired, "Role bootstrapped");
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Load the profile for an account, reconciling its role and recreating it if missing.
    async fn load_profile(&self, account: &Account) -> Result<UserProfile, AppError> {
        let desired = self.policy.role_for(&account.email);

        match self.store.get(Collection::Users, &account.id).await? {
            Some(doc) => {
                let mut profile: UserProfile = doc.decode()?;
                if profile.role != desired {
                    self.store
                        .update(Collection::Users, &account.id, &[FieldOp::set("role", json!(desired))])
                        .await
                        .map_err(AppError::write)?;
                    profile.role = desired;
                }
                Ok(profile)
            }
            None => {
                tracing::warn!(user_id = %account.id, "Profile missing at sign-in, recreating");
                let profile =
                    UserProfile::new(&account.id, &account.email, &account.display_name, desired);
                self.store
                    .create(Collection::Users, &account.id, to_body(&profile)?)
                    .await
                    .map_err(AppError::write)?;
                Ok(profile)
            }
        }
    }

    async fn establish(&self, profile: &UserProfile) -> SessionContext {
        let session = SessionContext {
            token: uuid::Uuid::new_v4().simple().to_string(),
            identity: Identity {
                id: profile.id.clone(),
                email: profile.email.clone(),
                display_name: profile.display_name.clone(),
                is_admin: profile.role == Role::Admin,
            },
            expires_at: Utc::now() + self.ttl,
        };

        self.sessions
            .write()
            .await
            .insert(session.token.clone(), session.clone());
        session
    }
}

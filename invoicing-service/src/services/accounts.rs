//! Users mirrored from the identity provider.

use super::clock::Clock;
use super::store::InvoiceStore;
use crate::models::{Role, User, UserSummary};
use service_core::error::AppError;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;

/// Emails that get the admin role on first sign-in. Case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct AdminAllowList {
    emails: HashSet<String>,
}

impl AdminAllowList {
    /// Parse a comma-separated list; blanks are ignored.
    pub fn parse(raw: &str) -> Self {
        Self {
            emails: raw
                .split(',')
                .map(|e| e.trim().to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, email: &str) -> bool {
        self.emails.contains(&email.trim().to_lowercase())
    }

    pub fn role_for(&self, email: &str) -> Role {
        if self.contains(email) {
            Role::Admin
        } else {
            Role::Client
        }
    }
}

/// Verified identity claims.
#[derive(Debug, Clone)]
pub struct Identity {
    pub subject: String,
    pub email: String,
    pub name: Option<String>,
}

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn InvoiceStore>,
    admins: AdminAllowList,
    clock: Arc<dyn Clock>,
}

impl AccountService {
    pub fn new(store: Arc<dyn InvoiceStore>, admins: AdminAllowList, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            admins,
            clock,
        }
    }

    /// Find the local user for `identity`, creating it on first sight.
    #[instrument(skip(self, identity), fields(subject = %identity.subject))]
    pub async fn resolve(&self, identity: &Identity) -> Result<User, AppError> {
        if let Some(user) = self.store.find_user(&identity.subject).await? {
            return Ok(user);
        }

        let email = identity.email.trim();
        if email.is_empty() {
            return Err(AppError::Unauthorized(anyhow::anyhow!(
                "Token carries no email"
            )));
        }
        if let Some(user) = self.store.find_user_by_email(email).await? {
            return Ok(user);
        }

        let name = identity
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(email);
        let user = User {
            id: identity.subject.clone(),
            email: email.to_string(),
            name: name.to_string(),
            role: self.admins.role_for(email),
            created_at: self.clock.now(),
        };

        let user = self.store.insert_user(&user).await?;
        tracing::info!(
            user_id = %user.id,
            role = user.role.as_str(),
            "User registered on first sign-in"
        );
        Ok(user)
    }

    pub async fn list(&self) -> Result<Vec<UserSummary>, AppError> {
        self.store.list_users().await
    }

    #[instrument(skip(self))]
    pub async fn set_role(&self, id: &str, role: Role) -> Result<User, AppError> {
        let user = self.store.set_user_role(id, role).await?;
        tracing::info!(user_id = %user.id, role = role.as_str(), "User role changed");
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        self.store.delete_user(id).await?;
        tracing::info!(user_id = %id, "User deleted");
        Ok(())
    }
}

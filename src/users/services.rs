//! Account lifecycle: lookup, login, registration, confirmation, profile and
//! password changes, soft deletion.
//!
//! Self-service entry points take the caller's id and refuse to touch anyone
//! else's record. The `*_admin` variants skip that check; gating who may call
//! them is the transport's job.

use std::sync::Arc;

use anyhow::anyhow;
use tracing::{info, instrument, warn};

use crate::error::AppError;

use super::names::{normalize_full_name, slugify};
use super::password::CredentialManager;
use super::repo_types::{NewUser, User, UserPatch};
use super::store::AccountStore;
use super::validation::Validator;

/// A user id or a slug, as accepted by the public lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    Id(i64),
    Slug(String),
}

impl Identifier {
    /// Integers resolve by id; anything else is treated as a slug.
    pub fn parse(token: &str) -> Self {
        match token.parse::<i64>() {
            Ok(id) => Identifier::Id(id),
            Err(_) => Identifier::Slug(token.to_string()),
        }
    }
}

/// Optional profile fields as sent by the caller, before normalization.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub avatar_url: Option<String>,
    pub full_name: Option<String>,
    pub bio: Option<String>,
}

pub struct AccountService {
    store: Arc<dyn AccountStore>,
    credentials: CredentialManager,
    validator: Validator,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn AccountStore>,
        credentials: CredentialManager,
        validator: Validator,
    ) -> Self {
        Self {
            store,
            credentials,
            validator,
        }
    }

    #[instrument(skip(self))]
    pub async fn get_by_identifier(&self, token: &str) -> Result<User, AppError> {
        let user = match Identifier::parse(token) {
            Identifier::Id(id) => self.store.get_by_id(id).await?,
            Identifier::Slug(slug) => self.store.get_by_slug(&slug).await?,
        };
        Ok(user)
    }

    /// Looks up by email (stamping last login) and checks the password.
    #[instrument(skip(self, password))]
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User, AppError> {
        let email = self.validator.email(email)?;
        let found = self.store.get_by_email(&email).await?;

        if !self
            .credentials
            .verify(&found.credential.password_hash, password)
        {
            warn!(user_id = found.user.id, "login invalid password");
            return Err(AppError::bad_request_hidden(
                anyhow!("password mismatch for user {}", found.user.id),
                "invalid password",
            ));
        }

        info!(user_id = found.user.id, "user logged in");
        Ok(found.user)
    }

    /// Registers a pending account and seeds its password history.
    ///
    /// If the history write fails the call fails, even though the user row
    /// has already been committed.
    #[instrument(skip(self, full_name, password))]
    pub async fn create(
        &self,
        email: &str,
        full_name: &str,
        password: &str,
    ) -> Result<User, AppError> {
        let email = self.validator.email(email)?;
        self.validator.password(password)?;
        let full_name = normalize_full_name(full_name);
        let slug = slugify(&full_name);
        self.validator.full_name(&full_name, &slug)?;

        let hash = self.credentials.hash(password)?;
        let user = self
            .store
            .create(
                NewUser {
                    email,
                    full_name,
                    slug,
                },
                &hash,
            )
            .await?;

        self.store.append_password_history(user.id, &hash).await?;

        info!(user_id = user.id, slug = %user.slug, "user registered");
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn confirm(&self, id: i64) -> Result<(), AppError> {
        self.store.confirm(id).await?;
        info!(user_id = id, "user confirmed");
        Ok(())
    }

    #[instrument(skip(self, changes))]
    pub async fn update_profile(
        &self,
        caller_id: i64,
        target_id: i64,
        changes: ProfileChanges,
    ) -> Result<(), AppError> {
        ensure_self(caller_id, target_id)?;
        self.apply_profile_changes(target_id, changes).await
    }

    #[instrument(skip(self, changes))]
    pub async fn update_profile_admin(
        &self,
        target_id: i64,
        changes: ProfileChanges,
    ) -> Result<(), AppError> {
        self.apply_profile_changes(target_id, changes).await
    }

    #[instrument(skip(self, new_password))]
    pub async fn change_password(
        &self,
        caller_id: i64,
        target_id: i64,
        new_password: &str,
    ) -> Result<(), AppError> {
        ensure_self(caller_id, target_id)?;
        self.rotate_password(target_id, new_password).await
    }

    #[instrument(skip(self, new_password))]
    pub async fn change_password_admin(
        &self,
        target_id: i64,
        new_password: &str,
    ) -> Result<(), AppError> {
        self.rotate_password(target_id, new_password).await
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, caller_id: i64, target_id: i64) -> Result<(), AppError> {
        ensure_self(caller_id, target_id)?;
        self.soft_delete(target_id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_admin(&self, target_id: i64) -> Result<(), AppError> {
        self.soft_delete(target_id).await
    }

    async fn apply_profile_changes(
        &self,
        id: i64,
        changes: ProfileChanges,
    ) -> Result<(), AppError> {
        let mut patch = UserPatch::default();

        if let Some(url) = changes.avatar_url {
            self.validator.avatar_url(&url)?;
            patch.avatar_url = Some(url);
        }
        if let Some(bio) = changes.bio {
            self.validator.bio(&bio)?;
            patch.bio = Some(bio);
        }
        if let Some(raw) = changes.full_name {
            let full_name = normalize_full_name(&raw);
            let slug = slugify(&full_name);
            self.validator.full_name(&full_name, &slug)?;
            patch = patch.with_full_name(full_name, slug);
        }

        self.store.update(id, &patch).await?;
        info!(user_id = id, "user profile updated");
        Ok(())
    }

    /// Reuse check, then active credential, then history. The last two writes
    /// are not atomic: a failed history append still fails the call.
    async fn rotate_password(&self, id: i64, new_password: &str) -> Result<(), AppError> {
        self.validator.password(new_password)?;

        let history = self.store.list_password_history(id).await?;
        self.credentials
            .ensure_not_reused(new_password, &history)
            .map_err(|e| {
                warn!(user_id = id, "password reuse rejected");
                AppError::bad_request_hidden(e.into(), "this password is already used")
            })?;

        let hash = self.credentials.hash(new_password)?;
        self.store.update_password_hash(id, &hash).await?;
        self.store.append_password_history(id, &hash).await?;

        info!(user_id = id, "user password changed");
        Ok(())
    }

    async fn soft_delete(&self, id: i64) -> Result<(), AppError> {
        self.store.soft_delete(id).await?;
        info!(user_id = id, "user deleted");
        Ok(())
    }
}

fn ensure_self(caller_id: i64, target_id: i64) -> Result<(), AppError> {
    if caller_id != target_id {
        warn!(caller_id, target_id, "attempt to modify another user's record");
        return Err(AppError::forbidden(
            "you do not have permission to modify this user's data",
        ));
    }
    Ok(())
}

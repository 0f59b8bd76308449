//! Persistence contract for accounts and password history.
//!
//! Every operation is scoped to live (not soft-deleted) users. Mutations that
//! touch zero rows report [`StoreError::NotFound`].

use async_trait::async_trait;

use crate::error::AppError;

use super::repo_types::{NewUser, PasswordHistoryEntry, User, UserPatch, UserWithCredential};

/// Column a lookup or uniqueness check was keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserField {
    Id,
    Email,
    Slug,
}

impl UserField {
    pub fn as_str(self) -> &'static str {
        match self {
            UserField::Id => "id",
            UserField::Email => "email",
            UserField::Slug => "slug",
        }
    }
}

impl std::fmt::Display for UserField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("user with {field}={value} not found")]
    NotFound { field: UserField, value: String },

    #[error("user with {field}={value} already exists")]
    AlreadyExists { field: UserField, value: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl StoreError {
    pub fn not_found(field: UserField, value: impl ToString) -> Self {
        Self::NotFound {
            field,
            value: value.to_string(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Internal(anyhow::Error::new(e))
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { field, value } => AppError::NotFound {
                entity: "user",
                field: field.as_str(),
                value,
            },
            StoreError::AlreadyExists { field, value } => AppError::AlreadyExists {
                entity: "user",
                field: field.as_str(),
                value,
            },
            StoreError::Internal(cause) => AppError::Internal(cause),
        }
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_by_id(&self, id: i64) -> Result<User, StoreError>;

    async fn get_by_slug(&self, slug: &str) -> Result<User, StoreError>;

    /// Authentication lookup. Stamps `last_login_at` on the matched row; if the
    /// stamp cannot be written the whole call fails.
    async fn get_by_email(&self, email: &str) -> Result<UserWithCredential, StoreError>;

    async fn create(&self, user: NewUser, password_hash: &str) -> Result<User, StoreError>;

    async fn confirm(&self, id: i64) -> Result<(), StoreError>;

    /// Writes only the fields present in `patch`. An empty patch still checks
    /// that the row exists.
    async fn update(&self, id: i64, patch: &UserPatch) -> Result<(), StoreError>;

    async fn update_password_hash(&self, id: i64, password_hash: &str) -> Result<(), StoreError>;

    async fn soft_delete(&self, id: i64) -> Result<(), StoreError>;

    async fn append_password_history(&self, id: i64, password_hash: &str)
        -> Result<(), StoreError>;

    /// Newest first.
    async fn list_password_history(&self, id: i64)
        -> Result<Vec<PasswordHistoryEntry>, StoreError>;
}

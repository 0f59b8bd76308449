use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// Account role. Fresh accounts start as `Unconfirmed` until an admin confirms them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Unconfirmed,
    User,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Unconfirmed => "unconfirmed",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unconfirmed" => Ok(Role::Unconfirmed),
            "user" => Ok(Role::User),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = UnknownRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown role {0:?}")]
pub struct UnknownRole(pub String);

/// User record in the database. Soft-deleted rows never make it into this type.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub avatar_url: Option<String>,
    pub full_name: String,
    pub slug: String,
    pub bio: Option<String>,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub is_verified: bool,
    pub last_login_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: Option<OffsetDateTime>,
}

/// Password material for a user. Only ever holds the Argon2 PHC string.
#[derive(Clone, PartialEq, FromRow)]
pub struct Credential {
    #[sqlx(rename = "pass_hash")]
    pub password_hash: String,
    #[sqlx(rename = "pass_updated_at")]
    pub updated_at: Option<OffsetDateTime>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("password_hash", &"<redacted>")
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct UserWithCredential {
    #[sqlx(flatten)]
    pub user: User,
    #[sqlx(flatten)]
    pub credential: Credential,
}

/// Fields needed to insert an account. `full_name` and `slug` are already normalized.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub full_name: String,
    pub slug: String,
}

/// Partial profile update. `None` means "leave the column alone".
///
/// `slug` is only ever set together with `full_name`; see [`UserPatch::with_full_name`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPatch {
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    full_name: Option<(String, String)>,
}

impl UserPatch {
    pub fn with_full_name(mut self, full_name: String, slug: String) -> Self {
        self.full_name = Some((full_name, slug));
        self
    }

    pub fn full_name(&self) -> Option<&str> {
        self.full_name.as_ref().map(|(name, _)| name.as_str())
    }

    pub fn slug(&self) -> Option<&str> {
        self.full_name.as_ref().map(|(_, slug)| slug.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.avatar_url.is_none() && self.bio.is_none() && self.full_name.is_none()
    }
}

#[derive(Clone, PartialEq, FromRow)]
pub struct PasswordHistoryEntry {
    #[sqlx(rename = "pass_hash")]
    pub password_hash: String,
    pub created_at: OffsetDateTime,
}

impl fmt::Debug for PasswordHistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordHistoryEntry")
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

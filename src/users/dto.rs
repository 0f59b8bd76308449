use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::repo_types::{Role, User};
use super::services::ProfileChanges;

/// Request body for account registration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub email: String,
    pub full_name: String,
    pub password: String,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Partial profile update. Absent fields are left untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub avatar_url: Option<String>,
    pub full_name: Option<String>,
    pub bio: Option<String>,
}

impl From<UpdateUserRequest> for ProfileChanges {
    fn from(r: UpdateUserRequest) -> Self {
        Self {
            avatar_url: r.avatar_url,
            full_name: r.full_name,
            bio: r.bio,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdatePasswordRequest {
    pub password: String,
}

/// Profile projection returned to clients. Never carries credential data.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub full_name: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_login_at: Option<OffsetDateTime>,
    pub role: Role,
    pub is_verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<OffsetDateTime>,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            avatar_url: u.avatar_url,
            full_name: u.full_name,
            slug: u.slug,
            bio: u.bio,
            last_login_at: u.last_login_at,
            role: u.role,
            is_verified: u.is_verified,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: PublicUser,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self { user: u.into() }
    }
}

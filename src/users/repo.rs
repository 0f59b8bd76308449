use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use tracing::{error, instrument};

use super::repo_types::{NewUser, PasswordHistoryEntry, Role, User, UserPatch, UserWithCredential};
use super::store::{AccountStore, StoreError, UserField};

const USER_COLUMNS: &str = "id, email, avatar_url, full_name, slug, bio, role, is_verified, \
                            last_login_at, created_at, updated_at";

/// Postgres-backed account store. Rows with `deleted_at` set are excluded from every query.
#[derive(Clone)]
pub struct PgAccountStore {
    db: PgPool,
}

impl PgAccountStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Which field a unique index guards, going by the index name.
fn constraint_field(constraint: &str) -> Option<UserField> {
    if constraint.contains("email") {
        Some(UserField::Email)
    } else if constraint.contains("slug") {
        Some(UserField::Slug)
    } else {
        None
    }
}

/// Maps a unique-index violation onto the colliding field.
fn classify_insert_error(e: sqlx::Error, user: &NewUser) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            match db_err.constraint().and_then(constraint_field) {
                Some(UserField::Email) => {
                    return StoreError::AlreadyExists {
                        field: UserField::Email,
                        value: user.email.clone(),
                    }
                }
                Some(UserField::Slug) => {
                    return StoreError::AlreadyExists {
                        field: UserField::Slug,
                        value: user.slug.clone(),
                    }
                }
                _ => {}
            }
        }
    }
    StoreError::from(e)
}

/// `UPDATE` for the fields present in `patch`. An empty patch becomes a
/// `SET id = id` write that only tells whether the row is live.
fn update_query(id: i64, patch: &UserPatch, now: OffsetDateTime) -> QueryBuilder<'static, Postgres> {
    let mut qb: QueryBuilder<'static, Postgres> = QueryBuilder::new("UPDATE users SET ");

    if patch.is_empty() {
        qb.push("id = id");
    } else {
        let mut set = qb.separated(", ");
        if let Some(url) = &patch.avatar_url {
            set.push("avatar_url = ").push_bind_unseparated(url.clone());
        }
        if let (Some(name), Some(slug)) = (patch.full_name(), patch.slug()) {
            set.push("full_name = ").push_bind_unseparated(name.to_string());
            set.push("slug = ").push_bind_unseparated(slug.to_string());
        }
        if let Some(bio) = &patch.bio {
            set.push("bio = ").push_bind_unseparated(bio.clone());
        }
        set.push("updated_at = ").push_bind_unseparated(now);
    }

    qb.push(" WHERE id = ")
        .push_bind(id)
        .push(" AND deleted_at IS NULL");
    qb
}

fn expect_affected(rows: u64, id: i64) -> Result<(), StoreError> {
    if rows == 0 {
        return Err(StoreError::not_found(UserField::Id, id));
    }
    Ok(())
}

#[async_trait]
impl AccountStore for PgAccountStore {
    #[instrument(skip(self))]
    async fn get_by_id(&self, id: i64) -> Result<User, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL");
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| StoreError::not_found(UserField::Id, id))
    }

    #[instrument(skip(self))]
    async fn get_by_slug(&self, slug: &str) -> Result<User, StoreError> {
        let sql =
            format!("SELECT {USER_COLUMNS} FROM users WHERE slug = $1 AND deleted_at IS NULL");
        sqlx::query_as::<_, User>(&sql)
            .bind(slug)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| StoreError::not_found(UserField::Slug, slug))
    }

    #[instrument(skip(self))]
    async fn get_by_email(&self, email: &str) -> Result<UserWithCredential, StoreError> {
        let mut tx = self.db.begin().await?;

        let sql = format!(
            "SELECT {USER_COLUMNS}, pass_hash, pass_updated_at FROM users \
             WHERE email = $1 AND deleted_at IS NULL FOR UPDATE"
        );
        let mut found = sqlx::query_as::<_, UserWithCredential>(&sql)
            .bind(email)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::not_found(UserField::Email, email))?;

        let login_at = OffsetDateTime::now_utc();
        let stamped = sqlx::query(
            "UPDATE users SET last_login_at = $1 WHERE id = $2 AND deleted_at IS NULL",
        )
        .bind(login_at)
        .bind(found.user.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!(error = %e, user_id = found.user.id, "failed to stamp last_login_at");
            StoreError::from(e)
        })?;
        if stamped.rows_affected() == 0 {
            let id = found.user.id;
            return Err(anyhow::anyhow!("last_login_at stamp touched no rows for user {id}").into());
        }

        tx.commit().await?;
        found.user.last_login_at = Some(login_at);
        Ok(found)
    }

    #[instrument(skip(self, password_hash))]
    async fn create(&self, user: NewUser, password_hash: &str) -> Result<User, StoreError> {
        let sql = format!(
            "INSERT INTO users (full_name, slug, email, pass_hash, role) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(&user.full_name)
            .bind(&user.slug)
            .bind(&user.email)
            .bind(password_hash)
            .bind(Role::Unconfirmed.as_str())
            .fetch_one(&self.db)
            .await
            .map_err(|e| classify_insert_error(e, &user))
    }

    #[instrument(skip(self))]
    async fn confirm(&self, id: i64) -> Result<(), StoreError> {
        let res = sqlx::query(
            "UPDATE users SET role = $1, is_verified = TRUE WHERE id = $2 AND deleted_at IS NULL",
        )
        .bind(Role::User.as_str())
        .bind(id)
        .execute(&self.db)
        .await?;
        expect_affected(res.rows_affected(), id)
    }

    #[instrument(skip(self, patch))]
    async fn update(&self, id: i64, patch: &UserPatch) -> Result<(), StoreError> {
        let mut qb = update_query(id, patch, OffsetDateTime::now_utc());

        let res = qb.build().execute(&self.db).await.map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.is_unique_violation() {
                    return StoreError::AlreadyExists {
                        field: UserField::Slug,
                        value: patch.slug().unwrap_or_default().to_string(),
                    };
                }
            }
            StoreError::from(e)
        })?;
        expect_affected(res.rows_affected(), id)
    }

    #[instrument(skip(self, password_hash))]
    async fn update_password_hash(&self, id: i64, password_hash: &str) -> Result<(), StoreError> {
        let res = sqlx::query(
            "UPDATE users SET pass_hash = $1, pass_updated_at = $2 \
             WHERE id = $3 AND deleted_at IS NULL",
        )
        .bind(password_hash)
        .bind(OffsetDateTime::now_utc())
        .bind(id)
        .execute(&self.db)
        .await?;
        expect_affected(res.rows_affected(), id)
    }

    #[instrument(skip(self))]
    async fn soft_delete(&self, id: i64) -> Result<(), StoreError> {
        let res = sqlx::query(
            "UPDATE users SET deleted_at = $1 WHERE id = $2 AND deleted_at IS NULL",
        )
        .bind(OffsetDateTime::now_utc())
        .bind(id)
        .execute(&self.db)
        .await?;
        expect_affected(res.rows_affected(), id)
    }

    #[instrument(skip(self, password_hash))]
    async fn append_password_history(
        &self,
        id: i64,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO users_password_history (user_id, pass_hash) VALUES ($1, $2)")
            .bind(id)
            .bind(password_hash)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_password_history(
        &self,
        id: i64,
    ) -> Result<Vec<PasswordHistoryEntry>, StoreError> {
        let rows = sqlx::query_as::<_, PasswordHistoryEntry>(
            r#"
            SELECT pass_hash, created_at
            FROM users_password_history
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}

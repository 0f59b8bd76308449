//! In-memory [`AccountStore`] used by the unit tests.
//!
//! Mirrors the Postgres semantics: soft-deleted rows are invisible, uniqueness
//! only applies among live rows and zero affected rows is `NotFound`.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex, MutexGuard,
};

use async_trait::async_trait;
use time::OffsetDateTime;

use super::repo_types::{
    Credential, NewUser, PasswordHistoryEntry, Role, User, UserPatch, UserWithCredential,
};
use super::store::{AccountStore, StoreError, UserField};

#[derive(Debug, Clone)]
pub struct StoredRow {
    pub user: User,
    pub credential: Credential,
    pub deleted_at: Option<OffsetDateTime>,
}

#[derive(Default)]
struct Tables {
    next_id: i64,
    users: Vec<StoredRow>,
    history: Vec<(i64, PasswordHistoryEntry)>,
}

#[derive(Default)]
pub struct InMemoryAccountStore {
    tables: Mutex<Tables>,
    calls: AtomicUsize,
    fail_history_append: AtomicBool,
    fail_login_stamp: AtomicBool,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of trait calls seen so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_history_append(&self, fail: bool) {
        self.fail_history_append.store(fail, Ordering::SeqCst);
    }

    pub fn fail_login_stamp(&self, fail: bool) {
        self.fail_login_stamp.store(fail, Ordering::SeqCst);
    }

    /// Raw row lookup that also sees soft-deleted records.
    pub fn row(&self, id: i64) -> Option<StoredRow> {
        self.lock().users.iter().find(|r| r.user.id == id).cloned()
    }

    pub fn history_len(&self, id: i64) -> usize {
        self.lock().history.iter().filter(|(uid, _)| *uid == id).count()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl Tables {
    fn live_mut(&mut self, id: i64) -> Result<&mut StoredRow, StoreError> {
        self.users
            .iter_mut()
            .find(|r| r.user.id == id && r.deleted_at.is_none())
            .ok_or_else(|| StoreError::not_found(UserField::Id, id))
    }

    fn live_by<F>(&self, pred: F) -> Option<&StoredRow>
    where
        F: Fn(&User) -> bool,
    {
        self.users
            .iter()
            .find(|r| r.deleted_at.is_none() && pred(&r.user))
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn get_by_id(&self, id: i64) -> Result<User, StoreError> {
        self.record_call();
        self.lock()
            .live_by(|u| u.id == id)
            .map(|r| r.user.clone())
            .ok_or_else(|| StoreError::not_found(UserField::Id, id))
    }

    async fn get_by_slug(&self, slug: &str) -> Result<User, StoreError> {
        self.record_call();
        self.lock()
            .live_by(|u| u.slug == slug)
            .map(|r| r.user.clone())
            .ok_or_else(|| StoreError::not_found(UserField::Slug, slug))
    }

    async fn get_by_email(&self, email: &str) -> Result<UserWithCredential, StoreError> {
        self.record_call();
        let fail_stamp = self.fail_login_stamp.load(Ordering::SeqCst);
        let mut tables = self.lock();
        let row = tables
            .users
            .iter_mut()
            .find(|r| r.deleted_at.is_none() && r.user.email == email)
            .ok_or_else(|| StoreError::not_found(UserField::Email, email))?;

        if fail_stamp {
            return Err(anyhow::anyhow!("last_login_at stamp failed").into());
        }
        row.user.last_login_at = Some(OffsetDateTime::now_utc());

        Ok(UserWithCredential {
            user: row.user.clone(),
            credential: row.credential.clone(),
        })
    }

    async fn create(&self, user: NewUser, password_hash: &str) -> Result<User, StoreError> {
        self.record_call();
        let mut tables = self.lock();
        if tables.live_by(|u| u.email == user.email).is_some() {
            return Err(StoreError::AlreadyExists {
                field: UserField::Email,
                value: user.email,
            });
        }
        if tables.live_by(|u| u.slug == user.slug).is_some() {
            return Err(StoreError::AlreadyExists {
                field: UserField::Slug,
                value: user.slug,
            });
        }

        tables.next_id += 1;
        let created = User {
            id: tables.next_id,
            email: user.email,
            avatar_url: None,
            full_name: user.full_name,
            slug: user.slug,
            bio: None,
            role: Role::Unconfirmed,
            is_verified: false,
            last_login_at: None,
            created_at: OffsetDateTime::now_utc(),
            updated_at: None,
        };
        tables.users.push(StoredRow {
            user: created.clone(),
            credential: Credential {
                password_hash: password_hash.to_string(),
                updated_at: None,
            },
            deleted_at: None,
        });
        Ok(created)
    }

    async fn confirm(&self, id: i64) -> Result<(), StoreError> {
        self.record_call();
        let mut tables = self.lock();
        let row = tables.live_mut(id)?;
        row.user.role = Role::User;
        row.user.is_verified = true;
        Ok(())
    }

    async fn update(&self, id: i64, patch: &UserPatch) -> Result<(), StoreError> {
        self.record_call();
        let mut tables = self.lock();
        if tables.live_by(|u| u.id == id).is_none() {
            return Err(StoreError::not_found(UserField::Id, id));
        }
        if let Some(slug) = patch.slug() {
            if tables.live_by(|u| u.slug == slug && u.id != id).is_some() {
                return Err(StoreError::AlreadyExists {
                    field: UserField::Slug,
                    value: slug.to_string(),
                });
            }
        }
        let row = tables.live_mut(id)?;
        if patch.is_empty() {
            return Ok(());
        }
        if let Some(url) = &patch.avatar_url {
            row.user.avatar_url = Some(url.clone());
        }
        if let (Some(name), Some(slug)) = (patch.full_name(), patch.slug()) {
            row.user.full_name = name.to_string();
            row.user.slug = slug.to_string();
        }
        if let Some(bio) = &patch.bio {
            row.user.bio = Some(bio.clone());
        }
        row.user.updated_at = Some(OffsetDateTime::now_utc());
        Ok(())
    }

    async fn update_password_hash(&self, id: i64, password_hash: &str) -> Result<(), StoreError> {
        self.record_call();
        let mut tables = self.lock();
        let row = tables.live_mut(id)?;
        row.credential = Credential {
            password_hash: password_hash.to_string(),
            updated_at: Some(OffsetDateTime::now_utc()),
        };
        Ok(())
    }

    async fn soft_delete(&self, id: i64) -> Result<(), StoreError> {
        self.record_call();
        let mut tables = self.lock();
        let row = tables.live_mut(id)?;
        row.deleted_at = Some(OffsetDateTime::now_utc());
        Ok(())
    }

    async fn append_password_history(
        &self,
        id: i64,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        self.record_call();
        if self.fail_history_append.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("users_password_history insert failed").into());
        }
        self.lock().history.push((
            id,
            PasswordHistoryEntry {
                password_hash: password_hash.to_string(),
                created_at: OffsetDateTime::now_utc(),
            },
        ));
        Ok(())
    }

    async fn list_password_history(
        &self,
        id: i64,
    ) -> Result<Vec<PasswordHistoryEntry>, StoreError> {
        self.record_call();
        Ok(self
            .lock()
            .history
            .iter()
            .rev()
            .filter(|(uid, _)| *uid == id)
            .map(|(_, entry)| entry.clone())
            .collect())
    }
}

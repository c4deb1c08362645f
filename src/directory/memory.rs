//! In-memory collaborator directories.
//!
//! Good enough for embedding in tests and single-process demos; production
//! deployments implement the traits over their relational store instead.

use crate::directory::{
    DownloadHistory, DownloadRecord, FileDirectory, StoredFile, Subscription,
    SubscriptionDirectory, User, UserDirectory,
};
use crate::GateError;
use std::collections::HashMap;
use std::sync::Mutex;

fn lock_err() -> GateError {
    GateError::StoreUnavailable("directory lock poisoned".to_string())
}

/// In-memory [`UserDirectory`].
#[derive(Default)]
pub struct MemoryUsers {
    users: Mutex<HashMap<String, User>>,
}

impl MemoryUsers {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user.
    pub fn upsert(&self, user: User) {
        if let Ok(mut users) = self.users.lock() {
            users.insert(user.id.clone(), user);
        }
    }
}

impl UserDirectory for MemoryUsers {
    fn find_by_id(&self, user_id: &str) -> Result<Option<User>, GateError> {
        let users = self.users.lock().map_err(|_| lock_err())?;
        Ok(users.get(user_id).cloned())
    }

    fn find_by_remember_token(&self, token: &str) -> Result<Option<User>, GateError> {
        let users = self.users.lock().map_err(|_| lock_err())?;
        Ok(users
            .values()
            .find(|user| user.remember_token.as_deref() == Some(token))
            .cloned())
    }
}

/// In-memory [`SubscriptionDirectory`].
///
/// `update` clones the row, runs the closure on the clone and writes it
/// back only on `Ok`, all under the map lock — the same commit-or-nothing
/// contract a relational implementation gets from a transaction.
#[derive(Default)]
pub struct MemorySubscriptions {
    rows: Mutex<HashMap<String, Subscription>>,
}

impl MemorySubscriptions {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a subscription row.
    pub fn upsert(&self, subscription: Subscription) {
        if let Ok(mut rows) = self.rows.lock() {
            rows.insert(subscription.id.clone(), subscription);
        }
    }
}

impl SubscriptionDirectory for MemorySubscriptions {
    fn for_user(&self, user_id: &str) -> Result<Option<Subscription>, GateError> {
        let rows = self.rows.lock().map_err(|_| lock_err())?;
        Ok(rows.values().find(|row| row.user_id == user_id).cloned())
    }

    fn update(
        &self,
        subscription_id: &str,
        apply: &mut dyn FnMut(&mut Subscription) -> Result<(), GateError>,
    ) -> Result<Subscription, GateError> {
        let mut rows = self.rows.lock().map_err(|_| lock_err())?;
        let row = rows
            .get(subscription_id)
            .ok_or(GateError::NoSubscription)?;

        let mut draft = row.clone();
        apply(&mut draft)?;
        rows.insert(subscription_id.to_string(), draft.clone());
        Ok(draft)
    }
}

/// In-memory [`FileDirectory`].
#[derive(Default)]
pub struct MemoryFiles {
    files: Mutex<HashMap<String, StoredFile>>,
}

impl MemoryFiles {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a file entry.
    pub fn upsert(&self, file: StoredFile) {
        if let Ok(mut files) = self.files.lock() {
            files.insert(file.id.clone(), file);
        }
    }
}

impl FileDirectory for MemoryFiles {
    fn find_by_id(&self, file_id: &str) -> Result<Option<StoredFile>, GateError> {
        let files = self.files.lock().map_err(|_| lock_err())?;
        Ok(files.get(file_id).cloned())
    }

    fn increment_download_count(&self, file_id: &str) -> Result<(), GateError> {
        let mut files = self.files.lock().map_err(|_| lock_err())?;
        let file = files.get_mut(file_id).ok_or(GateError::FileNotFound)?;
        file.download_count += 1;
        Ok(())
    }
}

/// In-memory [`DownloadHistory`].
#[derive(Default)]
pub struct MemoryHistory {
    records: Mutex<Vec<DownloadRecord>>,
}

impl MemoryHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records appended so far.
    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    /// Whether any record has been appended.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DownloadHistory for MemoryHistory {
    fn append(&self, record: &DownloadRecord) -> Result<(), GateError> {
        let mut records = self.records.lock().map_err(|_| lock_err())?;
        records.push(record.clone());
        Ok(())
    }

    fn find_by_id_for_user(
        &self,
        download_id: &str,
        user_id: &str,
    ) -> Result<Option<DownloadRecord>, GateError> {
        let records = self.records.lock().map_err(|_| lock_err())?;
        Ok(records
            .iter()
            .find(|record| record.id == download_id && record.user_id == user_id)
            .cloned())
    }
}

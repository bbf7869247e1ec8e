//! Services the ledger consults but does not own: the personnel directory,
//! the funds ledger, the permission layer, notification delivery and file
//! storage. Each is a trait so the embedding application can plug in its own;
//! the in-process implementations here back the binary and the tests.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub type HolderId = i64;
pub type OperatorId = i64;
pub type RoomId = i64;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Unavailable: {0}")]
    Unavailable(String),
    #[error("Rejected: {0}")]
    Rejected(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A person who can hold assets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holder {
    pub id: HolderId,
    pub display_name: String,
}

impl Holder {
    /// Display text for a holder the directory doesn't know
    pub fn unknown(id: HolderId) -> Self {
        Self {
            id,
            display_name: format!("ID:{}", id),
        }
    }
}

#[async_trait]
pub trait HolderDirectory: Send + Sync {
    async fn resolve_holder(&self, id: HolderId) -> Result<Option<Holder>, CollaboratorError>;
}

#[async_trait]
pub trait FundsLedger: Send + Sync {
    async fn record_expense(
        &self,
        amount: Decimal,
        description: &str,
        operator: Option<OperatorId>,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(
        &self,
        recipients: &[HolderId],
        title: &str,
        body: &str,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn is_allowed(&self, operator: OperatorId, permission: &str) -> bool;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores the bytes and returns the path to reference them by
    async fn save_file(&self, bytes: &[u8], extension: Option<&str>)
        -> Result<String, CollaboratorError>;
    async fn delete_file(&self, path: &str) -> Result<(), CollaboratorError>;
}

// ---------------------------------------------------------------------------
// In-process implementations
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryHolderDirectory {
    holders: DashMap<HolderId, Holder>,
}

impl InMemoryHolderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: HolderId, display_name: impl Into<String>) {
        self.holders.insert(
            id,
            Holder {
                id,
                display_name: display_name.into(),
            },
        );
    }

    pub fn with_holders<I, S>(holders: I) -> Self
    where
        I: IntoIterator<Item = (HolderId, S)>,
        S: Into<String>,
    {
        let directory = Self::new();
        for (id, name) in holders {
            directory.insert(id, name);
        }
        directory
    }
}

#[async_trait]
impl HolderDirectory for InMemoryHolderDirectory {
    async fn resolve_holder(&self, id: HolderId) -> Result<Option<Holder>, CollaboratorError> {
        Ok(self.holders.get(&id).map(|h| h.value().clone()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expense {
    pub amount: Decimal,
    pub description: String,
    pub operator: Option<OperatorId>,
}

/// Keeps every recorded expense in memory
#[derive(Debug, Default)]
pub struct InMemoryFundsLedger {
    expenses: Mutex<Vec<Expense>>,
}

impl InMemoryFundsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expenses(&self) -> Vec<Expense> {
        self.expenses
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    pub fn total_spent(&self) -> Decimal {
        self.expenses().iter().map(|e| e.amount).sum()
    }
}

#[async_trait]
impl FundsLedger for InMemoryFundsLedger {
    #[instrument(skip(self))]
    async fn record_expense(
        &self,
        amount: Decimal,
        description: &str,
        operator: Option<OperatorId>,
    ) -> Result<(), CollaboratorError> {
        let mut expenses = self
            .expenses
            .lock()
            .map_err(|_| CollaboratorError::Unavailable("funds ledger lock poisoned".into()))?;
        expenses.push(Expense {
            amount,
            description: description.to_string(),
            operator,
        });
        Ok(())
    }
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(
        &self,
        recipients: &[HolderId],
        title: &str,
        body: &str,
    ) -> Result<(), CollaboratorError> {
        info!(?recipients, title, body, "Asset notification");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub recipients: Vec<HolderId>,
    pub title: String,
    pub body: String,
}

/// Collects notifications for later inspection
#[derive(Debug, Default)]
pub struct InMemoryNotificationSink {
    sent: Mutex<Vec<SentNotification>>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotificationSink {
    async fn notify(
        &self,
        recipients: &[HolderId],
        title: &str,
        body: &str,
    ) -> Result<(), CollaboratorError> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| CollaboratorError::Unavailable("notification lock poisoned".into()))?;
        sent.push(SentNotification {
            recipients: recipients.to_vec(),
            title: title.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl PermissionGate for AllowAll {
    async fn is_allowed(&self, _operator: OperatorId, _permission: &str) -> bool {
        true
    }
}

/// Fixed grants per operator. `asset.*` grants every asset permission.
#[derive(Debug, Default)]
pub struct StaticPermissionGate {
    grants: DashMap<OperatorId, HashSet<String>>,
}

impl StaticPermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, operator: OperatorId, permission: impl Into<String>) {
        self.grants
            .entry(operator)
            .or_default()
            .insert(permission.into());
    }
}

#[async_trait]
impl PermissionGate for StaticPermissionGate {
    async fn is_allowed(&self, operator: OperatorId, permission: &str) -> bool {
        let Some(granted) = self.grants.get(&operator) else {
            return false;
        };
        if granted.contains(permission) {
            return true;
        }
        permission
            .split_once('.')
            .map(|(scope, _)| granted.contains(&format!("{}.*", scope)))
            .unwrap_or(false)
    }
}

/// Files under a local directory, named by fresh UUIDs
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn save_file(
        &self,
        bytes: &[u8],
        extension: Option<&str>,
    ) -> Result<String, CollaboratorError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let name = match extension {
            Some(ext) if !ext.is_empty() => {
                format!("{}.{}", Uuid::new_v4().simple(), ext.trim_start_matches('.'))
            }
            _ => Uuid::new_v4().simple().to_string(),
        };
        let path = self.root.join(name);
        tokio::fs::write(&path, bytes).await?;
        Ok(path.to_string_lossy().into_owned())
    }

    async fn delete_file(&self, path: &str) -> Result<(), CollaboratorError> {
        let path = Path::new(path);
        if !path.starts_with(&self.root) {
            return Err(CollaboratorError::Rejected(format!(
                "{} is outside the blob store",
                path.display()
            )));
        }
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Blob already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn wildcard_grants_cover_scope() {
        let gate = StaticPermissionGate::new();
        gate.grant(1, "asset.*");
        gate.grant(2, "asset.issue");

        assert!(gate.is_allowed(1, "asset.scrap").await);
        assert!(gate.is_allowed(2, "asset.issue").await);
        assert!(!gate.is_allowed(2, "asset.return").await);
        assert!(!gate.is_allowed(3, "asset.issue").await);
    }

    #[tokio::test]
    async fn directory_resolves_known_holders() {
        let directory = InMemoryHolderDirectory::with_holders([(5, "Zhang Wei")]);
        let holder = directory.resolve_holder(5).await.unwrap().unwrap();
        assert_eq!(holder.display_name, "Zhang Wei");
        assert!(directory.resolve_holder(6).await.unwrap().is_none());
        assert_eq!(Holder::unknown(6).display_name, "ID:6");
    }

    #[tokio::test]
    async fn funds_ledger_accumulates() {
        let ledger = InMemoryFundsLedger::new();
        ledger.record_expense(dec!(12.50), "helmets", Some(1)).await.unwrap();
        ledger.record_expense(dec!(7.50), "gloves", None).await.unwrap();
        assert_eq!(ledger.total_spent(), dec!(20.00));
        assert_eq!(ledger.expenses().len(), 2);
    }

    #[tokio::test]
    async fn blob_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        let path = store.save_file(b"jpeg", Some("jpg")).await.unwrap();
        assert!(path.ends_with(".jpg"));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"jpeg");

        store.delete_file(&path).await.unwrap();
        assert!(tokio::fs::metadata(&path).await.is_err());
        // deleting twice is fine
        store.delete_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn blob_store_refuses_foreign_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        assert!(store.delete_file("/etc/passwd").await.is_err());
    }
}

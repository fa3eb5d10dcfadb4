//! Ledger storage
//!
//! The orchestrator never touches the working directory directly; it goes
//! through a [`LedgerStore`]. [`FileLedgerStore`] keeps one
//! `<key>_rollback.json` file per deployment, [`MemoryLedgerStore`] keeps
//! everything in memory.

use crate::error::{CloudError, Result};
use crate::ledger::{LedgerStatus, ProvisioningLedger};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;

/// File name suffix of stored ledgers
pub const LEDGER_SUFFIX: &str = "_rollback.json";

/// Key/value storage for serialized ledgers
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Keys of every stored ledger, sorted
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Read a stored ledger. Fails with `NotFound` when absent
    async fn read(&self, key: &str) -> Result<String>;

    /// Create or replace a stored ledger
    async fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a stored ledger. Removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// Where a key lives, for messages
    fn describe(&self, key: &str) -> String {
        key.to_string()
    }
}

/// Filesystem-backed ledger store
#[derive(Debug, Clone)]
pub struct FileLedgerStore {
    dir: PathBuf,
}

impl FileLedgerStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Open the store that owns an explicit ledger file
    ///
    /// Returns the store and the key of the file inside it.
    pub fn for_file(path: impl AsRef<Path>) -> Result<(Self, String)> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CloudError::Validation(format!("Invalid ledger path: {}", path.display())))?;

        let key = file_name.strip_suffix(LEDGER_SUFFIX).ok_or_else(|| {
            CloudError::Validation(format!(
                "Ledger file name must end with '{}': {}",
                LEDGER_SUFFIX,
                path.display()
            ))
        })?;

        if key.is_empty() {
            return Err(CloudError::Validation(format!(
                "Ledger file name has no deployment name: {}",
                path.display()
            )));
        }

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        Ok((Self::new(dir), key.to_string()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}{}", key, LEDGER_SUFFIX))
    }

    fn temp_path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!(".{}{}.tmp", key, LEDGER_SUFFIX))
    }

    async fn ensure_dir(&self, key: &str) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)
                .await
                .map_err(|e| persistence(key, e))?;
            tracing::debug!("Created ledger directory: {}", self.dir.display());
        }
        Ok(())
    }
}

fn persistence(key: &str, err: impl std::fmt::Display) -> CloudError {
    CloudError::Persistence {
        key: key.to_string(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl LedgerStore for FileLedgerStore {
    async fn list_keys(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if let Some(key) = name.strip_suffix(LEDGER_SUFFIX) {
                if !key.is_empty() && entry.file_type().await?.is_file() {
                    keys.push(key.to_string());
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn read(&self, key: &str) -> Result<String> {
        let path = self.path_for(key);
        match fs::read_to_string(&path).await {
            Ok(content) => {
                tracing::debug!("Read ledger {}", path.display());
                Ok(content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CloudError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_dir(key).await?;

        let path = self.path_for(key);
        let temp = self.temp_path_for(key);

        fs::write(&temp, value)
            .await
            .map_err(|e| persistence(key, format!("{}: {}", temp.display(), e)))?;
        fs::rename(&temp, &path)
            .await
            .map_err(|e| persistence(key, format!("{}: {}", path.display(), e)))?;

        tracing::debug!("Wrote ledger {}", path.display());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!("Deleted ledger {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(persistence(key, format!("{}: {}", path.display(), e))),
        }
    }

    fn describe(&self, key: &str) -> String {
        self.path_for(key).display().to_string()
    }
}

/// In-memory ledger store
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }

    fn with_entries<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut BTreeMap<String, String>) -> T,
    ) -> Result<T> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| persistence(key, e))?;
        Ok(f(&mut entries))
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn list_keys(&self) -> Result<Vec<String>> {
        self.with_entries("*", |entries| entries.keys().cloned().collect())
    }

    async fn read(&self, key: &str) -> Result<String> {
        self.with_entries(key, |entries| entries.get(key).cloned())?
            .ok_or_else(|| CloudError::NotFound(key.to_string()))
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        self.with_entries(key, |entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.with_entries(key, |entries| {
            entries.remove(key);
        })
    }
}

/// One stored ledger as shown to a user choosing what to roll back
#[derive(Debug, Clone)]
pub struct LedgerListing {
    pub key: String,
    pub location: String,
    pub details: std::result::Result<LedgerInfo, String>,
}

/// Summary of a readable ledger
#[derive(Debug, Clone)]
pub struct LedgerInfo {
    pub deployment_name: String,
    pub created_at: DateTime<Utc>,
    pub status: LedgerStatus,
    pub resource_count: usize,
}

impl From<&ProvisioningLedger> for LedgerInfo {
    fn from(ledger: &ProvisioningLedger) -> Self {
        Self {
            deployment_name: ledger.deployment_name.clone(),
            created_at: ledger.created_at,
            status: ledger.status,
            resource_count: ledger.len(),
        }
    }
}

/// List every stored ledger; unreadable ones are reported per entry
pub async fn list_ledgers(store: &dyn LedgerStore) -> Result<Vec<LedgerListing>> {
    let mut listings = Vec::new();
    for key in store.list_keys().await? {
        let details = match crate::ledger::load(store, &key).await {
            Ok(ledger) => Ok(LedgerInfo::from(&ledger)),
            Err(e) => {
                tracing::warn!("Could not read rollback ledger '{}': {}", key, e);
                Err(e.to_string())
            }
        };
        listings.push(LedgerListing {
            location: store.describe(&key),
            key,
            details,
        });
    }
    Ok(listings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{self, Metadata, ResourceKind};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let temp_dir = tempdir().unwrap();
        let store = FileLedgerStore::new(temp_dir.path());

        let mut original = ProvisioningLedger::new("demo");
        original.append(ResourceKind::Vpc, "vpc-1", Metadata::new());
        original.append(ResourceKind::Subnet, "subnet-1", Metadata::new());
        original.set_summary("vpc_id", "vpc-1");

        ledger::persist(&store, &original).await.unwrap();
        assert!(temp_dir.path().join("demo_rollback.json").exists());

        let loaded = ledger::load(&store, "demo").await.unwrap();
        assert_eq!(loaded.records(), original.records());
        assert_eq!(loaded.summary, original.summary);
    }

    #[tokio::test]
    async fn test_file_store_missing_key() {
        let temp_dir = tempdir().unwrap();
        let store = FileLedgerStore::new(temp_dir.path());

        let err = store.read("demo").await.unwrap_err();
        assert!(matches!(err, CloudError::NotFound(_)));
        // Deleting an absent ledger is fine
        store.delete("demo").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_lists_only_ledgers() {
        let temp_dir = tempdir().unwrap();
        let store = FileLedgerStore::new(temp_dir.path());

        store.write("beta", "{}").await.unwrap();
        store.write("alpha", "{}").await.unwrap();
        std::fs::write(temp_dir.path().join("notes.json"), "{}").unwrap();
        std::fs::write(temp_dir.path().join("demo-key.pem"), "secret").unwrap();

        assert_eq!(store.list_keys().await.unwrap(), vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_file_store_missing_dir_lists_nothing() {
        let temp_dir = tempdir().unwrap();
        let store = FileLedgerStore::new(temp_dir.path().join("nope"));
        assert!(store.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_unwritable_destination() {
        let temp_dir = tempdir().unwrap();
        // A regular file where the directory should be
        let blocker = temp_dir.path().join("state");
        std::fs::write(&blocker, "").unwrap();
        let store = FileLedgerStore::new(&blocker);

        let err = store.write("demo", "{}").await.unwrap_err();
        assert!(matches!(err, CloudError::Persistence { .. }));
    }

    #[test]
    fn test_for_file() {
        let (store, key) = FileLedgerStore::for_file("/var/lib/bastion/demo_rollback.json").unwrap();
        assert_eq!(key, "demo");
        assert_eq!(store.dir(), Path::new("/var/lib/bastion"));

        let (store, key) = FileLedgerStore::for_file("demo_rollback.json").unwrap();
        assert_eq!(key, "demo");
        assert_eq!(store.dir(), Path::new("."));

        assert!(FileLedgerStore::for_file("demo.json").is_err());
        assert!(FileLedgerStore::for_file("_rollback.json").is_err());
    }

    #[tokio::test]
    async fn test_list_ledgers_reports_corrupt_entries() {
        let store = MemoryLedgerStore::new();
        let mut good = ProvisioningLedger::new("good");
        good.append(ResourceKind::Vpc, "vpc-1", Metadata::new());
        ledger::persist(&store, &good).await.unwrap();
        store.write("broken", "{{{").await.unwrap();

        let listings = list_ledgers(&store).await.unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].key, "broken");
        assert!(listings[0].details.is_err());
        let info = listings[1].details.as_ref().unwrap();
        assert_eq!(info.deployment_name, "good");
        assert_eq!(info.resource_count, 1);
    }
}

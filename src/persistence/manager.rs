//! # Persistence Manager
//!
//! Atomic, checksum-verified reads and writes of execution state and
//! checkpoints, with bounded backup history and recovery.
//!
//! Writers are serialized twice: an in-process gate orders writers sharing one
//! manager, and an advisory `.lock` file (created exclusively, polled with a
//! bounded timeout) guards the storage root against other processes.

use super::errors::{PersistenceError, PersistenceResult};
use crate::constants::{DEFAULT_BACKUP_RETENTION, DEFAULT_CHECKPOINT_HISTORY};
use crate::logging::log_persistence_operation;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const LOCK_FILE: &str = ".lock";
const STATES_DIR: &str = "states";
const BACKUPS_DIR: &str = "backups";
const CHECKPOINTS_DIR: &str = "checkpoints";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    pub root: PathBuf,
    pub lock_timeout: Duration,
    pub lock_poll_interval: Duration,
    /// Previous versions kept per state id
    pub backup_retention: usize,
    /// Checkpoints kept per execution id
    pub checkpoint_retention: usize,
}

impl PersistenceConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/execution_state"),
            lock_timeout: Duration::from_secs(5),
            lock_poll_interval: Duration::from_millis(25),
            backup_retention: DEFAULT_BACKUP_RETENTION,
            checkpoint_retention: DEFAULT_CHECKPOINT_HISTORY,
        }
    }
}

/// On-disk envelope around every persisted value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub checksum: String,
    pub data: Value,
}

impl StoredRecord {
    fn new(id: &str, data: &Value) -> Self {
        let timestamp = Utc::now();
        Self {
            id: id.to_string(),
            checksum: checksum(&timestamp, data),
            timestamp,
            data: data.clone(),
        }
    }

    pub fn is_valid(&self) -> bool {
        checksum(&self.timestamp, &self.data) == self.checksum
    }
}

/// SHA-256 over the timestamp and the key-sorted JSON of the data
fn checksum(timestamp: &DateTime<Utc>, data: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true).as_bytes());
    hasher.update(b"|");
    hasher.update(data.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub checkpoint_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    pub state_count: usize,
    pub backup_count: usize,
    pub checkpoint_scopes: usize,
    pub checkpoint_count: usize,
    pub total_bytes: u64,
}

/// Holds the advisory lock file until dropped
struct StorageLock {
    path: PathBuf,
}

impl Drop for StorageLock {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "Failed to remove storage lock");
        }
    }
}

#[derive(Debug)]
pub struct PersistenceManager {
    config: PersistenceConfig,
    write_gate: Mutex<()>,
    sequence: AtomicU64,
}

impl PersistenceManager {
    pub fn new(config: PersistenceConfig) -> Self {
        info!(
            root = %config.root.display(),
            backup_retention = config.backup_retention,
            checkpoint_retention = config.checkpoint_retention,
            "💾 Persistence manager initialized"
        );
        Self {
            config,
            write_gate: Mutex::new(()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    fn state_path(&self, id: &str) -> PathBuf {
        self.config.root.join(STATES_DIR).join(format!("{id}.json"))
    }

    fn backup_dir(&self, id: &str) -> PathBuf {
        self.config.root.join(BACKUPS_DIR).join(id)
    }

    fn checkpoint_dir(&self, execution_id: &str) -> PathBuf {
        self.config.root.join(CHECKPOINTS_DIR).join(execution_id)
    }

    /// Persist `data` under `id`, backing up the previous version first
    pub async fn save_state(&self, id: &str, data: &Value) -> PersistenceResult<()> {
        validate_id(id)?;
        let _gate = self.write_gate.lock().await;
        let _lock = self.acquire_lock().await?;

        let path = self.state_path(id);
        if path_exists(&path).await? {
            self.backup_current(id, &path).await?;
        }
        let record = StoredRecord::new(id, data);
        write_atomic(&path, &record).await?;

        log_persistence_operation("save_state", id, "ok", None);
        Ok(())
    }

    /// Load the data stored under `id`.
    ///
    /// A record failing verification is replaced by the newest valid backup.
    /// Returns `Ok(None)` when nothing was ever stored and
    /// [`PersistenceError::IntegrityFailure`] when no valid copy is left.
    pub async fn load_state(&self, id: &str) -> PersistenceResult<Option<Value>> {
        validate_id(id)?;
        let path = self.state_path(id);

        let main_missing = match read_record(&path).await {
            Ok(Some(record)) if record.is_valid() => return Ok(Some(record.data)),
            Ok(Some(_)) => {
                error!(id = %id, path = %path.display(), "🚨 Checksum mismatch, attempting recovery");
                false
            }
            Ok(None) => true,
            Err(err) => {
                error!(id = %id, error = %err, "🚨 Unreadable state, attempting recovery");
                false
            }
        };

        match self.newest_valid_backup(id).await? {
            Some(record) => {
                warn!(id = %id, backup_timestamp = %record.timestamp, "♻️ Recovered state from backup");
                let _gate = self.write_gate.lock().await;
                let _lock = self.acquire_lock().await?;
                write_atomic(&path, &record).await?;
                log_persistence_operation("recover_state", id, "recovered", None);
                Ok(Some(record.data))
            }
            None if main_missing => Ok(None),
            None => {
                log_persistence_operation("load_state", id, "integrity_failure", None);
                Err(PersistenceError::IntegrityFailure { id: id.to_string() })
            }
        }
    }

    async fn backup_current(&self, id: &str, path: &Path) -> PersistenceResult<()> {
        let dir = self.backup_dir(id);
        create_dir_all(&dir).await?;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let backup = dir.join(format!(
            "{:020}_{:06}.json",
            Utc::now().timestamp_millis(),
            sequence % 1_000_000
        ));
        tokio::fs::copy(path, &backup)
            .await
            .map_err(|e| PersistenceError::io("backup", &backup, e))?;

        let mut backups = sorted_files(&dir).await?;
        while backups.len() > self.config.backup_retention {
            let oldest = backups.remove(0);
            tokio::fs::remove_file(&oldest)
                .await
                .map_err(|e| PersistenceError::io("prune_backup", &oldest, e))?;
        }
        debug!(id = %id, backup = %backup.display(), "Backed up previous state");
        Ok(())
    }

    async fn newest_valid_backup(&self, id: &str) -> PersistenceResult<Option<StoredRecord>> {
        let dir = self.backup_dir(id);
        if !path_exists(&dir).await? {
            return Ok(None);
        }
        for backup in sorted_files(&dir).await?.into_iter().rev() {
            match read_record(&backup).await {
                Ok(Some(record)) if record.is_valid() => return Ok(Some(record)),
                _ => warn!(backup = %backup.display(), "Skipping invalid backup"),
            }
        }
        Ok(None)
    }

    pub async fn save_checkpoint(
        &self,
        execution_id: &str,
        checkpoint_id: &str,
        data: &Value,
    ) -> PersistenceResult<()> {
        validate_id(execution_id)?;
        validate_id(checkpoint_id)?;
        let _gate = self.write_gate.lock().await;
        let _lock = self.acquire_lock().await?;

        let dir = self.checkpoint_dir(execution_id);
        let record = StoredRecord::new(checkpoint_id, data);
        write_atomic(&dir.join(format!("{checkpoint_id}.json")), &record).await?;

        let mut checkpoints = self.checkpoint_records(execution_id).await?;
        while checkpoints.len() > self.config.checkpoint_retention {
            let (_, oldest) = checkpoints.remove(0);
            tokio::fs::remove_file(&oldest)
                .await
                .map_err(|e| PersistenceError::io("prune_checkpoint", &oldest, e))?;
        }
        debug!(execution_id = %execution_id, checkpoint_id = %checkpoint_id, "📍 Checkpoint saved");
        Ok(())
    }

    pub async fn load_checkpoint(
        &self,
        execution_id: &str,
        checkpoint_id: &str,
    ) -> PersistenceResult<Option<Value>> {
        validate_id(execution_id)?;
        validate_id(checkpoint_id)?;
        let path = self
            .checkpoint_dir(execution_id)
            .join(format!("{checkpoint_id}.json"));
        match read_record(&path).await? {
            None => Ok(None),
            Some(record) if record.is_valid() => Ok(Some(record.data)),
            Some(_) => Err(PersistenceError::IntegrityFailure {
                id: format!("{execution_id}/{checkpoint_id}"),
            }),
        }
    }

    /// Checkpoints of one execution, oldest first
    pub async fn list_checkpoints(&self, execution_id: &str) -> PersistenceResult<Vec<CheckpointInfo>> {
        validate_id(execution_id)?;
        Ok(self
            .checkpoint_records(execution_id)
            .await?
            .into_iter()
            .filter_map(|(info, _)| info)
            .collect())
    }

    /// Checkpoint files ordered oldest first; unreadable files sort first
    async fn checkpoint_records(
        &self,
        execution_id: &str,
    ) -> PersistenceResult<Vec<(Option<CheckpointInfo>, PathBuf)>> {
        let dir = self.checkpoint_dir(execution_id);
        if !path_exists(&dir).await? {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for path in sorted_files(&dir).await? {
            let info = match read_record(&path).await {
                Ok(Some(record)) => Some(CheckpointInfo {
                    checkpoint_id: record.id,
                    timestamp: record.timestamp,
                }),
                _ => None,
            };
            records.push((info, path));
        }
        records.sort_by(|(a, pa), (b, pb)| {
            let ka = a.as_ref().map(|i| i.timestamp);
            let kb = b.as_ref().map(|i| i.timestamp);
            ka.cmp(&kb).then_with(|| pa.cmp(pb))
        });
        Ok(records)
    }

    /// Delete states (and their backups) last written more than `max_age` ago
    pub async fn cleanup_old_states(&self, max_age: Duration) -> PersistenceResult<usize> {
        let dir = self.config.root.join(STATES_DIR);
        if !path_exists(&dir).await? {
            return Ok(0);
        }
        let _gate = self.write_gate.lock().await;
        let _lock = self.acquire_lock().await?;

        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut removed = 0;

        for path in sorted_files(&dir).await? {
            let Ok(Some(record)) = read_record(&path).await else {
                continue;
            };
            if record.timestamp >= cutoff {
                continue;
            }
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| PersistenceError::io("cleanup_state", &path, e))?;
            let backups = self.backup_dir(&record.id);
            if path_exists(&backups).await? {
                tokio::fs::remove_dir_all(&backups)
                    .await
                    .map_err(|e| PersistenceError::io("cleanup_backups", &backups, e))?;
            }
            removed += 1;
        }

        info!(removed, "🧹 Cleaned up old execution states");
        Ok(removed)
    }

    pub async fn storage_stats(&self) -> PersistenceResult<StorageStats> {
        let mut stats = StorageStats::default();

        let states = self.config.root.join(STATES_DIR);
        if path_exists(&states).await? {
            for path in sorted_files(&states).await? {
                stats.state_count += 1;
                stats.total_bytes += file_size(&path).await?;
            }
        }

        for (dir_name, is_checkpoint) in [(BACKUPS_DIR, false), (CHECKPOINTS_DIR, true)] {
            let dir = self.config.root.join(dir_name);
            if !path_exists(&dir).await? {
                continue;
            }
            for scope in subdirectories(&dir).await? {
                let files = sorted_files(&scope).await?;
                for path in &files {
                    stats.total_bytes += file_size(path).await?;
                }
                if is_checkpoint {
                    stats.checkpoint_scopes += 1;
                    stats.checkpoint_count += files.len();
                } else {
                    stats.backup_count += files.len();
                }
            }
        }
        Ok(stats)
    }

    async fn acquire_lock(&self) -> PersistenceResult<StorageLock> {
        create_dir_all(&self.config.root).await?;
        let path = self.config.root.join(LOCK_FILE);
        let started = tokio::time::Instant::now();

        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    let owner = format!("{}\n", std::process::id());
                    if let Err(err) = file.write_all(owner.as_bytes()).await {
                        debug!(error = %err, "Could not record lock owner");
                    }
                    return Ok(StorageLock { path });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if started.elapsed() >= self.config.lock_timeout {
                        warn!(path = %path.display(), "🔒 Storage lock acquisition timed out");
                        return Err(PersistenceError::LockTimeout {
                            path,
                            timeout: self.config.lock_timeout,
                        });
                    }
                    tokio::time::sleep(self.config.lock_poll_interval).await;
                }
                Err(err) => return Err(PersistenceError::io("acquire_lock", &path, err)),
            }
        }
    }
}

/// Ids become file names, so they must be a single safe path component
fn validate_id(id: &str) -> PersistenceResult<()> {
    let reason = if id.is_empty() {
        Some("must not be empty")
    } else if id.starts_with('.') {
        Some("must not start with '.'")
    } else if id.contains(['/', '\\', '\0']) {
        Some("must not contain path separators")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(PersistenceError::InvalidId {
            id: id.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

async fn path_exists(path: &Path) -> PersistenceResult<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| PersistenceError::io("stat", path, e))
}

async fn create_dir_all(path: &Path) -> PersistenceResult<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| PersistenceError::io("create_dir", path, e))
}

async fn file_size(path: &Path) -> PersistenceResult<u64> {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.len())
        .map_err(|e| PersistenceError::io("stat", path, e))
}

/// Read and parse a record; `Ok(None)` when the file does not exist
async fn read_record(path: &Path) -> PersistenceResult<Option<StoredRecord>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(PersistenceError::io("read", path, err)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| PersistenceError::Serialization {
            id: path.display().to_string(),
            source,
        })
}

async fn write_atomic(path: &Path, record: &StoredRecord) -> PersistenceResult<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(record).map_err(|source| PersistenceError::Serialization {
        id: record.id.clone(),
        source,
    })?;

    let tmp = path.with_extension("json.tmp");
    let mut file = tokio::fs::File::create(&tmp)
        .await
        .map_err(|e| PersistenceError::io("create_temp", &tmp, e))?;
    file.write_all(&bytes)
        .await
        .map_err(|e| PersistenceError::io("write_temp", &tmp, e))?;
    file.sync_all()
        .await
        .map_err(|e| PersistenceError::io("sync_temp", &tmp, e))?;
    drop(file);

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| PersistenceError::io("rename", path, e))
}

/// Regular `.json` files directly inside `dir`, sorted by name
async fn sorted_files(dir: &Path) -> PersistenceResult<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| PersistenceError::io("read_dir", dir, e))?;
    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PersistenceError::io("read_dir", dir, e))?
    {
        let path = entry.path();
        let is_file = entry
            .file_type()
            .await
            .map(|kind| kind.is_file())
            .unwrap_or(false);
        if is_file && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

async fn subdirectories(dir: &Path) -> PersistenceResult<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| PersistenceError::io("read_dir", dir, e))?;
    let mut dirs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PersistenceError::io("read_dir", dir, e))?
    {
        if entry.file_type().await.map(|kind| kind.is_dir()).unwrap_or(false) {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager(dir: &tempfile::TempDir) -> PersistenceManager {
        PersistenceManager::new(PersistenceConfig {
            lock_timeout: Duration::from_millis(100),
            lock_poll_interval: Duration::from_millis(10),
            ..PersistenceConfig::new(dir.path())
        })
    }

    #[test]
    fn test_checksum_is_key_order_independent() {
        let timestamp = Utc::now();
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"y":2,"x":3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"x":3,"y":2},"b":1}"#).unwrap();
        assert_eq!(checksum(&timestamp, &a), checksum(&timestamp, &b));
        assert_ne!(checksum(&timestamp, &a), checksum(&timestamp, &json!({"b": 2})));
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("project-42_v1").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("../escape").is_err());
        assert!(validate_id("a/b").is_err());
        assert!(validate_id(".hidden").is_err());
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = manager(&dir);
        let data = json!({"state": "TASK_EXECUTION", "tasks": [1, 2, 3]});

        store.save_state("p1", &data).await.unwrap();
        assert_eq!(store.load_state("p1").await.unwrap(), Some(data));
        assert_eq!(store.load_state("missing").await.unwrap(), None);
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[tokio::test]
    async fn test_lock_timeout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = manager(&dir);
        std::fs::write(dir.path().join(LOCK_FILE), "other process").unwrap();

        let err = store.save_state("p1", &json!({})).await.unwrap_err();
        assert!(matches!(err, PersistenceError::LockTimeout { .. }));
    }

    #[tokio::test]
    async fn test_checkpoint_listing_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = manager(&dir);
        for id in ["c", "a", "b"] {
            store
                .save_checkpoint("exec", id, &json!({"id": id}))
                .await
                .unwrap();
        }
        let ids: Vec<String> = store
            .list_checkpoints("exec")
            .await
            .unwrap()
            .into_iter()
            .map(|info| info.checkpoint_id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}

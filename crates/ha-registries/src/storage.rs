//! JSON persistence under `.storage/`
//!
//! Every file is a versioned envelope around the payload. Writes go to a
//! temp file first and are renamed into place.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Migration required for {key}: from {from} to {to}")]
    MigrationRequired { key: String, from: u32, to: u32 },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// On-disk envelope
///
/// ```json
/// {
///   "version": 1,
///   "minor_version": 2,
///   "key": "core.category_registry",
///   "data": { ... }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFile<T> {
    /// Major version, bumped on breaking layout changes
    pub version: u32,
    /// Minor version, bumped on backwards compatible additions
    pub minor_version: u32,
    pub key: String,
    pub data: T,
}

impl<T> StorageFile<T> {
    pub fn new(key: impl Into<String>, data: T, version: u32, minor_version: u32) -> Self {
        Self {
            version,
            minor_version,
            key: key.into(),
            data,
        }
    }
}

/// The `.storage/` directory of one config directory
#[derive(Debug, Clone)]
pub struct Storage {
    storage_dir: PathBuf,
}

impl Storage {
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            storage_dir: config_dir.as_ref().join(".storage"),
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn file_path(&self, key: &str) -> PathBuf {
        self.storage_dir.join(key)
    }

    pub async fn exists(&self, key: &str) -> bool {
        fs::try_exists(self.file_path(key)).await.unwrap_or(false)
    }

    /// Load a file; `None` when it does not exist yet
    pub async fn load<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> StorageResult<Option<StorageFile<T>>> {
        let content = match fs::read_to_string(self.file_path(key)).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("Storage file not found: {}", key);
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        let file: StorageFile<T> = serde_json::from_str(&content)?;
        debug!("Loaded {} (v{}.{})", key, file.version, file.minor_version);
        Ok(Some(file))
    }

    pub async fn save<T: Serialize>(&self, file: &StorageFile<T>) -> StorageResult<()> {
        fs::create_dir_all(&self.storage_dir).await?;

        let path = self.file_path(&file.key);
        let temp_path = self.file_path(&format!("{}.tmp", file.key));

        let content = serde_json::to_string_pretty(file)?;
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &path).await?;

        debug!("Saved {} (v{}.{})", file.key, file.version, file.minor_version);
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        match fs::remove_file(self.file_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// A payload type with a fixed key and version
pub trait Storable: Serialize + DeserializeOwned {
    const KEY: &'static str;
    const VERSION: u32;
    const MINOR_VERSION: u32;

    fn to_storage_file(&self) -> StorageFile<Self>
    where
        Self: Clone,
    {
        StorageFile::new(Self::KEY, self.clone(), Self::VERSION, Self::MINOR_VERSION)
    }
}

/// Converts the raw `data` of an older major version
pub type MigrationFn<T> = fn(serde_json::Value, u32) -> StorageResult<T>;

/// Load `T`, migrating across major versions with `migrate`.
///
/// Older minor versions deserialize directly; new fields must carry serde
/// defaults.
pub async fn load_with_migration<T: Storable>(
    storage: &Storage,
    migrate: Option<MigrationFn<T>>,
) -> StorageResult<Option<T>> {
    let Some(file) = storage.load::<serde_json::Value>(T::KEY).await? else {
        return Ok(None);
    };

    if file.version != T::VERSION {
        let Some(migrate) = migrate else {
            return Err(StorageError::MigrationRequired {
                key: T::KEY.to_string(),
                from: file.version,
                to: T::VERSION,
            });
        };
        return Ok(Some(migrate(file.data, file.version)?));
    }

    if file.minor_version < T::MINOR_VERSION {
        debug!(
            "Upgrading {} from minor version {} to {}",
            T::KEY,
            file.minor_version,
            T::MINOR_VERSION
        );
    }

    Ok(Some(serde_json::from_value(file.data)?))
}

struct PendingSave<T> {
    data: Option<T>,
    timer: Option<JoinHandle<()>>,
}

struct StoreInner<T> {
    storage: Arc<Storage>,
    pending: Mutex<PendingSave<T>>,
    /// Serializes writes so a flush never races a timer write
    write_lock: tokio::sync::Mutex<()>,
}

/// Debounced writer for one [`Storable`] payload.
///
/// [`delay_save`](Store::delay_save) may be called after every mutation;
/// all calls within the delay collapse into a single write of the latest
/// data.
pub struct Store<T> {
    inner: Arc<StoreInner<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Storable + Send + Sync + 'static> Store<T> {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                storage,
                pending: Mutex::new(PendingSave {
                    data: None,
                    timer: None,
                }),
                write_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn key(&self) -> &'static str {
        T::KEY
    }

    pub async fn load(&self, migrate: Option<MigrationFn<T>>) -> StorageResult<Option<T>> {
        load_with_migration(&self.inner.storage, migrate).await
    }

    /// Write immediately, replacing anything pending
    pub async fn save(&self, data: T) -> StorageResult<()> {
        let _write = self.inner.write_lock.lock().await;
        self.lock_pending().data = None;
        self.write(data).await
    }

    /// Schedule a write of `data` after `delay`. Must be called from within
    /// a tokio runtime.
    pub fn delay_save(&self, data: T, delay: Duration) {
        let mut pending = self.lock_pending();
        pending.data = Some(data);
        if pending.timer.is_some() {
            return;
        }

        let store = self.clone();
        pending.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _write = store.inner.write_lock.lock().await;
            let data = {
                let mut pending = store.lock_pending();
                pending.timer = None;
                pending.data.take()
            };
            if let Some(data) = data {
                if let Err(err) = store.write(data).await {
                    error!("Error writing {}: {}", T::KEY, err);
                }
            }
        }));
    }

    /// Write pending data now
    pub async fn flush(&self) -> StorageResult<()> {
        let _write = self.inner.write_lock.lock().await;
        let data = {
            let mut pending = self.lock_pending();
            if let Some(timer) = pending.timer.take() {
                timer.abort();
            }
            pending.data.take()
        };
        match data {
            Some(data) => self.write(data).await,
            None => Ok(()),
        }
    }

    pub fn has_pending(&self) -> bool {
        self.lock_pending().data.is_some()
    }

    async fn write(&self, data: T) -> StorageResult<()> {
        let file = StorageFile::new(T::KEY, data, T::VERSION, T::MINOR_VERSION);
        self.inner.storage.save(&file).await
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, PendingSave<T>> {
        self.inner.pending.lock().unwrap_or_else(|poisoned| {
            warn!("Pending save lock for {} was poisoned", T::KEY);
            poisoned.into_inner()
        })
    }
}

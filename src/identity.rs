use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;

use crate::models::Identity;

/// Fixed key the identity record is stored under.
pub const USER_STORAGE_KEY: &str = "chat_app_user";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity storage I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("stored identity is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Durable storage for the single identity record of this device.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn load(&self) -> Result<Option<Identity>, StoreError>;
    async fn save(&self, identity: &Identity) -> Result<(), StoreError>;
    async fn clear(&self) -> Result<(), StoreError>;
}

/// Keeps the identity as `<dir>/chat_app_user.json`.
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        FileIdentityStore {
            path: dir.as_ref().join(format!("{USER_STORAGE_KEY}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl IdentityStore for FileIdentityStore {
    async fn load(&self) -> Result<Option<Identity>, StoreError> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    async fn save(&self, identity: &Identity) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_vec(identity)?;

        // Write beside the target then rename so a crash never leaves half a record.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

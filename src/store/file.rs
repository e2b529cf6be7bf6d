//! File-backed store
//!
//! One file per key under a base directory. Key segments separated by `/`
//! become subdirectories, so `node/node-1` lives at `<base>/node/node-1`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use super::keys::TEMP_SUFFIX;
use super::{codec, ObjectStore};
use crate::error::{Error, Result};

/// File-per-key implementation of [`ObjectStore`]
pub struct FileObjectStore {
    base_dir: PathBuf,
    compression: bool,
}

impl FileObjectStore {
    /// Create a store rooted at `base_dir`, creating the directory if needed
    pub fn new(base_dir: PathBuf, compression: bool) -> Result<Self> {
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            compression,
        })
    }

    /// Root directory of the store
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let mut path = self.base_dir.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(Error::Store(format!("invalid key {:?}", key)));
            }
            path.push(segment);
        }
        Ok(path)
    }
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write beside the target then rename, so readers never see a partial value
        let temp = path.with_file_name(format!(
            "{}.{}{}",
            path.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("value"),
            uuid::Uuid::new_v4().simple(),
            TEMP_SUFFIX
        ));
        let frame = codec::encode(&value, self.compression);
        tokio::fs::write(&temp, frame).await?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(frame) => Ok(Some(Bytes::from(codec::decode(key, &frame)?))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let (dir_part, name_prefix) = match prefix.rfind('/') {
            Some(idx) => (&prefix[..idx], &prefix[idx + 1..]),
            None => ("", prefix),
        };
        let dir = if dir_part.is_empty() {
            self.base_dir.clone()
        } else {
            self.path_for(dir_part)?
        };

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            if name.ends_with(TEMP_SUFFIX) || !name.starts_with(name_prefix) {
                continue;
            }
            if dir_part.is_empty() {
                keys.push(name);
            } else {
                keys.push(format!("{}/{}", dir_part, name));
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn summary_name(&self) -> String {
        format!("file:{}", self.base_dir.display())
    }
}

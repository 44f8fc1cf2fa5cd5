//! File capability - 固定の論理ディレクトリ配下への保存と読み出し

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::domain::errors::FileStorageError;
use crate::domain::file_entry::FileEntry;
use crate::ports::{FileReader, FileStorage};

pub struct File {
    storage: Arc<dyn FileStorage>,
    directory: String,
}

impl File {
    pub fn new(storage: Arc<dyn FileStorage>, directory: impl Into<String>) -> Self {
        Self {
            storage,
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &str {
        &self.directory
    }

    pub async fn store_content(
        &self,
        name: &str,
        content: &str,
    ) -> Result<FileEntry, FileStorageError> {
        let mut reader = content.as_bytes();
        self.store_stream(name, &mut reader).await
    }

    /// Streams `content` to completion; a read error mid-stream fails the store.
    pub async fn store_stream(
        &self,
        name: &str,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<FileEntry, FileStorageError> {
        let entry = self.storage.store(&self.directory, name, content).await?;
        tracing::debug!(name, size = entry.size(), url = entry.url(), "file stored");
        Ok(entry)
    }

    pub async fn get_stream(&self, entry: &FileEntry) -> Result<FileReader, FileStorageError> {
        self.storage.open(entry).await
    }

    pub async fn read_to_string(&self, entry: &FileEntry) -> Result<String, FileStorageError> {
        let mut reader = self.get_stream(entry).await?;
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .await
            .map_err(|source| FileStorageError::Read {
                name: entry.name().to_string(),
                source,
            })?;
        String::from_utf8(bytes).map_err(|_| FileStorageError::NotUtf8 {
            name: entry.name().to_string(),
        })
    }

    pub async fn delete(&self, entry: &FileEntry) -> Result<(), FileStorageError> {
        self.storage.delete(entry).await
    }
}

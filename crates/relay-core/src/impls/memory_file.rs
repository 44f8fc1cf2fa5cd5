//! InMemoryFileStorage - 開発用の blob ストア
//!
//! url は `memory://<directory>/<ulid>` 形式です。

use std::collections::HashMap;
use std::io::Cursor;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::domain::errors::FileStorageError;
use crate::domain::file_entry::FileEntry;
use crate::ports::{FileReader, FileStorage};

const SCHEME: &str = "memory://";

#[derive(Default)]
pub struct InMemoryFileStorage {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryFileStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_reference(entry: &FileEntry) -> Result<(), FileStorageError> {
        if entry.url().starts_with(SCHEME) {
            Ok(())
        } else {
            Err(FileStorageError::UnsupportedReference(entry.url().to_string()))
        }
    }
}

#[async_trait]
impl FileStorage for InMemoryFileStorage {
    async fn store(
        &self,
        directory: &str,
        name: &str,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<FileEntry, FileStorageError> {
        let mut bytes = Vec::new();
        content
            .read_to_end(&mut bytes)
            .await
            .map_err(|source| FileStorageError::Store {
                name: name.to_string(),
                source,
            })?;

        let url = format!("{SCHEME}{directory}/{}", Ulid::new());
        let entry = FileEntry::new(name, bytes.len() as u64, url.clone());
        self.blobs.write().await.insert(url, bytes);
        Ok(entry)
    }

    async fn open(&self, entry: &FileEntry) -> Result<FileReader, FileStorageError> {
        Self::check_reference(entry)?;
        let blobs = self.blobs.read().await;
        let bytes = blobs
            .get(entry.url())
            .cloned()
            .ok_or_else(|| FileStorageError::NotFound {
                name: entry.name().to_string(),
            })?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    async fn delete(&self, entry: &FileEntry) -> Result<(), FileStorageError> {
        Self::check_reference(entry)?;
        self.blobs
            .write()
            .await
            .remove(entry.url())
            .map(|_| ())
            .ok_or_else(|| FileStorageError::NotFound {
                name: entry.name().to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// 数バイト返した後にエラーになる reader
    struct FailingReader {
        sent: bool,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.sent {
                Poll::Ready(Err(std::io::Error::other("connection reset")))
            } else {
                self.sent = true;
                buf.put_slice(b"partial");
                Poll::Ready(Ok(()))
            }
        }
    }

    #[tokio::test]
    async fn store_then_read_back() {
        let storage = InMemoryFileStorage::new();
        let mut content: &[u8] = b"hello";

        let entry = storage.store("files", "n.txt", &mut content).await.unwrap();
        assert_eq!(entry.size(), 5);
        assert!(entry.url().starts_with("memory://files/"));

        let mut reader = storage.open(&entry).await.unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn failed_stream_is_reported_with_file_name() {
        let storage = InMemoryFileStorage::new();
        let mut reader = FailingReader { sent: false };

        let err = storage
            .store("files", "broken.bin", &mut reader)
            .await
            .unwrap_err();

        assert!(matches!(err, FileStorageError::Store { ref name, .. } if name == "broken.bin"));
        assert!(storage.blobs.read().await.is_empty());
    }

    #[tokio::test]
    async fn deleted_entry_is_not_found() {
        let storage = InMemoryFileStorage::new();
        let mut content: &[u8] = b"bye";
        let entry = storage.store("files", "gone.txt", &mut content).await.unwrap();

        storage.delete(&entry).await.unwrap();

        let err = storage.open(&entry).await.err().unwrap();
        assert!(matches!(err, FileStorageError::NotFound { name } if name == "gone.txt"));
    }

    #[tokio::test]
    async fn foreign_reference_is_rejected() {
        let storage = InMemoryFileStorage::new();
        let entry = FileEntry::new("x.txt", 1, "file:///tmp/x.txt");

        let err = storage.open(&entry).await.err().unwrap();
        assert!(matches!(err, FileStorageError::UnsupportedReference(_)));
    }
}

//! LocalFileStorage - ローカルディスク上の blob ストア
//!
//! `<root>/<directory>/<ulid>/<name>` に保存し、url は `file://<path>` です。
//! 書き込みが途中で失敗した場合は部分ファイルを削除してからエラーを返します。

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use ulid::Ulid;

use crate::domain::errors::FileStorageError;
use crate::domain::file_entry::FileEntry;
use crate::ports::{FileReader, FileStorage};

const SCHEME: &str = "file://";

pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// url をパスに戻す。root の外を指す参照は拒否する
    fn path_of(&self, entry: &FileEntry) -> Result<PathBuf, FileStorageError> {
        let unsupported = || FileStorageError::UnsupportedReference(entry.url().to_string());
        let path = entry
            .url()
            .strip_prefix(SCHEME)
            .map(PathBuf::from)
            .ok_or_else(unsupported)?;
        let escapes = path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir));
        if escapes || !path.starts_with(&self.root) {
            return Err(unsupported());
        }
        Ok(path)
    }

    async fn write_all(
        path: &Path,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> std::io::Result<u64> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(path).await?;
        let size = tokio::io::copy(content, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(size)
    }
}

/// Last path component of `name`, so a file name cannot address other directories.
fn file_name(name: &str) -> &str {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file")
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn store(
        &self,
        directory: &str,
        name: &str,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<FileEntry, FileStorageError> {
        let path = self
            .root
            .join(file_name(directory))
            .join(Ulid::new().to_string())
            .join(file_name(name));

        match Self::write_all(&path, content).await {
            Ok(size) => {
                tracing::debug!(path = %path.display(), size, "file stored");
                Ok(FileEntry::new(
                    name,
                    size,
                    format!("{SCHEME}{}", path.display()),
                ))
            }
            Err(source) => {
                if let Err(e) = fs::remove_file(&path).await
                    && e.kind() != ErrorKind::NotFound
                {
                    tracing::warn!(path = %path.display(), error = %e, "partial file left behind");
                }
                Err(FileStorageError::Store {
                    name: name.to_string(),
                    source,
                })
            }
        }
    }

    async fn open(&self, entry: &FileEntry) -> Result<FileReader, FileStorageError> {
        let path = self.path_of(entry)?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(FileStorageError::NotFound {
                name: entry.name().to_string(),
            }),
            Err(source) => Err(FileStorageError::Read {
                name: entry.name().to_string(),
                source,
            }),
        }
    }

    async fn delete(&self, entry: &FileEntry) -> Result<(), FileStorageError> {
        let path = self.path_of(entry)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(FileStorageError::NotFound {
                name: entry.name().to_string(),
            }),
            Err(source) => Err(FileStorageError::Read {
                name: entry.name().to_string(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn store_and_read_back_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path());
        let mut content: &[u8] = b"hello";

        let entry = storage.store("files", "n.txt", &mut content).await.unwrap();
        assert_eq!(entry.size(), 5);
        assert_eq!(entry.mime_type(), "text/plain");
        assert!(entry.url().starts_with("file://"));

        let mut reader = storage.open(&entry).await.unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn names_cannot_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path());
        let mut content: &[u8] = b"x";

        let entry = storage
            .store("../outside", "../../evil.txt", &mut content)
            .await
            .unwrap();

        let path = storage.path_of(&entry).unwrap();
        assert!(path.starts_with(dir.path()));
        assert_eq!(path.file_name().unwrap(), "evil.txt");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path());
        let mut content: &[u8] = b"x";
        let entry = storage.store("files", "a.txt", &mut content).await.unwrap();

        storage.delete(&entry).await.unwrap();

        let err = storage.open(&entry).await.err().unwrap();
        assert!(matches!(err, FileStorageError::NotFound { name } if name == "a.txt"));
    }

    #[tokio::test]
    async fn reference_outside_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path());
        let entry = FileEntry::new("passwd", 1, "file:///etc/passwd");

        let err = storage.open(&entry).await.err().unwrap();
        assert!(matches!(err, FileStorageError::UnsupportedReference(_)));
    }
}

//! FileStorage port - blob の保存と読み出し
//!
//! 保存に成功すると不変のハンドル `FileEntry` を返します。
//! 書き込みが途中で失敗した場合は必ずエラーになります（黙って捨てない）。

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::domain::errors::FileStorageError;
use crate::domain::file_entry::FileEntry;

pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Streams `content` to completion under `directory`.
    async fn store(
        &self,
        directory: &str,
        name: &str,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<FileEntry, FileStorageError>;

    /// Fails with `NotFound` if the referenced object no longer exists.
    async fn open(&self, entry: &FileEntry) -> Result<FileReader, FileStorageError>;

    async fn delete(&self, entry: &FileEntry) -> Result<(), FileStorageError>;
}

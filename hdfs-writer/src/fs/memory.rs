use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{AppendFile, FileStatus, Filesystem, FilesystemError};

/// In-memory filesystem, used by tests and local experimentation the way a
/// print sink would be: same contract, no remote cluster.
#[derive(Clone, Default)]
pub struct MemoryFilesystem {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    files: Mutex<HashMap<String, FileEntry>>,
    fail_next_write: AtomicBool,
}

#[derive(Default)]
struct FileEntry {
    data: Vec<u8>,
    mode: Option<u32>,
}

impl MemoryFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next write report zero bytes written, to exercise the
    /// drop-and-continue path.
    pub fn fail_next_write(&self) {
        self.inner.fail_next_write.store(true, Ordering::SeqCst);
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        let files = self.inner.files.lock().expect("poisoned memory fs lock");
        files.get(path).map(|entry| entry.data.clone())
    }

    pub fn mode(&self, path: &str) -> Option<u32> {
        let files = self.inner.files.lock().expect("poisoned memory fs lock");
        files.get(path).and_then(|entry| entry.mode)
    }
}

#[async_trait]
impl Filesystem for MemoryFilesystem {
    async fn stat(&self, path: &str) -> Result<Option<FileStatus>, FilesystemError> {
        let files = self.inner.files.lock().expect("poisoned memory fs lock");
        Ok(files.get(path).map(|entry| FileStatus {
            length: entry.data.len() as u64,
        }))
    }

    async fn create_empty(&self, path: &str) -> Result<(), FilesystemError> {
        let mut files = self.inner.files.lock().expect("poisoned memory fs lock");
        files.entry(path.to_string()).or_default();
        Ok(())
    }

    async fn set_permissions(&self, path: &str, mode: u32) -> Result<(), FilesystemError> {
        let mut files = self.inner.files.lock().expect("poisoned memory fs lock");
        match files.get_mut(path) {
            Some(entry) => {
                entry.mode = Some(mode);
                Ok(())
            }
            None => Err(FilesystemError::NotFound(path.to_string())),
        }
    }

    async fn open_append(&self, path: &str) -> Result<Box<dyn AppendFile>, FilesystemError> {
        let files = self.inner.files.lock().expect("poisoned memory fs lock");
        if !files.contains_key(path) {
            return Err(FilesystemError::NotFound(path.to_string()));
        }
        Ok(Box::new(MemoryAppend {
            inner: self.inner.clone(),
            path: path.to_string(),
        }))
    }
}

struct MemoryAppend {
    inner: Arc<Inner>,
    path: String,
}

#[async_trait]
impl AppendFile for MemoryAppend {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, FilesystemError> {
        if self.inner.fail_next_write.swap(false, Ordering::SeqCst) {
            return Ok(0);
        }
        let mut files = self.inner.files.lock().expect("poisoned memory fs lock");
        match files.get_mut(&self.path) {
            Some(entry) => {
                entry.data.extend_from_slice(buf);
                Ok(buf.len())
            }
            None => Err(FilesystemError::NotFound(self.path.clone())),
        }
    }

    async fn close(self: Box<Self>) -> Result<(), FilesystemError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_is_idempotent_and_never_truncates() {
        let fs = MemoryFilesystem::new();
        assert!(fs.stat("/orders").await.unwrap().is_none());

        fs.create_empty("/orders").await.unwrap();
        let mut file = fs.open_append("/orders").await.unwrap();
        file.write(b"hello\n").await.unwrap();
        file.close().await.unwrap();

        // Re-creating an existing file must keep its contents.
        fs.create_empty("/orders").await.unwrap();
        assert_eq!(fs.contents("/orders").unwrap(), b"hello\n");
        assert_eq!(fs.stat("/orders").await.unwrap().unwrap().length, 6);
    }

    #[tokio::test]
    async fn appends_accumulate_in_order() {
        let fs = MemoryFilesystem::new();
        fs.create_empty("/orders").await.unwrap();
        for chunk in [b"one\n".as_slice(), b"two\n".as_slice()] {
            let mut file = fs.open_append("/orders").await.unwrap();
            file.write(chunk).await.unwrap();
            file.close().await.unwrap();
        }
        assert_eq!(fs.contents("/orders").unwrap(), b"one\ntwo\n");
    }

    #[tokio::test]
    async fn append_to_missing_file_fails() {
        let fs = MemoryFilesystem::new();
        assert!(matches!(
            fs.open_append("/absent").await,
            Err(FilesystemError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn injected_failure_reports_zero_bytes_once() {
        let fs = MemoryFilesystem::new();
        fs.create_empty("/orders").await.unwrap();
        fs.fail_next_write();

        let mut file = fs.open_append("/orders").await.unwrap();
        assert_eq!(file.write(b"lost\n").await.unwrap(), 0);
        assert_eq!(file.write(b"kept\n").await.unwrap(), 5);
        file.close().await.unwrap();
        assert_eq!(fs.contents("/orders").unwrap(), b"kept\n");
    }
}

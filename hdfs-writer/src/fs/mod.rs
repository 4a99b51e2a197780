use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod webhdfs;

pub use memory::MemoryFilesystem;
pub use webhdfs::WebHdfsClient;

#[derive(Error, Debug)]
pub enum FilesystemError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid filesystem url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("{op} returned unexpected status {status}")]
    UnexpectedStatus {
        op: &'static str,
        status: reqwest::StatusCode,
    },
    #[error("{0} does not exist")]
    NotFound(String),
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    pub length: u64,
}

/// One writable handle, good for a single open/write/close cycle.
#[async_trait]
pub trait AppendFile: Send {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, FilesystemError>;
    async fn close(self: Box<Self>) -> Result<(), FilesystemError>;
}

/// The filesystem operations a pipeline needs. Every error aborts only the
/// current record, never the worker.
#[async_trait]
pub trait Filesystem: Send + Sync + 'static {
    /// Returns `None` when the path does not exist.
    async fn stat(&self, path: &str) -> Result<Option<FileStatus>, FilesystemError>;

    /// Creates an empty file. Never truncates an existing one; callers stat
    /// first and only create on missing.
    async fn create_empty(&self, path: &str) -> Result<(), FilesystemError>;

    async fn set_permissions(&self, path: &str, mode: u32) -> Result<(), FilesystemError>;

    async fn open_append(&self, path: &str) -> Result<Box<dyn AppendFile>, FilesystemError>;
}

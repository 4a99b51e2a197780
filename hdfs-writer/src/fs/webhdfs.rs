use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::{AppendFile, FileStatus, Filesystem, FilesystemError};

/// Client for the WebHDFS REST API. The namenode answers metadata
/// operations directly and redirects data operations to a datanode;
/// reqwest follows those redirects for us.
#[derive(Clone)]
pub struct WebHdfsClient {
    http: reqwest::Client,
    base: Url,
}

#[derive(Deserialize)]
struct GetFileStatusResponse {
    #[serde(rename = "FileStatus")]
    file_status: RemoteFileStatus,
}

#[derive(Deserialize)]
struct RemoteFileStatus {
    length: u64,
}

impl WebHdfsClient {
    pub fn new(hdfs_url: &str) -> Result<Self, FilesystemError> {
        let base = Url::parse(hdfs_url)?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
        })
    }

    fn op_url(&self, path: &str, op: &str, params: &[(&str, &str)]) -> Url {
        let mut url = self.base.clone();
        url.set_path(&format!("/webhdfs/v1{path}"));
        url.query_pairs_mut().clear().append_pair("op", op);
        for (key, value) in params {
            url.query_pairs_mut().append_pair(key, value);
        }
        url
    }
}

#[async_trait]
impl Filesystem for WebHdfsClient {
    async fn stat(&self, path: &str) -> Result<Option<FileStatus>, FilesystemError> {
        let url = self.op_url(path, "GETFILESTATUS", &[]);
        let response = self.http.get(url).send().await?;
        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: GetFileStatusResponse = response.json().await?;
                Ok(Some(FileStatus {
                    length: body.file_status.length,
                }))
            }
            status => Err(FilesystemError::UnexpectedStatus {
                op: "GETFILESTATUS",
                status,
            }),
        }
    }

    async fn create_empty(&self, path: &str) -> Result<(), FilesystemError> {
        // overwrite=false keeps creation idempotent with respect to data:
        // a concurrent creation loses the race instead of truncating.
        let url = self.op_url(path, "CREATE", &[("overwrite", "false")]);
        let response = self.http.put(url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(FilesystemError::UnexpectedStatus {
                op: "CREATE",
                status: response.status(),
            })
        }
    }

    async fn set_permissions(&self, path: &str, mode: u32) -> Result<(), FilesystemError> {
        let octal = format!("{mode:o}");
        let url = self.op_url(path, "SETPERMISSION", &[("permission", &octal)]);
        let response = self.http.put(url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(FilesystemError::UnexpectedStatus {
                op: "SETPERMISSION",
                status: response.status(),
            })
        }
    }

    async fn open_append(&self, path: &str) -> Result<Box<dyn AppendFile>, FilesystemError> {
        let url = self.op_url(path, "APPEND", &[]);
        Ok(Box::new(WebHdfsAppend {
            http: self.http.clone(),
            url,
        }))
    }
}

/// Append handle that issues one APPEND request per write, so `close`
/// carries no buffered state.
struct WebHdfsAppend {
    http: reqwest::Client,
    url: Url,
}

#[async_trait]
impl AppendFile for WebHdfsAppend {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, FilesystemError> {
        let response = self
            .http
            .post(self.url.clone())
            .body(buf.to_vec())
            .send()
            .await?;
        if response.status().is_success() {
            Ok(buf.len())
        } else {
            Err(FilesystemError::UnexpectedStatus {
                op: "APPEND",
                status: response.status(),
            })
        }
    }

    async fn close(self: Box<Self>) -> Result<(), FilesystemError> {
        Ok(())
    }
}

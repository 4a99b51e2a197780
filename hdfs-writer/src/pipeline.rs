use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use rdkafka::error::KafkaError;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::fs::{Filesystem, FilesystemError, WebHdfsClient};
use crate::registry::RegistryState;
use crate::source::{KafkaRecordSource, Record, RecordSource};

/// Immutable once a worker starts; owned exclusively by it.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub broker: String,
    pub group: String,
    pub topic: String,
    pub hdfs_url: String,
}

impl PipelineConfig {
    /// Records land in a file named after the topic, at the root.
    pub fn target_path(&self) -> String {
        format!("/{}", self.topic)
    }
}

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("failed to create consumer: {0}")]
    Kafka(#[from] KafkaError),
    #[error("failed to reach filesystem: {0}")]
    Filesystem(#[from] FilesystemError),
}

/// Builds the two collaborators a pipeline owns. A seam here lets tests
/// drive workers without a broker or a namenode.
#[async_trait]
pub trait Connect: Send + Sync + 'static {
    async fn source(&self, config: &PipelineConfig) -> Result<Box<dyn RecordSource>, SetupError>;

    async fn filesystem(&self, config: &PipelineConfig)
        -> Result<Arc<dyn Filesystem>, SetupError>;
}

/// Production connector: rdkafka consumer plus WebHDFS client.
pub struct KafkaHdfsConnector {
    session_timeout_ms: u32,
    offset_reset: String,
}

impl KafkaHdfsConnector {
    pub fn new(config: &Config) -> Self {
        Self {
            session_timeout_ms: config.kafka_session_timeout_ms,
            offset_reset: config.kafka_offset_reset.clone(),
        }
    }
}

#[async_trait]
impl Connect for KafkaHdfsConnector {
    async fn source(&self, config: &PipelineConfig) -> Result<Box<dyn RecordSource>, SetupError> {
        let source = KafkaRecordSource::new(
            &config.broker,
            &config.group,
            &config.topic,
            self.session_timeout_ms,
            &self.offset_reset,
        )?;
        Ok(Box::new(source))
    }

    async fn filesystem(
        &self,
        config: &PipelineConfig,
    ) -> Result<Arc<dyn Filesystem>, SetupError> {
        let client = WebHdfsClient::new(&config.hdfs_url)?;
        // Ping the namenode so a bad URL fails the pipeline now, not on
        // the first record.
        client.stat("/").await?;
        Ok(Arc::new(client))
    }
}

/// One consumer-to-filesystem task: INIT, CONSUMING, SHUTTING_DOWN, DONE.
pub(crate) struct Worker {
    name: String,
    config: PipelineConfig,
    registry: Arc<RegistryState>,
    poll_timeout: Duration,
}

impl Worker {
    pub(crate) fn new(
        name: String,
        config: PipelineConfig,
        registry: Arc<RegistryState>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            name,
            config,
            registry,
            poll_timeout,
        }
    }

    pub(crate) async fn run(
        self,
        connector: Arc<dyn Connect>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        // INIT: a failure here must not leave a dangling registry entry.
        let source = match connector.source(&self.config).await {
            Ok(source) => source,
            Err(err) => {
                error!(pipeline = %self.name, "failed to create consumer: {err}");
                self.registry.finish(&self.name);
                return;
            }
        };
        let fs = match connector.filesystem(&self.config).await {
            Ok(fs) => fs,
            Err(err) => {
                error!(pipeline = %self.name, "failed to create filesystem client: {err}");
                source.close().await;
                self.registry.finish(&self.name);
                return;
            }
        };

        info!(
            pipeline = %self.name,
            topic = %self.config.topic,
            hdfs_url = %self.config.hdfs_url,
            "pipeline established, watching for messages"
        );

        let path = self.config.target_path();

        // CONSUMING: `biased` makes the signal win over a buffered record,
        // so no write is attempted once shutdown is observed.
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(pipeline = %self.name, "termination signal received");
                    break;
                }
                polled = source.poll(self.poll_timeout) => match polled {
                    Ok(None) => {}
                    Ok(Some(record)) => match append_record(fs.as_ref(), &path, &record).await {
                        Ok(written) => {
                            counter!("writer_records_appended_total", "topic" => self.config.topic.clone())
                                .increment(1);
                            tracing::debug!(
                                pipeline = %self.name,
                                partition = record.partition,
                                offset = record.offset,
                                written,
                                "appended record"
                            );
                        }
                        Err(err) => {
                            // At-most-once: the record is dropped, the
                            // pipeline keeps polling.
                            counter!("writer_records_dropped_total", "topic" => self.config.topic.clone())
                                .increment(1);
                            warn!(
                                pipeline = %self.name,
                                partition = record.partition,
                                offset = record.offset,
                                "dropping record after filesystem error: {err}"
                            );
                        }
                    },
                    Err(err) if err.is_fatal() => {
                        self.registry.mark_terminating(&self.name);
                        error!(pipeline = %self.name, "fatal transport error, stopping pipeline: {err}");
                        break;
                    }
                    Err(err) => {
                        warn!(pipeline = %self.name, "transient transport error: {err}");
                    }
                }
            }
        }

        // SHUTTING_DOWN: close errors are logged inside close(), never
        // escalated; termination always completes.
        source.close().await;
        self.registry.finish(&self.name);
        info!(pipeline = %self.name, "pipeline stopped");
    }
}

/// One open/write/close cycle per record; no handle survives across polls.
async fn append_record(
    fs: &dyn Filesystem,
    path: &str,
    record: &Record,
) -> Result<usize, FilesystemError> {
    if fs.stat(path).await?.is_none() {
        info!(path, "creating target file");
        fs.create_empty(path).await?;
        if let Err(err) = fs.set_permissions(path, 0o777).await {
            warn!(path, "failed to set permissions: {err}");
        }
    }

    let mut payload = Vec::with_capacity(record.value.len() + 1);
    payload.extend_from_slice(&record.value);
    payload.push(b'\n');

    let mut file = fs.open_append(path).await?;
    let written = file.write(&payload).await?;
    if let Err(err) = file.close().await {
        warn!(path, "failed to close append handle: {err}");
    }
    if written < payload.len() {
        return Err(FilesystemError::ShortWrite {
            written,
            expected: payload.len(),
        });
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::fs::MemoryFilesystem;
    use crate::registry::Registry;
    use crate::test_utils::{record, ChannelSource, StaticConnector};

    const POLL: Duration = Duration::from_millis(20);

    fn pipeline_config(topic: &str) -> PipelineConfig {
        PipelineConfig {
            broker: "b:9092".to_string(),
            group: "g1".to_string(),
            topic: topic.to_string(),
            hdfs_url: "http://namenode:9870".to_string(),
        }
    }

    async fn wait_until<F: Fn() -> bool>(check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(check());
    }

    #[test]
    fn target_path_is_the_topic_at_the_root() {
        assert_eq!(pipeline_config("orders").target_path(), "/orders");
    }

    #[tokio::test]
    async fn first_record_creates_the_file_and_appends() {
        let fs = MemoryFilesystem::new();
        fs.create_empty("/pre-existing").await.unwrap();

        let value = record("hello");
        let written = append_record(&fs, "/orders", &value).await.unwrap();
        assert_eq!(written, 6);
        assert_eq!(fs.contents("/orders").unwrap(), b"hello\n");
        assert_eq!(fs.mode("/orders"), Some(0o777));

        // Existing files only gain data.
        append_record(&fs, "/orders", &record("world")).await.unwrap();
        assert_eq!(fs.contents("/orders").unwrap(), b"hello\nworld\n");
    }

    #[tokio::test]
    async fn zero_byte_write_is_a_per_record_error() {
        let fs = MemoryFilesystem::new();
        fs.create_empty("/orders").await.unwrap();
        fs.fail_next_write();

        let result = append_record(&fs, "/orders", &record("lost")).await;
        assert!(matches!(
            result,
            Err(FilesystemError::ShortWrite { written: 0, .. })
        ));
        assert_eq!(fs.contents("/orders").unwrap(), b"");
    }

    #[tokio::test]
    async fn failed_record_is_dropped_and_the_pipeline_continues() {
        let fs = MemoryFilesystem::new();
        let connector = StaticConnector::new(fs.clone());
        let (tx, source) = ChannelSource::new();
        connector.push_source(source);
        let registry = Registry::new(std::sync::Arc::new(connector), POLL);

        let name = registry.create(pipeline_config("orders"));
        fs.fail_next_write();
        tx.send(Ok(record("lost"))).unwrap();
        tx.send(Ok(record("kept"))).unwrap();

        wait_until(|| fs.contents("/orders").as_deref() == Some(b"kept\n".as_slice())).await;
        // Still registered: per-record failures never stop the worker.
        assert!(registry.list().contains(&name));

        assert!(registry.delete(&name));
        wait_until(|| registry.outstanding() == 0).await;
    }

    // Uses the current-thread runtime: the worker task cannot run before
    // the first await, so the signal is already pending when it first
    // checks, and the buffered record must lose the race.
    #[tokio::test]
    async fn pending_signal_wins_over_a_buffered_record() {
        let fs = MemoryFilesystem::new();
        let connector = StaticConnector::new(fs.clone());
        let (tx, source) = ChannelSource::new();
        connector.push_source(source);
        let registry = Registry::new(std::sync::Arc::new(connector), POLL);

        tx.send(Ok(record("too late"))).unwrap();
        let name = registry.create(pipeline_config("orders"));
        assert!(registry.delete(&name));

        wait_until(|| registry.outstanding() == 0).await;
        assert!(fs.contents("/orders").is_none());
    }
}

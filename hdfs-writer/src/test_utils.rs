//! Helpers for driving pipelines without a Kafka broker or a namenode.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::fs::{Filesystem, MemoryFilesystem};
use crate::pipeline::{Connect, PipelineConfig, SetupError};
use crate::source::{Record, RecordSource, SourceError};

pub fn record(value: &str) -> Record {
    Record {
        key: None,
        value: Bytes::copy_from_slice(value.as_bytes()),
        partition: 0,
        offset: 0,
    }
}

/// A record source fed by an in-process channel.
pub struct ChannelSource {
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<Record, SourceError>>>,
}

impl ChannelSource {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (
        mpsc::UnboundedSender<Result<Record, SourceError>>,
        ChannelSource,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            ChannelSource {
                rx: tokio::sync::Mutex::new(rx),
            },
        )
    }
}

#[async_trait]
impl RecordSource for ChannelSource {
    async fn poll(&self, timeout: Duration) -> Result<Option<Record>, SourceError> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(Some(item)) => item.map(Some),
            Ok(None) => {
                // Sender dropped: behave like an idle topic instead of
                // spinning through instant empty polls.
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }

    async fn close(&self) {}
}

/// Connector that hands out queued sources in creation order and a shared
/// in-memory filesystem.
pub struct StaticConnector {
    fs: MemoryFilesystem,
    sources: Mutex<VecDeque<ChannelSource>>,
    pending_when_empty: bool,
}

impl StaticConnector {
    pub fn new(fs: MemoryFilesystem) -> Self {
        Self {
            fs,
            sources: Mutex::new(VecDeque::new()),
            pending_when_empty: false,
        }
    }

    /// With an empty queue, block setup forever instead of failing it.
    /// Useful for exercising the shutdown grace period.
    pub fn pending_when_empty(mut self) -> Self {
        self.pending_when_empty = true;
        self
    }

    pub fn push_source(&self, source: ChannelSource) {
        self.sources
            .lock()
            .expect("poisoned test connector lock")
            .push_back(source);
    }
}

#[async_trait]
impl Connect for StaticConnector {
    async fn source(&self, _config: &PipelineConfig) -> Result<Box<dyn RecordSource>, SetupError> {
        let source = self
            .sources
            .lock()
            .expect("poisoned test connector lock")
            .pop_front();
        match source {
            Some(source) => Ok(Box::new(source)),
            None if self.pending_when_empty => std::future::pending().await,
            None => Err(SetupError::Kafka(rdkafka::error::KafkaError::Subscription(
                "no test source queued".to_string(),
            ))),
        }
    }

    async fn filesystem(
        &self,
        _config: &PipelineConfig,
    ) -> Result<Arc<dyn Filesystem>, SetupError> {
        Ok(Arc::new(self.fs.clone()))
    }
}

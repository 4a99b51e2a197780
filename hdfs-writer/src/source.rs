use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientConfig, Message};
use thiserror::Error;
use tracing::{debug, info};

/// One inbound bus message. Consumed and discarded after the append attempt.
#[derive(Debug, Clone)]
pub struct Record {
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
}

impl SourceError {
    /// Only a fully unreachable cluster is fatal to the pipeline; the
    /// client recovers from everything else on its own.
    pub fn is_fatal(&self) -> bool {
        let SourceError::Kafka(err) = self;
        err.rdkafka_error_code() == Some(RDKafkaErrorCode::AllBrokersDown)
    }
}

/// A lazy, infinite sequence of inbound records, polled with a bounded
/// timeout so callers can interleave shutdown checks.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Returns `Ok(None)` when no record arrived within the timeout.
    async fn poll(&self, timeout: Duration) -> Result<Option<Record>, SourceError>;

    async fn close(&self);
}

pub struct KafkaRecordSource {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaRecordSource {
    pub fn new(
        broker: &str,
        group: &str,
        topic: &str,
        session_timeout_ms: u32,
        offset_reset: &str,
    ) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", broker)
            .set("group.id", group)
            .set("broker.address.family", "v4")
            .set("session.timeout.ms", session_timeout_ms.to_string())
            .set("auto.offset.reset", offset_reset)
            .create()?;
        consumer.subscribe(&[topic])?;

        Ok(Self {
            consumer,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl RecordSource for KafkaRecordSource {
    async fn poll(&self, timeout: Duration) -> Result<Option<Record>, SourceError> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(Err(err)) => Err(err.into()),
            Ok(Ok(message)) => {
                debug!(
                    topic = %self.topic,
                    partition = message.partition(),
                    offset = message.offset(),
                    "received record"
                );
                Ok(Some(Record {
                    key: message.key().map(Bytes::copy_from_slice),
                    value: message
                        .payload()
                        .map(Bytes::copy_from_slice)
                        .unwrap_or_default(),
                    partition: message.partition(),
                    offset: message.offset(),
                }))
            }
        }
    }

    async fn close(&self) {
        info!(topic = %self.topic, "unsubscribing consumer");
        self.consumer.unsubscribe();
    }
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::PipelineConfig;

/// Body of `POST /v1/writer`. Field names match the wire contract consumed
/// by the collectd operator, hence the camelCase sections.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateWriterRequest {
    #[serde(rename = "kafkaConfig")]
    pub kafka: KafkaSettings,
    #[serde(rename = "hdfsConfig")]
    pub hdfs: HdfsSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaSettings {
    pub broker: String,
    pub group: String,
    pub topic: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HdfsSettings {
    pub hdfs_url: String,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct WriterResponse {
    pub name: String,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ListWritersResponse {
    pub writers: Vec<String>,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("failed to parse request: {0}")]
    RequestParsingError(#[from] serde_json::Error),

    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("no writer named {0}")]
    WriterNotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::RequestParsingError(_) | ApiError::EmptyField(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ApiError::WriterNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
        }
        .into_response()
    }
}

impl CreateWriterRequest {
    /// Validates the request at the HTTP boundary; the registry assumes a
    /// well-formed config.
    pub fn into_config(self) -> Result<PipelineConfig, ApiError> {
        if self.kafka.broker.trim().is_empty() {
            return Err(ApiError::EmptyField("kafkaConfig.broker"));
        }
        if self.kafka.group.trim().is_empty() {
            return Err(ApiError::EmptyField("kafkaConfig.group"));
        }
        if self.kafka.topic.trim().is_empty() {
            return Err(ApiError::EmptyField("kafkaConfig.topic"));
        }
        if self.hdfs.hdfs_url.trim().is_empty() {
            return Err(ApiError::EmptyField("hdfsConfig.hdfs_url"));
        }

        Ok(PipelineConfig {
            broker: self.kafka.broker,
            group: self.kafka.group,
            topic: self.kafka.topic,
            hdfs_url: self.hdfs.hdfs_url,
        })
    }
}

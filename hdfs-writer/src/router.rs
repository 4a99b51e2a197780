use std::future::ready;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::api::{ApiError, CreateWriterRequest, ListWritersResponse, WriterResponse};
use crate::metrics::{setup_metrics_recorder, track_metrics};
use crate::registry::Registry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
}

async fn index() -> &'static str {
    "hdfs-writer"
}

pub fn router(registry: Registry, metrics: bool) -> Router {
    let state = AppState { registry };

    let router = Router::new()
        .route("/", get(index))
        .route("/_liveness", get(|| ready("ok")))
        .route("/v1/writer", post(create_writer))
        .route("/v1/writer/:name", delete(delete_writer))
        .route("/v1/writers", get(list_writers))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Don't install metrics unless asked to: installing a global recorder
    // when the crate is used as a library (during tests etc) does not work
    // well.
    if metrics {
        let recorder_handle = setup_metrics_recorder();
        router.route("/metrics", get(move || ready(recorder_handle.render())))
    } else {
        router
    }
}

async fn create_writer(
    State(state): State<AppState>,
    Json(request): Json<CreateWriterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let config = request.into_config()?;
    let name = state.registry.create(config);
    Ok((StatusCode::CREATED, Json(WriterResponse { name })))
}

async fn delete_writer(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<WriterResponse>, ApiError> {
    if state.registry.delete(&name) {
        Ok(Json(WriterResponse { name }))
    } else {
        Err(ApiError::WriterNotFound(name))
    }
}

async fn list_writers(State(state): State<AppState>) -> Json<ListWritersResponse> {
    Json(ListWritersResponse {
        writers: state.registry.list(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use http::header::CONTENT_TYPE;
    use http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::fs::MemoryFilesystem;
    use crate::test_utils::{ChannelSource, StaticConnector};

    fn test_router(queued_sources: usize) -> Router {
        let connector = StaticConnector::new(MemoryFilesystem::new());
        for _ in 0..queued_sources {
            let (_tx, source) = ChannelSource::new();
            connector.push_source(source);
        }
        let registry = Registry::new(Arc::new(connector), Duration::from_millis(20));
        router(registry, false)
    }

    fn create_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/writer")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request should build")
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body should collect")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("body should be json")
    }

    const VALID_BODY: &str = r#"{
        "kafkaConfig": {"broker": "b:9092", "group": "g1", "topic": "orders"},
        "hdfsConfig": {"hdfs_url": "http://namenode:9870"}
    }"#;

    #[tokio::test]
    async fn create_list_delete_round_trip() {
        let app = test_router(1);

        let response = app
            .clone()
            .oneshot(create_request(VALID_BODY))
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: crate::api::WriterResponse = body_json(response).await;
        assert!(created.name.starts_with("writer-"));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/v1/writers")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let list: crate::api::ListWritersResponse = body_json(response).await;
        assert_eq!(list.writers, vec![created.name.clone()]);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/v1/writer/{}", created.name))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/v1/writers")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let list: crate::api::ListWritersResponse = body_json(response).await;
        assert!(list.writers.is_empty());
    }

    #[tokio::test]
    async fn delete_of_unknown_writer_is_not_found() {
        let app = test_router(0);
        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/v1/writer/nonexistent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn blank_config_fields_are_rejected_before_the_registry() {
        let app = test_router(0);
        let body = r#"{
            "kafkaConfig": {"broker": "b:9092", "group": "g1", "topic": ""},
            "hdfsConfig": {"hdfs_url": "http://namenode:9870"}
        }"#;
        let response = app
            .clone()
            .oneshot(create_request(body))
            .await
            .expect("request should complete");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/writers")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let list: crate::api::ListWritersResponse = body_json(response).await;
        assert!(list.writers.is_empty());
    }

    #[tokio::test]
    async fn liveness_answers() {
        let app = test_router(0);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/_liveness")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

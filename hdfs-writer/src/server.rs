use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::pipeline::KafkaHdfsConnector;
use crate::registry::Registry;
use crate::router;

/// Serves the control plane until `shutdown` resolves, then signals every
/// pipeline and waits out the grace period before returning.
pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let connector = Arc::new(KafkaHdfsConnector::new(&config));
    let registry = Registry::new(connector, config.poll_timeout());

    let app = router::router(registry.clone(), config.export_prometheus);

    match listener.local_addr() {
        Ok(addr) => tracing::info!("listening on {addr}"),
        Err(err) => tracing::warn!("listening on unknown address: {err}"),
    }

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!("server error: {err}");
    }

    registry.shutdown(config.shutdown_grace()).await;
}

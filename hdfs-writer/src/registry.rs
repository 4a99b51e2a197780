use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::gauge;
use tokio::sync::{oneshot, Notify};
use tracing::{info, warn};
use uuid::Uuid;

use crate::pipeline::{Connect, PipelineConfig, Worker};

const NAME_PREFIX: &str = "writer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Active,
    Terminating,
}

/// Control handle for one running pipeline. The registry owns it; the
/// worker only ever sees the receiving half of the shutdown channel.
struct PipelineHandle {
    shutdown: Option<oneshot::Sender<()>>,
    state: PipelineState,
}

/// Shared between the registry and its workers, so a worker can always
/// deregister itself no matter how it exits.
pub(crate) struct RegistryState {
    pipelines: Mutex<HashMap<String, PipelineHandle>>,
    outstanding: AtomicUsize,
    drained: Notify,
}

impl RegistryState {
    fn new() -> Self {
        Self {
            pipelines: Mutex::new(HashMap::new()),
            outstanding: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    pub(crate) fn mark_terminating(&self, name: &str) {
        let mut pipelines = self.pipelines.lock().expect("poisoned registry lock");
        if let Some(handle) = pipelines.get_mut(name) {
            handle.state = PipelineState::Terminating;
        }
    }

    /// Called by every worker exactly once, on any exit path. Removing the
    /// entry is a no-op when a delete already removed it.
    pub(crate) fn finish(&self, name: &str) {
        {
            let mut pipelines = self.pipelines.lock().expect("poisoned registry lock");
            pipelines.remove(name);
        }
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        gauge!("writer_pipelines_active").decrement(1.0);
        self.drained.notify_one();
    }

    async fn wait_idle(&self) {
        loop {
            if self.outstanding.load(Ordering::Acquire) == 0 {
                return;
            }
            self.drained.notified().await;
        }
    }
}

/// In-memory directory of active pipelines. All state lives behind this
/// one lock; the process is rebuilt empty on restart.
#[derive(Clone)]
pub struct Registry {
    state: Arc<RegistryState>,
    connector: Arc<dyn Connect>,
    poll_timeout: Duration,
}

impl Registry {
    pub fn new(connector: Arc<dyn Connect>, poll_timeout: Duration) -> Self {
        Self {
            state: Arc::new(RegistryState::new()),
            connector,
            poll_timeout,
        }
    }

    /// Registers a new pipeline and starts its worker. The returned name is
    /// visible to `list` and `delete` before the worker has run at all.
    pub fn create(&self, config: PipelineConfig) -> String {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let name = {
            let mut pipelines = self.state.pipelines.lock().expect("poisoned registry lock");
            let name = loop {
                let candidate = generate_name();
                if !pipelines.contains_key(&candidate) {
                    break candidate;
                }
            };
            pipelines.insert(
                name.clone(),
                PipelineHandle {
                    shutdown: Some(shutdown_tx),
                    state: PipelineState::Active,
                },
            );
            self.state.outstanding.fetch_add(1, Ordering::AcqRel);
            name
        };
        gauge!("writer_pipelines_active").increment(1.0);

        info!(pipeline = %name, topic = %config.topic, "starting pipeline");
        let worker = Worker::new(
            name.clone(),
            config,
            self.state.clone(),
            self.poll_timeout,
        );
        tokio::spawn(worker.run(self.connector.clone(), shutdown_rx));

        name
    }

    /// Signals the named pipeline to stop and removes it from the registry
    /// immediately; the worker drains in the background. Returns false when
    /// no such pipeline exists.
    pub fn delete(&self, name: &str) -> bool {
        let handle = {
            let mut pipelines = self.state.pipelines.lock().expect("poisoned registry lock");
            pipelines.remove(name)
        };
        match handle {
            Some(mut handle) => {
                info!(pipeline = %name, "stopping pipeline");
                if let Some(shutdown) = handle.shutdown.take() {
                    // The worker may already be gone; a missed signal is fine.
                    let _ = shutdown.send(());
                }
                true
            }
            None => false,
        }
    }

    /// Snapshot of the currently registered pipeline names, in no
    /// particular order.
    pub fn list(&self) -> Vec<String> {
        let pipelines = self.state.pipelines.lock().expect("poisoned registry lock");
        pipelines.keys().cloned().collect()
    }

    pub fn state_of(&self, name: &str) -> Option<PipelineState> {
        let pipelines = self.state.pipelines.lock().expect("poisoned registry lock");
        pipelines.get(name).map(|handle| handle.state)
    }

    /// Workers that are still running or draining, including ones already
    /// removed from the directory by `delete`.
    pub fn outstanding(&self) -> usize {
        self.state.outstanding.load(Ordering::Acquire)
    }

    /// Signals every registered pipeline, then waits for all workers to
    /// drain. A wedged filesystem call must not block process exit, so the
    /// wait gives up after the grace period.
    pub async fn shutdown(&self, grace: Duration) {
        let handles: Vec<(String, PipelineHandle)> = {
            let mut pipelines = self.state.pipelines.lock().expect("poisoned registry lock");
            pipelines.drain().collect()
        };
        for (name, mut handle) in handles {
            info!(pipeline = %name, "signalling pipeline shutdown");
            if let Some(shutdown) = handle.shutdown.take() {
                let _ = shutdown.send(());
            }
        }

        if tokio::time::timeout(grace, self.state.wait_idle())
            .await
            .is_err()
        {
            warn!(
                outstanding = self.outstanding(),
                "grace period elapsed before all pipelines stopped"
            );
        }
    }
}

fn generate_name() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{NAME_PREFIX}-{}", &uuid[uuid.len() - 4..])
}

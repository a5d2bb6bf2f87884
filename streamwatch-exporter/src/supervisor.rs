//! Lifecycle of the polling workers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, info, warn};

use crate::api::VideoPlatformApi;
use crate::entity::StreamEntity;
use crate::registry::{RegistryError, SharedRegistry};
use crate::schema::{CHANNEL_INFO, LabelFamily};
use crate::worker::{PollCadence, StreamPoller};

/// Builds the API handle a stream's poller talks to.
pub type ApiFactory = Arc<dyn Fn(&StreamEntity) -> Arc<dyn VideoPlatformApi> + Send + Sync>;

/// Factory handing the same API handle to every stream.
pub fn shared_api(api: Arc<dyn VideoPlatformApi>) -> ApiFactory {
    Arc::new(move |_: &StreamEntity| api.clone())
}

/// A spawned worker and the stream it polls.
struct WorkerHandle {
    stream: String,
    /// The poller itself.
    poller: AbortHandle,
    /// Waits for the poller and logs how it exited.
    task: JoinHandle<()>,
}

/// Starts one [`StreamPoller`] per stream and stops them on shutdown.
///
/// Workers are never restarted. A worker that fails or panics is logged and
/// left stopped; its siblings keep running.
pub struct Supervisor {
    registry: SharedRegistry,
    api_for: ApiFactory,
    cadence: PollCadence,
    stagger: Duration,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<WorkerHandle>,
}

impl Supervisor {
    pub fn new(
        registry: SharedRegistry,
        api_for: ApiFactory,
        cadence: PollCadence,
        stagger: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            registry,
            api_for,
            cadence,
            stagger,
            shutdown_tx,
            workers: Vec::new(),
        }
    }

    /// Number of workers started so far.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Register every stream and start its worker, `stagger` apart.
    pub async fn start(&mut self, entities: Vec<StreamEntity>) -> Result<(), RegistryError> {
        let total = entities.len();
        for (i, entity) in entities.into_iter().enumerate() {
            if i > 0 && !self.stagger.is_zero() {
                tokio::time::sleep(self.stagger).await;
            }
            self.start_stream(entity)?;
        }

        info!(workers = total, "All stream pollers started");
        Ok(())
    }

    /// Register a single stream, record its channel snapshot and spawn its worker.
    pub fn start_stream(&mut self, entity: StreamEntity) -> Result<(), RegistryError> {
        self.registry.register_stream(&entity)?;

        let mut snapshot = BTreeMap::new();
        snapshot.insert("stream_name".to_string(), entity.stream_name.clone());
        snapshot.insert("environment".to_string(), entity.environment.clone());
        self.registry.record_info(
            CHANNEL_INFO,
            &entity.labels(LabelFamily::ChannelInfo),
            snapshot,
        )?;

        let stream = entity.stream_name.clone();
        let api = (self.api_for)(&entity);
        let poller = StreamPoller::new(
            entity,
            api,
            self.registry.clone(),
            self.cadence,
        );
        let inner = tokio::spawn(poller.run(self.shutdown_tx.subscribe()));
        let poller = inner.abort_handle();

        let name = stream.clone();
        let task = tokio::spawn(async move {
            match inner.await {
                Ok(Ok(())) => info!(stream = %name, "Worker exited"),
                Ok(Err(e)) => error!(stream = %name, error = %e, "Worker failed"),
                Err(e) if e.is_panic() => error!(stream = %name, "Worker panicked"),
                Err(e) => warn!(stream = %name, error = %e, "Worker cancelled"),
            }
        });

        info!(stream = %stream, "Started stream poller");
        self.workers.push(WorkerHandle {
            stream,
            poller,
            task,
        });
        Ok(())
    }

    /// Signal every worker to stop and wait up to `timeout` for them.
    ///
    /// Workers still running after the timeout are aborted.
    pub async fn shutdown(self, timeout: Duration) {
        info!(workers = self.workers.len(), "Stopping stream pollers");
        // No receivers left is fine: every worker has already exited
        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + timeout;
        for worker in self.workers {
            if tokio::time::timeout_at(deadline, worker.task).await.is_err() {
                warn!(stream = %worker.stream, "Worker did not stop in time, aborting");
                worker.poller.abort();
            }
        }

        info!("All stream pollers stopped");
    }
}

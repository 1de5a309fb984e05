use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::dispatch::cancel::{cancel_pair, CancelHandle, CancelToken};

#[derive(thiserror::Error, Debug)]
#[error("The service is shutting down and does not accept new dispatch runs.")]
pub struct ShuttingDown;

/// Starts dispatch runs on a runtime that outlives the HTTP workers, so stopping a worker
/// never drops a run in the middle of an SMTP transaction.
#[derive(Clone)]
pub struct RunLauncher {
    runtime: Handle,
    cancel: CancelToken,
    in_flight: Arc<RwLock<()>>,
}

/// Shuts a [`RunLauncher`] down: cancels every run and waits until they have all returned.
pub struct RunDrain {
    cancel: CancelHandle,
    in_flight: Arc<RwLock<()>>,
}

pub fn run_launcher(runtime: Handle) -> (RunLauncher, RunDrain) {
    let (cancel_handle, cancel) = cancel_pair();
    let in_flight = Arc::new(RwLock::new(()));

    (
        RunLauncher {
            runtime,
            cancel,
            in_flight: in_flight.clone(),
        },
        RunDrain {
            cancel: cancel_handle,
            in_flight,
        },
    )
}

impl RunLauncher {
    /// Spawns `run` with the shared cancellation token. Refused once draining has started.
    pub fn launch<F, Fut>(&self, run: F) -> Result<JoinHandle<Fut::Output>, ShuttingDown>
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(ShuttingDown);
        }

        // Each run holds a read guard; draining takes the write lock.
        let guard = self
            .in_flight
            .clone()
            .try_read_owned()
            .map_err(|_| ShuttingDown)?;
        let run = run(self.cancel.clone());

        Ok(self.runtime.spawn(async move {
            let output = run.await;
            drop(guard);
            output
        }))
    }
}

impl RunDrain {
    #[tracing::instrument(name = "Drain dispatch runs", skip(self))]
    pub async fn drain(self) {
        self.cancel.cancel();
        drop(self.in_flight.write().await);

        tracing::info!("Every dispatch run has stopped");
    }
}

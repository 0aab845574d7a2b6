use std::future::Future;

use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tracing::{warn, Instrument};

/// A long-lived background task with a cooperative shutdown signal.
pub struct Worker {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Spawns `body` on the current runtime inside a span named after the
    /// worker. `body` must return once the receiver reports a change.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, receiver) = watch::channel(false);
        let span = tracing::info_span!("worker", name);
        let handle = tokio::spawn(body(receiver).instrument(span));
        Self {
            name,
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Signals shutdown and waits for the task to return. Later calls
    /// return immediately.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(worker = self.name, "worker ended abnormally: {err}");
            }
        }
    }
}

/// Resolves once shutdown has been requested. A dropped sender counts as a
/// request too.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

//! Background delivery of intruder notifications.
//!
//! The monitor loop must never block on the network, so notifications are queued
//! on a bounded channel and sent from a dedicated thread.

use sentinel_core::Notifier;
use std::io;
use std::path::PathBuf;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

/// Clone-safe sender side of the notifier queue.
#[derive(Clone)]
pub struct NotifierHandle {
    tx: mpsc::Sender<PathBuf>,
}

impl NotifierHandle {
    /// Queue `evidence` for delivery. Returns false if the queue is full or the
    /// worker is gone; the notification is dropped in that case.
    pub fn dispatch(&self, evidence: PathBuf) -> bool {
        match self.tx.try_send(evidence) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(path)) => {
                tracing::warn!(path = %path.display(), "notifier queue full; notification dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(path)) => {
                tracing::warn!(path = %path.display(), "notifier stopped; notification dropped");
                false
            }
        }
    }
}

pub struct NotifierWorker {
    handle: NotifierHandle,
    worker: JoinHandle<()>,
}

impl NotifierWorker {
    /// Start the delivery thread. `make` runs on that thread, so notifiers that
    /// own blocking HTTP clients are built and dropped outside the async runtime.
    pub fn spawn<N, F>(make: F, capacity: usize) -> io::Result<Self>
    where
        N: Notifier + 'static,
        F: FnOnce() -> N + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<PathBuf>(capacity.max(1));

        let worker = std::thread::Builder::new()
            .name("sentinel-notifier".into())
            .spawn(move || {
                let notifier = make();
                tracing::info!("notifier thread started");

                while let Some(path) = rx.blocking_recv() {
                    match notifier.notify(&path) {
                        Ok(true) => tracing::info!(path = %path.display(), "notification delivered"),
                        Ok(false) => tracing::debug!(path = %path.display(), "notification skipped"),
                        Err(e) => tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "notification delivery failed"
                        ),
                    }
                }

                tracing::info!("notifier thread exiting");
            })?;

        Ok(Self {
            handle: NotifierHandle { tx },
            worker,
        })
    }

    pub fn handle(&self) -> NotifierHandle {
        self.handle.clone()
    }

    /// Close the queue and wait for queued notifications to drain.
    ///
    /// Returns once every handle clone has been dropped and the backlog is sent.
    pub fn shutdown(self) {
        drop(self.handle);
        if self.worker.join().is_err() {
            tracing::error!("notifier thread panicked");
        }
    }
}

//! Cooperative termination.
//!
//! `SIGINT`/`SIGTERM` only enqueue a request; the dispatcher picks it up between handlers.
use anyhow::{Context, Result};

/// Sending half, held by the signal handler (or a test).
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: flume::Sender<()>,
}

impl ShutdownHandle {
    /// Request termination. Extra requests are harmless.
    pub fn request(&self) {
        let _ = self.sender.try_send(());
    }
}

/// Receiving half, observed by the dispatcher.
#[derive(Debug)]
pub struct ShutdownSignal {
    receiver: flume::Receiver<()>,
}

impl ShutdownSignal {
    /// Resolves on the first termination request.
    ///
    /// If every [`ShutdownHandle`] is dropped nobody can ask for termination any more, so the
    /// future then stays pending instead of reporting a phantom request.
    pub async fn requested(&self) {
        if self.receiver.recv_async().await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    pub fn is_requested(&self) -> bool {
        !self.receiver.is_empty()
    }
}

pub fn shutdown_channel() -> (ShutdownHandle, ShutdownSignal) {
    let (sender, receiver) = flume::bounded(1);
    (ShutdownHandle { sender }, ShutdownSignal { receiver })
}

/// Route `SIGINT` and `SIGTERM` into a new shutdown channel.
pub fn install_signal_handlers() -> Result<ShutdownSignal> {
    let (handle, signal) = shutdown_channel();
    ctrlc::set_handler(move || {
        log::info!("Termination signal received, shutting down");
        handle.request();
    })
    .context("Failed to install SIGINT/SIGTERM handler")?;
    Ok(signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn test_request_is_observed() {
        let (handle, signal) = shutdown_channel();
        assert!(!signal.is_requested());

        handle.request();
        handle.request();
        assert!(signal.is_requested());

        let mut requested = task::spawn(signal.requested());
        assert_ready!(requested.poll());
    }

    #[tokio::test]
    async fn test_dropped_handle_is_not_a_request() {
        let (handle, signal) = shutdown_channel();
        drop(handle);

        let mut requested = task::spawn(signal.requested());
        assert_pending!(requested.poll());
    }
}

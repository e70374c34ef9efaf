//! Server-wide cancellation signal

use tokio::sync::watch;

/// Owning side of the shutdown signal
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

/// Observer side of the shutdown signal, cheap to clone per session
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Create an untriggered signal
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Trigger shutdown for every subscriber, including future ones
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Check whether shutdown has been triggered
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribe to the signal
    #[must_use]
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    /// Non-blocking check
    ///
    /// A dropped [`Shutdown`] counts as triggered.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Wait until shutdown is triggered
    pub async fn triggered(&mut self) {
        // Err means the sender is gone, which is shutdown as well
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

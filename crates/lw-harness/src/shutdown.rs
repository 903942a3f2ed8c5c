use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// ShutdownSignal
// ---------------------------------------------------------------------------

/// Cooperative stop signal for one activation of the live-mode pipeline.
///
/// Background units take a [`ShutdownListener`] and `select!` on
/// [`ShutdownListener::wait`] next to their work. Unlike a broadcast, the
/// triggered state is sticky: a listener created after `trigger()` still
/// observes it, so a task that starts late cannot miss the stop.
///
/// Units that must finish cleanup before the owner moves on hold a
/// [`ShutdownGuard`]; the owner calls [`ShutdownSignal::wait_for_drain`] with a
/// short deadline.
///
/// ```ignore
/// let shutdown = ShutdownSignal::new();
/// let mut stop = shutdown.listener();
///
/// tokio::select! {
///     _ = stop.wait() => { /* release resources */ }
///     _ = do_work() => {}
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    triggered: std::sync::Arc<watch::Sender<bool>>,
    drained: std::sync::Arc<watch::Sender<usize>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (triggered, _) = watch::channel(false);
        let (drained, _) = watch::channel(0);
        Self {
            triggered: std::sync::Arc::new(triggered),
            drained: std::sync::Arc::new(drained),
        }
    }

    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.triggered.subscribe(),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.triggered.borrow()
    }

    /// Trigger shutdown. Returns `false` if it was already triggered.
    pub fn trigger(&self) -> bool {
        let first = self.triggered.send_if_modified(|flag| {
            if *flag {
                false
            } else {
                *flag = true;
                true
            }
        });
        if first {
            info!("shutdown signal triggered");
        } else {
            debug!("shutdown already triggered");
        }
        first
    }

    /// Hand out a guard that counts as drained when dropped.
    pub fn guard(&self) -> ShutdownGuard {
        ShutdownGuard {
            drained: std::sync::Arc::clone(&self.drained),
        }
    }

    /// Wait until `expected` guards have been dropped, or `timeout` passes.
    pub async fn wait_for_drain(&self, expected: usize, timeout: Duration) -> DrainResult {
        let mut rx = self.drained.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let current = *rx.borrow_and_update();
            if current >= expected {
                return DrainResult::Complete(current);
            }
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return DrainResult::Complete(*rx.borrow()),
                Err(_) => {
                    let confirmed = *rx.borrow();
                    warn!(confirmed, expected, "drain deadline passed");
                    return DrainResult::Timeout {
                        confirmed,
                        expected,
                    };
                }
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ShutdownListener
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Resolves once shutdown has been triggered (immediately if it already
    /// was). Also resolves if the signal itself is dropped.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|flag| *flag).await;
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}

// ---------------------------------------------------------------------------
// DrainResult / ShutdownGuard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainResult {
    Complete(usize),
    Timeout { confirmed: usize, expected: usize },
}

impl DrainResult {
    pub fn is_complete(&self) -> bool {
        matches!(self, DrainResult::Complete(_))
    }
}

/// Confirms drain when dropped.
#[derive(Debug)]
pub struct ShutdownGuard {
    drained: std::sync::Arc<watch::Sender<usize>>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.drained.send_modify(|count| *count += 1);
    }
}

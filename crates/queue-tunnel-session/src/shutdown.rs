//! Cooperative cancellation shared by the loops of a session.

use std::{sync::Arc, time::Duration};

use tokio::sync::watch;

/// Clonable one-way shutdown flag.
///
/// Once triggered it stays triggered. Any clone can trigger it and every
/// clone observes it.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this cannot fail.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }

    /// Sleep for `duration`, returning early with `true` if shutdown is
    /// requested in the meantime.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.wait() => true,
            () = tokio::time::sleep(duration) => self.is_triggered(),
        }
    }

    /// A flag that is triggered along with this one but can also be
    /// triggered on its own without affecting this one.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn child(&self) -> Self {
        let child = Self::new();
        let parent = self.clone();
        let linked = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = parent.wait() => linked.trigger(),
                () = linked.wait() => {}
            }
        });
        child
    }

    /// Guard that triggers shutdown when dropped, including on panic.
    #[must_use]
    pub fn trigger_on_drop(&self) -> TriggerOnDrop {
        TriggerOnDrop(self.clone())
    }

    /// Trigger on SIGINT, and on SIGTERM where supported.
    ///
    /// The handlers are installed before this returns. Must be called from
    /// within a tokio runtime.
    ///
    /// # Errors
    /// Returns error if a signal handler cannot be registered.
    #[cfg(unix)]
    pub fn trigger_on_signals(&self) -> std::io::Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let shutdown = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = interrupt.recv() => {
                    tracing::info!("SIGINT received, shutting down");
                    shutdown.trigger();
                }
                _ = terminate.recv() => {
                    tracing::info!("SIGTERM received, shutting down");
                    shutdown.trigger();
                }
                () = shutdown.wait() => {}
            }
        });
        Ok(())
    }

    /// Trigger on ctrl-c.
    ///
    /// # Errors
    /// Never fails on this platform.
    #[cfg(not(unix))]
    pub fn trigger_on_signals(&self) -> std::io::Result<()> {
        let shutdown = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::warn!("Cannot listen for ctrl-c: {e}");
                        return;
                    }
                    tracing::info!("Ctrl-c received, shutting down");
                    shutdown.trigger();
                }
                () = shutdown.wait() => {}
            }
        });
        Ok(())
    }
}

/// Triggers its shutdown flag when dropped.
#[derive(Debug)]
pub struct TriggerOnDrop(Shutdown);

impl Drop for TriggerOnDrop {
    fn drop(&mut self) {
        self.0.trigger();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_is_seen_by_clones() {
        let shutdown = Shutdown::new();
        let clone = shutdown.clone();
        assert!(!clone.is_triggered());

        let waiter = tokio::spawn(async move { clone.wait().await });
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_sleep_returns_early() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.sleep(Duration::from_millis(5)).await);

        shutdown.trigger();
        assert!(shutdown.sleep(Duration::from_secs(3600)).await);
    }

    #[tokio::test]
    async fn test_child_follows_parent_only_downwards() {
        let parent = Shutdown::new();
        let child = parent.child();
        child.trigger();
        assert!(!parent.is_triggered());

        let parent = Shutdown::new();
        let child = parent.child();
        parent.trigger();
        tokio::time::timeout(Duration::from_secs(1), child.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_trigger_on_drop() {
        let shutdown = Shutdown::new();
        {
            let _guard = shutdown.trigger_on_drop();
        }
        assert!(shutdown.is_triggered());
    }
}

//! Foreground/background signal for the host application.
//!
//! Hosts flip the monitor when their window or app is hidden; the manager
//! pauses the socket while hidden and resumes it when visible again.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

#[derive(Debug, Clone)]
pub struct VisibilityMonitor {
    tx: Arc<watch::Sender<Visibility>>,
}

impl VisibilityMonitor {
    pub fn new() -> Self {
        Self::starting(Visibility::Visible)
    }

    pub fn starting(initial: Visibility) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Publish `visibility`; observers are only woken on an actual change.
    pub fn set(&self, visibility: Visibility) {
        self.tx.send_if_modified(|current| {
            if *current == visibility {
                false
            } else {
                *current = visibility;
                true
            }
        });
    }

    pub fn hide(&self) {
        self.set(Visibility::Hidden);
    }

    pub fn show(&self) {
        self.set(Visibility::Visible);
    }

    pub fn current(&self) -> Visibility {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Visibility> {
        self.tx.subscribe()
    }
}

impl Default for VisibilityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

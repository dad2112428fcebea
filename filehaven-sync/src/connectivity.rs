//! Connectivity signal.
//!
//! The platform layer (mobile or desktop shell) owns a
//! [`ConnectivityMonitor`] and flips it as the network comes and goes.
//! Engine components hold [`ConnectivitySignal`] subscriptions: the
//! retry scheduler gates its periodic drain on it and wakes immediately
//! on the offline→online edge.

use tokio::sync::watch;

/// Publisher side of the connectivity state.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    /// Creates a monitor with the given initial state.
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    /// Publishes a connectivity change. Subscribers observing the
    /// offline→online edge wake immediately.
    pub fn set_online(&self, online: bool) {
        // send_replace never fails even with no live subscribers.
        self.tx.send_replace(online);
    }

    /// Current state.
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Creates a new subscription.
    #[must_use]
    pub fn subscribe(&self) -> ConnectivitySignal {
        ConnectivitySignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Subscriber side of the connectivity state.
#[derive(Debug, Clone)]
pub struct ConnectivitySignal {
    rx: watch::Receiver<bool>,
}

impl ConnectivitySignal {
    /// Current state.
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.rx.borrow()
    }

    /// Waits for the next state change. Returns the new state, or
    /// `None` if the monitor was dropped.
    pub async fn changed(&mut self) -> Option<bool> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    /// Waits until the state is online, returning immediately if it
    /// already is. Returns `false` if the monitor was dropped first.
    pub async fn wait_for_online(&mut self) -> bool {
        loop {
            if *self.rx.borrow_and_update() {
                return true;
            }
            if self.rx.changed().await.is_err() {
                return false;
            }
        }
    }
}

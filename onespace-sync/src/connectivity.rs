//! Online/offline signal consumed by the replication engine.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Reports network presence changes. Cheap to clone.
#[derive(Clone)]
pub struct ConnectivityReporter {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityReporter {
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
        if changed {
            info!(online, "connectivity changed");
        }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Creates a connectivity reporter and the receiver the engine watches.
pub fn connectivity_channel(initially_online: bool) -> (ConnectivityReporter, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(initially_online);
    (ConnectivityReporter { tx: Arc::new(tx) }, rx)
}

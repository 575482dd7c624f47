use std::sync::Arc;
use tokio::sync::watch;

/// Online/offline state reported by the host environment.
///
/// Cheap to clone; all clones share one channel. Listeners obtained through
/// [`ConnectivityMonitor::subscribe`] see every transition.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    sender: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (sender, _) = watch::channel(initially_online);
        Self { sender: Arc::new(sender) }
    }

    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Record the current state. Returns true when this was a transition.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            if online {
                log::info!("Connectivity restored");
            } else {
                log::warn!("Connectivity lost, mutations will queue locally");
            }
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_only_on_change() {
        let monitor = ConnectivityMonitor::new(false);
        assert!(!monitor.is_online());
        assert!(!monitor.set_online(false));
        assert!(monitor.set_online(true));
        assert!(monitor.is_online());
        assert!(!monitor.set_online(true));
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe();
        let clone = monitor.clone();

        clone.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());

        // Repeating the same state does not wake listeners.
        clone.set_online(true);
        assert!(!rx.has_changed().unwrap());
    }
}

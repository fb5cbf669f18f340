use tokio::sync::broadcast;
use tracker_core::notify::{Notifier, TransitionEvent};

/// Publishes transition events to SSE subscribers.
///
/// Sending never blocks; with no subscribers the event is simply dropped.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<TransitionEvent>,
}

impl BroadcastNotifier {
    pub fn new(tx: broadcast::Sender<TransitionEvent>) -> Self {
        Self { tx }
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, event: &TransitionEvent) {
        let _ = self.tx.send(event.clone());
    }
}

//! Progress observers
//!
//! The engine reports every state change and chunk acknowledgement to a
//! [`ProgressObserver`]. An observer can ask the engine to stop; the request
//! takes effect between chunks, never in the middle of a request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use ulman_types::TransferEvent;

/// What the engine should do after reporting an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverAction {
    Continue,
    Cancel,
}

/// Receives transfer events
pub trait ProgressObserver: Send + Sync {
    fn on_event(&self, event: &TransferEvent) -> ObserverAction;
}

impl<F> ProgressObserver for F
where
    F: Fn(&TransferEvent) -> ObserverAction + Send + Sync,
{
    fn on_event(&self, event: &TransferEvent) -> ObserverAction {
        self(event)
    }
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_event(&self, _event: &TransferEvent) -> ObserverAction {
        ObserverAction::Continue
    }
}

/// Forwards events to a broadcast channel and cancels once `cancelled` is set
#[derive(Clone)]
pub struct BroadcastObserver {
    event_tx: broadcast::Sender<TransferEvent>,
    cancelled: Arc<AtomicBool>,
}

impl BroadcastObserver {
    pub fn new(event_tx: broadcast::Sender<TransferEvent>, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            event_tx,
            cancelled,
        }
    }
}

impl ProgressObserver for BroadcastObserver {
    fn on_event(&self, event: &TransferEvent) -> ObserverAction {
        // No subscribers is fine
        let _ = self.event_tx.send(event.clone());

        if self.cancelled.load(Ordering::Acquire) {
            ObserverAction::Cancel
        } else {
            ObserverAction::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulman_types::TransferState;

    fn state_event() -> TransferEvent {
        TransferEvent::StateChanged {
            session_id: "s".into(),
            state: TransferState::Transferring,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_broadcast_observer_forwards_and_cancels() {
        let (tx, mut rx) = broadcast::channel(8);
        let cancelled = Arc::new(AtomicBool::new(false));
        let observer = BroadcastObserver::new(tx, cancelled.clone());

        assert_eq!(observer.on_event(&state_event()), ObserverAction::Continue);
        assert!(matches!(
            rx.recv().await.unwrap(),
            TransferEvent::StateChanged { .. }
        ));

        cancelled.store(true, Ordering::Release);
        assert_eq!(observer.on_event(&state_event()), ObserverAction::Cancel);
    }

    #[test]
    fn test_closure_observer() {
        let observer = |_: &TransferEvent| ObserverAction::Cancel;
        assert_eq!(observer.on_event(&state_event()), ObserverAction::Cancel);
        assert_eq!(NoopObserver.on_event(&state_event()), ObserverAction::Continue);
    }
}

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::entities::contribution::ContributionKind;
use crate::entities::memorial_flag::{FlagStatus, FlagType};

/// Sender half of the best-effort side-effect queue.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Queues an event without waiting, logging instead of failing. Used
    /// after commits, where the state change must not be reported as an
    /// error and the response must not wait on a slow worker.
    pub fn send_or_log(&self, event: Event) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(?event, "event queue full, event dropped");
            }
            Err(TrySendError::Closed(event)) => {
                warn!(?event, "event channel closed, event dropped");
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ContributionPublished {
        contribution_id: Uuid,
        memorial_id: Uuid,
        kind: ContributionKind,
        paid: bool,
    },
    CheckoutSessionCreated {
        contribution_id: Uuid,
        session_id: String,
    },
    /// A payment arrived that no longer settles anything and must be refunded.
    PaymentNeedsRefund {
        contribution_id: Uuid,
        session_id: String,
        value_minor: i64,
    },
    FlagRaised {
        flag_id: Uuid,
        flag_type: FlagType,
        memorial_id: Uuid,
        reference_id: Uuid,
        actor_id: Uuid,
        addressee: Option<Uuid>,
        redirect_url: Option<String>,
    },
    FlagResolved {
        flag_id: Uuid,
        flag_type: FlagType,
        reference_id: Uuid,
        actor_id: Uuid,
        resolved_by: Uuid,
        status: FlagStatus,
        redirect_url: Option<String>,
    },
}

#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Drains the channel and hands every event to each handler in turn.
/// Handler failures are logged and never stop the loop.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!(handlers = handlers.len(), "Starting event processing loop");

    while let Some(event) = rx.recv().await {
        debug!(?event, "Received event");
        for handler in &handlers {
            if let Err(e) = handler.handle_event(&event).await {
                error!(?event, error = %e, "event handler failed");
            }
        }
    }

    info!("Event channel closed, stopping event processing loop");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Event>>,
    }

    #[async_trait::async_trait]
    impl EventHandler for Recorder {
        async fn handle_event(&self, event: &Event) -> Result<(), String> {
            self.seen.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl EventHandler for Failing {
        async fn handle_event(&self, _event: &Event) -> Result<(), String> {
            Err("boom".into())
        }
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_others() {
        let (tx, rx) = mpsc::channel(8);
        let recorder = Arc::new(Recorder::default());
        let handlers: Vec<Arc<dyn EventHandler>> = vec![Arc::new(Failing), recorder.clone()];
        let worker = tokio::spawn(process_events(rx, handlers));

        let sender = EventSender::new(tx);
        let event = Event::CheckoutSessionCreated {
            contribution_id: Uuid::new_v4(),
            session_id: "cs_1".into(),
        };
        sender.send_or_log(event.clone());
        drop(sender);
        worker.await.unwrap();

        assert_eq!(recorder.seen.lock().unwrap().as_slice(), &[event]);
    }

    #[tokio::test]
    async fn send_or_log_never_waits() {
        let (tx, mut rx) = mpsc::channel(1);
        let sender = EventSender::new(tx);
        let event = |n: u32| Event::CheckoutSessionCreated {
            contribution_id: Uuid::new_v4(),
            session_id: format!("cs_{}", n),
        };

        let first = event(1);
        sender.send_or_log(first.clone());
        // the queue is full; this one is dropped instead of blocking
        sender.send_or_log(event(2));
        assert_eq!(rx.try_recv().unwrap(), first);
        assert!(rx.try_recv().is_err());

        drop(rx);
        sender.send_or_log(event(3));
    }
}

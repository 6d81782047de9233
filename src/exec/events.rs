// src/exec/events.rs

use tokio::sync::{broadcast, mpsc};

use crate::progress::ProgressEvent;
use crate::types::InvocationId;

use super::result::ExecutionResult;

/// Everything a subscriber can observe about one invocation.
///
/// `Completed` is always the last event for a given id.
#[derive(Debug, Clone)]
pub enum InvocationEvent {
    Progress(ProgressEvent),
    Phase { id: InvocationId, label: String },
    Completed(ExecutionResult),
}

impl InvocationEvent {
    pub fn id(&self) -> &InvocationId {
        match self {
            InvocationEvent::Progress(p) => &p.id,
            InvocationEvent::Phase { id, .. } => id,
            InvocationEvent::Completed(r) => &r.id,
        }
    }
}

/// Publishes events for one invocation to its own handle and to the
/// supervisor-wide broadcast channel.
///
/// Neither side is required to be listening.
#[derive(Debug, Clone)]
pub struct EventSink {
    local: mpsc::UnboundedSender<InvocationEvent>,
    fanout: broadcast::Sender<InvocationEvent>,
}

impl EventSink {
    pub fn new(
        local: mpsc::UnboundedSender<InvocationEvent>,
        fanout: broadcast::Sender<InvocationEvent>,
    ) -> Self {
        Self { local, fanout }
    }

    pub fn publish(&self, event: InvocationEvent) {
        // No receiver is a normal situation for both channels.
        let _ = self.fanout.send(event.clone());
        let _ = self.local.send(event);
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = InvocationEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

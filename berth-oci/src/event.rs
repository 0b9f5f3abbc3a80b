use bollard::query_parameters::EventsOptions;
use bollard::secret::{EventMessage, EventMessageTypeEnum};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use super::Client;
use super::runtime::EventStream;

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Which kind of engine object an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Container,
    Image,
    Network,
    Volume,
    Other,
}

/// A single event from the engine's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEvent {
    pub kind: EventKind,
    pub action: String,
    pub actor_id: String,
    /// Unix timestamp of the event, as reported by the engine.
    pub timestamp: i64,
}

impl From<EventMessage> for RuntimeEvent {
    fn from(message: EventMessage) -> Self {
        let kind = match message.typ {
            Some(EventMessageTypeEnum::CONTAINER) => EventKind::Container,
            Some(EventMessageTypeEnum::IMAGE) => EventKind::Image,
            Some(EventMessageTypeEnum::NETWORK) => EventKind::Network,
            Some(EventMessageTypeEnum::VOLUME) => EventKind::Volume,
            _ => EventKind::Other,
        };

        Self {
            kind,
            action: message.action.unwrap_or_default(),
            actor_id: message.actor.and_then(|a| a.id).unwrap_or_default(),
            timestamp: message.time.unwrap_or_default(),
        }
    }
}

impl Client {
    /// Subscribe to the engine's event stream.
    ///
    /// The stream ends when the engine connection is lost; consumers should
    /// treat that as fatal.
    pub fn subscribe(&self) -> EventStream {
        let docker = self.inner().clone();
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut events = docker.events(None::<EventsOptions>);
            while let Some(result) = events.next().await {
                match result {
                    Ok(message) => {
                        if tx.send(RuntimeEvent::from(message)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("engine event stream failed: {e}");
                        break;
                    }
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }
}

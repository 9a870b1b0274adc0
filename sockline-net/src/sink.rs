//! Channel-backed [`Handler`]: payloads and lifecycle events land on bounded queues.

use sockline_core::{Event, Handler, Message, PeerId};
use tokio::sync::mpsc;

/// Forwards into optional bounded queues. A full queue makes the sending read loop
/// wait; a missing or closed queue drops the value with a warning.
#[derive(Debug, Clone, Default)]
pub struct ChannelSink {
    messages: Option<mpsc::Sender<Message>>,
    events: Option<mpsc::Sender<Event>>,
}

impl ChannelSink {
    pub fn new(messages: Option<mpsc::Sender<Message>>, events: Option<mpsc::Sender<Event>>) -> Self {
        Self { messages, events }
    }

    /// Sink plus both receivers, each queue holding up to `capacity` values (at least one).
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Message>, mpsc::Receiver<Event>) {
        let capacity = capacity.max(1);
        let (msg_tx, msg_rx) = mpsc::channel(capacity);
        let (ev_tx, ev_rx) = mpsc::channel(capacity);
        (Self::new(Some(msg_tx), Some(ev_tx)), msg_rx, ev_rx)
    }

    async fn push_event(&self, event: Event) {
        let Some(tx) = &self.events else {
            tracing::warn!(peer = %event.id, kind = ?event.kind, "no event queue, dropping event");
            return;
        };
        if tx.send(event).await.is_err() {
            tracing::warn!(peer = %event.id, kind = ?event.kind, "event queue closed, dropping event");
        }
    }
}

impl Handler for ChannelSink {
    async fn connected(&self, id: PeerId) {
        tracing::trace!(peer = %id, "connected");
        self.push_event(Event::connected(id)).await;
    }

    async fn received(&self, id: PeerId, payload: Vec<u8>) {
        let Some(tx) = &self.messages else {
            tracing::warn!(peer = %id, len = payload.len(), "no message queue, dropping message");
            return;
        };
        let len = payload.len();
        if tx.send(Message { id, content: payload }).await.is_err() {
            tracing::warn!(peer = %id, len, "message queue closed, dropping message");
        }
    }

    async fn disconnected(&self, id: PeerId) {
        tracing::trace!(peer = %id, "disconnected");
        self.push_event(Event::disconnected(id)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use sockline_core::EventKind;

    #[tokio::test]
    async fn forwards_messages_and_events() {
        let (sink, mut messages, mut events) = ChannelSink::channel(4);
        sink.connected(PeerId(2)).await;
        sink.received(PeerId(2), b"hi".to_vec()).await;
        sink.disconnected(PeerId(2)).await;

        assert_eq!(events.recv().await.unwrap(), Event::connected(PeerId(2)));
        assert_eq!(
            messages.recv().await.unwrap(),
            Message {
                id: PeerId(2),
                content: b"hi".to_vec()
            }
        );
        assert_eq!(events.recv().await.unwrap().kind, EventKind::Disconnected);
    }

    #[tokio::test]
    async fn missing_and_closed_queues_drop_without_waiting() {
        let sink = ChannelSink::default();
        let missing = async {
            sink.received(PeerId(1), b"lost".to_vec()).await;
            sink.connected(PeerId(1)).await;
        };
        assert!(tokio::time::timeout(Duration::from_secs(1), missing).await.is_ok());

        // capacity 1 and already full: only a closed receiver lets these return
        let (sink, messages, events) = ChannelSink::channel(1);
        sink.received(PeerId(1), b"first".to_vec()).await;
        sink.connected(PeerId(1)).await;
        drop(messages);
        drop(events);
        let closed = async {
            sink.received(PeerId(1), b"lost".to_vec()).await;
            sink.disconnected(PeerId(1)).await;
        };
        assert!(tokio::time::timeout(Duration::from_secs(1), closed).await.is_ok());
    }

    #[tokio::test]
    async fn full_queue_waits_for_space() {
        let (sink, mut messages, _events) = ChannelSink::channel(1);
        sink.received(PeerId(1), b"a".to_vec()).await;

        let blocked = sink.clone();
        let pending = tokio::spawn(async move { blocked.received(PeerId(1), b"b".to_vec()).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        assert_eq!(messages.recv().await.unwrap().content, b"a");
        pending.await.unwrap();
        assert_eq!(messages.recv().await.unwrap().content, b"b");
    }
}

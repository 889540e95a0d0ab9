//! Pipeline event system for observability.
//!
//! Deliberately not a [`tokio::sync::broadcast`] channel: broadcast drops
//! events when no receiver is subscribed and hands every later subscriber an
//! independent view starting from "now". The runner wants a single
//! best-effort slot for the window before anything has subscribed (so a
//! consumer that registers a few millis after `PIPELINE_STARTED` still sees
//! it) plus strict per-consumer FIFO ordering afterward. Built from scratch
//! over one `mpsc` channel per consumer and a one-shot pre-consumer buffer.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope for every emitted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineEvent {
    pub kind: EventKind,
    pub timestamp: String,
    pub pipeline_id: String,
    pub data: Value,
}

impl PipelineEvent {
    pub fn new(kind: EventKind, pipeline_id: impl Into<String>, data: Value) -> Self {
        Self {
            kind,
            timestamp: chrono::Utc::now().to_rfc3339(),
            pipeline_id: pipeline_id.into(),
            data,
        }
    }
}

/// The fixed event kind vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PipelineStarted,
    PipelineCompleted,
    PipelineFailed,
    StageStarted,
    StageCompleted,
    StageFailed,
    StageRetrying,
    ParallelStarted,
    ParallelBranchStarted,
    ParallelBranchCompleted,
    ParallelCompleted,
    InterviewStarted,
    InterviewCompleted,
    InterviewTimeout,
    CheckpointSaved,
    PipelineRestarted,
    ToolHookPre,
    ToolHookPost,
}

/// Multi-consumer event emitter. `emit` delivers to every currently
/// registered consumer's FIFO queue; with zero consumers registered the
/// event is held in a single one-shot slot that the *next* consumer to
/// register drains once, after which the slot is permanently cleared.
pub struct EventEmitter {
    consumers: Mutex<Vec<tokio::sync::mpsc::UnboundedSender<PipelineEvent>>>,
    pending: Mutex<Option<Vec<PipelineEvent>>>,
}

/// A per-consumer handle returned by [`EventEmitter::subscribe`].
pub struct EventConsumer {
    receiver: tokio::sync::mpsc::UnboundedReceiver<PipelineEvent>,
}

impl EventConsumer {
    /// Await the next event. Returns `None` once the emitter has been
    /// dropped or [`EventEmitter::close`] has released all consumers.
    pub async fn recv(&mut self) -> Option<PipelineEvent> {
        self.receiver.recv().await
    }
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            consumers: Mutex::new(Vec::new()),
            pending: Mutex::new(None),
        }
    }

    /// Emit an event to every registered consumer. If no consumer is
    /// registered yet, the event is appended to the one-shot pre-consumer
    /// buffer instead.
    pub fn emit(&self, event: PipelineEvent) {
        let mut consumers = self.consumers.lock().unwrap();
        consumers.retain(|tx| tx.send(event.clone()).is_ok());
        if consumers.is_empty() {
            let mut pending = self.pending.lock().unwrap();
            pending.get_or_insert_with(Vec::new).push(event);
        }
    }

    /// Register a new consumer. If the one-shot buffer holds events from
    /// before any consumer existed, this consumer drains them first (in
    /// emit order) and the buffer is then cleared for good.
    pub fn subscribe(&self) -> EventConsumer {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        if let Some(buffered) = self.pending.lock().unwrap().take() {
            for event in buffered {
                let _ = tx.send(event);
            }
        }

        self.consumers.lock().unwrap().push(tx);
        EventConsumer { receiver: rx }
    }

    /// Release every waiting consumer by dropping their senders, causing
    /// their next `recv()` to resolve to `None`.
    pub fn close(&self) {
        self.consumers.lock().unwrap().clear();
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn consumer_receives_event_emitted_after_subscribe() {
        let emitter = EventEmitter::new();
        let mut consumer = emitter.subscribe();

        emitter.emit(PipelineEvent::new(
            EventKind::PipelineStarted,
            "p1",
            json!({"name": "test", "id": "p1", "graphName": "G"}),
        ));

        let event = consumer.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::PipelineStarted);
        assert_eq!(event.pipeline_id, "p1");
    }

    #[tokio::test]
    async fn multiple_consumers_each_receive_the_event() {
        let emitter = EventEmitter::new();
        let mut c1 = emitter.subscribe();
        let mut c2 = emitter.subscribe();

        emitter.emit(PipelineEvent::new(EventKind::CheckpointSaved, "p1", json!({"nodeId": "n1"})));

        let e1 = c1.recv().await.unwrap();
        let e2 = c2.recv().await.unwrap();
        assert_eq!(e1.kind, EventKind::CheckpointSaved);
        assert_eq!(e2.kind, EventKind::CheckpointSaved);
    }

    #[tokio::test]
    async fn emit_with_no_consumers_buffers_for_next_subscriber() {
        let emitter = EventEmitter::new();
        emitter.emit(PipelineEvent::new(EventKind::PipelineStarted, "p1", json!({})));
        emitter.emit(PipelineEvent::new(EventKind::StageStarted, "p1", json!({"nodeId": "n1"})));

        let mut consumer = emitter.subscribe();
        let first = consumer.recv().await.unwrap();
        let second = consumer.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::PipelineStarted);
        assert_eq!(second.kind, EventKind::StageStarted);
    }

    #[tokio::test]
    async fn one_shot_buffer_is_drained_only_once() {
        let emitter = EventEmitter::new();
        emitter.emit(PipelineEvent::new(EventKind::PipelineStarted, "p1", json!({})));

        let mut first_consumer = emitter.subscribe();
        assert!(first_consumer.recv().await.is_some());

        // A second, later subscriber must not see the already-drained event.
        let mut second_consumer = emitter.subscribe();
        emitter.emit(PipelineEvent::new(EventKind::PipelineCompleted, "p1", json!({})));
        let event = second_consumer.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::PipelineCompleted);
    }

    #[tokio::test]
    async fn close_releases_waiting_consumers() {
        let emitter = EventEmitter::new();
        let mut consumer = emitter.subscribe();
        emitter.close();
        assert!(consumer.recv().await.is_none());
    }

    #[test]
    fn event_serialization_uses_camel_case_envelope() {
        let event = PipelineEvent::new(EventKind::StageCompleted, "p1", json!({"nodeId": "n1"}));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"pipelineId\":\"p1\""));
        assert!(json.contains("\"kind\":\"stage_completed\""));
    }
}

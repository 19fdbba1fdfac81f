//! Progress Events
//!
//! Components never hold the manager; they hold a narrow [`ProgressSink`]
//! and emit [`ProgressEvent`]s into it. The default sink fans events out
//! over a `tokio::sync::broadcast` channel; subscribers must tolerate
//! missing optional fields and coalescing (a slow subscriber sees a lagged
//! stream, not every event).

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::state::{ComponentState, SystemState};

/// One progress record.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub system_state: SystemState,
    pub vector_state: ComponentState,
    pub graph_state: ComponentState,
    pub processed_files: usize,
    pub total_files: usize,
    pub processed_blocks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_op: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_remaining_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Where components push progress.
pub trait ProgressSink: Send + Sync {
    /// Emit one event. Must never block the caller.
    fn emit(&self, event: ProgressEvent);
}

/// Sink that discards everything; useful in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Broadcast-backed sink; each subscriber gets an independent receiver.
#[derive(Debug, Clone)]
pub struct BroadcastProgress {
    tx: broadcast::Sender<ProgressEvent>,
}

/// Events buffered per subscriber before coalescing drops the oldest.
const CHANNEL_CAPACITY: usize = 64;

impl BroadcastProgress {
    /// Create a sink with the default buffer.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Wrap into the trait object components expect.
    pub fn sink(self: &Arc<Self>) -> Arc<dyn ProgressSink> {
        Arc::clone(self) as Arc<dyn ProgressSink>
    }
}

impl Default for BroadcastProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for BroadcastProgress {
    fn emit(&self, event: ProgressEvent) {
        // No subscribers is fine; the send result is irrelevant
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(processed: usize) -> ProgressEvent {
        ProgressEvent {
            system_state: SystemState::Indexing,
            vector_state: ComponentState::Indexing,
            graph_state: ComponentState::Disabled,
            processed_files: processed,
            total_files: 10,
            processed_blocks: processed * 3,
            current_op: None,
            estimated_remaining_seconds: None,
            message: None,
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let progress = Arc::new(BroadcastProgress::new());
        let mut rx = progress.subscribe();
        progress.emit(event(1));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.processed_files, 1);
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_fine() {
        let progress = BroadcastProgress::new();
        progress.emit(event(1));
    }

    #[tokio::test]
    async fn test_slow_subscriber_sees_lag_not_panic() {
        let progress = Arc::new(BroadcastProgress::new());
        let mut rx = progress.subscribe();
        for i in 0..(CHANNEL_CAPACITY + 8) {
            progress.emit(event(i));
        }
        // The oldest events were coalesced away; the stream continues
        match rx.recv().await {
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => assert!(skipped > 0),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}

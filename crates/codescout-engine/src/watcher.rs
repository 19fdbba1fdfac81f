//! File-Change Debouncing
//!
//! The host's file watcher pushes raw [`FileEvent`]s; this module coalesces
//! them into [`ChangeBatch`]es. Events for the same path collapse (latest
//! wins, deletion overrides modification), and a batch is emitted once the
//! stream has been quiet for the debounce interval. Each batch then drives
//! the same incremental pipeline as a scan, restricted to the changed and
//! deleted files.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A raw change notification from the host's watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    /// Created or modified (workspace-relative path)
    Modified(String),
    /// Deleted (workspace-relative path)
    Deleted(String),
}

impl FileEvent {
    /// The path the event refers to.
    pub fn path(&self) -> &str {
        match self {
            FileEvent::Modified(p) | FileEvent::Deleted(p) => p,
        }
    }
}

/// A coalesced set of changes, ready for the incremental pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeBatch {
    /// Created or modified files
    pub changed: Vec<String>,
    /// Deleted files
    pub deleted: Vec<String>,
}

impl ChangeBatch {
    /// Whether the batch carries no work.
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }

    /// Number of files in the batch.
    pub fn len(&self) -> usize {
        self.changed.len() + self.deleted.len()
    }
}

/// Debouncing configuration.
#[derive(Debug, Clone, Copy)]
pub struct DebounceConfig {
    /// Quiet period that closes a batch
    pub debounce: Duration,
    /// Force-emit once this many distinct paths accumulated
    pub max_batch: usize,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            max_batch: 256,
        }
    }
}

/// Coalesces file events into change batches.
#[derive(Debug)]
pub struct ChangeDebouncer {
    config: DebounceConfig,
}

impl ChangeDebouncer {
    /// Create a debouncer with the default configuration.
    pub fn new() -> Self {
        Self::with_config(DebounceConfig::default())
    }

    /// Create a debouncer with explicit configuration.
    pub fn with_config(config: DebounceConfig) -> Self {
        Self { config }
    }

    /// Consume events from `rx`, pushing coalesced batches into `tx` until
    /// the event stream closes or `cancel` fires.
    ///
    /// A batch is emitted when no event has arrived for the debounce
    /// interval, or immediately once `max_batch` distinct paths piled up.
    pub async fn run(
        &self,
        mut rx: mpsc::Receiver<FileEvent>,
        tx: mpsc::Sender<ChangeBatch>,
        cancel: CancellationToken,
    ) {
        loop {
            // Wait for the first event of a batch
            let first = tokio::select! {
                _ = cancel.cancelled() => return,
                event = rx.recv() => match event {
                    Some(e) => e,
                    None => return,
                },
            };

            let mut pending: HashMap<String, bool> = HashMap::new();
            Self::coalesce(&mut pending, first);

            // Extend the batch until the stream goes quiet
            loop {
                if pending.len() >= self.config.max_batch {
                    break;
                }
                let next = tokio::select! {
                    _ = cancel.cancelled() => return,
                    event = tokio::time::timeout(self.config.debounce, rx.recv()) => event,
                };
                match next {
                    Ok(Some(event)) => Self::coalesce(&mut pending, event),
                    // Channel closed: flush what we have, then exit
                    Ok(None) => {
                        Self::send_batch(&tx, pending).await;
                        return;
                    }
                    // Quiet period elapsed
                    Err(_) => break,
                }
            }

            debug!("Debounce window closed with {} paths", pending.len());
            Self::send_batch(&tx, pending).await;
        }
    }

    /// Merge an event into the pending map. `true` marks deletion, which
    /// overrides a pending modification.
    fn coalesce(pending: &mut HashMap<String, bool>, event: FileEvent) {
        match event {
            FileEvent::Modified(path) => {
                pending.entry(path).or_insert(false);
            }
            FileEvent::Deleted(path) => {
                pending.insert(path, true);
            }
        }
    }

    async fn send_batch(tx: &mpsc::Sender<ChangeBatch>, pending: HashMap<String, bool>) {
        if pending.is_empty() {
            return;
        }
        let mut batch = ChangeBatch::default();
        for (path, deleted) in pending {
            if deleted {
                batch.deleted.push(path);
            } else {
                batch.changed.push(path);
            }
        }
        batch.changed.sort();
        batch.deleted.sort();
        let _ = tx.send(batch).await;
    }
}

impl Default for ChangeDebouncer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harness(
        config: DebounceConfig,
    ) -> (
        mpsc::Sender<FileEvent>,
        mpsc::Receiver<ChangeBatch>,
        CancellationToken,
        tokio::task::JoinHandle<()>,
    ) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (batch_tx, batch_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            ChangeDebouncer::with_config(config)
                .run(event_rx, batch_tx, task_cancel)
                .await;
        });
        (event_tx, batch_rx, cancel, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_coalesce_into_one_batch() {
        let (tx, mut rx, _cancel, _handle) = harness(DebounceConfig::default());

        tx.send(FileEvent::Modified("a.rs".into())).await.unwrap();
        tx.send(FileEvent::Modified("a.rs".into())).await.unwrap();
        tx.send(FileEvent::Modified("b.rs".into())).await.unwrap();
        drop(tx);

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.changed, vec!["a.rs".to_string(), "b.rs".to_string()]);
        assert!(batch.deleted.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_overrides_modify() {
        let (tx, mut rx, _cancel, _handle) = harness(DebounceConfig::default());

        tx.send(FileEvent::Modified("a.rs".into())).await.unwrap();
        tx.send(FileEvent::Deleted("a.rs".into())).await.unwrap();
        drop(tx);

        let batch = rx.recv().await.unwrap();
        assert!(batch.changed.is_empty());
        assert_eq!(batch.deleted, vec!["a.rs".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_period_splits_batches() {
        let config = DebounceConfig {
            debounce: Duration::from_millis(100),
            max_batch: 256,
        };
        let (tx, mut rx, _cancel, _handle) = harness(config);

        tx.send(FileEvent::Modified("a.rs".into())).await.unwrap();
        // Let the quiet period elapse before the second event
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(FileEvent::Modified("b.rs".into())).await.unwrap();
        drop(tx);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.changed, vec!["a.rs".to_string()]);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.changed, vec!["b.rs".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_batch_forces_emit() {
        let config = DebounceConfig {
            debounce: Duration::from_secs(3600),
            max_batch: 3,
        };
        let (tx, mut rx, _cancel, _handle) = harness(config);

        for name in ["a.rs", "b.rs", "c.rs"] {
            tx.send(FileEvent::Modified(name.into())).await.unwrap();
        }

        // Despite the enormous debounce, the cap forces the batch out
        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_the_loop() {
        let (tx, mut rx, cancel, handle) = harness(DebounceConfig::default());
        tx.send(FileEvent::Modified("a.rs".into())).await.unwrap();
        cancel.cancel();
        handle.await.unwrap();
        // Cancelled mid-batch: nothing emitted
        assert!(rx.try_recv().is_err());
    }
}

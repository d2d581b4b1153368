/*!
 * Event watcher: debounced create/modify/delete notifications for a watched directory.
 *
 * Wraps `notify::recommended_watcher` behind a recursive watch, a debounce/coalesce stage, a
 * filter pipeline, and a bounded channel of batched events.
 */

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::{IngestError, Result};
use crate::types::{WatchEvent, WatchEventKind, WatchOptions};

/// A predicate that drops matching events before they reach the dispatch queue.
pub type EventFilter = Arc<dyn Fn(&WatchEvent) -> bool + Send + Sync>;

/// Debounced, filtered stream of filesystem events for one watched root.
pub struct EventWatcher {
    _watcher: RecommendedWatcher,
    receiver: mpsc::Receiver<Vec<WatchEvent>>,
    dropped: Arc<AtomicU64>,
}

impl EventWatcher {
    /// Registers a recursive watch on `root` and starts the debounce/dispatch task.
    pub fn new(root: &Path, options: WatchOptions, filters: Vec<EventFilter>) -> Result<Self> {
        let (raw_tx, raw_rx) = std::sync::mpsc::channel::<Event>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                // The notify callback runs on the watcher's own thread; a send failure just
                // means the dispatch task has already shut down, so the raw event is dropped.
                let _ = raw_tx.send(event);
            }
        })
        .map_err(|e| IngestError::Io {
            path: root.to_path_buf(),
            source: std::io::Error::other(e.to_string()),
        })?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| IngestError::Io {
                path: root.to_path_buf(),
                source: std::io::Error::other(e.to_string()),
            })?;

        let (batch_tx, batch_rx) = mpsc::channel(options.queue_capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        spawn_debounce_task(raw_rx, batch_tx, options, filters, Arc::clone(&dropped));

        Ok(Self {
            _watcher: watcher,
            receiver: batch_rx,
            dropped,
        })
    }

    /// Awaits the next debounced batch of events. Returns `None` once the watcher is dropped.
    pub async fn next_batch(&mut self) -> Option<Vec<WatchEvent>> {
        self.receiver.recv().await
    }

    /// Count of events dropped because the dispatch queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Key used both for debounce coalescing and for per-path ordering: events sharing a key must
/// be delivered create-then-modify-then-delete, matching their real-time arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DebounceKey {
    kind: WatchEventKind,
    path: PathBuf,
    file_size: Option<u64>,
}

fn spawn_debounce_task(
    raw_rx: std::sync::mpsc::Receiver<Event>,
    batch_tx: mpsc::Sender<Vec<WatchEvent>>,
    options: WatchOptions,
    filters: Vec<EventFilter>,
    dropped: Arc<AtomicU64>,
) {
    // notify's callback runs on a dedicated OS thread regardless of async runtime, so the
    // debounce/dispatch loop runs on a blocking thread too rather than mixing sync recv with
    // an async channel.
    std::thread::spawn(move || {
        let mut pending: HashMap<DebounceKey, (WatchEvent, Instant)> = HashMap::new();
        let mut order: Vec<DebounceKey> = Vec::new();

        loop {
            match raw_rx.recv_timeout(options.debounce) {
                Ok(event) => {
                    for watch_event in translate(event) {
                        if !filters.iter().all(|f| f(&watch_event)) {
                            continue;
                        }
                        let key = DebounceKey {
                            kind: watch_event.kind,
                            path: watch_event.path.clone(),
                            file_size: watch_event.file_size,
                        };
                        if !pending.contains_key(&key) {
                            order.push(key.clone());
                        }
                        pending.insert(key, (watch_event, Instant::now()));
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    flush(&mut pending, &mut order, &batch_tx, &dropped, options.batch_size);
                    break;
                }
            }

            let ready: Vec<DebounceKey> = order
                .iter()
                .filter(|key| {
                    pending
                        .get(*key)
                        .map(|(_, seen_at)| seen_at.elapsed() >= options.debounce)
                        .unwrap_or(false)
                })
                .cloned()
                .collect();

            if !ready.is_empty() || order.len() >= options.batch_size {
                flush(&mut pending, &mut order, &batch_tx, &dropped, options.batch_size);
            }
        }
    });
}

fn flush(
    pending: &mut HashMap<DebounceKey, (WatchEvent, Instant)>,
    order: &mut Vec<DebounceKey>,
    batch_tx: &mpsc::Sender<Vec<WatchEvent>>,
    dropped: &Arc<AtomicU64>,
    batch_size: usize,
) {
    if order.is_empty() {
        return;
    }
    let take = order.len().min(batch_size.max(1));
    let batch_keys: Vec<DebounceKey> = order.drain(..take).collect();
    let batch: Vec<WatchEvent> = batch_keys
        .into_iter()
        .filter_map(|k| pending.remove(&k).map(|(event, _)| event))
        .collect();

    if batch_tx.try_send(batch).is_err() {
        dropped.fetch_add(1, Ordering::Relaxed);
    }
}

fn translate(event: Event) -> Vec<WatchEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => WatchEventKind::Create,
        EventKind::Modify(_) => WatchEventKind::Modify,
        EventKind::Remove(_) => WatchEventKind::Delete,
        EventKind::Other => WatchEventKind::Overflow,
        _ => return Vec::new(),
    };

    event
        .paths
        .into_iter()
        .map(|path| {
            let file_size = std::fs::metadata(&path).ok().map(|m| m.len());
            WatchEvent {
                kind,
                path,
                file_size,
                timestamp: SystemTime::now(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn detects_file_creation_under_watched_root() {
        let dir = tempfile::tempdir().unwrap();
        let options = WatchOptions {
            batch_size: 16,
            debounce: Duration::from_millis(50),
            queue_capacity: 64,
        };
        let mut watcher = EventWatcher::new(dir.path(), options, Vec::new()).unwrap();

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        std::fs::write(dir.path().join("new.txt"), b"hi").unwrap();

        let batch = tokio::time::timeout(StdDuration::from_secs(2), watcher.next_batch())
            .await
            .expect("timed out waiting for a debounced batch")
            .expect("watcher channel closed");

        assert!(batch
            .iter()
            .any(|e| e.kind == WatchEventKind::Create && e.path.ends_with("new.txt")));
    }

    #[tokio::test]
    async fn filters_drop_events_before_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let options = WatchOptions {
            batch_size: 16,
            debounce: Duration::from_millis(50),
            queue_capacity: 64,
        };
        let deny_all: EventFilter = Arc::new(|_event: &WatchEvent| false);
        let mut watcher = EventWatcher::new(dir.path(), options, vec![deny_all]).unwrap();

        std::fs::write(dir.path().join("ignored.txt"), b"hi").unwrap();

        let batch = tokio::time::timeout(StdDuration::from_millis(500), watcher.next_batch()).await;
        assert!(batch.is_err(), "no batch should have been dispatched");
    }
}

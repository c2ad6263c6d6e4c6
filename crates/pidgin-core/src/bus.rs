//! The event bus: typed pub/sub plus a bounded in-memory history and a
//! durable per-conversation JSONL log.
//!
//! Grounded on the original `core/event_bus.py` (subscriber dispatch,
//! history trimming, JSONL persistence) and on the teacher's
//! `sessions::transcript::TranscriptWriter` for the append-only file
//! idiom (lazy-open, line-buffered, flush after every write, skip
//! malformed lines on read rather than failing).

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use pidgin_types::event::{Event, EventKind};
use pidgin_types::{Error, Result};

/// A subscriber callback. Handlers never propagate errors to the bus —
/// they are responsible for logging their own failures, mirroring the
/// original's per-handler try/except around dispatch.
pub type Handler = Arc<dyn Fn(&Event) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct JsonlLog {
    file: File,
}

/// Typed pub/sub with a bounded ring-buffer history and an append-only
/// JSONL log keyed by conversation.
pub struct EventBus {
    subscribers: Mutex<HashMap<EventKind, Vec<Handler>>>,
    /// Handlers registered for the root `Event` type (§4.1's wildcard) —
    /// invoked for every event, after the kind-specific handlers.
    wildcard_subscribers: Mutex<Vec<Handler>>,
    history: Mutex<Vec<Event>>,
    max_history_size: usize,
    /// One lazily-opened file handle per conversation id, so multiple
    /// conversations can share a bus without clobbering each other's log.
    logs: Mutex<HashMap<String, JsonlLog>>,
    log_dir: Option<PathBuf>,
}

impl EventBus {
    /// Build a bus with no durable log — history and dispatch only.
    pub fn new(max_history_size: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            wildcard_subscribers: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            max_history_size,
            logs: Mutex::new(HashMap::new()),
            log_dir: None,
        }
    }

    /// Build a bus that also persists every emitted event as JSONL under
    /// `log_dir/{conversation_id}_events.jsonl`, each conversation's file
    /// opened lazily on its first emit.
    pub fn with_log_dir(max_history_size: usize, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            wildcard_subscribers: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            max_history_size,
            logs: Mutex::new(HashMap::new()),
            log_dir: Some(log_dir.into()),
        }
    }

    pub fn subscribe(&self, kind: EventKind, handler: Handler) {
        self.subscribers.lock().entry(kind).or_default().push(handler);
    }

    /// Register a handler invoked for every event regardless of kind.
    pub fn subscribe_all(&self, handler: Handler) {
        self.wildcard_subscribers.lock().push(handler);
    }

    /// Drop every handler registered for `kind`.
    pub fn unsubscribe(&self, kind: EventKind) {
        self.subscribers.lock().remove(&kind);
    }

    /// Drop every wildcard handler.
    pub fn unsubscribe_all(&self) {
        self.wildcard_subscribers.lock().clear();
    }

    pub fn get_history(&self) -> Vec<Event> {
        self.history.lock().clone()
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    fn push_history(&self, event: &Event) {
        if self.max_history_size == 0 {
            return;
        }
        let mut history = self.history.lock();
        history.push(event.clone());
        if history.len() > self.max_history_size {
            let overflow = history.len() - self.max_history_size;
            history.drain(0..overflow);
        }
    }

    fn write_jsonl(&self, event: &Event) -> Result<()> {
        let Some(dir) = &self.log_dir else {
            return Ok(());
        };
        let conversation_id = event.conversation_id();
        let mut logs = self.logs.lock();
        if !logs.contains_key(conversation_id) {
            std::fs::create_dir_all(dir)?;
            let path = dir.join(format!("{conversation_id}_events.jsonl"));
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            logs.insert(conversation_id.to_string(), JsonlLog { file });
        }
        let log = logs.get_mut(conversation_id).expect("just initialized");
        let line = serde_json::to_string(event)?;
        writeln!(log.file, "{line}")?;
        log.file.flush()?;
        Ok(())
    }

    /// Close the durable log file for one conversation, if open. A later
    /// emit for that conversation id will reopen a fresh handle; other
    /// conversations' open logs are untouched.
    pub fn close_conversation_log_for(&self, conversation_id: &str) {
        self.logs.lock().remove(conversation_id);
    }

    /// Close every open durable log file on this bus.
    pub fn close_conversation_log(&self) {
        self.logs.lock().clear();
    }

    /// Append to history, persist to the JSONL log, then dispatch to
    /// every subscriber registered for this event's kind. Dispatch order
    /// follows the original: history and persistence happen before any
    /// handler runs, so a handler that emits further events never races
    /// its own event's durability.
    pub async fn emit(&self, event: Event) -> Result<()> {
        self.push_history(&event);
        self.write_jsonl(&event)?;

        let handlers = {
            let subs = self.subscribers.lock();
            subs.get(&event.kind()).cloned().unwrap_or_default()
        };
        for handler in handlers {
            handler(&event).await;
        }
        let wildcard_handlers = self.wildcard_subscribers.lock().clone();
        for handler in wildcard_handlers {
            handler(&event).await;
        }
        Ok(())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Read an event log back from disk, skipping (and logging) any line
/// that fails to parse rather than aborting the read — mirrors
/// `io/event_deserializer.py`'s tolerance of partially-written or
/// forward-incompatible logs.
pub fn read_event_log(path: impl AsRef<Path>) -> Result<Vec<Event>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(Error::Io)?;
    let reader = BufReader::new(file);
    let mut events = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(&line) {
            Ok(event) => events.push(event),
            Err(err) => {
                tracing::warn!(path = %path.display(), line_number = idx + 1, error = %err, "skipping malformed event log line");
            }
        }
    }
    Ok(events)
}

// Session context: the event log, media locators and their cached snapshot,
// owned explicitly and ended by consuming it.

use std::collections::HashMap;
use std::fmt;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::channel::{Notification, NotificationSink};
use crate::error::TimelineError;
use crate::marker::resolve_markers;
use crate::types::{EventRecord, PlaybackState, ResolvedMarker, TimelineConfig, TimelineEvent};

/// Session identifier issued by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        SessionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The only place a cache key is derived from a session.
    pub fn storage_key(&self) -> String {
        format!("timeline-session:{}", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// String key-value storage, shaped after browser `localStorage`.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, TimelineError>;
    fn set(&mut self, key: &str, value: String) -> Result<(), TimelineError>;
    fn remove(&mut self, key: &str) -> Result<(), TimelineError>;
}

/// In-memory store. The WASM facade writes it on dispose only; JS keeps its own
/// copy of `snapshot()` across reloads.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, TimelineError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), TimelineError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), TimelineError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Cached session state. Plain JSON, no version field.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(default)]
    pub events: Vec<EventRecord>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
}

/// State of one editing session.
///
/// Created with [`SessionContext::open`], which restores the cached snapshot if
/// the store has one, and ended with [`SessionContext::dispose`] or
/// [`SessionContext::forget`]. Mutations mark the session dirty; they are written
/// to the store immediately when `write_through` is set, otherwise on
/// [`SessionContext::flush`] and [`SessionContext::dispose`].
#[derive(Debug)]
pub struct SessionContext<S: KeyValueStore> {
    id: SessionId,
    store: S,
    config: TimelineConfig,
    events: Vec<TimelineEvent>,
    video_url: Option<String>,
    audio_url: Option<String>,
    dirty: bool,
}

impl<S: KeyValueStore> SessionContext<S> {
    pub fn open(id: SessionId, store: S, config: TimelineConfig) -> Result<Self, TimelineError> {
        let cached = store.get(&id.storage_key())?;
        let mut session = SessionContext {
            id,
            store,
            config,
            events: Vec::new(),
            video_url: None,
            audio_url: None,
            dirty: false,
        };

        if let Some(json) = cached {
            match serde_json::from_str::<SessionSnapshot>(&json) {
                Ok(snapshot) => {
                    session.load(snapshot);
                    debug!(
                        "Restored session {} with {} cached events",
                        session.id,
                        session.events.len()
                    );
                }
                // Stale cache is not fatal: start empty and let the backend refill it.
                Err(e) => warn!("Discarding unreadable cache for session {}: {}", session.id, e),
            }
        }

        info!("Opened session {}", session.id);
        Ok(session)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn config(&self) -> &TimelineConfig {
        &self.config
    }

    /// Events in arrival order.
    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn video_url(&self) -> Option<&str> {
        self.video_url.as_deref()
    }

    pub fn audio_url(&self) -> Option<&str> {
        self.audio_url.as_deref()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Append events in the given order.
    pub fn ingest<I>(&mut self, records: I) -> Result<(), TimelineError>
    where
        I: IntoIterator<Item = EventRecord>,
    {
        let before = self.events.len();
        let config = &self.config;
        self.events
            .extend(records.into_iter().map(|r| TimelineEvent::from_record(r, config)));
        debug!(
            "Session {} ingested {} events ({} total)",
            self.id,
            self.events.len() - before,
            self.events.len()
        );
        self.touch()
    }

    pub fn set_video_url(&mut self, url: impl Into<String>) -> Result<(), TimelineError> {
        self.video_url = Some(url.into());
        self.touch()
    }

    pub fn set_audio_url(&mut self, url: impl Into<String>) -> Result<(), TimelineError> {
        self.audio_url = Some(url.into());
        self.touch()
    }

    /// Drop all events. Media locators are kept.
    pub fn clear_events(&mut self) -> Result<(), TimelineError> {
        self.events.clear();
        debug!("Session {} cleared its events", self.id);
        self.touch()
    }

    /// Markers for the current playhead, in event order.
    pub fn markers(&self, playback: PlaybackState) -> Vec<ResolvedMarker> {
        resolve_markers(&self.events, playback, &self.config)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            events: self.events.iter().map(TimelineEvent::to_record).collect(),
            video_url: self.video_url.clone(),
            audio_url: self.audio_url.clone(),
        }
    }

    /// Replace the whole session state, e.g. with a snapshot JS kept across a reload.
    pub fn restore(&mut self, snapshot: SessionSnapshot) -> Result<(), TimelineError> {
        self.load(snapshot);
        debug!(
            "Session {} restored with {} events",
            self.id,
            self.events.len()
        );
        self.touch()
    }

    fn load(&mut self, snapshot: SessionSnapshot) {
        let config = &self.config;
        self.events = snapshot
            .events
            .into_iter()
            .map(|r| TimelineEvent::from_record(r, config))
            .collect();
        self.video_url = snapshot.video_url;
        self.audio_url = snapshot.audio_url;
    }

    /// Whether there are changes the store has not seen yet.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn touch(&mut self) -> Result<(), TimelineError> {
        self.dirty = true;
        if self.config.write_through {
            self.flush()
        } else {
            Ok(())
        }
    }

    /// Write the snapshot to the store if anything changed since the last write.
    pub fn flush(&mut self) -> Result<(), TimelineError> {
        if !self.dirty {
            return Ok(());
        }
        let json = serde_json::to_string(&self.snapshot())?;
        self.store.set(&self.id.storage_key(), json)?;
        self.dirty = false;
        Ok(())
    }

    /// End the session, keeping its cached snapshot for the next open.
    pub fn dispose(mut self) -> Result<S, TimelineError> {
        self.flush()?;
        info!("Disposed session {}", self.id);
        Ok(self.store)
    }

    /// End the session and drop its cached snapshot.
    pub fn forget(mut self) -> Result<S, TimelineError> {
        self.store.remove(&self.id.storage_key())?;
        info!("Forgot session {}", self.id);
        Ok(self.store)
    }
}

impl<S: KeyValueStore> NotificationSink for SessionContext<S> {
    fn deliver(&mut self, notification: Notification) -> Result<(), TimelineError> {
        match notification {
            Notification::Event { event } => self.ingest(std::iter::once(event)),
            Notification::Events { events } => self.ingest(events),
            Notification::Video { url } => self.set_video_url(url),
            Notification::Audio { url } => self.set_audio_url(url),
            Notification::Clear => self.clear_events(),
        }
    }
}

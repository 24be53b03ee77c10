// Strong typing over the loosely-shaped event stream. Records are resolved into a
// tagged placement once, at ingestion, so rendering never re-derives precedence.

use serde::{Deserialize, Serialize};

use crate::error::TimelineError;

/// Event record as it arrives from the push channel or the cached snapshot.
/// Every field is optional on the wire; missing data degrades, never fails.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_end: Option<f64>,
    /// Milliseconds, either since the epoch or since recording start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_text: Option<String>,
}

/// Raw millisecond timestamp, disambiguated by magnitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawTimestamp {
    /// Milliseconds since the Unix epoch.
    Epoch(f64),
    /// Milliseconds since recording start.
    Relative(f64),
}

impl RawTimestamp {
    /// Values strictly greater than `threshold_ms` are epoch-absolute.
    pub fn classify(ms: f64, threshold_ms: f64) -> Self {
        if ms > threshold_ms {
            RawTimestamp::Epoch(ms)
        } else {
            RawTimestamp::Relative(ms)
        }
    }

    pub fn as_millis(&self) -> f64 {
        match *self {
            RawTimestamp::Epoch(ms) | RawTimestamp::Relative(ms) => ms,
        }
    }
}

/// Where an event sits on the timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    /// Instant, seconds relative to the recording.
    Point { time: f64 },
    /// Interval, seconds relative to the recording.
    Range { start: f64, end: f64 },
    /// Only a raw millisecond timestamp is known.
    Raw(RawTimestamp),
    /// No timing information at all; placed at zero.
    Unplaced,
    /// Narration bundle; never placed as a marker.
    Bundle,
}

/// An ingested event: the record's display fields plus its resolved placement.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEvent {
    pub kind: String,
    pub label: Option<String>,
    pub target_text: Option<String>,
    pub placement: Placement,
    /// Kept for every event since the first event's raw value anchors epoch conversion.
    pub raw_timestamp_ms: Option<f64>,
}

impl TimelineEvent {
    /// Resolve a record's placement: point time, then a complete range, then the
    /// raw timestamp, then zero.
    pub fn from_record(record: EventRecord, config: &TimelineConfig) -> Self {
        let placement = if record.kind == config.bundle_kind {
            Placement::Bundle
        } else if let Some(time) = record.point_time {
            Placement::Point { time }
        } else if let (Some(start), Some(end)) = (record.range_start, record.range_end) {
            Placement::Range { start, end }
        } else if let Some(ms) = record.raw_timestamp {
            Placement::Raw(RawTimestamp::classify(ms, config.epoch_threshold_ms))
        } else {
            Placement::Unplaced
        };

        TimelineEvent {
            kind: record.kind,
            label: record.label,
            target_text: record.target_text,
            placement,
            raw_timestamp_ms: record.raw_timestamp,
        }
    }

    /// Back to the wire shape, for snapshots. Re-ingesting the result yields the same event.
    pub fn to_record(&self) -> EventRecord {
        let mut record = EventRecord {
            kind: self.kind.clone(),
            raw_timestamp: self.raw_timestamp_ms,
            label: self.label.clone(),
            target_text: self.target_text.clone(),
            ..EventRecord::default()
        };
        match self.placement {
            Placement::Point { time } => record.point_time = Some(time),
            Placement::Range { start, end } => {
                record.range_start = Some(start);
                record.range_end = Some(end);
            }
            Placement::Raw(_) | Placement::Unplaced | Placement::Bundle => {}
        }
        record
    }

    /// Label, else kind, else "Event". Empty strings count as missing.
    pub fn display_label(&self) -> &str {
        self.label
            .as_deref()
            .filter(|l| !l.is_empty())
            .or_else(|| Some(self.kind.as_str()).filter(|k| !k.is_empty()))
            .unwrap_or("Event")
    }
}

impl From<EventRecord> for TimelineEvent {
    fn from(record: EventRecord) -> Self {
        TimelineEvent::from_record(record, &TimelineConfig::default())
    }
}

/// Playback snapshot supplied by the caller on every render, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub current_time: f64,
    pub duration: f64,
}

impl PlaybackState {
    pub fn new(current_time: f64, duration: f64) -> Self {
        PlaybackState {
            current_time,
            duration,
        }
    }
}

/// Renderable marker descriptor. Recomputed every render, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedMarker {
    /// Index of the source event in the sequence.
    pub index: usize,
    pub position_percent: f64,
    /// Width for interval events; point events get a fixed width from the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_percent: Option<f64>,
    pub is_active: bool,
    pub display_label: String,
    pub display_time: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_text: Option<String>,
}

/// Engine configuration passed from JS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineConfig {
    /// How long a point event stays highlighted after its time (seconds).
    #[serde(default = "default_active_dwell")]
    pub active_dwell_secs: f64,
    /// Raw timestamps above this are epoch milliseconds.
    #[serde(default = "default_epoch_threshold")]
    pub epoch_threshold_ms: f64,
    /// Reserved kind for narration bundles.
    #[serde(default = "default_bundle_kind")]
    pub bundle_kind: String,
    /// Notifications held while the channel handshake is pending.
    #[serde(default = "default_max_buffered")]
    pub max_buffered_notifications: usize,
    /// Listener name sent in the registration handshake.
    #[serde(default = "default_channel_name")]
    pub channel_name: String,
    /// Write the session snapshot to its store on every change. Each write
    /// serializes the whole log, so hosts that persist snapshots themselves
    /// turn this off and flush explicitly.
    #[serde(default = "default_true")]
    pub write_through: bool,
}

fn default_active_dwell() -> f64 {
    0.8
}

fn default_epoch_threshold() -> f64 {
    1e12
}

fn default_bundle_kind() -> String {
    "narrations".to_string()
}

fn default_max_buffered() -> usize {
    256
}

fn default_channel_name() -> String {
    "timeline".to_string()
}

fn default_true() -> bool {
    true
}

impl TimelineConfig {
    /// Parse config JSON passed from JS. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, TimelineError> {
        serde_json::from_str(json).map_err(|e| TimelineError::InvalidConfig(e.to_string()))
    }
}

impl Default for TimelineConfig {
    fn default() -> Self {
        TimelineConfig {
            active_dwell_secs: default_active_dwell(),
            epoch_threshold_ms: default_epoch_threshold(),
            bundle_kind: default_bundle_kind(),
            max_buffered_notifications: default_max_buffered(),
            channel_name: default_channel_name(),
            write_through: default_true(),
        }
    }
}

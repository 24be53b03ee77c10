// timeline_core: Rust/WASM engine behind the recording editor.
// Event placement, active markers, scrubbing and session state live here; JS is plumbing.

mod channel;
mod error;
mod marker;
mod seek;
mod session;
mod types;

use wasm_bindgen::prelude::*;

pub use channel::{
    Delivery, Envelope, HandshakeState, Notification, NotificationSink, PushChannel, Registration,
};
pub use error::TimelineError;
pub use marker::{
    epoch_baseline_ms, format_timestamp, resolve_marker, resolve_markers, ActiveWindow,
};
pub use seek::{compute_seek_time, position_percent, TrackGeometry};
pub use session::{KeyValueStore, MemoryStore, SessionContext, SessionId, SessionSnapshot};
pub use types::*;

/// Initialize panic hook for better error messages in browser console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

impl From<TimelineError> for JsValue {
    fn from(err: TimelineError) -> Self {
        JsValue::from_str(&err.to_string())
    }
}

/// Place one event of a sequence. Returns the marker JSON, or `null` when the
/// event is not placeable or `index` is out of range.
#[wasm_bindgen(js_name = resolveMarker)]
pub fn resolve_marker_js(
    events_json: &str,
    index: usize,
    current_time: f64,
    duration: f64,
) -> Result<String, JsValue> {
    let records: Vec<EventRecord> = serde_json::from_str(events_json)
        .map_err(|e| JsValue::from_str(&format!("Invalid events: {}", e)))?;
    let config = TimelineConfig::default();
    let events: Vec<TimelineEvent> = records
        .into_iter()
        .map(|r| TimelineEvent::from_record(r, &config))
        .collect();

    let marker = resolve_marker(
        &events,
        index,
        PlaybackState::new(current_time, duration),
        &config,
    );

    serde_json::to_string(&marker)
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

/// Time under the pointer for a track starting at `track_left` and `track_width` wide.
#[wasm_bindgen(js_name = computeSeekTime)]
pub fn compute_seek_time_js(
    pointer_x: f64,
    track_left: f64,
    track_width: f64,
    duration: f64,
) -> f64 {
    compute_seek_time(pointer_x, TrackGeometry::new(track_left, track_width), duration)
}

#[wasm_bindgen(js_name = formatTimestamp)]
pub fn format_timestamp_js(seconds: f64) -> String {
    format_timestamp(seconds)
}

/// Per-session engine exposed to JavaScript.
///
/// JS forwards push-channel traffic to [`TimelineEngine::receive`], asks for
/// markers on every render, and persists [`TimelineEngine::snapshot`] to
/// `localStorage` so a reload can [`TimelineEngine::restore`] without refetching.
#[wasm_bindgen]
pub struct TimelineEngine {
    session_id: SessionId,
    session: Option<SessionContext<MemoryStore>>,
    channel: PushChannel,
}

impl TimelineEngine {
    fn session(&self) -> Result<&SessionContext<MemoryStore>, TimelineError> {
        self.session
            .as_ref()
            .ok_or_else(|| TimelineError::SessionDisposed(self.session_id.to_string()))
    }

    fn session_mut(&mut self) -> Result<&mut SessionContext<MemoryStore>, TimelineError> {
        let id = &self.session_id;
        self.session
            .as_mut()
            .ok_or_else(|| TimelineError::SessionDisposed(id.to_string()))
    }
}

#[wasm_bindgen]
impl TimelineEngine {
    /// Open a session.
    ///
    /// # Arguments
    /// * `config_json` - JSON with `TimelineConfig` fields; `{}` for defaults
    /// * `session_id` - Backend session identifier
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: &str, session_id: &str) -> Result<TimelineEngine, JsValue> {
        let mut config = TimelineConfig::from_json(config_json)?;
        // JS persists `snapshot()` itself; the in-memory store is written on dispose only.
        config.write_through = false;

        let session_id = SessionId::new(session_id);
        let channel = PushChannel::new(session_id.clone(), &config);
        let session = SessionContext::open(session_id.clone(), MemoryStore::new(), config)?;

        Ok(TimelineEngine {
            session_id,
            session: Some(session),
            channel,
        })
    }

    /// Start the channel handshake. Returns the `{name, id}` payload to emit.
    pub fn begin_registration(&mut self) -> Result<String, JsValue> {
        let registration = self.channel.begin_registration();
        serde_json::to_string(&registration)
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    /// Accept the handshake ack. Returns the number of buffered notifications applied.
    pub fn complete_registration(&mut self, ack_json: &str) -> Result<u32, JsValue> {
        let ack: Registration = serde_json::from_str(ack_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid registration ack: {}", e)))?;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| TimelineError::SessionDisposed(self.session_id.to_string()))?;
        let flushed = self.channel.complete_registration(&ack, session)?;
        Ok(flushed as u32)
    }

    /// The transport dropped; notifications buffer until the next handshake.
    pub fn detach(&mut self) {
        self.channel.detach();
    }

    /// Route one push-channel envelope. Returns `delivered`, `buffered` or `ignored`.
    pub fn receive(&mut self, envelope_json: &str) -> Result<String, JsValue> {
        let envelope: Envelope = serde_json::from_str(envelope_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid notification: {}", e)))?;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| TimelineError::SessionDisposed(self.session_id.to_string()))?;
        let delivery = self.channel.receive(envelope, session)?;
        Ok(delivery_name(delivery).to_string())
    }

    /// Markers for the playhead, as a JSON array in event order.
    pub fn resolve_markers(&self, current_time: f64, duration: f64) -> Result<String, JsValue> {
        let markers = self
            .session()?
            .markers(PlaybackState::new(current_time, duration));
        serde_json::to_string(&markers)
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    pub fn seek_time(
        &self,
        pointer_x: f64,
        track_left: f64,
        track_width: f64,
        duration: f64,
    ) -> f64 {
        compute_seek_time_js(pointer_x, track_left, track_width, duration)
    }

    /// Session state as JSON, for `localStorage`.
    pub fn snapshot(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.session()?.snapshot())
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    pub fn restore(&mut self, snapshot_json: &str) -> Result<(), JsValue> {
        let snapshot: SessionSnapshot = serde_json::from_str(snapshot_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid snapshot: {}", e)))?;
        self.session_mut()?.restore(snapshot)?;
        Ok(())
    }

    pub fn clear(&mut self) -> Result<(), JsValue> {
        self.session_mut()?.clear_events()?;
        Ok(())
    }

    /// End the session. Every later call that needs it fails.
    pub fn dispose(&mut self) -> Result<(), JsValue> {
        let session = self
            .session
            .take()
            .ok_or_else(|| TimelineError::SessionDisposed(self.session_id.to_string()))?;
        session.dispose()?;
        Ok(())
    }

    pub fn video_url(&self) -> Option<String> {
        self.session().ok()?.video_url().map(str::to_string)
    }

    pub fn audio_url(&self) -> Option<String> {
        self.session().ok()?.audio_url().map(str::to_string)
    }

    pub fn event_count(&self) -> u32 {
        self.session().map(|s| s.events().len() as u32).unwrap_or(0)
    }

    pub fn is_registered(&self) -> bool {
        self.channel.state() == HandshakeState::Registered
    }
}

fn delivery_name(delivery: Delivery) -> &'static str {
    match delivery {
        Delivery::Delivered => "delivered",
        Delivery::Buffered => "buffered",
        Delivery::Ignored => "ignored",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Error paths build a JsValue, which only works on wasm32; these tests stay on
    // the success paths.

    fn engine() -> TimelineEngine {
        TimelineEngine::new("{}", "abc").expect("engine")
    }

    #[test]
    fn engine_creation_works() {
        let engine = TimelineEngine::new(r#"{"active_dwell_secs":1.0}"#, "abc");
        assert!(engine.is_ok());
    }

    #[test]
    fn registration_flow_flushes_buffered_events() {
        let mut engine = engine();
        let event = concat!(
            r#"{"sessionId":"abc","notification":"#,
            r#"{"type":"event","event":{"kind":"click","pointTime":25}}}"#,
        );

        assert_eq!(engine.receive(event).unwrap(), "buffered");
        assert_eq!(engine.event_count(), 0);

        let registration = engine.begin_registration().unwrap();
        assert!(registration.contains("\"id\":\"abc\""));
        assert_eq!(engine.complete_registration(&registration).unwrap(), 1);
        assert!(engine.is_registered());
        assert_eq!(engine.event_count(), 1);

        let video = r#"{"sessionId":"abc","notification":{"type":"video","url":"out.mp4"}}"#;
        assert_eq!(engine.receive(video).unwrap(), "delivered");
        assert_eq!(engine.video_url().as_deref(), Some("out.mp4"));

        let foreign = r#"{"sessionId":"xyz","notification":{"type":"clear"}}"#;
        assert_eq!(engine.receive(foreign).unwrap(), "ignored");
        assert_eq!(engine.event_count(), 1);
    }

    #[test]
    fn markers_json_for_playhead() {
        let mut engine = engine();
        engine
            .restore(concat!(
                r#"{"events":[{"kind":"click","pointTime":25},"#,
                r#"{"kind":"scroll","rangeStart":10,"rangeEnd":20},"#,
                r#"{"kind":"narrations"}]}"#,
            ))
            .unwrap();

        let json = engine.resolve_markers(15.0, 100.0).unwrap();
        let markers: Vec<ResolvedMarker> = serde_json::from_str(&json).unwrap();
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].position_percent, 25.0);
        assert!(!markers[0].is_active);
        assert_eq!(markers[1].span_percent, Some(10.0));
        assert!(markers[1].is_active);
    }

    #[test]
    fn snapshot_round_trips_through_restore() {
        let mut engine = engine();
        engine
            .restore(concat!(
                r#"{"events":[{"kind":"click","rawTimestamp":1700000000000}],"#,
                r#""audioUrl":"a.mp3"}"#,
            ))
            .unwrap();
        let snapshot = engine.snapshot().unwrap();

        let mut other = TimelineEngine::new("{}", "abc").unwrap();
        other.restore(&snapshot).unwrap();
        assert_eq!(other.event_count(), 1);
        assert_eq!(other.audio_url().as_deref(), Some("a.mp3"));
    }

    #[test]
    fn dispose_ends_session() {
        let mut engine = engine();
        engine.restore(r#"{"events":[{"kind":"click"}]}"#).unwrap();
        engine.dispose().unwrap();
        assert_eq!(engine.event_count(), 0);
        assert_eq!(engine.video_url(), None);
    }

    #[test]
    fn engine_defers_store_writes() {
        let mut engine = TimelineEngine::new(r#"{"write_through":true}"#, "abc").unwrap();
        engine.restore(r#"{"events":[{"kind":"click"}]}"#).unwrap();
        let session = engine.session().unwrap();
        assert!(session.is_dirty());
        assert!(session.store().is_empty());
    }

    #[test]
    fn stateless_resolve_marker() {
        let events = concat!(
            r#"[{"rawTimestamp":1700000000000},"#,
            r#"{"kind":"key","rawTimestamp":1700000005000}]"#,
        );
        let json = resolve_marker_js(events, 1, 5.0, 100.0).unwrap();
        let marker: Option<ResolvedMarker> = serde_json::from_str(&json).unwrap();
        let marker = marker.expect("placeable");
        assert_eq!(marker.index, 1);
        assert_eq!(marker.position_percent, 5.0);
        assert!(marker.is_active);

        assert_eq!(resolve_marker_js(events, 9, 0.0, 100.0).unwrap(), "null");
    }

    #[test]
    fn free_functions() {
        assert_eq!(compute_seek_time_js(300.0, 100.0, 400.0, 60.0), 30.0);
        assert_eq!(format_timestamp_js(125.0), "2:05");
        assert_eq!(engine().seek_time(500.0, 100.0, 400.0, 60.0), 60.0);
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_tests {
    use super::*;
    use wasm_bindgen_test::*;

    #[wasm_bindgen_test]
    fn invalid_config_is_rejected() {
        assert!(TimelineEngine::new("not json", "abc").is_err());
    }

    #[wasm_bindgen_test]
    fn disposed_engine_rejects_calls() {
        let mut engine = TimelineEngine::new("{}", "abc").unwrap();
        engine.dispose().unwrap();
        assert!(engine.dispose().is_err());
        assert!(engine.resolve_markers(0.0, 10.0).is_err());
        assert!(engine.clear().is_err());
    }

    #[wasm_bindgen_test]
    fn ack_before_registration_is_rejected() {
        let mut engine = TimelineEngine::new("{}", "abc").unwrap();
        assert!(engine
            .complete_registration(r#"{"name":"timeline","id":"abc"}"#)
            .is_err());
    }
}

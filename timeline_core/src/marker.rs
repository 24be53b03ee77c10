// Timeline coordinate mapping: event placement -> percentage on the track, plus
// the active window test against the playhead. Pure; never fails, only omits.

use crate::seek::position_percent;
use crate::types::{
    Placement, PlaybackState, RawTimestamp, ResolvedMarker, TimelineConfig, TimelineEvent,
};

/// Window during which a marker is highlighted, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveWindow {
    pub start: f64,
    pub end: f64,
}

impl ActiveWindow {
    pub fn new(start: f64, end: f64) -> Self {
        ActiveWindow { start, end }
    }

    /// Inclusive on both ends.
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time <= self.end
    }
}

/// Event time relative to the recording, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
enum RelativeTime {
    Instant(f64),
    Span { start: f64, end: f64 },
}

impl RelativeTime {
    fn start(&self) -> f64 {
        match *self {
            RelativeTime::Instant(time) => time,
            RelativeTime::Span { start, .. } => start,
        }
    }
}

/// Epoch baseline for a sequence: the first event's raw timestamp, or zero.
pub fn epoch_baseline_ms(all_events: &[TimelineEvent]) -> f64 {
    all_events
        .first()
        .and_then(|e| e.raw_timestamp_ms)
        .unwrap_or(0.0)
}

fn relative_time(placement: &Placement, baseline_ms: f64) -> Option<RelativeTime> {
    let relative = match *placement {
        Placement::Bundle => return None,
        Placement::Point { time } => RelativeTime::Instant(time),
        Placement::Range { start, end } => RelativeTime::Span { start, end },
        Placement::Raw(RawTimestamp::Epoch(ms)) => {
            RelativeTime::Instant((ms - baseline_ms) / 1000.0)
        }
        Placement::Raw(RawTimestamp::Relative(ms)) => RelativeTime::Instant(ms / 1000.0),
        Placement::Unplaced => RelativeTime::Instant(0.0),
    };
    Some(relative)
}

/// Resolve one event into a marker, or `None` when it is a narration bundle or
/// its position falls off the track.
///
/// The event is `all_events[index]`; the sequence's first element anchors
/// epoch-absolute timestamps. An index past the end resolves to `None`.
pub fn resolve_marker(
    all_events: &[TimelineEvent],
    index: usize,
    playback: PlaybackState,
    config: &TimelineConfig,
) -> Option<ResolvedMarker> {
    let event = all_events.get(index)?;
    resolve_with_baseline(event, index, epoch_baseline_ms(all_events), playback, config)
}

/// Resolve every placeable event, in sequence order. The baseline is computed
/// once per pass.
pub fn resolve_markers(
    all_events: &[TimelineEvent],
    playback: PlaybackState,
    config: &TimelineConfig,
) -> Vec<ResolvedMarker> {
    let baseline_ms = epoch_baseline_ms(all_events);
    all_events
        .iter()
        .enumerate()
        .filter_map(|(index, event)| {
            resolve_with_baseline(event, index, baseline_ms, playback, config)
        })
        .collect()
}

fn resolve_with_baseline(
    event: &TimelineEvent,
    index: usize,
    baseline_ms: f64,
    playback: PlaybackState,
    config: &TimelineConfig,
) -> Option<ResolvedMarker> {
    let relative = relative_time(&event.placement, baseline_ms)?;
    let duration = playback.duration;

    let position = position_percent(relative.start(), duration);
    if !position.is_finite() || !(0.0..=100.0).contains(&position) {
        return None;
    }

    let (span_percent, window) = match relative {
        RelativeTime::Instant(time) => (
            None,
            ActiveWindow::new(time, time + config.active_dwell_secs),
        ),
        RelativeTime::Span { start, end } => {
            let span = (duration > 0.0).then(|| position_percent(end, duration) - position);
            (span, ActiveWindow::new(start, end))
        }
    };

    Some(ResolvedMarker {
        index,
        position_percent: position,
        span_percent,
        is_active: window.contains(playback.current_time),
        display_label: event.display_label().to_string(),
        display_time: format_timestamp(relative.start()),
        kind: event.kind.clone(),
        target_text: event.target_text.clone(),
    })
}

/// Format seconds as `M:SS`, or `H:MM:SS` from one hour up. Negative and
/// non-finite input renders as `0:00`.
pub fn format_timestamp(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

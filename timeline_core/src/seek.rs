// Track geometry: time <-> horizontal position. The forward mapping is shared with
// marker placement so a click on a marker seeks back to the marker's time.

use serde::{Deserialize, Serialize};

/// Horizontal extent of the rendered track, in the caller's pixel units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TrackGeometry {
    pub left: f64,
    pub width: f64,
}

impl TrackGeometry {
    pub fn new(left: f64, width: f64) -> Self {
        TrackGeometry { left, width }
    }

    /// Pointer offset as a fraction of the track, clamped to [0, 1].
    /// A degenerate track yields 0.
    pub fn fraction_at(&self, pointer_x: f64) -> f64 {
        if !self.width.is_finite() || self.width <= 0.0 {
            return 0.0;
        }
        let fraction = (pointer_x - self.left) / self.width;
        if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        }
    }
}

/// Percentage along the track for a time. A non-positive duration maps everything to 0.
pub fn position_percent(time: f64, duration: f64) -> f64 {
    if duration > 0.0 {
        (time / duration) * 100.0
    } else {
        0.0
    }
}

/// Time under the pointer: `clamp((x - left) / width, 0, 1) * duration`.
pub fn compute_seek_time(pointer_x: f64, track: TrackGeometry, duration: f64) -> f64 {
    if !duration.is_finite() || duration <= 0.0 {
        return 0.0;
    }
    track.fraction_at(pointer_x) * duration
}

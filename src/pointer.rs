//! On-screen pointer driven by the index fingertip.

use serde::Serialize;

use crate::input::Landmark;

/// EMA weight given to the new target.
pub const SMOOTHING: f32 = 0.5;
/// Jumps longer than this (normalized distance) snap instead of easing.
pub const SNAP_THRESHOLD: f32 = 0.15;

// central region of the camera frame stretched to the full screen
const ROI_MIN: f32 = 0.1;
const ROI_SPAN: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointerState {
    pub x: f32,
    pub y: f32,
    pub is_active: bool,
}

impl Default for PointerState {
    fn default() -> Self {
        Self {
            x: 0.5,
            y: 0.5,
            is_active: false,
        }
    }
}

pub fn map_roi(v: f32) -> f32 {
    ((v - ROI_MIN) / ROI_SPAN).clamp(0.0, 1.0)
}

/// Screen target for a fingertip; x is mirrored to match the selfie view.
pub fn target_for(tip: Landmark) -> (f32, f32) {
    (map_roi(1.0 - tip.x), map_roi(tip.y))
}

#[derive(Debug, Clone, Default)]
pub struct PointerSmoother {
    state: PointerState,
}

impl PointerSmoother {
    pub fn state(&self) -> PointerState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active
    }

    /// Move toward `target`, snapping on (re)activation or long jumps.
    pub fn follow(&mut self, target: (f32, f32)) -> PointerState {
        let (tx, ty) = target;
        let dx = tx - self.state.x;
        let dy = ty - self.state.y;
        let dist = (dx * dx + dy * dy).sqrt();

        let (x, y) = if !self.state.is_active || dist > SNAP_THRESHOLD {
            (tx, ty)
        } else {
            (
                tx * SMOOTHING + self.state.x * (1.0 - SMOOTHING),
                ty * SMOOTHING + self.state.y * (1.0 - SMOOTHING),
            )
        };
        self.state = PointerState {
            x,
            y,
            is_active: true,
        };
        self.state
    }

    /// Keep the last position, stop reporting it as live.
    pub fn deactivate(&mut self) {
        self.state.is_active = false;
    }
}

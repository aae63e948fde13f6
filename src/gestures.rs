//! Hand-gesture state machine: fist, open-hand swipe, index pointer.
//!
//! Runs once per processed frame. Every gesture is confirmed by a run of
//! consecutive matching frames; any frame that does not match resets that
//! run. Commands fire on the frame a run reaches its threshold, so holding a
//! pose never repeats a command.

use log::{debug, info};
use serde::Serialize;

use crate::fingers::{self, FingerVector};
use crate::input::{Hand, HandFrame, INDEX_TIP, MIDDLE_MCP};
use crate::pointer::{self, PointerSmoother, PointerState};

pub const FIST_CONFIRM_FRAMES: u32 = 4;
pub const OPEN_CONFIRM_FRAMES: u32 = 4;
pub const POINTER_CONFIRM_FRAMES: u32 = 2;
/// Dropout and grace budgets granted on every confirmed pointer frame.
pub const POINTER_BUDGET_FRAMES: u32 = 15;
/// A fist drains pointer grace this much faster than an ambiguous pose.
pub const FIST_GRACE_DRAIN: u32 = 2;
/// Quiet period after a fist or open hand before pointer mode may start.
pub const GESTURE_COOLDOWN_MS: u64 = 600;

pub const SWIPE_WINDOW_MS: u64 = 500;
pub const SWIPE_COOLDOWN_MS: u64 = 600;
pub const SWIPE_MIN_DISTANCE: f32 = 0.15;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GestureState {
    #[default]
    Waiting,
    Scanning,
    Paused,
    SwipeReady,
    SwipeLeft,
    SwipeRight,
    Ready,
    Stabilizing,
}

impl GestureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Scanning => "SCANNING",
            Self::Paused => "PAUSED",
            Self::SwipeReady => "SWIPE_READY",
            Self::SwipeLeft => "SWIPE_LEFT",
            Self::SwipeRight => "SWIPE_RIGHT",
            Self::Ready => "READY",
            Self::Stabilizing => "STABILIZING",
        }
    }
}

/// Direction the palm travelled in camera coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwipeDirection {
    Left,
    Right,
}

/// One-shot events, produced at most once per confirmed pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    Fist,
    Swipe(SwipeDirection),
}

/// Copy-out view of the classifier for status readers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GestureReading {
    pub gesture_state: GestureState,
    pub finger_count: u8,
    pub confidence: f32,
}

impl GestureReading {
    fn new(gesture_state: GestureState, finger_count: u8, confidence: f32) -> Self {
        Self {
            gesture_state,
            finger_count,
            confidence,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SwipeTracker {
    anchor: Option<(f32, u64)>,
    last_swipe_ms: Option<u64>,
}

impl SwipeTracker {
    pub fn detect(&mut self, palm_x: f32, now_ms: u64) -> Option<SwipeDirection> {
        let Some((anchor_x, anchor_ms)) = self.anchor else {
            self.anchor = Some((palm_x, now_ms));
            return None;
        };
        // stalled hand: start a fresh attempt from here
        if now_ms.saturating_sub(anchor_ms) > SWIPE_WINDOW_MS {
            self.anchor = Some((palm_x, now_ms));
            return None;
        }
        if self
            .last_swipe_ms
            .is_some_and(|t| now_ms.saturating_sub(t) < SWIPE_COOLDOWN_MS)
        {
            return None;
        }
        let dx = palm_x - anchor_x;
        if dx.abs() > SWIPE_MIN_DISTANCE {
            self.anchor = None;
            self.last_swipe_ms = Some(now_ms);
            return Some(if dx > 0.0 {
                SwipeDirection::Right
            } else {
                SwipeDirection::Left
            });
        }
        None
    }
}

#[derive(Debug, Default)]
pub struct GestureClassifier {
    // run lengths
    fist_frames: u32,
    open_frames: u32,
    pointer_frames: u32,
    // pointer persistence
    dropout_budget: u32,
    grace_budget: u32,
    swipe: SwipeTracker,
    last_fist_ms: Option<u64>,
    last_open_ms: Option<u64>,
    pointer: PointerSmoother,
    reading: GestureReading,
}

impl GestureClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Back to `WAITING` with every counter cleared.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn reading(&self) -> GestureReading {
        self.reading
    }

    pub fn pointer(&self) -> PointerState {
        self.pointer.state()
    }

    pub fn tick(&mut self, frame: &HandFrame) -> Option<Gesture> {
        let now = frame.timestamp_ms;
        let Some(hand) = &frame.hand else {
            self.on_absent();
            return None;
        };

        let fingers = fingers::extract(hand);
        if fingers.is_fist() {
            self.open_frames = 0;
            self.pointer_frames = 0;
            return self.on_fist(hand, now);
        }
        if fingers.is_open() {
            self.fist_frames = 0;
            self.pointer_frames = 0;
            return self.on_open(hand, fingers, now);
        }

        self.fist_frames = 0;
        self.open_frames = 0;
        if fingers.is_pointer() && self.cooled_down(now) {
            self.on_pointer(hand, fingers);
        } else {
            self.pointer_frames = 0;
            self.on_ambiguous(hand, fingers);
        }
        None
    }

    fn cooled_down(&self, now: u64) -> bool {
        let quiet = |t: Option<u64>| t.is_none_or(|t| now.saturating_sub(t) >= GESTURE_COOLDOWN_MS);
        quiet(self.last_fist_ms) && quiet(self.last_open_ms)
    }

    fn on_absent(&mut self) {
        self.fist_frames = 0;
        self.open_frames = 0;
        self.pointer_frames = 0;
        if self.dropout_budget > 0 {
            self.dropout_budget -= 1;
            return;
        }
        self.reading = GestureReading::new(GestureState::Scanning, 0, 0.0);
        self.pointer.deactivate();
    }

    fn on_fist(&mut self, hand: &Hand, now: u64) -> Option<Gesture> {
        self.fist_frames = self.fist_frames.saturating_add(1);
        self.grace_budget = self.grace_budget.saturating_sub(FIST_GRACE_DRAIN);
        if self.grace_budget == 0 {
            self.pointer.deactivate();
        }
        self.reading = GestureReading::new(GestureState::Paused, 0, hand.confidence);

        if self.fist_frames == FIST_CONFIRM_FRAMES {
            self.last_fist_ms = Some(now);
            info!("gesture: fist confirmed");
            return Some(Gesture::Fist);
        }
        None
    }

    fn on_open(&mut self, hand: &Hand, fingers: FingerVector, now: u64) -> Option<Gesture> {
        self.open_frames = self.open_frames.saturating_add(1);
        if self.open_frames < OPEN_CONFIRM_FRAMES {
            return None;
        }
        self.last_open_ms = Some(now);
        self.pointer.deactivate();

        let count = fingers.extended_count();
        let palm_x = hand.landmarks[MIDDLE_MCP].x;
        let (state, gesture) = match self.swipe.detect(palm_x, now) {
            // the feed is mirrored: a palm moving left reads as a rightward swipe
            Some(SwipeDirection::Left) => (
                GestureState::SwipeRight,
                Some(Gesture::Swipe(SwipeDirection::Left)),
            ),
            Some(SwipeDirection::Right) => (
                GestureState::SwipeLeft,
                Some(Gesture::Swipe(SwipeDirection::Right)),
            ),
            None => (GestureState::SwipeReady, None),
        };
        if gesture.is_some() {
            info!("gesture: {} (palm x {palm_x:.3})", state.as_str());
        }
        self.reading = GestureReading::new(state, count, hand.confidence);
        gesture
    }

    fn on_pointer(&mut self, hand: &Hand, fingers: FingerVector) {
        self.pointer_frames = self.pointer_frames.saturating_add(1);
        if self.pointer_frames < POINTER_CONFIRM_FRAMES {
            return;
        }
        let target = pointer::target_for(hand.landmarks[INDEX_TIP]);
        self.pointer.follow(target);
        self.dropout_budget = POINTER_BUDGET_FRAMES;
        self.grace_budget = POINTER_BUDGET_FRAMES;
        self.reading = GestureReading::new(
            GestureState::Ready,
            fingers.extended_count(),
            hand.confidence,
        );
    }

    fn on_ambiguous(&mut self, hand: &Hand, fingers: FingerVector) {
        let state = if self.grace_budget > 0 {
            self.grace_budget -= 1;
            GestureState::Ready
        } else {
            GestureState::Stabilizing
        };
        if self.dropout_budget > 0 {
            self.dropout_budget -= 1;
        } else if self.pointer.is_active() {
            debug!("pointer released after ambiguous frames");
            self.pointer.deactivate();
        }
        self.reading = GestureReading::new(state, fingers.extended_count(), hand.confidence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingers::synthetic;
    use crate::input::{Handedness, ScriptedSource, LandmarkSource};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const FIST: u8 = 0b00000;
    const OPEN: u8 = 0b11111;
    const POINT: u8 = 0b00010;
    const TWO: u8 = 0b00110;

    fn frame(t: u64, bits: u8, palm_x: f32) -> HandFrame {
        HandFrame {
            timestamp_ms: t,
            hand: Some(synthetic::hand(
                FingerVector::from_bits(bits),
                Handedness::Right,
                palm_x,
            )),
        }
    }

    fn point(t: u64, tip: (f32, f32)) -> HandFrame {
        HandFrame {
            timestamp_ms: t,
            hand: Some(synthetic::hand_pointing(
                FingerVector::from_bits(POINT),
                Handedness::Right,
                0.5,
                tip,
            )),
        }
    }

    fn run(c: &mut GestureClassifier, frames: &[HandFrame]) -> Vec<Gesture> {
        frames.iter().filter_map(|f| c.tick(f)).collect()
    }

    fn state(c: &GestureClassifier) -> GestureState {
        c.reading().gesture_state
    }

    /// Pointer mode confirmed at `t`, well clear of any cooldown.
    fn active_pointer(c: &mut GestureClassifier, t: u64) {
        c.tick(&point(t, (0.5, 0.5)));
        c.tick(&point(t + 33, (0.5, 0.5)));
        assert!(c.pointer().is_active);
    }

    #[test]
    fn starts_waiting_and_scans_on_absence() {
        let mut c = GestureClassifier::new();
        assert_eq!(state(&c), GestureState::Waiting);
        assert_eq!(c.tick(&HandFrame::absent(0)), None);
        assert_eq!(state(&c), GestureState::Scanning);
        assert!(!c.pointer().is_active);
    }

    #[test]
    fn fist_needs_four_frames_and_fires_once() {
        let mut c = GestureClassifier::new();
        let frames: Vec<_> = (0..3).map(|i| frame(i * 33, FIST, 0.5)).collect();
        assert!(run(&mut c, &frames).is_empty());
        assert_eq!(state(&c), GestureState::Paused);

        let frames: Vec<_> = (3..12).map(|i| frame(i * 33, FIST, 0.5)).collect();
        assert_eq!(run(&mut c, &frames), vec![Gesture::Fist]);
        assert_eq!(state(&c), GestureState::Paused);
    }

    #[test]
    fn single_frame_fist_blips_never_pause() {
        let mut c = GestureClassifier::new();
        let frames: Vec<_> = (0..20)
            .map(|i| frame(i * 33, if i % 2 == 0 { FIST } else { TWO }, 0.5))
            .collect();
        assert!(run(&mut c, &frames).is_empty());
    }

    #[test]
    fn fist_fires_again_after_release() {
        let mut c = GestureClassifier::new();
        let mut frames: Vec<_> = (0..4).map(|i| frame(i * 33, FIST, 0.5)).collect();
        frames.push(frame(140, TWO, 0.5));
        frames.extend((5..9).map(|i| frame(i * 33, FIST, 0.5)));
        assert_eq!(run(&mut c, &frames), vec![Gesture::Fist, Gesture::Fist]);
    }

    #[test]
    fn open_hand_holds_state_until_confirmed() {
        let mut c = GestureClassifier::new();
        c.tick(&HandFrame::absent(0));
        for i in 1..4 {
            c.tick(&frame(i * 33, OPEN, 0.5));
            assert_eq!(state(&c), GestureState::Scanning);
        }
        c.tick(&frame(4 * 33, OPEN, 0.5));
        assert_eq!(state(&c), GestureState::SwipeReady);
        assert_eq!(c.reading().finger_count, 5);
    }

    #[test]
    fn palm_moving_left_is_next_swipe() {
        let mut c = GestureClassifier::new();
        let frames = [
            frame(0, OPEN, 0.6),
            frame(33, OPEN, 0.6),
            frame(66, OPEN, 0.6),
            frame(100, OPEN, 0.6),
            frame(200, OPEN, 0.4),
        ];
        assert_eq!(run(&mut c, &frames), vec![Gesture::Swipe(SwipeDirection::Left)]);
        assert_eq!(state(&c), GestureState::SwipeRight);
    }

    #[test]
    fn palm_moving_right_is_prev_swipe() {
        let mut c = GestureClassifier::new();
        let frames: Vec<_> = (0..4)
            .map(|i| frame(i * 33, OPEN, 0.3))
            .chain([frame(200, OPEN, 0.5)])
            .collect();
        assert_eq!(run(&mut c, &frames), vec![Gesture::Swipe(SwipeDirection::Right)]);
        assert_eq!(state(&c), GestureState::SwipeLeft);
    }

    #[test]
    fn swipe_tracker_anchors_first() {
        let mut s = SwipeTracker::default();
        assert_eq!(s.detect(0.9, 0), None);
        assert_eq!(s.detect(0.5, 100), Some(SwipeDirection::Left));
    }

    #[test]
    fn swipe_cooldown_suppresses_second_swipe() {
        let mut s = SwipeTracker::default();
        s.detect(0.7, 0);
        assert_eq!(s.detect(0.4, 100), Some(SwipeDirection::Left));
        // second full swipe inside the 600 ms cooldown
        assert_eq!(s.detect(0.7, 200), None);
        assert_eq!(s.detect(0.4, 300), None);
        assert_eq!(s.detect(0.2, 650), None);
    }

    #[test]
    fn swipe_allowed_again_after_cooldown() {
        let mut s = SwipeTracker::default();
        s.detect(0.7, 0);
        assert_eq!(s.detect(0.4, 100), Some(SwipeDirection::Left));
        s.detect(0.4, 720);
        assert_eq!(s.detect(0.7, 800), Some(SwipeDirection::Right));
    }

    #[test]
    fn stale_anchor_is_replaced() {
        let mut s = SwipeTracker::default();
        s.detect(0.5, 0);
        // drifted slowly; the window expired before crossing the threshold
        assert_eq!(s.detect(0.6, 550), None);
        // 0.2 from the original anchor, only 0.1 from the new one
        assert_eq!(s.detect(0.7, 650), None);
        assert_eq!(s.detect(0.76, 700), Some(SwipeDirection::Right));
    }

    #[test]
    fn stationary_hand_reanchors() {
        let mut s = SwipeTracker::default();
        s.detect(0.5, 0);
        assert_eq!(s.detect(0.5, 400), None);
        assert_eq!(s.detect(0.5, 600), None);
        assert_eq!(s.detect(0.58, 700), None);
    }

    #[test]
    fn pointer_needs_two_frames() {
        let mut c = GestureClassifier::new();
        c.tick(&point(0, (0.3, 0.5)));
        assert!(!c.pointer().is_active);
        assert_eq!(state(&c), GestureState::Waiting);
        c.tick(&point(33, (0.3, 0.5)));
        assert_eq!(state(&c), GestureState::Ready);
        let p = c.pointer();
        assert!(p.is_active);
        assert!((p.x - 0.75).abs() < 1e-6);
        assert!((p.y - 0.5).abs() < 1e-6);
    }

    #[test]
    fn pointer_blocked_right_after_fist() {
        let mut c = GestureClassifier::new();
        run(&mut c, &(0..4).map(|i| frame(i * 33, FIST, 0.5)).collect::<Vec<_>>());
        c.tick(&point(200, (0.5, 0.5)));
        c.tick(&point(233, (0.5, 0.5)));
        assert_eq!(state(&c), GestureState::Stabilizing);
        assert!(!c.pointer().is_active);

        c.tick(&point(800, (0.5, 0.5)));
        c.tick(&point(833, (0.5, 0.5)));
        assert_eq!(state(&c), GestureState::Ready);
    }

    #[test]
    fn pointer_blocked_right_after_open_hand() {
        let mut c = GestureClassifier::new();
        run(&mut c, &(0..4).map(|i| frame(i * 33, OPEN, 0.5)).collect::<Vec<_>>());
        c.tick(&point(300, (0.5, 0.5)));
        c.tick(&point(333, (0.5, 0.5)));
        assert!(!c.pointer().is_active);
    }

    #[test]
    fn grace_keeps_ready_through_messy_frames() {
        let mut c = GestureClassifier::new();
        active_pointer(&mut c, 0);
        for i in 0..15 {
            c.tick(&frame(100 + i * 33, TWO, 0.5));
            assert_eq!(state(&c), GestureState::Ready);
            assert!(c.pointer().is_active);
        }
        c.tick(&frame(700, TWO, 0.5));
        assert_eq!(state(&c), GestureState::Stabilizing);
        assert!(!c.pointer().is_active);
    }

    #[test]
    fn fist_cancels_pointer_twice_as_fast() {
        let mut c = GestureClassifier::new();
        active_pointer(&mut c, 0);
        for i in 0..7 {
            c.tick(&frame(100 + i * 33, FIST, 0.5));
        }
        // 15 - 7*2 = 1 grace frame left
        assert!(c.pointer().is_active);
        c.tick(&frame(400, FIST, 0.5));
        assert!(!c.pointer().is_active);
    }

    #[test]
    fn open_hand_releases_pointer_once_confirmed() {
        let mut c = GestureClassifier::new();
        active_pointer(&mut c, 0);
        for i in 0..3 {
            c.tick(&frame(100 + i * 33, OPEN, 0.5));
            assert!(c.pointer().is_active);
        }
        c.tick(&frame(200, OPEN, 0.5));
        assert!(!c.pointer().is_active);
    }

    #[test]
    fn pointer_survives_short_dropouts() {
        let mut c = GestureClassifier::new();
        active_pointer(&mut c, 0);
        let last = c.pointer();
        for i in 0..10 {
            c.tick(&HandFrame::absent(100 + i * 33));
        }
        assert_eq!(c.pointer(), last);
        assert_eq!(state(&c), GestureState::Ready);

        for i in 10..15 {
            c.tick(&HandFrame::absent(100 + i * 33));
        }
        assert!(c.pointer().is_active);
        c.tick(&HandFrame::absent(700));
        assert!(!c.pointer().is_active);
        assert_eq!(state(&c), GestureState::Scanning);
    }

    #[test]
    fn pointer_eases_toward_steady_target() {
        let mut c = GestureClassifier::new();
        c.tick(&point(0, (0.5, 0.5)));
        c.tick(&point(33, (0.5, 0.5)));
        let start = c.pointer();
        let target = pointer::target_for(crate::input::Landmark { x: 0.45, y: 0.55, z: 0.0 });
        let mut prev = start;
        for i in 2..12 {
            c.tick(&point(i * 33, (0.45, 0.55)));
            let p = c.pointer();
            assert!(p.x >= prev.x && p.x <= target.0);
            assert!(p.y >= prev.y && p.y <= target.1);
            prev = p;
        }
        assert!((prev.x - target.0).abs() < 1e-3);
    }

    #[test]
    fn every_finger_combination_has_a_state() {
        let mut c = GestureClassifier::new();
        for t in 0..4 {
            c.tick(&HandFrame::absent(t * 33));
            assert_eq!(state(&c), GestureState::Scanning);
        }

        for bits in 0..32u8 {
            let fingers = FingerVector::from_bits(bits);
            let expected = if fingers.is_fist() {
                GestureState::Paused
            } else if fingers.is_open() {
                GestureState::SwipeReady
            } else if fingers.is_pointer() {
                GestureState::Ready
            } else {
                GestureState::Stabilizing
            };

            let mut c = GestureClassifier::new();
            for t in 0..4 {
                c.tick(&frame(t * 33, bits, 0.5));
            }
            assert_eq!(state(&c), expected, "fingers {bits:05b}");
            assert_eq!(c.reading().finger_count, fingers.extended_count());
        }
    }

    #[test]
    fn reset_returns_to_waiting() {
        let mut c = GestureClassifier::new();
        active_pointer(&mut c, 0);
        c.reset();
        assert_eq!(c.reading(), GestureReading::default());
        assert!(!c.pointer().is_active);
    }

    #[test]
    fn end_to_end_scripted_session() {
        let mut frames: Vec<HandFrame> = (0..5).map(|i| frame(i * 33, FIST, 0.5)).collect();
        // open hand, palm 0.6 -> 0.3 within 300 ms
        for (i, x) in [0.6, 0.6, 0.6, 0.6, 0.3].into_iter().enumerate() {
            frames.push(frame(1000 + i as u64 * 60, OPEN, x));
        }
        for i in 0..3 {
            frames.push(point(2000 + i * 33, (0.4, 0.4)));
        }

        let mut src = ScriptedSource::new(frames);
        let mut c = GestureClassifier::new();
        let mut fired = Vec::new();
        let mut states = Vec::new();
        while let Some(f) = src.next_frame().unwrap() {
            fired.extend(c.tick(&f));
            states.push(state(&c));
        }

        assert_eq!(
            fired,
            vec![Gesture::Fist, Gesture::Swipe(SwipeDirection::Left)]
        );
        assert_eq!(states[4], GestureState::Paused);
        assert_eq!(states[9], GestureState::SwipeRight);
        assert_eq!(states[12], GestureState::Ready);
        assert!(c.pointer().is_active);
    }

    fn fist_runs(seq: &[(bool, u8)]) -> usize {
        let mut runs = 0;
        let mut len = 0;
        for &(present, bits) in seq {
            if present && bits == FIST {
                len += 1;
                if len == FIST_CONFIRM_FRAMES {
                    runs += 1;
                }
            } else {
                len = 0;
            }
        }
        runs
    }

    proptest! {
        #[test]
        fn pause_fires_once_per_long_fist_run(
            seq in prop::collection::vec((any::<bool>(), prop_oneof![Just(FIST), 0u8..32]), 0..120)
        ) {
            let mut c = GestureClassifier::new();
            let mut pauses = 0;
            for (i, &(present, bits)) in seq.iter().enumerate() {
                let t = i as u64 * 33;
                let f = if present { frame(t, bits, 0.5) } else { HandFrame::absent(t) };
                if c.tick(&f) == Some(Gesture::Fist) {
                    pauses += 1;
                }
            }
            prop_assert_eq!(pauses, fist_runs(&seq));
        }

        #[test]
        fn any_sequence_keeps_pointer_in_bounds(
            seq in prop::collection::vec((any::<bool>(), 0u8..32, 0.0f32..1.0, 0.0f32..0.85), 0..150)
        ) {
            let mut c = GestureClassifier::new();
            for (i, &(present, bits, x, y)) in seq.iter().enumerate() {
                let t = i as u64 * 33;
                let f = if !present {
                    HandFrame::absent(t)
                } else {
                    HandFrame {
                        timestamp_ms: t,
                        hand: Some(synthetic::hand_pointing(
                            FingerVector::from_bits(bits),
                            Handedness::Left,
                            x,
                            (x, y),
                        )),
                    }
                };
                c.tick(&f);
                let p = c.pointer();
                prop_assert!((0.0..=1.0).contains(&p.x) && (0.0..=1.0).contains(&p.y));
                if c.reading().gesture_state == GestureState::Scanning {
                    prop_assert!(!p.is_active);
                }
            }
        }
    }
}

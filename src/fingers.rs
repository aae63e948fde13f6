//! Per-finger extended/flexed state from 21 hand landmarks.

use crate::input::{Hand, Handedness, INDEX_MCP, THUMB_TIP};

/// Horizontal slack (normalized units) before the thumb counts as extended.
pub const THUMB_MARGIN: f32 = 0.03;

// index, middle, ring, pinky
const FINGER_TIPS: [usize; 4] = [8, 12, 16, 20];
const FINGER_PIPS: [usize; 4] = [6, 10, 14, 18];
const FINGER_MCPS: [usize; 4] = [5, 9, 13, 17];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FingerVector {
    pub thumb: bool,
    pub index: bool,
    pub middle: bool,
    pub ring: bool,
    pub pinky: bool,
}

impl FingerVector {
    /// Bit 0 = thumb ... bit 4 = pinky.
    pub fn from_bits(bits: u8) -> Self {
        Self {
            thumb: bits & 0b00001 != 0,
            index: bits & 0b00010 != 0,
            middle: bits & 0b00100 != 0,
            ring: bits & 0b01000 != 0,
            pinky: bits & 0b10000 != 0,
        }
    }

    pub fn as_array(&self) -> [bool; 5] {
        [self.thumb, self.index, self.middle, self.ring, self.pinky]
    }

    pub fn extended_count(&self) -> u8 {
        self.as_array().iter().filter(|f| **f).count() as u8
    }

    pub fn is_fist(&self) -> bool {
        self.extended_count() == 0
    }

    pub fn is_open(&self) -> bool {
        self.extended_count() >= 4
    }

    /// Index up, the other three long fingers curled; the thumb is ignored.
    pub fn is_pointer(&self) -> bool {
        self.index && !self.middle && !self.ring && !self.pinky
    }
}

/// Classify each finger of a detected hand.
///
/// The thumb test assumes a mirrored selfie feed: a right hand's thumb
/// extends towards smaller x, a left hand's towards larger x. It has not been
/// validated against a non-mirrored camera.
pub fn extract(hand: &Hand) -> FingerVector {
    let lm = &hand.landmarks;
    let thumb_x = lm[THUMB_TIP].x;
    let base_x = lm[INDEX_MCP].x;
    let thumb = match hand.handedness {
        Handedness::Right => thumb_x < base_x - THUMB_MARGIN,
        Handedness::Left => thumb_x > base_x + THUMB_MARGIN,
    };

    let mut long = [false; 4];
    for (i, up) in long.iter_mut().enumerate() {
        let tip = lm[FINGER_TIPS[i]].y;
        *up = tip < lm[FINGER_PIPS[i]].y && tip < lm[FINGER_MCPS[i]].y;
    }

    FingerVector {
        thumb,
        index: long[0],
        middle: long[1],
        ring: long[2],
        pinky: long[3],
    }
}


#[cfg(test)]
mod tests {
    use super::synthetic::hand;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn every_vector_round_trips_through_landmarks() {
        for handedness in [Handedness::Left, Handedness::Right] {
            for bits in 0..32u8 {
                let want = FingerVector::from_bits(bits);
                assert_eq!(extract(&hand(want, handedness, 0.5)), want, "bits {bits:05b}");
            }
        }
    }

    #[test]
    fn thumb_inside_margin_is_flexed() {
        let mut h = hand(FingerVector::default(), Handedness::Right, 0.5);
        h.landmarks[THUMB_TIP].x = 0.5 - THUMB_MARGIN * 0.5;
        assert!(!extract(&h).thumb);
        h.landmarks[THUMB_TIP].x = 0.5 - THUMB_MARGIN * 2.0;
        assert!(extract(&h).thumb);
    }

    #[test]
    fn thumb_direction_flips_with_handedness() {
        let mut h = hand(FingerVector::default(), Handedness::Left, 0.5);
        h.landmarks[THUMB_TIP].x = 0.4;
        assert!(!extract(&h).thumb);
        h.landmarks[THUMB_TIP].x = 0.6;
        assert!(extract(&h).thumb);
    }

    #[test]
    fn tip_between_joints_is_not_extended() {
        let mut h = hand(FingerVector::from_bits(0b00010), Handedness::Right, 0.5);
        // above the PIP but below the MCP
        h.landmarks[6].y = 0.5;
        h.landmarks[5].y = 0.2;
        h.landmarks[8].y = 0.3;
        assert!(!extract(&h).index);
    }

    #[test]
    fn shape_predicates() {
        assert!(FingerVector::from_bits(0).is_fist());
        assert!(FingerVector::from_bits(0b11110).is_open());
        assert!(FingerVector::from_bits(0b11111).is_open());
        assert!(!FingerVector::from_bits(0b01110).is_open());
        assert!(FingerVector::from_bits(0b00010).is_pointer());
        assert!(FingerVector::from_bits(0b00011).is_pointer());
        assert!(!FingerVector::from_bits(0b00110).is_pointer());
    }
}

//! Landmark sources: one hand (or none) per sampled camera frame.

use log::{debug, warn};
use serde::Deserialize;
use std::{
    fs,
    io::{self, BufRead, BufReader},
    time::Instant,
};
use thiserror::Error;

pub const LANDMARK_COUNT: usize = 21;

pub const THUMB_TIP: usize = 4;
pub const INDEX_MCP: usize = 5;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_MCP: usize = 9;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Handedness {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hand {
    pub landmarks: [Landmark; LANDMARK_COUNT],
    pub handedness: Handedness,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandFrame {
    pub timestamp_ms: u64,
    pub hand: Option<Hand>,
}

impl HandFrame {
    pub fn absent(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            hand: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    /// The detector could not be brought up; gestures stay off for the session.
    #[error("landmark source unavailable: {0}")]
    Unavailable(String),
    #[error("landmark source read failed: {0}")]
    Io(#[from] io::Error),
}

/// Anything that yields zero-or-one hand per tick.
pub trait LandmarkSource {
    /// `Ok(None)` once the source has no more frames.
    fn next_frame(&mut self) -> Result<Option<HandFrame>, SourceError>;
}

// wire shape written by the detector process
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFrame {
    timestamp_ms: Option<u64>,
    hand_present: bool,
    #[serde(default)]
    landmarks: Vec<Vec<f32>>,
    handedness: Option<Handedness>,
    confidence_score: Option<f32>,
}

impl RawFrame {
    fn into_hand(self) -> Option<Hand> {
        if !self.hand_present {
            return None;
        }
        if self.landmarks.len() != LANDMARK_COUNT {
            warn!(
                "dropping hand with {} landmarks (expected {LANDMARK_COUNT})",
                self.landmarks.len()
            );
            return None;
        }
        let mut landmarks = [Landmark::default(); LANDMARK_COUNT];
        for (slot, point) in landmarks.iter_mut().zip(&self.landmarks) {
            match point.as_slice() {
                [x, y] => *slot = Landmark { x: *x, y: *y, z: 0.0 },
                [x, y, z] => *slot = Landmark { x: *x, y: *y, z: *z },
                other => {
                    warn!("dropping hand with a {}-component landmark", other.len());
                    return None;
                }
            }
        }
        Some(Hand {
            landmarks,
            // the detector omits the label when unsure; treat as the non-right hand
            handedness: self.handedness.unwrap_or(Handedness::Left),
            confidence: self.confidence_score.unwrap_or(0.0).clamp(0.0, 1.0),
        })
    }
}

/// Decode one JSON line; anything malformed becomes an absent frame.
pub fn decode_line(line: &str, fallback_ms: u64) -> HandFrame {
    match serde_json::from_str::<RawFrame>(line) {
        Ok(raw) => {
            let timestamp_ms = raw.timestamp_ms.unwrap_or(fallback_ms);
            HandFrame {
                timestamp_ms,
                hand: raw.into_hand(),
            }
        }
        Err(e) => {
            warn!("undecodable landmark frame treated as absent: {e}");
            HandFrame::absent(fallback_ms)
        }
    }
}

/// Reads newline-delimited frames from a detector process, file or stdin.
pub struct JsonLinesSource<R> {
    reader: R,
    start_instant: Instant,
    line: String,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            start_instant: Instant::now(),
            line: String::new(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.start_instant.elapsed().as_millis() as u64
    }
}

impl<R: BufRead> LandmarkSource for JsonLinesSource<R> {
    fn next_frame(&mut self) -> Result<Option<HandFrame>, SourceError> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(Some(decode_line(trimmed, self.now_ms())));
        }
    }
}

/// Open the configured source: `-` is stdin, anything else a path.
pub fn open_source(spec: &str) -> Result<Box<dyn LandmarkSource + Send>, SourceError> {
    if spec == "-" {
        debug!("landmark source: stdin");
        return Ok(Box::new(JsonLinesSource::new(BufReader::new(io::stdin()))));
    }
    let file = fs::File::open(spec).map_err(|e| SourceError::Unavailable(format!("{spec}: {e}")))?;
    debug!("landmark source: {spec}");
    Ok(Box::new(JsonLinesSource::new(BufReader::new(file))))
}

/// Replays a fixed frame list; used to drive the classifier without a camera.
#[cfg(test)]
pub struct ScriptedSource {
    frames: std::collections::VecDeque<HandFrame>,
}

#[cfg(test)]
impl ScriptedSource {
    pub fn new(frames: impl IntoIterator<Item = HandFrame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }
}

#[cfg(test)]
impl LandmarkSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Option<HandFrame>, SourceError> {
        Ok(self.frames.pop_front())
    }
}

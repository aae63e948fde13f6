use anyhow::Result;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
    },
    thread,
    time::{Duration, Instant},
};

use super::dispatch::{self, Dispatcher, NavRequest, Origin};
use crate::config::Profile;
use crate::gestures::{GestureClassifier, GestureReading};
use crate::input::{self, HandFrame, LandmarkSource};
use crate::navigator::{Indicator, IndicatorDirection, PageNavigator, PageSnapshot};
use crate::pointer::PointerState;

/// Longest wait for a frame before the loop services the queue anyway.
const IDLE_WAIT: Duration = Duration::from_millis(20);
// frames buffered between the reader thread and the classifier
const FRAME_BACKLOG: usize = 64;

/// Classifies every `stride`-th captured frame; skipped frames are never seen.
#[derive(Debug, Clone)]
pub struct FrameThrottle {
    stride: u32,
    captured: u64,
}

impl FrameThrottle {
    pub fn new(stride: u32) -> Self {
        Self {
            stride: stride.max(1),
            captured: 0,
        }
    }

    pub fn set_stride(&mut self, stride: u32) {
        self.stride = stride.max(1);
    }

    pub fn admit(&mut self) -> bool {
        self.captured += 1;
        self.captured % self.stride as u64 == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "lowercase")]
pub enum DetectorStatus {
    Starting,
    Running,
    Exhausted,
    Stopped,
    Unavailable(String),
}

/// What status readers see; copied out once per loop turn.
#[derive(Debug, Clone, Serialize)]
pub struct LiveStatus {
    pub gesture: GestureReading,
    pub pointer: PointerState,
    pub page: PageSnapshot,
    pub indicator: Option<IndicatorDirection>,
    pub detector: DetectorStatus,
    pub frames_seen: u64,
    pub frames_classified: u64,
    pub pauses: u64,
}

impl LiveStatus {
    pub fn new(total_pages: u32) -> Self {
        Self {
            gesture: GestureReading::default(),
            pointer: PointerState::default(),
            page: PageNavigator::new(total_pages).snapshot(),
            indicator: None,
            detector: DetectorStatus::Starting,
            frames_seen: 0,
            frames_classified: 0,
            pauses: 0,
        }
    }
}

/// Owns the classifier and the navigator; everything else talks to it
/// through channels.
pub struct Pipeline {
    classifier: GestureClassifier,
    dispatcher: Dispatcher,
    throttle: FrameThrottle,
    deck_pages: u32,
    frames: Option<Receiver<HandFrame>>,
    requests: Receiver<NavRequest>,
    nav_tx: Sender<NavRequest>,
    status: Arc<Mutex<LiveStatus>>,
    detector: DetectorStatus,
    frames_seen: u64,
    frames_classified: u64,
    pauses: Arc<AtomicU64>,
    clock: Instant,
}

impl Pipeline {
    pub fn new(
        profile: &Profile,
        nav_tx: Sender<NavRequest>,
        requests: Receiver<NavRequest>,
        pages: Sender<PageSnapshot>,
        status: Arc<Mutex<LiveStatus>>,
    ) -> Self {
        let pauses = Arc::new(AtomicU64::new(0));
        let counter = pauses.clone();
        let dispatcher = Dispatcher::new(
            PageNavigator::new(profile.deck.total_pages),
            Indicator::new(profile.display.indicator_ms),
        )
        .with_pause(move || {
            counter.fetch_add(1, Ordering::Relaxed);
            info!("presenter paused");
        })
        .publish_to(pages);

        Self {
            classifier: GestureClassifier::new(),
            dispatcher,
            throttle: FrameThrottle::new(profile.camera.frame_stride),
            deck_pages: profile.deck.total_pages,
            frames: None,
            requests,
            nav_tx,
            status,
            detector: DetectorStatus::Starting,
            frames_seen: 0,
            frames_classified: 0,
            pauses,
            clock: Instant::now(),
        }
    }

    /// Start pulling frames from `source` on a reader thread.
    pub fn attach(&mut self, mut source: Box<dyn LandmarkSource + Send>) {
        let (tx, rx) = mpsc::sync_channel::<HandFrame>(FRAME_BACKLOG);
        thread::spawn(move || {
            loop {
                match source.next_frame() {
                    Ok(Some(frame)) => {
                        if tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("landmark source failed: {e}");
                        break;
                    }
                }
            }
        });
        self.frames = Some(rx);
        self.detector = DetectorStatus::Running;
    }

    /// The detector never came up; navigation keeps working without it.
    pub fn mark_unavailable(&mut self, reason: String) {
        self.frames = None;
        self.detector = DetectorStatus::Unavailable(reason);
    }

    pub fn apply_profile(&mut self, profile: &Profile) {
        self.throttle.set_stride(profile.camera.frame_stride);
        self.dispatcher.set_indicator_ms(profile.display.indicator_ms);
        // manual `deck` loads survive until the profile itself changes
        if profile.deck.total_pages != self.deck_pages {
            self.deck_pages = profile.deck.total_pages;
            let _ = self
                .nav_tx
                .send(NavRequest::LoadDeck(profile.deck.total_pages));
        }
    }

    pub fn announce(&mut self) {
        self.dispatcher.announce();
        self.publish_status();
    }

    /// One loop turn: at most one frame, then every queued request.
    pub fn step(&mut self, wait: Duration) {
        match self.frames.as_ref().map(|rx| rx.recv_timeout(wait)) {
            Some(Ok(frame)) => self.on_frame(&frame),
            Some(Err(RecvTimeoutError::Timeout)) => {}
            Some(Err(RecvTimeoutError::Disconnected)) => {
                info!("landmark source finished after {} frames", self.frames_seen);
                self.frames = None;
                self.detector = DetectorStatus::Exhausted;
            }
            None => thread::sleep(wait),
        }

        let now = self.now_ms();
        self.dispatcher.drain(&self.requests, now);
        self.publish_status();
    }

    /// Halt classification and forget all gesture state. Frames still
    /// buffered from the old source are dropped with the receiver.
    pub fn stop(&mut self) {
        self.frames = None;
        self.classifier.reset();
        self.detector = DetectorStatus::Stopped;
        self.publish_status();
    }

    fn on_frame(&mut self, frame: &HandFrame) {
        self.frames_seen += 1;
        if !self.throttle.admit() {
            return;
        }
        self.frames_classified += 1;
        if let Some(gesture) = self.classifier.tick(frame) {
            let command = dispatch::command_for(gesture);
            debug!("{gesture:?} -> {command:?}");
            if self
                .nav_tx
                .send(NavRequest::Command {
                    origin: Origin::Gesture,
                    command,
                })
                .is_err()
            {
                warn!("command queue closed; dropping {command:?}");
            }
        }
    }

    fn now_ms(&self) -> u64 {
        self.clock.elapsed().as_millis() as u64
    }

    fn publish_status(&self) {
        let now = self.now_ms();
        if let Ok(mut s) = self.status.lock() {
            *s = LiveStatus {
                gesture: self.classifier.reading(),
                pointer: self.classifier.pointer(),
                page: self.dispatcher.snapshot(),
                indicator: self.dispatcher.indicator(now),
                detector: self.detector.clone(),
                frames_seen: self.frames_seen,
                frames_classified: self.frames_classified,
                pauses: self.pauses.load(Ordering::Relaxed),
            };
        }
    }
}

pub fn run_pipeline(
    profile: Arc<Mutex<Profile>>,
    nav_tx: Sender<NavRequest>,
    requests: Receiver<NavRequest>,
    pages: Sender<PageSnapshot>,
    status: Arc<Mutex<LiveStatus>>,
    running: Arc<AtomicBool>,
    camera: Arc<AtomicBool>,
) -> Result<()> {
    let initial = match profile.lock() {
        Ok(p) => p.clone(),
        Err(_) => return Err(anyhow::anyhow!("profile lock poisoned")),
    };
    let mut pipeline = Pipeline::new(&initial, nav_tx, requests, pages, status);

    let mut camera_on = camera.load(Ordering::SeqCst);
    if camera_on {
        open_camera(&mut pipeline, &initial.camera.source);
    } else {
        pipeline.stop();
    }
    pipeline.announce();

    while running.load(Ordering::SeqCst) {
        let source = match profile.lock() {
            Ok(p) => {
                pipeline.apply_profile(&p);
                p.camera.source.clone()
            }
            Err(_) => initial.camera.source.clone(),
        };
        let wanted = camera.load(Ordering::SeqCst);
        if wanted != camera_on {
            camera_on = wanted;
            if wanted {
                open_camera(&mut pipeline, &source);
            } else {
                pipeline.stop();
                info!("camera stopped; navigation stays live");
            }
        }
        pipeline.step(IDLE_WAIT);
    }

    pipeline.stop();
    info!("gesture pipeline stopped");
    Ok(())
}

fn open_camera(pipeline: &mut Pipeline, source: &str) {
    match input::open_source(source) {
        Ok(source) => pipeline.attach(source),
        Err(e) => {
            error!("{e}; gesture control disabled until the camera is restarted");
            pipeline.mark_unavailable(e.to_string());
        }
    }
}

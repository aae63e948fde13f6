use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, Sender};

use anyhow::anyhow;

use crate::gestures::{Gesture, SwipeDirection};
use crate::navigator::{Indicator, IndicatorDirection, PageNavigator, PageSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Prev,
    Next,
    Pause,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prev" => Ok(Command::Prev),
            "next" => Ok(Command::Next),
            "pause" => Ok(Command::Pause),
            other => Err(anyhow!("unknown command: {other}")),
        }
    }
}

/// Where a command came from. Logged only; every origin takes the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Gesture,
    Remote,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavRequest {
    Command { origin: Origin, command: Command },
    GoTo(u32),
    LoadDeck(u32),
}

/// The single queue every navigation request goes through.
pub fn queue() -> (Sender<NavRequest>, Receiver<NavRequest>) {
    mpsc::channel()
}

pub fn command_for(g: Gesture) -> Command {
    match g {
        Gesture::Fist => Command::Pause,
        // mirrored camera: palm travelling left means "forward"
        Gesture::Swipe(SwipeDirection::Left) => Command::Next,
        Gesture::Swipe(SwipeDirection::Right) => Command::Prev,
    }
}

pub struct Dispatcher {
    navigator: PageNavigator,
    indicator: Indicator,
    on_pause: Box<dyn FnMut() + Send>,
    page_tx: Option<Sender<PageSnapshot>>,
}

impl Dispatcher {
    pub fn new(navigator: PageNavigator, indicator: Indicator) -> Self {
        Self {
            navigator,
            indicator,
            on_pause: Box::new(|| {}),
            page_tx: None,
        }
    }

    pub fn with_pause(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.on_pause = Box::new(f);
        self
    }

    /// Every page change is sent here, e.g. for remote mirrors.
    pub fn publish_to(mut self, tx: Sender<PageSnapshot>) -> Self {
        self.page_tx = Some(tx);
        self
    }

    pub fn snapshot(&self) -> PageSnapshot {
        self.navigator.snapshot()
    }

    pub fn indicator(&self, now_ms: u64) -> Option<IndicatorDirection> {
        self.indicator.visible(now_ms)
    }

    pub fn set_indicator_ms(&mut self, ms: u64) {
        self.indicator.set_duration(ms);
    }

    pub fn handle(&mut self, req: NavRequest, now_ms: u64) {
        let changed = match req {
            NavRequest::Command { origin, command } => {
                debug!("dispatch {command:?} from {origin:?}");
                self.apply(command, now_ms)
            }
            NavRequest::GoTo(page) => self.navigator.go_to(page),
            NavRequest::LoadDeck(total) => {
                self.navigator.load(total);
                true
            }
        };
        if changed {
            let snap = self.navigator.snapshot();
            info!("page {}/{}", snap.current_page, snap.total_pages);
            self.publish(snap);
        }
    }

    /// Handle everything queued so far, in arrival order.
    pub fn drain(&mut self, rx: &Receiver<NavRequest>, now_ms: u64) -> usize {
        let mut n = 0;
        while let Ok(req) = rx.try_recv() {
            self.handle(req, now_ms);
            n += 1;
        }
        n
    }

    /// Push the current page state to subscribers without a change.
    pub fn announce(&mut self) {
        self.publish(self.navigator.snapshot());
    }

    fn apply(&mut self, command: Command, now_ms: u64) -> bool {
        match command {
            Command::Pause => {
                (self.on_pause)();
                false
            }
            Command::Next => {
                self.indicator.show(IndicatorDirection::Right, now_ms);
                self.navigator.advance()
            }
            Command::Prev => {
                self.indicator.show(IndicatorDirection::Left, now_ms);
                self.navigator.retreat()
            }
        }
    }

    fn publish(&mut self, snap: PageSnapshot) {
        let gone = self
            .page_tx
            .as_ref()
            .is_some_and(|tx| tx.send(snap).is_err());
        if gone {
            debug!("page subscriber dropped");
            self.page_tx = None;
        }
    }
}

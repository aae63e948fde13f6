//! Page counters for the loaded deck plus the transient swipe indicator.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    pub current_page: u32,
    pub total_pages: u32,
}

/// 1-indexed; moves past either end are no-ops.
#[derive(Debug, Clone)]
pub struct PageNavigator {
    current: u32,
    total: u32,
}

impl PageNavigator {
    pub fn new(total: u32) -> Self {
        Self { current: 1, total }
    }

    pub fn current_page(&self) -> u32 {
        self.current
    }

    pub fn total_pages(&self) -> u32 {
        self.total
    }

    pub fn snapshot(&self) -> PageSnapshot {
        PageSnapshot {
            current_page: self.current_page(),
            total_pages: self.total_pages(),
        }
    }

    /// A new deck always opens on its first page.
    pub fn load(&mut self, total: u32) {
        self.total = total;
        self.current = 1;
    }

    pub fn advance(&mut self) -> bool {
        if self.current < self.total {
            self.current += 1;
            return true;
        }
        false
    }

    pub fn retreat(&mut self) -> bool {
        if self.current > 1 {
            self.current -= 1;
            return true;
        }
        false
    }

    pub fn go_to(&mut self, page: u32) -> bool {
        if (1..=self.total).contains(&page) && page != self.current {
            self.current = page;
            return true;
        }
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorDirection {
    Left,
    Right,
}

/// Direction arrow shown for a short while after each navigation command.
#[derive(Debug, Clone)]
pub struct Indicator {
    duration_ms: u64,
    shown: Option<(IndicatorDirection, u64)>,
}

impl Indicator {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            shown: None,
        }
    }

    pub fn set_duration(&mut self, duration_ms: u64) {
        self.duration_ms = duration_ms;
    }

    pub fn show(&mut self, direction: IndicatorDirection, now_ms: u64) {
        self.shown = Some((direction, now_ms));
    }

    pub fn visible(&self, now_ms: u64) -> Option<IndicatorDirection> {
        match self.shown {
            Some((dir, at)) if now_ms.saturating_sub(at) < self.duration_ms => Some(dir),
            _ => None,
        }
    }
}

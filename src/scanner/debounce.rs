use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

use chrono::{Local, NaiveDateTime};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(1000);

/// Source of time for the capture loop. The monotonic reading drives the
/// debounce window; the wall reading stamps accepted scans.
pub trait Clock: Send + Sync + 'static {
    fn monotonic(&self) -> Instant;
    fn wall(&self) -> NaiveDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn monotonic(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock that only moves when told to.
///
/// Not gated on `#[cfg(test)]` so integration tests and downstream crates
/// can drive the capture loop deterministically.
pub struct ManualClock {
    base_instant: Instant,
    base_wall: NaiveDateTime,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new(base_wall: NaiveDateTime) -> Self {
        Self {
            base_instant: Instant::now(),
            base_wall,
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = match self.offset.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *offset += by;
    }

    fn offset(&self) -> Duration {
        match self.offset.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl Clock for ManualClock {
    fn monotonic(&self) -> Instant {
        self.base_instant + self.offset()
    }

    fn wall(&self) -> NaiveDateTime {
        let offset = chrono::Duration::from_std(self.offset()).unwrap_or(chrono::Duration::zero());
        self.base_wall + offset
    }
}

/// Turns a stream of repeated detections into discrete scan events.
///
/// A candidate is accepted when it differs from the last accepted content,
/// or when more than `cooldown` has passed since the last acceptance. Either
/// condition alone is enough: a new code is never held back by the cooldown,
/// so two codes alternating in view are both accepted on every switch.
#[derive(Debug, Clone)]
pub struct DebounceGate {
    cooldown: Duration,
    last_content: Option<String>,
    last_event_time: Option<Instant>,
}

impl DebounceGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_content: None,
            last_event_time: None,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn accept(&mut self, candidate: &str, now: Instant) -> bool {
        let content_changed = self.last_content.as_deref() != Some(candidate);
        let cooled_down = self
            .last_event_time
            .is_none_or(|last| now.saturating_duration_since(last) > self.cooldown);

        if !(content_changed || cooled_down) {
            return false;
        }

        self.last_content = Some(candidate.to_string());
        self.last_event_time = Some(now);
        true
    }

    pub fn last_content(&self) -> Option<&str> {
        self.last_content.as_deref()
    }
}

impl Default for DebounceGate {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

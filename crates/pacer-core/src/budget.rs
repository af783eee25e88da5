//! Sliding-window rate budget.
//!
//! Each cap is a `SlidingWindow`: a circular array of one-minute buckets
//! covering the trailing span. Consuming advances the window to the current
//! minute (zeroing buckets that fell out), sums it, and increments the head
//! bucket only if the sum is below the cap. A class may carry an hourly and a
//! daily window; the account window applies to every class. Consumption is
//! all-or-nothing across every window that applies.
//!
//! Windows hold `span + 1` buckets, so an event is forgotten only after at
//! least a full span has elapsed since it happened, regardless of where in
//! its minute it landed.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::config::GovernorConfig;
use crate::types::ActionClass;

pub const ACCOUNT_KEY: &str = "account";

fn minute_of(ts: DateTime<Utc>) -> i64 {
    ts.timestamp().div_euclid(60)
}

fn minute_start(minute: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(minute * 60, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ---------------------------------------------------------------------------
// WindowKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Hourly,
    Daily,
}

impl WindowKind {
    pub fn span_minutes(self) -> u32 {
        match self {
            WindowKind::Hourly => 60,
            WindowKind::Daily => 24 * 60,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WindowKind::Hourly => "hourly",
            WindowKind::Daily => "daily",
        }
    }
}

// ---------------------------------------------------------------------------
// SlidingWindow
// ---------------------------------------------------------------------------

/// Persisted form of a window: non-empty buckets with their absolute minute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub span_minutes: u32,
    pub head_minute: i64,
    pub buckets: Vec<BucketRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketRecord {
    pub minute: i64,
    pub count: u32,
}

#[derive(Debug, Clone)]
pub struct SlidingWindow {
    cap: u32,
    buckets: Vec<u32>,
    head: i64,
}

impl SlidingWindow {
    pub fn new(span_minutes: u32, cap: u32, now: DateTime<Utc>) -> Self {
        Self {
            cap,
            buckets: vec![0; span_minutes as usize + 1],
            head: minute_of(now),
        }
    }

    fn len(&self) -> i64 {
        self.buckets.len() as i64
    }

    fn idx(&self, minute: i64) -> usize {
        minute.rem_euclid(self.len()) as usize
    }

    fn in_window(&self, minute: i64) -> bool {
        minute <= self.head && minute > self.head - self.len()
    }

    /// Move the head to `now`, zeroing every bucket that expired.
    pub fn advance(&mut self, now: DateTime<Utc>) {
        let now_minute = minute_of(now);
        if now_minute <= self.head {
            return;
        }
        if now_minute - self.head >= self.len() {
            self.buckets.iter_mut().for_each(|b| *b = 0);
        } else {
            for m in (self.head + 1)..=now_minute {
                let i = self.idx(m);
                self.buckets[i] = 0;
            }
        }
        self.head = now_minute;
    }

    pub fn count(&self) -> u32 {
        self.buckets.iter().sum()
    }

    pub fn cap(&self) -> u32 {
        self.cap
    }

    pub fn has_room(&self) -> bool {
        self.count() < self.cap
    }

    fn increment(&mut self) {
        let i = self.idx(self.head);
        self.buckets[i] += 1;
    }

    fn release(&mut self, minute: i64) {
        if self.in_window(minute) {
            let i = self.idx(minute);
            self.buckets[i] = self.buckets[i].saturating_sub(1);
        }
    }

    /// Earliest time at which the window will have room again, assuming no
    /// further consumption. Returns `now` if it has room already.
    pub fn next_room_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let count = self.count();
        if count < self.cap {
            return now;
        }
        let mut remaining = count;
        for minute in (self.head - self.len() + 1)..=self.head {
            let n = self.buckets[self.idx(minute)];
            if n == 0 {
                continue;
            }
            remaining -= n;
            if remaining < self.cap {
                return minute_start(minute + self.len());
            }
        }
        minute_start(self.head + self.len())
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        let buckets = ((self.head - self.len() + 1)..=self.head)
            .filter_map(|minute| {
                let count = self.buckets[self.idx(minute)];
                (count > 0).then_some(BucketRecord { minute, count })
            })
            .collect();
        WindowSnapshot {
            span_minutes: (self.buckets.len() - 1) as u32,
            head_minute: self.head,
            buckets,
        }
    }

    /// Rebuild from a snapshot, then advance to `now`. Buckets outside the
    /// (possibly reconfigured) span are dropped.
    pub fn restore(span_minutes: u32, cap: u32, snap: &WindowSnapshot, now: DateTime<Utc>) -> Self {
        let mut window = Self::new(span_minutes, cap, now);
        window.head = snap.head_minute.max(minute_of(now));
        for record in &snap.buckets {
            if window.in_window(record.minute) {
                let i = window.idx(record.minute);
                window.buckets[i] += record.count;
            }
        }
        window.advance(now);
        window
    }
}

// ---------------------------------------------------------------------------
// RateBudget
// ---------------------------------------------------------------------------

/// Proof of a tentative consumption, returned by [`RateBudget::reserve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub class: ActionClass,
    minute: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowUsage {
    pub kind: WindowKind,
    pub used: u32,
    pub cap: u32,
}

pub struct RateBudget {
    classes: HashMap<ActionClass, Vec<(WindowKind, SlidingWindow)>>,
    account: Option<SlidingWindow>,
}

impl RateBudget {
    pub fn from_config(config: &GovernorConfig, now: DateTime<Utc>) -> Self {
        let mut classes = HashMap::new();
        for (class, policy) in &config.classes {
            let mut windows = Vec::new();
            if let Some(cap) = policy.hourly_cap {
                windows.push((
                    WindowKind::Hourly,
                    SlidingWindow::new(WindowKind::Hourly.span_minutes(), cap, now),
                ));
            }
            if let Some(cap) = policy.daily_cap {
                windows.push((
                    WindowKind::Daily,
                    SlidingWindow::new(WindowKind::Daily.span_minutes(), cap, now),
                ));
            }
            classes.insert(*class, windows);
        }
        let account = config
            .account_hourly_cap
            .map(|cap| SlidingWindow::new(WindowKind::Hourly.span_minutes(), cap, now));
        Self { classes, account }
    }

    fn windows_mut(
        &mut self,
        class: ActionClass,
    ) -> impl Iterator<Item = &mut SlidingWindow> + '_ {
        let class_windows = self
            .classes
            .get_mut(&class)
            .into_iter()
            .flat_map(|ws| ws.iter_mut().map(|(_, w)| w));
        class_windows.chain(self.account.iter_mut())
    }

    /// Consume one slot for `class` if every applicable window has room.
    pub fn try_consume(&mut self, class: ActionClass, now: DateTime<Utc>) -> bool {
        self.reserve(class, now).is_some()
    }

    /// Like `try_consume`, but returns a token that can undo the consumption.
    pub fn reserve(&mut self, class: ActionClass, now: DateTime<Utc>) -> Option<Reservation> {
        let mut all_room = true;
        for window in self.windows_mut(class) {
            window.advance(now);
            all_room &= window.has_room();
        }
        if !all_room {
            return None;
        }
        for window in self.windows_mut(class) {
            window.increment();
        }
        Some(Reservation {
            class,
            minute: minute_of(now),
        })
    }

    /// Undo a reservation that was not used.
    pub fn release(&mut self, reservation: Reservation) {
        for window in self.windows_mut(reservation.class) {
            window.release(reservation.minute);
        }
    }

    /// When `class` will next have room in every window.
    pub fn retry_after(&mut self, class: ActionClass, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut at = now;
        for window in self.windows_mut(class) {
            window.advance(now);
            at = at.max(window.next_room_at(now));
        }
        at
    }

    pub fn usage(&mut self, class: ActionClass, now: DateTime<Utc>) -> Vec<WindowUsage> {
        let Some(windows) = self.classes.get_mut(&class) else {
            return Vec::new();
        };
        windows
            .iter_mut()
            .map(|(kind, w)| {
                w.advance(now);
                WindowUsage {
                    kind: *kind,
                    used: w.count(),
                    cap: w.cap(),
                }
            })
            .collect()
    }

    pub fn account_usage(&mut self, now: DateTime<Utc>) -> Option<WindowUsage> {
        self.account.as_mut().map(|w| {
            w.advance(now);
            WindowUsage {
                kind: WindowKind::Hourly,
                used: w.count(),
                cap: w.cap(),
            }
        })
    }

    /// Snapshots of the windows touched by `class`, keyed for the store.
    pub fn snapshots_for(&self, class: ActionClass) -> Vec<(String, WindowSnapshot)> {
        let mut out: Vec<(String, WindowSnapshot)> = self
            .classes
            .get(&class)
            .into_iter()
            .flatten()
            .map(|(kind, w)| (format!("{class}/{}", kind.as_str()), w.snapshot()))
            .collect();
        if let Some(w) = &self.account {
            out.push((format!("{ACCOUNT_KEY}/hourly"), w.snapshot()));
        }
        out
    }

    /// Replace windows with persisted snapshots. Unknown keys are ignored.
    pub fn restore(&mut self, snapshots: &[(String, WindowSnapshot)], now: DateTime<Utc>) {
        for (key, snap) in snapshots {
            let Some((owner, kind)) = key.split_once('/') else {
                continue;
            };
            let kind = match kind {
                "hourly" => WindowKind::Hourly,
                "daily" => WindowKind::Daily,
                _ => continue,
            };
            if owner == ACCOUNT_KEY {
                if let Some(w) = self.account.as_mut() {
                    *w = SlidingWindow::restore(kind.span_minutes(), w.cap(), snap, now);
                }
                continue;
            }
            let Ok(class) = owner.parse::<ActionClass>() else {
                continue;
            };
            if let Some(windows) = self.classes.get_mut(&class) {
                for (k, w) in windows.iter_mut() {
                    if *k == kind {
                        *w = SlidingWindow::restore(kind.span_minutes(), w.cap(), snap, now);
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

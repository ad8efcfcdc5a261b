//! Clocks and the delayed-send scheduler.

use crate::action::Destination;
use crate::event::Event;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A millisecond clock.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Milliseconds since the clock's epoch.
    fn now(&self) -> u64;

    fn as_simulated(&self) -> Option<&SimulatedClock> {
        None
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct SimulatedClock {
    now: AtomicU64,
}

impl SimulatedClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn as_simulated(&self) -> Option<&SimulatedClock> {
        Some(self)
    }
}

/// Wall-clock time since creation.
#[derive(Debug)]
pub struct SystemClock {
    start: std::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Tokio time since creation. Follows a paused test runtime.
#[cfg(feature = "tokio")]
#[derive(Debug)]
pub struct TokioClock {
    start: tokio::time::Instant,
}

#[cfg(feature = "tokio")]
impl TokioClock {
    pub fn new() -> Self {
        Self {
            start: tokio::time::Instant::now(),
        }
    }
}

#[cfg(feature = "tokio")]
impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "tokio")]
impl Clock for TokioClock {
    fn now(&self) -> u64 {
        tokio::time::Instant::now()
            .duration_since(self.start)
            .as_millis() as u64
    }
}

/// A pending delayed send.
#[derive(Debug)]
pub(crate) struct Timer {
    pub due: u64,
    /// Session id of the actor that scheduled it.
    pub owner: String,
    pub id: Option<String>,
    pub to: Destination,
    pub event: Event,
}

/// Timers ordered by due time, then by scheduling order.
#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    timers: BTreeMap<(u64, u64), Timer>,
    ids: HashMap<(String, String), (u64, u64)>,
    next_seq: u64,
}

impl Scheduler {
    /// Adds a timer. A timer with the same owner and id is replaced.
    pub fn schedule(&mut self, timer: Timer) {
        if let Some(id) = &timer.id {
            self.cancel(&timer.owner, id);
        }
        let key = (timer.due, self.next_seq);
        self.next_seq += 1;
        if let Some(id) = &timer.id {
            self.ids.insert((timer.owner.clone(), id.clone()), key);
        }
        self.timers.insert(key, timer);
    }

    pub fn cancel(&mut self, owner: &str, id: &str) -> bool {
        match self.ids.remove(&(owner.to_string(), id.to_string())) {
            Some(key) => self.timers.remove(&key).is_some(),
            None => false,
        }
    }

    /// Drops every timer scheduled by `owner`.
    pub fn cancel_owner(&mut self, owner: &str) -> usize {
        let keys: Vec<(u64, u64)> = self
            .timers
            .iter()
            .filter(|(_, t)| t.owner == owner)
            .map(|(k, _)| *k)
            .collect();
        for key in &keys {
            self.timers.remove(key);
        }
        self.ids.retain(|(o, _), _| o != owner);
        keys.len()
    }

    /// Removes and returns the earliest timer due at or before `now`.
    pub fn pop_due(&mut self, now: u64) -> Option<Timer> {
        let key = *self.timers.keys().next()?;
        if key.0 > now {
            return None;
        }
        let timer = self.timers.remove(&key)?;
        if let Some(id) = &timer.id {
            self.ids.remove(&(timer.owner.clone(), id.clone()));
        }
        Some(timer)
    }

    pub fn next_due(&self) -> Option<u64> {
        self.timers.keys().next().map(|k| k.0)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer(due: u64, owner: &str, id: Option<&str>, name: &str) -> Timer {
        Timer {
            due,
            owner: owner.to_string(),
            id: id.map(str::to_string),
            to: Destination::Session(owner.to_string()),
            event: Event::new(name),
        }
    }

    #[test]
    fn test_due_then_insertion_order() {
        let mut scheduler = Scheduler::default();
        scheduler.schedule(timer(200, "a", None, "late"));
        scheduler.schedule(timer(100, "a", None, "first"));
        scheduler.schedule(timer(100, "b", None, "second"));

        assert_eq!(scheduler.next_due(), Some(100));
        assert!(scheduler.pop_due(99).is_none());
        assert_eq!(scheduler.pop_due(150).unwrap().event.name, "first");
        assert_eq!(scheduler.pop_due(150).unwrap().event.name, "second");
        assert!(scheduler.pop_due(150).is_none());
        assert_eq!(scheduler.pop_due(200).unwrap().event.name, "late");
    }

    #[test]
    fn test_cancel_by_owner_and_id() {
        let mut scheduler = Scheduler::default();
        scheduler.schedule(timer(100, "a", Some("t"), "A"));
        scheduler.schedule(timer(100, "b", Some("t"), "B"));

        assert!(scheduler.cancel("a", "t"));
        assert!(!scheduler.cancel("a", "t"));
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.pop_due(100).unwrap().event.name, "B");
    }

    #[test]
    fn test_same_id_replaces() {
        let mut scheduler = Scheduler::default();
        scheduler.schedule(timer(100, "a", Some("t"), "old"));
        scheduler.schedule(timer(300, "a", Some("t"), "new"));

        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.next_due(), Some(300));
    }

    #[test]
    fn test_cancel_owner() {
        let mut scheduler = Scheduler::default();
        scheduler.schedule(timer(100, "a", Some("x"), "A1"));
        scheduler.schedule(timer(200, "a", None, "A2"));
        scheduler.schedule(timer(150, "b", None, "B"));

        assert_eq!(scheduler.cancel_owner("a"), 2);
        assert_eq!(scheduler.len(), 1);
        assert!(!scheduler.cancel("a", "x"));
    }

    #[test]
    fn test_simulated_clock() {
        let clock = SimulatedClock::new();
        clock.advance(40);
        clock.advance(2);
        assert_eq!(clock.now(), 42);
        clock.set(7);
        assert_eq!(clock.now(), 7);
        assert!(clock.as_simulated().is_some());
        assert!(SystemClock::new().as_simulated().is_none());
    }
}

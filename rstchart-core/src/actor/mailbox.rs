//! Per-actor FIFO mailbox.

use crate::event::{Event, INIT_EVENT, STOP_EVENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

/// Lifecycle status of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorStatus {
    NotStarted,
    Running,
    Stopped,
}

/// Result of offering an event to a mailbox.
#[derive(Debug)]
pub(crate) enum Enqueued {
    /// Queued on a running actor; the caller should flush.
    Ready,
    /// Held until the actor starts.
    Buffered,
    /// The actor is stopped.
    Dropped(Event),
    /// The actor has not started and buffering is disabled.
    Rejected,
}

/// An unbounded queue with at most one flush in flight.
#[derive(Debug)]
pub(crate) struct Mailbox {
    queue: VecDeque<Event>,
    status: ActorStatus,
    flushing: bool,
}

impl Mailbox {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            status: ActorStatus::NotStarted,
            flushing: false,
        }
    }

    pub fn status(&self) -> ActorStatus {
        self.status
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn enqueue(&mut self, event: Event, defer: bool) -> Enqueued {
        match self.status {
            ActorStatus::Stopped => Enqueued::Dropped(event),
            ActorStatus::NotStarted if !defer => Enqueued::Rejected,
            ActorStatus::NotStarted => {
                self.queue.push_back(event);
                Enqueued::Buffered
            }
            ActorStatus::Running => {
                self.queue.push_back(event);
                Enqueued::Ready
            }
        }
    }

    /// Moves to `Running` with the init signal ahead of anything buffered.
    /// Returns false if the actor was already started.
    pub fn start(&mut self) -> bool {
        if self.status != ActorStatus::NotStarted {
            return false;
        }
        self.status = ActorStatus::Running;
        self.queue
            .push_front(Event::platform(INIT_EVENT, Value::Null));
        true
    }

    /// Replaces everything queued with the stop signal.
    pub fn request_stop(&mut self) {
        self.queue.clear();
        self.queue
            .push_back(Event::platform(STOP_EVENT, Value::Null));
    }

    /// Claims the flush. Returns false if a flush is already in progress or
    /// the actor is not running.
    pub fn begin_flush(&mut self) -> bool {
        if self.flushing || self.status != ActorStatus::Running {
            return false;
        }
        self.flushing = true;
        true
    }

    /// Next event of the current flush; ends the flush when empty.
    pub fn next(&mut self) -> Option<Event> {
        let event = self.queue.pop_front();
        if event.is_none() {
            self.flushing = false;
        }
        event
    }

    /// Marks the actor stopped and drops anything left.
    pub fn close(&mut self) {
        self.status = ActorStatus::Stopped;
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_before_start() {
        let mut mailbox = Mailbox::new();
        assert!(matches!(mailbox.enqueue(Event::new("A"), true), Enqueued::Buffered));
        assert!(matches!(mailbox.enqueue(Event::new("B"), false), Enqueued::Rejected));
        assert!(!mailbox.begin_flush());

        assert!(mailbox.start());
        assert!(!mailbox.start());
        assert!(mailbox.begin_flush());
        assert_eq!(mailbox.next().unwrap().name, INIT_EVENT);
        assert_eq!(mailbox.next().unwrap().name, "A");
        assert!(mailbox.next().is_none());
        assert!(mailbox.begin_flush());
    }

    #[test]
    fn test_single_flush_in_flight() {
        let mut mailbox = Mailbox::new();
        mailbox.start();
        assert!(mailbox.begin_flush());
        assert!(!mailbox.begin_flush());
        assert!(matches!(mailbox.enqueue(Event::new("X"), true), Enqueued::Ready));
        assert_eq!(mailbox.len(), 2);
    }

    #[test]
    fn test_stop_clears_queue() {
        let mut mailbox = Mailbox::new();
        mailbox.start();
        mailbox.enqueue(Event::new("A"), true);
        mailbox.request_stop();
        assert_eq!(mailbox.len(), 1);
        assert!(mailbox.begin_flush());
        assert_eq!(mailbox.next().unwrap().name, STOP_EVENT);

        mailbox.close();
        assert_eq!(mailbox.status(), ActorStatus::Stopped);
        assert!(matches!(mailbox.enqueue(Event::new("late"), true), Enqueued::Dropped(_)));
    }
}

//! The actor system: registry, scheduler and clock shared by a tree of
//! actors.
//!
//! A system is created with its root actor and handed down to every actor it
//! spawns. The registry only holds weak references; actors are owned by
//! their parents and by whoever holds the root [`ActorRef`].

use super::actor_ref::{ActorCell, ActorOptions, CellSpec};
use super::logic::ActorLogic;
use super::scheduler::{Clock, Scheduler, SimulatedClock, SystemClock, Timer};
use super::ActorRef;
use crate::action::Destination;
use crate::config::{ClockKind, RuntimeConfig};
use crate::error::ActorError;
use crate::event::Event;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

/// Handle to a shared actor system. Cloning is cheap.
#[derive(Clone)]
pub struct System {
    inner: Arc<SystemInner>,
}

struct SystemInner {
    config: RuntimeConfig,
    clock: Arc<dyn Clock>,
    actors: DashMap<String, Weak<ActorCell>>,
    system_ids: DashMap<String, String>,
    scheduler: Mutex<Scheduler>,
    next_session: AtomicU64,
    /// Synchronous deliveries in progress, per calling thread.
    deliveries: DashMap<ThreadId, Delivery>,
    #[cfg(feature = "tokio")]
    timers_changed: tokio::sync::Notify,
}

impl System {
    /// Creates a system with the clock named by the config.
    pub fn new(config: RuntimeConfig) -> Self {
        let clock: Arc<dyn Clock> = match config.clock {
            ClockKind::System => Arc::new(SystemClock::new()),
            ClockKind::Simulated => Arc::new(SimulatedClock::new()),
        };
        Self::with_clock(config, clock)
    }

    pub fn with_clock(config: RuntimeConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(SystemInner {
                config,
                clock,
                actors: DashMap::new(),
                system_ids: DashMap::new(),
                scheduler: Mutex::new(Scheduler::default()),
                next_session: AtomicU64::new(0),
                deliveries: DashMap::new(),
                #[cfg(feature = "tokio")]
                timers_changed: tokio::sync::Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub fn now(&self) -> u64 {
        self.inner.clock.now()
    }

    /// Creates a root actor in this system. The actor is not started.
    pub fn spawn(
        &self,
        logic: Arc<dyn ActorLogic>,
        options: ActorOptions,
    ) -> Result<ActorRef, ActorError> {
        ActorCell::create(
            self.clone(),
            logic,
            CellSpec {
                id: options.id.as_deref(),
                parent: None,
                src: None,
                system_id: options.system_id.as_deref(),
                input: &options.input,
                snapshot: options.snapshot.as_ref(),
            },
        )
    }

    /// Looks up an actor by the system id it was spawned with.
    pub fn get(&self, system_id: &str) -> Option<ActorRef> {
        let session = self.inner.system_ids.get(system_id)?.value().clone();
        self.lookup(&session)
    }

    /// Looks up a live actor by session id.
    pub fn lookup(&self, session_id: &str) -> Option<ActorRef> {
        let cell = self.inner.actors.get(session_id)?.value().upgrade()?;
        Some(ActorRef(cell))
    }

    /// Number of registered actors that are still alive.
    pub fn actor_count(&self) -> usize {
        self.inner
            .actors
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.scheduler.lock().len()
    }

    /// Due time of the earliest pending timer.
    pub fn next_due(&self) -> Option<u64> {
        self.inner.scheduler.lock().next_due()
    }

    /// Advances a simulated clock by `ms`, firing every timer that falls due
    /// on the way in due-time order. The clock stands at each timer's due
    /// time while it fires. On any other clock only timers already due fire.
    pub fn advance(&self, ms: u64) -> Result<(), ActorError> {
        let Some(clock) = self.inner.clock.as_simulated() else {
            tracing::warn!("advance called on a non-simulated clock");
            return self.fire_due();
        };
        let target = clock.now() + ms;
        self.enter();
        loop {
            let next = self.inner.scheduler.lock().pop_due(target);
            let Some(timer) = next else {
                break;
            };
            if timer.due > clock.now() {
                clock.set(timer.due);
            }
            self.fire(timer);
        }
        clock.set(target);
        self.leave()
    }

    /// Fires every timer due at the current time.
    pub fn fire_due(&self) -> Result<(), ActorError> {
        let now = self.now();
        self.enter();
        loop {
            let next = self.inner.scheduler.lock().pop_due(now);
            let Some(timer) = next else {
                break;
            };
            self.fire(timer);
        }
        self.leave()
    }

    fn fire(&self, timer: Timer) {
        let target = match timer.to {
            Destination::Actor(actor) => Some(actor),
            Destination::Session(session) => self.lookup(&session),
        };
        match target {
            Some(actor) => {
                tracing::debug!(
                    actor = %actor.id(),
                    event = %timer.event.name,
                    due = timer.due,
                    "timer fired"
                );
                if let Err(e) = actor.send(timer.event) {
                    tracing::warn!(actor = %actor.id(), error = %e, "timer delivery failed");
                }
            }
            None => tracing::debug!(
                owner = %timer.owner,
                event = %timer.event.name,
                "timer target no longer exists"
            ),
        }
    }

    pub(crate) fn next_session_id(&self) -> String {
        let n = self.inner.next_session.fetch_add(1, Ordering::SeqCst);
        format!("actor-{n}")
    }

    pub(crate) fn register(&self, cell: &Arc<ActorCell>) {
        self.inner
            .actors
            .insert(cell.session_id().to_string(), Arc::downgrade(cell));
        if let Some(system_id) = cell.system_id() {
            if self.inner.system_ids.contains_key(system_id) {
                tracing::warn!(system_id, "system id already registered, replacing");
            }
            self.inner
                .system_ids
                .insert(system_id.to_string(), cell.session_id().to_string());
        }
    }

    pub(crate) fn unregister(&self, session_id: &str, system_id: Option<&str>) {
        self.inner.actors.remove(session_id);
        if let Some(system_id) = system_id {
            self.inner
                .system_ids
                .remove_if(system_id, |_, session| session == session_id);
        }
    }

    pub(crate) fn schedule(
        &self,
        owner: &str,
        id: Option<String>,
        delay: u64,
        to: Destination,
        event: Event,
    ) {
        let due = self.now() + delay;
        tracing::debug!(owner, event = %event.name, due, "timer scheduled");
        self.inner.scheduler.lock().schedule(Timer {
            due,
            owner: owner.to_string(),
            id,
            to,
            event,
        });
        #[cfg(feature = "tokio")]
        self.inner.timers_changed.notify_one();
    }

    pub(crate) fn cancel(&self, owner: &str, id: &str) {
        if self.inner.scheduler.lock().cancel(owner, id) {
            tracing::debug!(owner, id, "timer cancelled");
        }
    }

    pub(crate) fn cancel_owner(&self, owner: &str) {
        let cancelled = self.inner.scheduler.lock().cancel_owner(owner);
        if cancelled > 0 {
            tracing::debug!(owner, cancelled, "timers cancelled");
        }
    }

    /// Records an error for the delivery running on the current thread.
    pub(crate) fn record_unhandled(&self, error: ActorError) {
        match self.inner.deliveries.get_mut(&std::thread::current().id()) {
            Some(mut delivery) => delivery.unhandled.push(error),
            None => tracing::warn!(error = %error, "unhandled error outside a delivery"),
        }
    }

    /// Marks the start of a synchronous delivery on the current thread.
    /// Nested deliveries only report unhandled errors once the outermost one
    /// finishes. Deliveries on other threads, such as a timer driver, keep
    /// their own errors.
    pub(crate) fn enter(&self) {
        self.inner
            .deliveries
            .entry(std::thread::current().id())
            .or_default()
            .depth += 1;
    }

    /// Ends a delivery; the outermost one returns the first unhandled error
    /// recorded while it ran.
    pub(crate) fn leave(&self) -> Result<(), ActorError> {
        let thread = std::thread::current().id();
        {
            let Some(mut delivery) = self.inner.deliveries.get_mut(&thread) else {
                return Ok(());
            };
            delivery.depth = delivery.depth.saturating_sub(1);
            if delivery.depth > 0 {
                return Ok(());
            }
        }
        match self.inner.deliveries.remove(&thread) {
            Some((_, delivery)) => match delivery.unhandled.into_iter().next() {
                Some(first) => Err(first),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    #[cfg(feature = "tokio")]
    pub(crate) fn timers_changed(&self) -> tokio::sync::futures::Notified<'_> {
        self.inner.timers_changed.notified()
    }
}

#[derive(Default)]
struct Delivery {
    depth: usize,
    unhandled: Vec<ActorError>,
}

impl fmt::Debug for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("System")
            .field("clock", &self.inner.clock)
            .field("actors", &self.inner.actors.len())
            .field("pending_timers", &self.pending_timers())
            .finish()
    }
}

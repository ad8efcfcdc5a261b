//! Actor references and the cell behind them.
//!
//! An actor processes its mailbox synchronously inside `send`, `start` and
//! `stop`. Only one flush runs per actor at a time; events sent while a flush
//! is in progress, including sends to itself, are appended and picked up by
//! the running flush. No lock is held while logic, effects or observers run.

use super::logic::{ActorLogic, ActorScope, ActorSnapshot};
use super::mailbox::{ActorStatus, Enqueued, Mailbox};
use super::observer::{Observer, Subscription};
use super::scheduler::Clock;
use super::system::System;
use crate::action::{ActionArgs, Destination, Effect};
use crate::config::RuntimeConfig;
use crate::error::ActorError;
use crate::event::{Event, INIT_EVENT, STOP_EVENT};
use crate::snapshot::{PersistedSnapshot, SnapshotStatus};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

/// Options for creating a root actor.
#[derive(Clone, Default)]
pub struct ActorOptions {
    pub input: Value,
    pub id: Option<String>,
    pub system_id: Option<String>,
    /// Restores the actor from a persisted snapshot instead of starting
    /// fresh.
    pub snapshot: Option<PersistedSnapshot>,
    pub config: RuntimeConfig,
    /// Overrides the clock named by `config`.
    pub clock: Option<Arc<dyn Clock>>,
}

impl ActorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_system_id(mut self, system_id: impl Into<String>) -> Self {
        self.system_id = Some(system_id.into());
        self
    }

    pub fn with_snapshot(mut self, snapshot: PersistedSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }
}

impl fmt::Debug for ActorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorOptions")
            .field("input", &self.input)
            .field("id", &self.id)
            .field("system_id", &self.system_id)
            .field("restore", &self.snapshot.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Creates a root actor together with a new system. The actor is not
/// started.
pub fn create_actor(
    logic: Arc<dyn ActorLogic>,
    options: ActorOptions,
) -> Result<ActorRef, ActorError> {
    let system = match &options.clock {
        Some(clock) => System::with_clock(options.config.clone(), clock.clone()),
        None => System::new(options.config.clone()),
    };
    system.spawn(logic, options)
}

pub(crate) struct CellSpec<'a> {
    pub id: Option<&'a str>,
    pub parent: Option<String>,
    pub src: Option<&'a str>,
    pub system_id: Option<&'a str>,
    pub input: &'a Value,
    pub snapshot: Option<&'a PersistedSnapshot>,
}

pub(crate) struct ActorCell {
    id: String,
    session_id: String,
    /// Session id of the parent. The parent owns this actor, not the other
    /// way round.
    parent: Option<String>,
    src: Option<String>,
    system_id: Option<String>,
    system: System,
    logic: Arc<dyn ActorLogic>,
    mailbox: Mutex<Mailbox>,
    state: Mutex<CellState>,
}

struct CellState {
    snapshot: ActorSnapshot,
    observers: Vec<(u64, Observer)>,
    /// Effects produced while computing the initial snapshot, run on start.
    pending: Vec<Effect>,
    next_observer: u64,
}

impl ActorCell {
    pub(crate) fn create(
        system: System,
        logic: Arc<dyn ActorLogic>,
        spec: CellSpec<'_>,
    ) -> Result<ActorRef, ActorError> {
        let session_id = system.next_session_id();
        let id = spec
            .id
            .map(str::to_string)
            .unwrap_or_else(|| session_id.clone());
        let mut scope = ActorScope::new(
            system.clone(),
            session_id.clone(),
            id.clone(),
            spec.parent.clone(),
        );
        let snapshot = match spec.snapshot {
            Some(persisted) => logic.restore(persisted, &mut scope)?,
            None => logic.initial_snapshot(&mut scope, spec.input)?,
        };

        let cell = Arc::new(ActorCell {
            id,
            session_id,
            parent: spec.parent,
            src: spec.src.map(str::to_string),
            system_id: spec.system_id.map(str::to_string),
            system: system.clone(),
            logic,
            mailbox: Mutex::new(Mailbox::new()),
            state: Mutex::new(CellState {
                snapshot,
                observers: Vec::new(),
                pending: scope.take_effects(),
                next_observer: 0,
            }),
        });
        system.register(&cell);
        tracing::debug!(
            actor = %cell.id,
            session = %cell.session_id,
            logic = cell.logic.kind(),
            "actor created"
        );
        Ok(ActorRef(cell))
    }

    pub(crate) fn session_id(&self) -> &str {
        &self.session_id
    }

    pub(crate) fn system_id(&self) -> Option<&str> {
        self.system_id.as_deref()
    }

    pub(crate) fn remove_observer(&self, id: u64) {
        self.state.lock().observers.retain(|(i, _)| *i != id);
    }
}

/// A reference to a running (or stopped) actor. Cloning is cheap; equality
/// is by session id.
#[derive(Clone)]
pub struct ActorRef(pub(crate) Arc<ActorCell>);

impl ActorRef {
    /// Id within the parent, or the session id for actors spawned without
    /// one.
    pub fn id(&self) -> &str {
        &self.0.id
    }

    /// Unique id within the system.
    pub fn session_id(&self) -> &str {
        &self.0.session_id
    }

    pub fn system_id(&self) -> Option<&str> {
        self.0.system_id.as_deref()
    }

    /// Implementation key the actor was spawned from.
    pub fn src(&self) -> Option<&str> {
        self.0.src.as_deref()
    }

    pub fn parent_session(&self) -> Option<&str> {
        self.0.parent.as_deref()
    }

    pub fn system(&self) -> &System {
        &self.0.system
    }

    pub fn logic(&self) -> &Arc<dyn ActorLogic> {
        &self.0.logic
    }

    pub fn status(&self) -> ActorStatus {
        self.0.mailbox.lock().status()
    }

    pub fn get_snapshot(&self) -> ActorSnapshot {
        self.0.state.lock().snapshot.clone()
    }

    pub fn persisted(&self) -> Result<PersistedSnapshot, ActorError> {
        let snapshot = self.get_snapshot();
        self.0.logic.persist(&snapshot)
    }

    pub fn to_json(&self) -> Value {
        let mut value = json!({"id": self.id(), "sessionId": self.session_id()});
        if let Some(system_id) = self.system_id() {
            value["systemId"] = json!(system_id);
        }
        value
    }

    /// Starts the actor and processes anything sent before it started.
    pub fn start(&self) -> Result<(), ActorError> {
        if !self.0.mailbox.lock().start() {
            return Ok(());
        }
        tracing::info!(actor = %self.id(), session = %self.session_id(), "actor started");
        self.flush_outer()
    }

    /// Queues an event and processes the mailbox if no flush is running.
    ///
    /// Returns an error for events a strict machine does not accept, for
    /// sends to an actor that has not started when buffering is disabled,
    /// and for errors no observer handled while processing.
    pub fn send(&self, event: impl Into<Event>) -> Result<(), ActorError> {
        let event = event.into();
        self.0.logic.accepts(&event)?;

        let config = self.0.system.config();
        let (outcome, queued) = {
            let mut mailbox = self.0.mailbox.lock();
            let outcome = mailbox.enqueue(event, config.defer_events);
            (outcome, mailbox.len())
        };
        if queued == config.mailbox_warn_len {
            tracing::warn!(actor = %self.id(), queued, "mailbox is backing up");
        }

        match outcome {
            Enqueued::Ready => self.flush_outer(),
            Enqueued::Buffered => Ok(()),
            Enqueued::Dropped(event) => {
                if config.warn_on_dropped {
                    tracing::warn!(
                        actor = %self.id(),
                        event = %event.name,
                        "event sent to stopped actor dropped"
                    );
                }
                Ok(())
            }
            Enqueued::Rejected => Err(ActorError::NotStarted {
                actor: self.id().to_string(),
            }),
        }
    }

    /// Stops the actor: pending events are discarded, exit actions run and
    /// children are stopped.
    pub fn stop(&self) -> Result<(), ActorError> {
        let status = {
            let mut mailbox = self.0.mailbox.lock();
            let status = mailbox.status();
            if status == ActorStatus::Running {
                mailbox.request_stop();
            }
            status
        };
        match status {
            ActorStatus::Running => self.flush_outer(),
            ActorStatus::NotStarted => {
                {
                    let mut state = self.0.state.lock();
                    state.snapshot = state.snapshot.clone().stopped();
                }
                self.halt();
                self.notify_complete();
                Ok(())
            }
            ActorStatus::Stopped => Ok(()),
        }
    }

    pub fn subscribe(&self, observer: impl Into<Observer>) -> Subscription {
        let observer = observer.into();
        if self.status() == ActorStatus::Stopped {
            observer.notify_complete();
            return Subscription::closed();
        }
        let mut state = self.0.state.lock();
        let id = state.next_observer;
        state.next_observer += 1;
        state.observers.push((id, observer));
        Subscription::new(Arc::downgrade(&self.0), id)
    }

    fn flush_outer(&self) -> Result<(), ActorError> {
        self.0.system.enter();
        self.flush();
        self.0.system.leave()
    }

    fn flush(&self) {
        if !self.0.mailbox.lock().begin_flush() {
            return;
        }
        loop {
            let next = self.0.mailbox.lock().next();
            let Some(event) = next else {
                break;
            };
            self.process(event);
        }
    }

    fn process(&self, event: Event) {
        tracing::debug!(actor = %self.id(), event = %event.name, "processing event");
        match event.name.as_str() {
            INIT_EVENT => self.handle_start(),
            STOP_EVENT => self.handle_stop(),
            _ => self.handle_event(event),
        }
    }

    fn scope(&self) -> ActorScope {
        ActorScope::new(
            self.0.system.clone(),
            self.0.session_id.clone(),
            self.0.id.clone(),
            self.0.parent.clone(),
        )
    }

    fn handle_start(&self) {
        let (snapshot, pending) = {
            let mut state = self.0.state.lock();
            (state.snapshot.clone(), std::mem::take(&mut state.pending))
        };
        self.run_effects(pending);

        let mut scope = self.scope();
        match self.0.logic.start(&snapshot, &mut scope) {
            Ok(Some(next)) => self.commit(next, scope.take_effects(), None),
            Ok(None) => self.commit(snapshot, scope.take_effects(), None),
            Err(e) => {
                let failed = snapshot.failed(e.to_event_data());
                self.commit(failed, Vec::new(), Some(e));
            }
        }
    }

    fn handle_event(&self, event: Event) {
        let snapshot = self.0.state.lock().snapshot.clone();
        if snapshot.status() != SnapshotStatus::Active {
            tracing::debug!(actor = %self.id(), event = %event.name, "snapshot inactive, ignoring");
            return;
        }
        let mut scope = self.scope();
        match self.0.logic.transition(&snapshot, &event, &mut scope) {
            Ok(next) => self.commit(next, scope.take_effects(), None),
            Err(e) => {
                tracing::debug!(actor = %self.id(), error = %e, "transition failed");
                let failed = snapshot.failed(e.to_event_data());
                self.commit(failed, Vec::new(), Some(e));
            }
        }
    }

    fn handle_stop(&self) {
        let snapshot = self.0.state.lock().snapshot.clone();
        let mut scope = self.scope();
        let next = match self.0.logic.stop(&snapshot, &mut scope) {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!(actor = %self.id(), error = %e, "stop failed");
                snapshot.stopped()
            }
        };
        self.0.state.lock().snapshot = next;
        self.0.mailbox.lock().close();
        self.run_effects(scope.take_effects());
        self.halt();
        self.notify_complete();
    }

    /// Stores the snapshot, runs its effects, notifies observers, then
    /// settles a finished actor.
    fn commit(&self, next: ActorSnapshot, effects: Vec<Effect>, failure: Option<ActorError>) {
        let observers: Vec<Observer> = {
            let mut state = self.0.state.lock();
            state.snapshot = next.clone();
            state.observers.iter().map(|(_, o)| o.clone()).collect()
        };
        self.run_effects(effects);
        for observer in &observers {
            observer.notify_next(&next);
        }
        match next.status() {
            SnapshotStatus::Done => self.complete(&next),
            SnapshotStatus::Error => self.fail(&next, failure),
            SnapshotStatus::Active | SnapshotStatus::Stopped => {}
        }
    }

    fn complete(&self, snapshot: &ActorSnapshot) {
        tracing::info!(actor = %self.id(), "actor done");
        self.halt();
        self.notify_complete();
        if let Some(parent) = self.parent_ref() {
            let output = snapshot.output().cloned().unwrap_or(Value::Null);
            let event = Event::done_actor(self.id(), output).with_origin(self.session_id());
            if let Err(e) = parent.send(event) {
                tracing::debug!(actor = %self.id(), error = %e, "parent did not take completion");
            }
        }
    }

    fn fail(&self, snapshot: &ActorSnapshot, failure: Option<ActorError>) {
        let data = snapshot.error().cloned().unwrap_or(Value::Null);
        self.halt();

        let error = failure.unwrap_or_else(|| ActorError::Unhandled {
            actor: self.id().to_string(),
            data: data.clone(),
        });
        let handlers: Vec<Observer> = {
            let state = self.0.state.lock();
            state
                .observers
                .iter()
                .filter(|(_, o)| o.handles_errors())
                .map(|(_, o)| o.clone())
                .collect()
        };
        if !handlers.is_empty() {
            for observer in &handlers {
                observer.notify_error(&error);
            }
        } else if self.0.parent.is_none() {
            tracing::error!(actor = %self.id(), error = %error, "unhandled actor error");
            self.0.system.record_unhandled(error);
        }

        if let Some(parent) = self.parent_ref() {
            let event = Event::error_platform(self.id(), data).with_origin(self.session_id());
            if let Err(e) = parent.send(event) {
                tracing::debug!(actor = %self.id(), error = %e, "parent did not take error");
            }
        }
    }

    /// Closes the mailbox, stops remaining children and leaves the system.
    fn halt(&self) {
        self.0.mailbox.lock().close();
        let children = self.0.state.lock().snapshot.children();
        for child in children {
            if let Err(e) = child.stop() {
                tracing::debug!(actor = %self.id(), child = %child.id(), error = %e, "child stop failed");
            }
        }
        self.0.system.cancel_owner(&self.0.session_id);
        self.0
            .system
            .unregister(&self.0.session_id, self.0.system_id.as_deref());
        tracing::info!(actor = %self.id(), session = %self.session_id(), "actor stopped");
    }

    fn notify_complete(&self) {
        let observers = std::mem::take(&mut self.0.state.lock().observers);
        for (_, observer) in &observers {
            observer.notify_complete();
        }
    }

    fn parent_ref(&self) -> Option<ActorRef> {
        let parent = self.0.parent.as_deref()?;
        self.0.system.lookup(parent)
    }

    fn owns(&self, child: &ActorRef) -> bool {
        self.0.state.lock().snapshot.has_child(child)
    }

    fn run_effects(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send {
                    to,
                    event,
                    delay: None,
                    ..
                } => self.deliver(to, event),
                Effect::Send {
                    to,
                    event,
                    delay: Some(ms),
                    id,
                } => self.0.system.schedule(&self.0.session_id, id, ms, to, event),
                Effect::Start(child) => {
                    let owned = self.owns(&child);
                    if !owned {
                        tracing::debug!(actor = %self.id(), child = %child.id(), "child gone before start");
                    } else if let Err(e) = child.start() {
                        tracing::debug!(actor = %self.id(), child = %child.id(), error = %e, "child start failed");
                    }
                }
                Effect::Stop(child) => {
                    if let Err(e) = child.stop() {
                        tracing::debug!(actor = %self.id(), child = %child.id(), error = %e, "child stop failed");
                    }
                }
                Effect::Cancel(id) => self.0.system.cancel(&self.0.session_id, &id),
                Effect::Log { label, value } => {
                    tracing::info!(
                        target: "rstchart::log",
                        actor = %self.id(),
                        label = label.as_deref().unwrap_or(""),
                        %value,
                        "log"
                    );
                }
                Effect::Exec {
                    name,
                    exec,
                    context,
                    event,
                    params,
                } => {
                    let args = ActionArgs {
                        context: &context,
                        event: &event,
                        params: &params,
                    };
                    if let Err(e) = exec(&args) {
                        tracing::debug!(actor = %self.id(), action = %name, error = %e, "action failed");
                        self.enqueue_self(Event::error_execution(e.to_event_data()));
                    }
                }
            }
        }
    }

    fn deliver(&self, to: Destination, event: Event) {
        let result = match to {
            Destination::Actor(actor) => actor.send(event),
            Destination::Session(session) => match self.0.system.lookup(&session) {
                Some(actor) => actor.send(event),
                None => Err(ActorError::Communication {
                    actor: self.id().to_string(),
                    target: session,
                }),
            },
        };
        if let Err(e) = result {
            if self.0.parent.is_none() {
                self.0.system.record_unhandled(e);
            } else {
                tracing::debug!(actor = %self.id(), error = %e, "send failed");
                self.enqueue_self(Event::error_execution(e.to_event_data()));
            }
        }
    }

    /// Appends to this actor's mailbox without flushing; the running flush
    /// picks it up.
    fn enqueue_self(&self, event: Event) {
        let outcome = self.0.mailbox.lock().enqueue(event, true);
        if let Enqueued::Dropped(event) = outcome {
            tracing::debug!(actor = %self.id(), event = %event.name, "actor stopped, event dropped");
        }
    }
}

impl PartialEq for ActorRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.session_id == other.0.session_id
    }
}

impl Eq for ActorRef {}

impl fmt::Debug for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRef")
            .field("id", &self.0.id)
            .field("session_id", &self.0.session_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::actor::{TaskLogic, TransitionLogic};
    use crate::error::ActionError;
    use crate::implementations::Implementations;
    use crate::machine::Machine;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn counter() -> Arc<dyn ActorLogic> {
        Arc::new(TransitionLogic::new(json!(0), |state, event, scope| {
            let n = state.as_i64().unwrap_or(0);
            match event.name.as_str() {
                "INC" => json!(n + 1),
                "ECHO" => {
                    scope.send_parent(Event::new("PONG").with_data(json!(n)));
                    state.clone()
                }
                _ => state.clone(),
            }
        }))
    }

    #[test]
    fn test_buffers_until_started() {
        let actor = create_actor(counter(), ActorOptions::new()).unwrap();
        actor.send("INC").unwrap();
        actor.send("INC").unwrap();
        assert_eq!(actor.get_snapshot().context(), &json!(0));

        actor.start().unwrap();
        assert_eq!(actor.status(), ActorStatus::Running);
        assert_eq!(actor.get_snapshot().context(), &json!(2));
    }

    #[test]
    fn test_rejects_before_start_without_deferral() {
        let config = RuntimeConfig {
            defer_events: false,
            ..Default::default()
        };
        let actor = create_actor(counter(), ActorOptions::new().with_config(config)).unwrap();
        assert!(matches!(actor.send("INC"), Err(ActorError::NotStarted { .. })));
    }

    #[test]
    fn test_stop_drops_later_events() {
        init_tracing();
        let actor = create_actor(counter(), ActorOptions::new()).unwrap();
        actor.start().unwrap();
        actor.send("INC").unwrap();
        actor.stop().unwrap();

        assert_eq!(actor.status(), ActorStatus::Stopped);
        assert_eq!(actor.get_snapshot().status(), SnapshotStatus::Stopped);
        actor.send("INC").unwrap();
        assert_eq!(actor.get_snapshot().context(), &json!(1));
        assert!(actor.system().lookup(actor.session_id()).is_none());
    }

    #[test]
    fn test_observers() {
        let actor = create_actor(counter(), ActorOptions::new()).unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));
        let (s, c) = (seen.clone(), completed.clone());
        let subscription = actor.subscribe(
            Observer::new()
                .on_next(move |_| {
                    s.fetch_add(1, Ordering::SeqCst);
                })
                .on_complete(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
        );

        actor.start().unwrap();
        actor.send("INC").unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        subscription.unsubscribe();
        actor.send("INC").unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        let c = completed.clone();
        actor.subscribe(Observer::new().on_complete(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        actor.stop().unwrap();
        assert_eq!(completed.load(Ordering::SeqCst), 1);

        let c = completed.clone();
        actor.subscribe(Observer::new().on_complete(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(completed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_root_reports_to_caller() {
        init_tracing();
        let failing: Arc<dyn ActorLogic> =
            Arc::new(TaskLogic::new(|_, _| Err(ActionError::new("boom"))));
        let actor = create_actor(failing.clone(), ActorOptions::new()).unwrap();
        let err = actor.start().unwrap_err();
        assert_eq!(err.error_code(), "UNHANDLED");

        let errors = Arc::new(AtomicUsize::new(0));
        let e = errors.clone();
        let observed = create_actor(failing, ActorOptions::new()).unwrap();
        observed.subscribe(Observer::new().on_error(move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        }));
        observed.start().unwrap();
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(observed.status(), ActorStatus::Stopped);
    }

    fn parent(definition: Value, implementations: Implementations) -> ActorRef {
        let machine = Machine::from_json(&definition).unwrap().provide(implementations);
        let actor = create_actor(Arc::new(machine), ActorOptions::new()).unwrap();
        actor.start().unwrap();
        actor
    }

    #[test]
    fn test_child_stopped_in_spawning_step_never_starts() {
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        let task: Arc<dyn ActorLogic> = Arc::new(TaskLogic::new(move |_, _| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        }));
        let actor = parent(
            json!({
                "id": "parent",
                "initial": "idle",
                "states": {
                    "idle": {
                        "on": {
                            "SPAWN": {"actions": {"type": "spawnChild", "src": "task", "id": "kept"}},
                            "SPAWN_AND_STOP": {
                                "actions": [
                                    {"type": "spawnChild", "src": "task", "id": "dropped"},
                                    {"type": "stopChild", "id": "dropped"}
                                ]
                            }
                        }
                    }
                }
            }),
            Implementations::new().with_actor("task", task),
        );

        actor.send("SPAWN_AND_STOP").unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(actor.get_snapshot().children().is_empty());

        actor.send("SPAWN").unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_send_before_stop_reaches_child() {
        let actor = parent(
            json!({
                "id": "parent",
                "initial": "running",
                "states": {
                    "running": {
                        "entry": {"type": "spawnChild", "src": "counter", "id": "c"},
                        "on": {
                            "FINISH": {
                                "actions": [
                                    {"type": "sendTo", "to": "c", "event": "INC"},
                                    {"type": "stopChild", "id": "c"}
                                ]
                            }
                        }
                    }
                }
            }),
            Implementations::new().with_actor("counter", counter()),
        );
        let child = actor.get_snapshot().children().remove(0);
        assert_eq!(child.status(), ActorStatus::Running);

        actor.send("FINISH").unwrap();
        assert_eq!(child.status(), ActorStatus::Stopped);
        assert_eq!(child.get_snapshot().context(), &json!(1));
        assert!(actor.get_snapshot().children().is_empty());
    }

    #[test]
    fn test_completion_from_outside_keeps_child() {
        let actor = parent(
            json!({
                "id": "parent",
                "initial": "running",
                "states": {"running": {"entry": {"type": "spawnChild", "src": "counter", "id": "c"}}}
            }),
            Implementations::new().with_actor("counter", counter()),
        );
        let child = actor.get_snapshot().children().remove(0);

        actor.send(Event::done_actor("c", Value::Null)).unwrap();
        actor
            .send(Event::done_actor("c", Value::Null).with_origin("actor-99"))
            .unwrap();

        assert_eq!(actor.get_snapshot().children(), vec![child.clone()]);
        assert_eq!(child.status(), ActorStatus::Running);
    }

    #[test]
    fn test_failing_exit_action_during_stop() {
        init_tracing();
        let actor = parent(
            json!({
                "id": "parent",
                "initial": "running",
                "states": {"running": {"exit": "explode"}}
            }),
            Implementations::new().with_action(
                "explode",
                Action::custom(|_| Err(ActionError::new("boom"))),
            ),
        );

        actor.stop().unwrap();
        assert_eq!(actor.status(), ActorStatus::Stopped);
        assert_eq!(actor.get_snapshot().status(), SnapshotStatus::Stopped);
    }

    #[test]
    fn test_to_json() {
        let actor = create_actor(
            counter(),
            ActorOptions::new().with_id("counter").with_system_id("c1"),
        )
        .unwrap();
        assert_eq!(
            actor.to_json(),
            json!({"id": "counter", "sessionId": "actor-0", "systemId": "c1"})
        );
    }
}

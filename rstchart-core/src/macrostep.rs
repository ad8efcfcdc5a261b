//! Macrosteps: running microsteps until the machine is quiescent.
//!
//! Eventless transitions are checked first, then the internal queue is
//! drained one event per microstep. Only once nothing is left does the
//! external event get consumed, after which draining starts again.

use crate::error::ActorError;
use crate::event::Event;
use crate::resolve::Step;
use crate::snapshot::SnapshotStatus;

enum Phase<'e> {
    DrainInternal,
    ConsumeExternal(&'e Event),
    Settled,
}

impl Step<'_> {
    /// Runs one macrostep. `trigger` is the event eventless guards observe
    /// until another event has been processed.
    pub(crate) fn macrostep(
        &mut self,
        external: Option<&Event>,
        trigger: &Event,
    ) -> Result<(), ActorError> {
        let mut pending = external;
        let mut last = trigger.clone();
        let mut phase = Phase::DrainInternal;

        loop {
            if self.snapshot.status != SnapshotStatus::Active {
                break;
            }
            phase = match phase {
                Phase::DrainInternal => {
                    let eventless = self.selector().select_eventless(&last)?;
                    if !eventless.is_empty() {
                        self.microstep(&eventless, &last)?;
                        Phase::DrainInternal
                    } else if let Some(event) = self.internal.pop_front() {
                        self.process(&event)?;
                        last = event;
                        Phase::DrainInternal
                    } else if let Some(event) = pending.take() {
                        Phase::ConsumeExternal(event)
                    } else {
                        Phase::Settled
                    }
                }
                Phase::ConsumeExternal(event) => {
                    if let Some(child) = event.child_completion_id() {
                        let from_child = self.snapshot.children.get(child).is_some_and(|c| {
                            event.origin.as_deref() == Some(c.session_id())
                        });
                        if from_child {
                            self.snapshot.children.remove(child);
                        }
                    }
                    self.process(event)?;
                    last = event.clone();
                    Phase::DrainInternal
                }
                Phase::Settled => break,
            };
        }

        Ok(())
    }

    /// Selects and applies transitions for one event. An error event that
    /// selects nothing fails the machine.
    fn process(&mut self, event: &Event) -> Result<(), ActorError> {
        let transitions = self.selector().select(event)?;
        if transitions.is_empty() {
            if event.is_error() {
                tracing::debug!(
                    actor = %self.scope.id,
                    event = %event.name,
                    "unhandled error event"
                );
                self.snapshot.status = SnapshotStatus::Error;
                self.snapshot.error = Some(event.data.clone());
            }
            return Ok(());
        }
        self.microstep(&transitions, event)
    }
}

//! Async timer driver.

use super::system::System;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Idle wait when no timer is pending. Scheduling a timer wakes the driver
/// early.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// Fires a system's timers from a tokio task.
///
/// The system should use a [`TokioClock`](super::TokioClock) so that due
/// times and tokio's sleeps agree, including under paused test time.
pub struct TimerDriver {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl TimerDriver {
    /// Spawns the driver on the current runtime.
    pub fn spawn(system: System) -> Self {
        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();
        let handle = tokio::spawn(async move {
            tracing::debug!("timer driver started");
            loop {
                if let Err(e) = system.fire_due() {
                    tracing::error!(error = %e, "unhandled error from timer");
                }
                let wait = match system.next_due() {
                    Some(due) => Duration::from_millis(due.saturating_sub(system.now())),
                    None => IDLE_WAIT,
                };
                tokio::select! {
                    _ = signal.notified() => break,
                    _ = system.timers_changed() => {}
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            tracing::debug!("timer driver stopped");
        });
        Self { shutdown, handle }
    }

    /// Stops the driver and waits for its task to finish.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "timer driver task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{create_actor, ActorOptions, TokioClock};
    use crate::machine::Machine;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let machine = Machine::from_json(&json!({
            "id": "delayed",
            "initial": "waiting",
            "states": {
                "waiting": {"after": {"100": "next"}},
                "next": {}
            }
        }))
        .unwrap();
        let actor = create_actor(
            Arc::new(machine),
            ActorOptions::new().with_clock(Arc::new(TokioClock::new())),
        )
        .unwrap();
        actor.start().unwrap();
        let driver = TimerDriver::spawn(actor.system().clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(actor.get_snapshot().matches("waiting"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(actor.get_snapshot().matches("next"));
        assert_eq!(actor.system().pending_timers(), 0);

        driver.shutdown().await;
    }
}

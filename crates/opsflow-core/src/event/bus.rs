//! Run lifecycle event bus.
//!
//! The engine publishes every `EngineEvent` on one `tokio::sync::broadcast`
//! channel. Most consumers follow a single run, so [`RunWatch`] narrows a
//! receiver to one run id and ends once that run settles.

use std::time::Duration;

use opsflow_types::event::EngineEvent;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

/// Fan-out of engine events. Clones share one channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receiver for every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Follow a run that is already known. Events published before this
    /// call are not seen.
    pub fn watch(&self, run_id: Uuid) -> RunWatch {
        RunWatch::new(self.sender.subscribe(), run_id)
    }

    /// Returns how many receivers got the event; zero when nobody listens.
    pub fn publish(&self, event: EngineEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

/// Events of one run, in publish order.
///
/// To observe a run from its first event, subscribe before it is launched
/// and build the watch once the run id is known:
///
/// ```no_run
/// # async fn demo(bus: opsflow_core::event::bus::EventBus, run_id: uuid::Uuid) {
/// use opsflow_core::event::bus::RunWatch;
/// let pending = bus.subscribe();
/// // ... create and launch the run ...
/// let settled = RunWatch::new(pending, run_id)
///     .settled(std::time::Duration::from_secs(5))
///     .await;
/// # }
/// ```
pub struct RunWatch {
    run_id: Uuid,
    receiver: broadcast::Receiver<EngineEvent>,
    done: bool,
}

impl RunWatch {
    pub fn new(receiver: broadcast::Receiver<EngineEvent>, run_id: Uuid) -> Self {
        Self {
            run_id,
            receiver,
            done: false,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Next event of this run. `None` after the settling event or once the
    /// bus is gone.
    pub async fn next(&mut self) -> Option<EngineEvent> {
        if self.done {
            return None;
        }
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.run_id() == self.run_id => {
                    self.done = event.settles_run();
                    return Some(event);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(run_id = %self.run_id, skipped, "run watch fell behind");
                }
                Err(RecvError::Closed) => {
                    self.done = true;
                    return None;
                }
            }
        }
    }

    /// Wait up to `limit` for the run to complete, fail, abort or suspend.
    /// Returns the settling event, or `None` if it did not arrive in time.
    pub async fn settled(mut self, limit: Duration) -> Option<EngineEvent> {
        let wait = async move {
            while let Some(event) = self.next().await {
                if event.settles_run() {
                    return Some(event);
                }
            }
            None
        };
        tokio::time::timeout(limit, wait).await.ok().flatten()
    }
}

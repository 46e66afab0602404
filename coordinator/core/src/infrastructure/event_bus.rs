// Event Bus Implementation - Pub/Sub for Coordination Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Enables observers (dashboards, waiting callers, tests) to follow task,
// lock, agent, and coordination activity in real time.
//
// In-memory only: events are lost on restart. The agent transition log in
// the repository layer is the durable audit trail; the bus is a live feed.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::coordination::SyncPointId;
use crate::domain::events::{AgentStateEvent, CoordinationEvent, LockEvent, TaskEvent};

/// Unified event type for the coordinator bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    Task(TaskEvent),
    Lock(LockEvent),
    AgentState(AgentStateEvent),
    Coordination(CoordinationEvent),
}

/// Event bus for publishing and subscribing to coordination events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<CoordinatorEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity.
    /// Capacity determines how many events can be buffered before slow
    /// subscribers start lagging.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish a task event
    pub fn publish_task_event(&self, event: TaskEvent) {
        self.publish(CoordinatorEvent::Task(event));
    }

    /// Publish a lock event
    pub fn publish_lock_event(&self, event: LockEvent) {
        self.publish(CoordinatorEvent::Lock(event));
    }

    /// Publish an agent state event
    pub fn publish_agent_event(&self, event: AgentStateEvent) {
        self.publish(CoordinatorEvent::AgentState(event));
    }

    /// Publish a coordination event
    pub fn publish_coordination_event(&self, event: CoordinationEvent) {
        self.publish(CoordinatorEvent::Coordination(event));
    }

    fn publish(&self, event: CoordinatorEvent) {
        debug!("Publishing event: {:?}", event);

        // send() returns the number of receivers; zero subscribers is fine.
        let receiver_count = self.sender.send(event).unwrap_or(0);

        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all coordinator events
    pub fn subscribe(&self) -> EventReceiver {
        let receiver = self.sender.subscribe();
        EventReceiver { receiver }
    }

    /// Subscribe and filter for one sync point's lifecycle.
    /// Used by callers awaiting barrier resolution.
    pub fn subscribe_sync_point(&self, sync_point_id: SyncPointId) -> SyncPointEventReceiver {
        let receiver = self.sender.subscribe();
        SyncPointEventReceiver {
            receiver,
            sync_point_id,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Receiver for all coordinator events
pub struct EventReceiver {
    receiver: broadcast::Receiver<CoordinatorEvent>,
}

impl EventReceiver {
    /// Receive the next event (blocks until one is available)
    pub async fn recv(&mut self) -> Result<CoordinatorEvent, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<CoordinatorEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for one sync point's events (filtered)
pub struct SyncPointEventReceiver {
    receiver: broadcast::Receiver<CoordinatorEvent>,
    sync_point_id: SyncPointId,
}

impl SyncPointEventReceiver {
    /// Receive the next event concerning the subscribed sync point.
    /// Events about other entities are skipped.
    pub async fn recv(&mut self) -> Result<CoordinationEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(|e| match e {
                broadcast::error::RecvError::Closed => EventBusError::Closed,
                broadcast::error::RecvError::Lagged(n) => {
                    warn!("Event receiver lagged by {} events", n);
                    EventBusError::Lagged(n)
                }
            })?;

            if let CoordinatorEvent::Coordination(coordination_event) = event {
                if self.matches_sync_point(&coordination_event) {
                    return Ok(coordination_event);
                }
            }
        }
    }

    fn matches_sync_point(&self, event: &CoordinationEvent) -> bool {
        match event {
            CoordinationEvent::SyncPointCreated { sync_point_id, .. }
            | CoordinationEvent::SyncPointSatisfied { sync_point_id, .. }
            | CoordinationEvent::SyncPointTimedOut { sync_point_id, .. }
            | CoordinationEvent::SyncPointFailed { sync_point_id, .. } => {
                *sync_point_id == self.sync_point_id
            }
            _ => false,
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

//! In-process event bus.
//!
//! State transitions publish events after their writes are committed;
//! registered consumers (progression evaluation) react to them. Publishing is
//! fire-and-forget: a failing consumer is logged and skipped, and the
//! publisher never sees the error.
//!
//! | Event | Emitted when |
//! |-------|--------------|
//! | `ENROLLED` | A user enrolls in a program |
//! | `WEEK_COMPLETED` | A week is advanced past |
//! | `CYCLE_BOUNDARY_REACHED` | The last week of a cycle is completed |
//! | `CYCLE_STARTED` | The next cycle begins |
//! | `QUIT` | A user unenrolls |
//! | `SESSION_STARTED` / `SESSION_COMPLETED` | Workout session lifecycle |
//! | `SET_LOGGED` | A performed set is recorded |

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

const RECENT_EVENTS_CAP: usize = 256;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Enrolled,
    WeekCompleted,
    CycleBoundaryReached,
    CycleStarted,
    Quit,
    SessionStarted,
    SessionCompleted,
    SetLogged,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::Enrolled => "ENROLLED",
            EventType::WeekCompleted => "WEEK_COMPLETED",
            EventType::CycleBoundaryReached => "CYCLE_BOUNDARY_REACHED",
            EventType::CycleStarted => "CYCLE_STARTED",
            EventType::Quit => "QUIT",
            EventType::SessionStarted => "SESSION_STARTED",
            EventType::SessionCompleted => "SESSION_COMPLETED",
            EventType::SetLogged => "SET_LOGGED",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: Uuid,
    pub event_type: EventType,
    pub user_id: String,
    pub program_id: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl Event {
    pub fn new(
        event_type: EventType,
        user_id: impl Into<String>,
        program_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            user_id: user_id.into(),
            program_id: program_id.into(),
            payload,
            occurred_at: Utc::now(),
        }
    }
}

/// Something that reacts to published events
pub trait EventConsumer: Send + Sync {
    fn name(&self) -> &str;

    fn interested_in(&self, _event_type: EventType) -> bool {
        true
    }

    fn handle(&self, event: &Event) -> Result<()>;
}

pub struct EventBus {
    consumers: RwLock<Vec<Arc<dyn EventConsumer>>>,
    recent: Mutex<VecDeque<Event>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            consumers: RwLock::new(Vec::new()),
            recent: Mutex::new(VecDeque::new()),
        }
    }

    pub fn register(&self, consumer: Arc<dyn EventConsumer>) {
        tracing::debug!("Registered event consumer {}", consumer.name());
        match self.consumers.write() {
            Ok(mut consumers) => consumers.push(consumer),
            Err(_) => tracing::warn!("Event bus consumer list poisoned; dropping registration"),
        }
    }

    /// Deliver `event` to every interested consumer.
    ///
    /// Call only after the originating change is committed. Consumer
    /// failures are logged and never reach the caller.
    pub fn publish(&self, event: Event) {
        tracing::info!(
            "Event {} for user {} (program {})",
            event.event_type,
            event.user_id,
            event.program_id
        );

        if let Ok(mut recent) = self.recent.lock() {
            if recent.len() >= RECENT_EVENTS_CAP {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }

        // Snapshot so handlers run without holding the lock
        let consumers: Vec<Arc<dyn EventConsumer>> = match self.consumers.read() {
            Ok(guard) => guard
                .iter()
                .filter(|c| c.interested_in(event.event_type))
                .cloned()
                .collect(),
            Err(_) => {
                tracing::warn!("Event bus consumer list poisoned; {} not delivered", event.event_type);
                return;
            }
        };

        for consumer in consumers {
            if let Err(e) = consumer.handle(&event) {
                tracing::warn!(
                    "Consumer {} failed on {} for user {}: {}",
                    consumer.name(),
                    event.event_type,
                    event.user_id,
                    e
                );
            }
        }
    }

    /// Recently published events, oldest first
    pub fn recent(&self) -> Vec<Event> {
        self.recent
            .lock()
            .map(|recent| recent.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::ItemStatus;

/// What happened to a unit or user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
    Deactivated,
}

/// Domain events published after the owning transaction commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    ItemCheckedOut {
        item_id: Uuid,
        movement_id: Uuid,
        holder_id: Uuid,
        actor_id: Uuid,
        at: DateTime<Utc>,
    },
    ItemReturned {
        item_id: Uuid,
        movement_id: Uuid,
        actor_id: Uuid,
        new_status: ItemStatus,
        at: DateTime<Utc>,
    },
    MaintenanceCompleted {
        item_id: Uuid,
        actor_id: Uuid,
        at: DateTime<Utc>,
    },
    ItemTransferred {
        item_id: Uuid,
        transfer_id: Uuid,
        origin_unit_id: Uuid,
        destination_unit_id: Uuid,
        actor_id: Uuid,
        at: DateTime<Utc>,
    },
    ItemDeactivated {
        item_id: Uuid,
        actor_id: Uuid,
        at: DateTime<Utc>,
    },
    UnitChanged {
        unit_id: Uuid,
        change: ChangeKind,
        actor_id: Uuid,
    },
    UserChanged {
        user_id: Uuid,
        change: ChangeKind,
        actor_id: Uuid,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::ItemCheckedOut { .. } => "item_checked_out",
            Event::ItemReturned { .. } => "item_returned",
            Event::MaintenanceCompleted { .. } => "maintenance_completed",
            Event::ItemTransferred { .. } => "item_transferred",
            Event::ItemDeactivated { .. } => "item_deactivated",
            Event::UnitChanged { .. } => "unit_changed",
            Event::UserChanged { .. } => "user_changed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, waiting for channel capacity.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Fire-and-forget publish for use after a commit. Never blocks and never
    /// fails the caller; a full or closed channel is logged.
    pub fn publish(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.sender.try_send(event) {
            counter!("custody_events.dropped", 1, "event" => name);
            warn!(event = name, error = %e, "domain event dropped");
        }
    }
}

/// Creates a bounded event channel.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender::new(tx), rx)
}

/// Drains the event channel, recording each event in the log.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        counter!("custody_events.processed", 1, "event" => event.name());
        match &event {
            Event::ItemCheckedOut {
                item_id,
                holder_id,
                actor_id,
                ..
            } => info!(%item_id, %holder_id, %actor_id, "item checked out"),
            Event::ItemReturned {
                item_id,
                new_status,
                actor_id,
                ..
            } => info!(%item_id, %new_status, %actor_id, "item returned"),
            Event::MaintenanceCompleted { item_id, actor_id, .. } => {
                info!(%item_id, %actor_id, "maintenance completed")
            }
            Event::ItemTransferred {
                item_id,
                origin_unit_id,
                destination_unit_id,
                actor_id,
                ..
            } => info!(
                %item_id,
                %origin_unit_id,
                %destination_unit_id,
                %actor_id,
                "item transferred"
            ),
            Event::ItemDeactivated { item_id, actor_id, .. } => {
                info!(%item_id, %actor_id, "item deactivated")
            }
            Event::UnitChanged {
                unit_id,
                change,
                actor_id,
            } => info!(%unit_id, ?change, %actor_id, "unit changed"),
            Event::UserChanged {
                user_id,
                change,
                actor_id,
            } => info!(%user_id, ?change, %actor_id, "user changed"),
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_never_blocks_on_full_channel() {
        let (sender, mut rx) = channel(1);
        let event = Event::MaintenanceCompleted {
            item_id: Uuid::new_v4(),
            actor_id: Uuid::new_v4(),
            at: Utc::now(),
        };
        sender.publish(event.clone());
        sender.publish(event.clone());

        assert_eq!(rx.recv().await, Some(event));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_on_closed_channel_is_harmless() {
        let (sender, rx) = channel(4);
        drop(rx);
        sender.publish(Event::UnitChanged {
            unit_id: Uuid::new_v4(),
            change: ChangeKind::Created,
            actor_id: Uuid::new_v4(),
        });
        assert!(sender
            .send(Event::UnitChanged {
                unit_id: Uuid::new_v4(),
                change: ChangeKind::Deleted,
                actor_id: Uuid::new_v4(),
            })
            .await
            .is_err());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(Event::ItemDeactivated {
            item_id: Uuid::nil(),
            actor_id: Uuid::nil(),
            at: Utc::now(),
        })
        .unwrap();
        assert_eq!(json["type"], "item_deactivated");
    }
}

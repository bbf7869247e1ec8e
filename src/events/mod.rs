use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::collaborators::{HolderId, NotificationSink, RoomId};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends after a commit. The ledger change already stands, so a closed
    /// channel is only worth a warning.
    pub async fn publish(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping asset event: {}", e);
        }
    }
}

/// Committed ledger changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    AssetCreated {
        pool_id: i64,
        code: String,
        name: String,
        quantity: i32,
    },
    AssetDetailsUpdated {
        pool_id: i64,
        changed: Vec<String>,
    },
    AssetDeleted {
        pool_id: i64,
        code: String,
    },
    AssetIssued {
        pool_id: i64,
        pool_name: String,
        holder_id: HolderId,
        holder_name: String,
        quantity: i32,
    },
    AssetReturned {
        pool_id: i64,
        pool_name: String,
        holder_id: HolderId,
        holder_name: String,
        quantity: i32,
    },
    AssetExchanged {
        pool_id: i64,
        pool_name: String,
        holder_id: HolderId,
        holder_name: String,
        quantity: i32,
    },
    AssetConsumed {
        pool_id: i64,
        pool_name: String,
        quantity: i32,
    },
    AssetSupplemented {
        pool_id: i64,
        pool_name: String,
        quantity: i32,
    },
    AssetScrapped {
        pool_id: i64,
        pool_name: String,
        quantity: i32,
    },
    RepairStarted {
        pool_id: i64,
        pool_name: String,
    },
    RepairCompleted {
        pool_id: i64,
        pool_name: String,
    },
    InstanceRepairStarted {
        pool_id: i64,
        instance_id: i64,
        serial_number: String,
    },
    InstanceRepairCompleted {
        pool_id: i64,
        instance_id: i64,
        serial_number: String,
    },
    InstanceScrapped {
        pool_id: i64,
        instance_id: i64,
        serial_number: String,
        holder_id: Option<HolderId>,
    },
    InstanceRelocated {
        pool_id: i64,
        instance_id: i64,
        serial_number: String,
        room_id: Option<RoomId>,
        holder_id: Option<HolderId>,
    },
    InstancesBackfilled {
        pool_id: i64,
        created: usize,
    },
    InventoryChecked {
        checked: usize,
        unknown: usize,
    },
}

/// What the notification sink gets
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub recipients: Vec<HolderId>,
    pub title: String,
    pub body: String,
}

impl Event {
    pub fn pool_id(&self) -> Option<i64> {
        match self {
            Event::AssetCreated { pool_id, .. }
            | Event::AssetDetailsUpdated { pool_id, .. }
            | Event::AssetDeleted { pool_id, .. }
            | Event::AssetIssued { pool_id, .. }
            | Event::AssetReturned { pool_id, .. }
            | Event::AssetExchanged { pool_id, .. }
            | Event::AssetConsumed { pool_id, .. }
            | Event::AssetSupplemented { pool_id, .. }
            | Event::AssetScrapped { pool_id, .. }
            | Event::RepairStarted { pool_id, .. }
            | Event::RepairCompleted { pool_id, .. }
            | Event::InstanceRepairStarted { pool_id, .. }
            | Event::InstanceRepairCompleted { pool_id, .. }
            | Event::InstanceScrapped { pool_id, .. }
            | Event::InstanceRelocated { pool_id, .. }
            | Event::InstancesBackfilled { pool_id, .. } => Some(*pool_id),
            Event::InventoryChecked { .. } => None,
        }
    }

    /// Custody changes are told to the holder; everything else is log-only
    pub fn notification(&self) -> Option<Notice> {
        match self {
            Event::AssetIssued {
                pool_name,
                holder_id,
                holder_name,
                quantity,
                ..
            } => Some(Notice {
                recipients: vec![*holder_id],
                title: "Equipment issued".to_string(),
                body: format!("{} x{} issued to {}", pool_name, quantity, holder_name),
            }),
            Event::AssetReturned {
                pool_name,
                holder_id,
                holder_name,
                quantity,
                ..
            } => Some(Notice {
                recipients: vec![*holder_id],
                title: "Equipment returned".to_string(),
                body: format!("{} returned {} x{}", holder_name, pool_name, quantity),
            }),
            Event::AssetExchanged {
                pool_name,
                holder_id,
                holder_name,
                quantity,
                ..
            } => Some(Notice {
                recipients: vec![*holder_id],
                title: "Equipment exchanged".to_string(),
                body: format!(
                    "{} exchanged {} x{} for new units",
                    holder_name, pool_name, quantity
                ),
            }),
            Event::InstanceRelocated {
                serial_number,
                holder_id: Some(holder_id),
                ..
            } => Some(Notice {
                recipients: vec![*holder_id],
                title: "Asset assigned".to_string(),
                body: format!("{} is now in your care", serial_number),
            }),
            Event::InstanceScrapped {
                serial_number,
                holder_id: Some(holder_id),
                ..
            } => Some(Notice {
                recipients: vec![*holder_id],
                title: "Asset scrapped".to_string(),
                body: format!("{} was scrapped and removed from your custody", serial_number),
            }),
            _ => None,
        }
    }
}

/// Drains the event channel and forwards notices to the sink.
/// Delivery failures are logged and never reach the ledger.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, sink: Arc<dyn NotificationSink>) {
    info!("Starting asset event processing loop");

    while let Some(event) = rx.recv().await {
        info!(pool_id = ?event.pool_id(), "Received event: {:?}", event);

        if let Some(notice) = event.notification() {
            if let Err(e) = sink
                .notify(&notice.recipients, &notice.title, &notice.body)
                .await
            {
                error!(
                    "Failed to deliver notification '{}' to {:?}: {}",
                    notice.title, notice.recipients, e
                );
            }
        }
    }

    info!("Asset event channel closed; processing loop stopped");
}

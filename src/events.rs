use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::ledger_transaction::TransactionType;

/// Domain events emitted after a ledger write commits.
///
/// Downstream consumers (alerting jobs, dashboards, the chat assistant) read
/// these; nothing in the core depends on a subscriber being present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    TransactionRecorded {
        transaction_id: Uuid,
        tenant_id: Uuid,
        tx_type: TransactionType,
    },
    LotDepleted {
        lot_id: Uuid,
        component_id: Uuid,
    },
    BalanceRebuilt {
        tenant_id: Uuid,
        rows: usize,
    },
    BomVersionActivated {
        product_id: Uuid,
        version_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Builds a sender/receiver pair with a bounded buffer.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when no receiver is alive.
    /// Ledger writes have already committed by the time events go out, so a
    /// dropped event must never roll anything back.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Event dropped: {}", e);
        }
    }
}

/// Drains the event channel, logging each event. Binaries that do not wire a
/// real subscriber spawn this so senders never block.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        info!(?event, "domain event");
    }
}

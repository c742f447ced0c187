//! Event-driven merge orchestration
//!
//! Subscribes to the [`EventBus`](crm_common::events::EventBus) through an
//! injected receiver and routes each upstream `DataChanged` to the matching
//! engine operation. Events are handled one at a time in arrival order.
//! Handler failures are logged and dropped: the upstream write has already
//! succeeded and recalculation heals whatever was missed.

use crate::services::CustomerService;
use crm_common::events::CrmEvent;
use crm_common::models::{
    ChangeOperation, ConversationRecord, MessagingCustomerRecord, Note, OrderRecord,
    PosCustomerRecord, SourceCollection,
};
use crm_common::time::now_ms;
use crm_common::Result;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct Orchestrator {
    service: CustomerService,
}

impl Orchestrator {
    pub fn new(service: CustomerService) -> Self {
        Self { service }
    }

    /// Run the handler loop until the bus is closed
    pub fn spawn(self, receiver: broadcast::Receiver<CrmEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(receiver))
    }

    async fn run(self, mut receiver: broadcast::Receiver<CrmEvent>) {
        debug!("Orchestrator started");
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Err(e) = self.handle(&event).await {
                        warn!(org_id = event.org_id(), error = %e, "Event handler failed");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Orchestrator lagged, events dropped until next recalculation");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("Orchestrator stopped");
    }

    /// Apply one event; anything other than `DataChanged` is ignored
    pub async fn handle(&self, event: &CrmEvent) -> Result<()> {
        let CrmEvent::DataChanged {
            collection,
            operation,
            org_id,
            document_id,
            document,
            ..
        } = event
        else {
            return Ok(());
        };
        debug!(%collection, %operation, %org_id, %document_id, "Handling data change");

        match collection {
            SourceCollection::PosCustomers => {
                if *operation != ChangeOperation::Delete {
                    let record = PosCustomerRecord::from_document(org_id, document.clone())?;
                    self.service.merge_from_pos_customer(&record).await?;
                }
            }
            SourceCollection::MessagingCustomers => {
                if *operation != ChangeOperation::Delete {
                    let record = MessagingCustomerRecord::from_document(org_id, document.clone())?;
                    self.service.merge_from_messaging_customer(&record).await?;
                }
            }
            SourceCollection::PosOrders => {
                let order = OrderRecord::from_document(org_id, document.clone())?;
                self.service.ingest_order(&order, *operation, false).await?;
            }
            SourceCollection::Conversations => {
                if *operation != ChangeOperation::Delete {
                    let conversation = ConversationRecord::from_document(org_id, document.clone(), now_ms())?;
                    self.service.ingest_conversation(&conversation, false).await?;
                }
            }
            SourceCollection::Notes => {
                let note: Note = serde_json::from_value(Value::clone(document))?;
                self.service.record_note_activity(&note, *operation).await?;
            }
        }
        Ok(())
    }
}

use crate::bus_item::{change_payload, BusItem};
use crate::property_store::PropertyChange;
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};
use zbus::{object_server::SignalEmitter, Connection};

/// Broadcasts `PropertiesChanged` for every store mutation.
///
/// Fire-and-forget: nobody has to be listening, and a failed emit only costs
/// that one signal.
pub struct ChangeEmitter {
    connection: Connection,
    changes: UnboundedReceiver<PropertyChange>,
}

impl ChangeEmitter {
    pub fn new(connection: Connection, changes: UnboundedReceiver<PropertyChange>) -> Self {
        Self {
            connection,
            changes,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(mut self) {
        tracing::debug!("Starting change emitter task");
        while let Some(change) = self.changes.recv().await {
            if let Err(e) = self.emit(&change).await {
                tracing::warn!("Failed to emit PropertiesChanged on {}: {e}", change.path);
            }
        }
        tracing::debug!("Change emitter exiting, store dropped");
    }

    async fn emit(&self, change: &PropertyChange) -> zbus::Result<()> {
        let emitter = SignalEmitter::new(&self.connection, change.path.as_str())?;
        BusItem::properties_changed(&emitter, change_payload(&change.record)).await
    }
}

use crate::bus_item::{claim_service_name, connect, export_properties};
use crate::catalog::{bootstrap_store, SERVICE_NAME};
use crate::change_emitter::ChangeEmitter;
use crate::config::BridgeConfig;
use crate::ingestion_mapping::IngestionMapping;
use crate::mqtt_reader::MqttReader;
use crate::router::{Router, TransportEvent};
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::mpsc;
use zbus::Connection;

const TRANSPORT_CHANNEL_CAPACITY: usize = 128;

/// Wires the grid meter together: one store, shared by the D-Bus objects and
/// the router that feeds it.
pub struct GridMeterBridge {
    // Held so the exported objects and the claimed name stay alive.
    _connection: Connection,
    router: Router,
    mqtt_reader: MqttReader,
    events: mpsc::Receiver<TransportEvent>,
}

impl GridMeterBridge {
    /// Publishes the meter on D-Bus and prepares, but does not start, MQTT.
    pub async fn start(config: &BridgeConfig) -> anyhow::Result<Self> {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let store = Arc::new(bootstrap_store(changes_tx).context("Invalid property catalog")?);

        let mapping = IngestionMapping::reference(
            &config.power_topic,
            &config.sold_energy_topic,
            &config.purchased_energy_topic,
        );
        mapping.validate(&store).context("Invalid ingestion mapping")?;

        let connection = connect(config.bus)
            .await
            .context("Failed to connect to dbus")?;
        export_properties(&connection, &store).await?;
        claim_service_name(&connection, SERVICE_NAME).await?;
        ChangeEmitter::new(connection.clone(), changes_rx).spawn();
        tracing::info!(
            "Successfully connected to dbus and registered as {SERVICE_NAME}, \
             commencing reading grid"
        );

        let (events_tx, events) = mpsc::channel(TRANSPORT_CHANNEL_CAPACITY);
        let topics = mapping.topics().map(str::to_string).collect();
        let mqtt_reader = MqttReader::new(config, topics, events_tx);
        let router = Router::new(mapping, store);

        Ok(Self {
            _connection: connection,
            router,
            mqtt_reader,
            events,
        })
    }

    /// Subscribes and routes readings until the MQTT connection is lost.
    pub async fn run(self) -> anyhow::Result<()> {
        let _pump = self.mqtt_reader.start().await?;
        self.router.run(self.events).await
    }
}

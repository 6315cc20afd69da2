use futures::StreamExt;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{net::UnixStream, sync::mpsc, time::timeout};
use zbus::{
    connection::Builder, message::Type as MessageType, zvariant::OwnedValue, Connection, Guid,
    MessageStream,
};

use grid_meter_bridge::{
    bus_item::{claim_service_name, export_properties, ExpositionError, SET_VALUE_REFUSED},
    catalog::{bootstrap_store, identity_properties, MEASUREMENTS, SERVICE_NAME},
    change_emitter::ChangeEmitter,
    ingestion_mapping::IngestionMapping,
    Router, TransportEvent,
};

const BUS_ITEM: &str = "com.victronenergy.BusItem";
const POWER_TOPIC: &str = "dev37/r/em_cur_fast";

fn reference_mapping() -> IngestionMapping {
    IngestionMapping::reference(POWER_TOPIC, "dev37/r/em_tot_solar", "dev37/r/em_tot_grid")
}

/// A bridge served over a private peer-to-peer D-Bus link, fed through the
/// same transport channel the MQTT reader uses.
struct TestBridge {
    client: Connection,
    _server: Connection,
    events: mpsc::Sender<TransportEvent>,
}

async fn start_test_bridge() -> TestBridge {
    let (server_stream, client_stream) = UnixStream::pair().unwrap();
    let guid = Guid::generate();
    let (server, client) = tokio::try_join!(
        Builder::unix_stream(server_stream)
            .server(guid)
            .unwrap()
            .p2p()
            .build(),
        Builder::unix_stream(client_stream).p2p().build(),
    )
    .unwrap();

    let (changes_tx, changes_rx) = mpsc::unbounded_channel();
    let store = Arc::new(bootstrap_store(changes_tx).unwrap());
    export_properties(&server, &store).await.unwrap();
    ChangeEmitter::new(server.clone(), changes_rx).spawn();

    let mapping = reference_mapping();
    mapping.validate(&store).unwrap();
    let (events, events_rx) = mpsc::channel(128);
    tokio::spawn(Router::new(mapping, store).run(events_rx));

    TestBridge {
        client,
        _server: server,
        events,
    }
}

impl TestBridge {
    async fn call<R>(&self, path: &str, interface: &str, method: &str) -> R
    where
        R: for<'d> zbus::zvariant::DynamicDeserialize<'d>,
    {
        let reply = self
            .client
            .call_method(None::<&str>, path, Some(interface), method, &())
            .await
            .unwrap_or_else(|e| panic!("{method} on {path} failed: {e}"));
        reply.body().deserialize().unwrap()
    }

    async fn value(&self, path: &str) -> OwnedValue {
        self.call(path, BUS_ITEM, "GetValue").await
    }

    async fn text(&self, path: &str) -> String {
        self.call(path, BUS_ITEM, "GetText").await
    }

    async fn publish(&self, topic: &str, payload: &str) {
        self.events
            .send(TransportEvent::Message {
                topic: topic.to_string(),
                payload: payload.as_bytes().to_vec(),
            })
            .await
            .unwrap();
    }

    /// Polls until `path` shows `expected`, since routing is asynchronous.
    async fn wait_for_text(&self, path: &str, expected: &str) {
        let result = timeout(Duration::from_secs(2), async {
            loop {
                if self.text(path).await == expected {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(result.is_ok(), "Timed out waiting for {path} to read {expected}");
    }
}

#[tokio::test]
async fn test_every_path_readable_after_bootstrap() {
    let bridge = start_test_bridge().await;

    for (path, unit) in MEASUREMENTS {
        let value: f64 = bridge.value(path).await.try_into().unwrap();
        assert_eq!(value, 0.0, "{path}");
        assert_eq!(bridge.text(path).await, format!("0.00 {unit}"));
    }

    for (path, expected) in identity_properties() {
        assert_eq!(bridge.text(path).await, expected.to_string(), "{path}");
    }
    let device_type: i32 = bridge.value("/DeviceType").await.try_into().unwrap();
    assert_eq!(device_type, 71);
    let serial: String = bridge.value("/Serial").await.try_into().unwrap();
    assert_eq!(serial, "BP98305081235");
}

#[tokio::test]
async fn test_power_message_updates_both_paths_and_signals() {
    let bridge = start_test_bridge().await;
    let mut stream = MessageStream::from(&bridge.client);

    bridge.publish(POWER_TOPIC, "1234.5").await;

    let mut signalled = HashMap::new();
    timeout(Duration::from_secs(2), async {
        while signalled.len() < 2 {
            let message = stream.next().await.unwrap().unwrap();
            let header = message.header();
            if header.message_type() != MessageType::Signal
                || header.member().map(|m| m.as_str()) != Some("PropertiesChanged")
            {
                continue;
            }
            let path = header.path().unwrap().to_string();
            let body: HashMap<String, OwnedValue> = message.body().deserialize().unwrap();
            signalled.insert(path, body);
        }
    })
    .await
    .expect("Should receive PropertiesChanged for both paths");

    for path in ["/Ac/Power", "/Ac/L1/Power"] {
        let body = &signalled[path];
        let value: f64 = body["Value"].try_clone().unwrap().try_into().unwrap();
        let text: String = body["Text"].try_clone().unwrap().try_into().unwrap();
        assert_eq!(value, 1234.5);
        assert_eq!(text, "1234.50 W");

        let value: f64 = bridge.value(path).await.try_into().unwrap();
        assert_eq!(value, 1234.5);
        assert_eq!(bridge.text(path).await, "1234.50 W");
    }
    assert_eq!(bridge.text("/Ac/L2/Power").await, "0.00 W");
}

#[tokio::test]
async fn test_bad_and_unmapped_messages_are_dropped() {
    let bridge = start_test_bridge().await;

    bridge.publish(POWER_TOPIC, "not-a-number").await;
    bridge.publish("dev37/r/em_voltage", "230").await;
    // A valid reading afterwards proves the router survived both.
    bridge.publish("dev37/r/em_tot_grid", "4 321.5").await;
    bridge.wait_for_text("/Ac/Energy/Forward", "4321.50 kWh").await;

    assert_eq!(bridge.text("/Ac/Power").await, "0.00 W");
    assert_eq!(bridge.text("/Ac/L1/Voltage").await, "0.00 V");
    assert_eq!(bridge.text("/Ac/L1/Energy/Forward").await, "0.00 kWh");
}

#[tokio::test]
async fn test_same_path_updates_apply_in_order() {
    let bridge = start_test_bridge().await;

    for i in 1..=50 {
        bridge.publish(POWER_TOPIC, &format!("{i}")).await;
    }
    bridge.wait_for_text("/Ac/Power", "50.00 W").await;
    assert_eq!(bridge.text("/Ac/L1/Power").await, "50.00 W");
}

#[tokio::test]
async fn test_set_value_is_refused() {
    let bridge = start_test_bridge().await;

    let reply = bridge
        .client
        .call_method(
            None::<&str>,
            "/Ac/Power",
            Some(BUS_ITEM),
            "SetValue",
            &(zbus::zvariant::Value::from(500.0),),
        )
        .await
        .unwrap();
    let status: i32 = reply.body().deserialize().unwrap();
    assert_eq!(status, SET_VALUE_REFUSED);
    assert_eq!(bridge.text("/Ac/Power").await, "0.00 W");
}

#[tokio::test]
async fn test_introspection_is_identical_for_every_path() {
    let bridge = start_test_bridge().await;

    let power: String = bridge
        .call("/Ac/Power", "org.freedesktop.DBus.Introspectable", "Introspect")
        .await;
    let serial: String = bridge
        .call("/Serial", "org.freedesktop.DBus.Introspectable", "Introspect")
        .await;

    for xml in [&power, &serial] {
        assert!(xml.contains(r#"<interface name="com.victronenergy.BusItem">"#));
        for member in [
            r#"<method name="GetValue">"#,
            r#"<method name="GetText">"#,
            r#"<method name="SetValue">"#,
            r#"<signal name="PropertiesChanged">"#,
        ] {
            assert!(xml.contains(member), "Missing {member} in {xml}");
        }
    }
}

#[tokio::test]
async fn test_connection_loss_stops_router() {
    let (changes_tx, _changes_rx) = mpsc::unbounded_channel();
    let store = Arc::new(bootstrap_store(changes_tx).unwrap());
    let mapping = reference_mapping();
    let (events, events_rx) = mpsc::channel(4);
    let router = tokio::spawn(Router::new(mapping, store).run(events_rx));

    events
        .send(TransportEvent::ConnectionLost("connection reset".to_string()))
        .await
        .unwrap();

    let result = timeout(Duration::from_secs(1), router).await.unwrap().unwrap();
    assert!(result.is_err());
}

#[tokio::test]
#[ignore = "needs a session bus"]
async fn test_second_claim_of_service_name_fails() {
    let first = Connection::session().await.unwrap();
    let second = Connection::session().await.unwrap();

    claim_service_name(&first, SERVICE_NAME).await.unwrap();
    let result = claim_service_name(&second, SERVICE_NAME).await;
    assert!(matches!(result, Err(ExpositionError::NameTaken(_))));
}

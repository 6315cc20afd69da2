use crate::config::BridgeConfig;
use crate::router::TransportEvent;
use anyhow::Context;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode,
};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc::{error::TrySendError, Sender};
use tokio::task::JoinHandle;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const REQUEST_CAPACITY: usize = 10;

/// Owns the MQTT connection and forwards deliveries to the router.
pub struct MqttReader {
    options: MqttOptions,
    topics: Vec<String>,
    events: Sender<TransportEvent>,
}

impl MqttReader {
    pub fn new(config: &BridgeConfig, topics: Vec<String>, events: Sender<TransportEvent>) -> Self {
        Self {
            options: mqtt_options(config),
            topics,
            events,
        }
    }

    /// Connects, subscribes to every topic and waits for the broker to
    /// acknowledge all of them before spawning the delivery pump.
    pub async fn start(self) -> anyhow::Result<JoinHandle<()>> {
        let (broker, port) = self.options.broker_address();
        tracing::info!("Connecting to MQTT broker {broker}:{port}");

        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), REQUEST_CAPACITY);
        for topic in &self.topics {
            client
                .subscribe(topic.as_str(), QoS::AtLeastOnce)
                .await
                .with_context(|| format!("Failed to queue subscription to {topic}"))?;
        }

        self.await_subscriptions(&mut eventloop).await?;

        Ok(tokio::spawn(async move {
            self.pump(client, eventloop).await;
        }))
    }

    async fn await_subscriptions(&self, eventloop: &mut EventLoop) -> anyhow::Result<()> {
        let mut queued: VecDeque<&str> = self.topics.iter().map(String::as_str).collect();
        let mut in_flight: HashMap<u16, &str> = HashMap::new();
        let mut pending = self.topics.len();

        while pending > 0 {
            let event = eventloop
                .poll()
                .await
                .context("MQTT connection failed during startup")?;
            match event {
                Event::Incoming(Packet::ConnAck(_)) => {
                    let (broker, port) = self.options.broker_address();
                    tracing::info!("Connected to broker {broker}:{port}");
                }
                Event::Outgoing(Outgoing::Subscribe(pkid)) => {
                    if let Some(topic) = queued.pop_front() {
                        in_flight.insert(pkid, topic);
                    }
                }
                Event::Incoming(Packet::SubAck(ack)) => {
                    let topic = in_flight.remove(&ack.pkid).unwrap_or("<unknown>");
                    if ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        anyhow::bail!("Broker refused subscription to {topic}");
                    }
                    tracing::info!("Subscribed to topic: {topic}");
                    pending -= 1;
                }
                Event::Incoming(Packet::Publish(publish)) => {
                    self.forward_during_startup(publish.topic, publish.payload.to_vec())?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Runs until the connection drops. The client is held here so the event
    /// loop keeps its request channel open.
    async fn pump(self, _client: AsyncClient, mut eventloop: EventLoop) {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if self
                        .forward(publish.topic, publish.payload.to_vec())
                        .await
                        .is_err()
                    {
                        tracing::error!("Router is gone, stopping MQTT reader");
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("MQTT connection lost: {e}");
                    let _ = self
                        .events
                        .send(TransportEvent::ConnectionLost(e.to_string()))
                        .await;
                    break;
                }
            }
        }
        tracing::info!("MQTT reader exiting");
    }

    /// The router is not consuming yet while subscriptions are pending, so
    /// waiting for channel space here would stall startup. Readings that do
    /// not fit are dropped; the next publish on the topic replaces them.
    fn forward_during_startup(&self, topic: String, payload: Vec<u8>) -> anyhow::Result<()> {
        match self.events.try_send(TransportEvent::Message { topic, payload }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(TransportEvent::Message { topic, .. })) => {
                tracing::warn!("Router not keeping up during startup, dropping reading on {topic}");
                Ok(())
            }
            Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Closed(_)) => anyhow::bail!("Cant send message to router"),
        }
    }

    async fn forward(&self, topic: String, payload: Vec<u8>) -> anyhow::Result<()> {
        self.events
            .send(TransportEvent::Message { topic, payload })
            .await
            .context("Cant send message to router")
    }
}

fn mqtt_options(config: &BridgeConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.broker, config.port);
    options
        .set_credentials(&config.username, &config.password)
        .set_keep_alive(KEEP_ALIVE)
        .set_clean_session(true);
    options
}

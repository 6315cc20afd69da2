use crate::ingestion_mapping::IngestionMapping;
use crate::property_store::PropertyStore;
use std::num::ParseFloatError;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::Receiver;

/// What the MQTT side hands to the router.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message { topic: String, payload: Vec<u8> },
    ConnectionLost(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum PayloadError {
    #[error("Payload is not UTF-8")]
    NotUtf8,

    #[error("Payload {payload:?} is not a number: {source}")]
    Invalid {
        payload: String,
        source: ParseFloatError,
    },

    #[error("Payload {0:?} is not a finite number")]
    NotFinite(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Number of property paths written.
    Updated(usize),
    Malformed,
    Unmatched,
}

/// Parses a decimal ASCII reading. Spaces used as digit-group separators
/// (`"12 345.6"`) are dropped before parsing.
pub fn parse_measurement(payload: &[u8]) -> Result<f64, PayloadError> {
    let raw = std::str::from_utf8(payload).map_err(|_| PayloadError::NotUtf8)?;
    let cleaned: String = raw.trim().chars().filter(|c| *c != ' ').collect();
    let value: f64 = cleaned.parse().map_err(|source| PayloadError::Invalid {
        payload: raw.to_string(),
        source,
    })?;
    if !value.is_finite() {
        return Err(PayloadError::NotFinite(raw.to_string()));
    }
    Ok(value)
}

/// Turns inbound messages into store updates. Holds nothing but the mapping.
pub struct Router {
    mapping: IngestionMapping,
    store: Arc<PropertyStore>,
}

impl Router {
    pub fn new(mapping: IngestionMapping, store: Arc<PropertyStore>) -> Self {
        Self { mapping, store }
    }

    pub fn route(&self, topic: &str, payload: &[u8]) -> RouteOutcome {
        tracing::debug!(
            "Received message: {} from topic: {topic}",
            String::from_utf8_lossy(payload)
        );

        let mut routes = self.mapping.matching(topic).peekable();
        if routes.peek().is_none() {
            tracing::trace!("No route for topic {topic}, dropping");
            return RouteOutcome::Unmatched;
        }

        let value = match parse_measurement(payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Dropping message on {topic}: {e}");
                return RouteOutcome::Malformed;
            }
        };

        let mut updated = 0;
        for route in routes {
            for target in &route.targets {
                match self.store.set(&target.path, value, &target.unit) {
                    Ok(record) => {
                        tracing::debug!("{} = {}", target.path, record.text());
                        updated += 1;
                    }
                    Err(e) => {
                        tracing::error!("Failed to update {} from {topic}: {e}", target.path)
                    }
                }
            }
        }
        RouteOutcome::Updated(updated)
    }

    /// Consumes transport events until the connection is lost.
    ///
    /// Only ever returns an error: a lost MQTT connection is not retried.
    pub async fn run(self, mut events: Receiver<TransportEvent>) -> anyhow::Result<()> {
        tracing::info!("Starting ingestion router");
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Message { topic, payload } => {
                    self.route(&topic, &payload);
                }
                TransportEvent::ConnectionLost(reason) => {
                    anyhow::bail!("Connect lost: {reason}");
                }
            }
        }
        anyhow::bail!("MQTT transport stopped")
    }
}

//! Grid Meter Bridge Library
//!
//! Republishes grid power and energy readings received over MQTT as a
//! `com.victronenergy.BusItem` grid meter on D-Bus, for Venus OS style hosts.

pub mod bridge;
pub mod bus_item;
pub mod catalog;
pub mod change_emitter;
pub mod config;
pub mod ingestion_mapping;
pub mod logging;
pub mod mqtt_reader;
pub mod property_store;
pub mod router;

// Re-export commonly used types for easier access
pub use bridge::GridMeterBridge;
pub use config::BridgeConfig;
pub use property_store::{PropertyRecord, PropertyStore, PropertyValue};
pub use router::{Router, TransportEvent};

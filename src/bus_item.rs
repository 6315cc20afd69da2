use crate::config::BusKind;
use crate::property_store::{PropertyRecord, PropertyStore, PropertyValue, StoreError};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use zbus::{
    fdo::{self, RequestNameFlags, RequestNameReply},
    interface,
    object_server::SignalEmitter,
    zvariant::{OwnedValue, Value},
    Connection,
};

/// Status returned by `SetValue`. Writes from the bus are never applied.
pub const SET_VALUE_REFUSED: i32 = 1;

#[derive(Debug, Error)]
pub enum ExpositionError {
    #[error("D-Bus error: {0}")]
    Bus(#[from] zbus::Error),

    #[error("name {0} already taken on dbus")]
    NameTaken(String),
}

pub async fn connect(bus: BusKind) -> Result<Connection, ExpositionError> {
    let connection = match bus {
        BusKind::System => Connection::system().await?,
        BusKind::Session => Connection::session().await?,
    };
    Ok(connection)
}

/// One exported property, served from the shared store.
pub struct BusItem {
    path: String,
    store: Arc<PropertyStore>,
}

impl BusItem {
    pub fn new(path: impl Into<String>, store: Arc<PropertyStore>) -> Self {
        Self {
            path: path.into(),
            store,
        }
    }

    fn record(&self) -> fdo::Result<PropertyRecord> {
        self.store.get(&self.path).map_err(|e| match e {
            StoreError::UnknownPath(path) => fdo::Error::UnknownObject(path),
            other => fdo::Error::Failed(other.to_string()),
        })
    }
}

#[interface(name = "com.victronenergy.BusItem")]
impl BusItem {
    async fn get_value(&self) -> fdo::Result<OwnedValue> {
        let record = self.record()?;
        tracing::debug!("GetValue() called for {}, returning {}", self.path, record.value());
        to_variant(record.value()).map_err(|e| fdo::Error::Failed(e.to_string()))
    }

    async fn get_text(&self) -> fdo::Result<String> {
        let record = self.record()?;
        tracing::debug!("GetText() called for {}, returning {}", self.path, record.text());
        Ok(record.text().trim_matches('"').to_string())
    }

    async fn set_value(&self, value: OwnedValue) -> i32 {
        tracing::debug!("SetValue({value:?}) refused for {}", self.path);
        SET_VALUE_REFUSED
    }

    #[zbus(signal)]
    pub async fn properties_changed(
        emitter: &SignalEmitter<'_>,
        properties: HashMap<&str, Value<'_>>,
    ) -> zbus::Result<()>;
}

fn as_value(value: &PropertyValue) -> Value<'_> {
    match value {
        PropertyValue::Double(v) => Value::from(*v),
        PropertyValue::Int(v) => Value::from(*v),
        PropertyValue::Text(v) => Value::from(v.as_str()),
    }
}

pub fn to_variant(value: &PropertyValue) -> zbus::zvariant::Result<OwnedValue> {
    as_value(value).try_to_owned()
}

/// The `{"Value", "Text"}` payload of a `PropertiesChanged` signal.
pub fn change_payload(record: &PropertyRecord) -> HashMap<&str, Value<'_>> {
    HashMap::from([
        ("Value", as_value(record.value())),
        ("Text", Value::from(record.text())),
    ])
}

/// Serves a `BusItem` at every path in the store.
pub async fn export_properties(
    connection: &Connection,
    store: &Arc<PropertyStore>,
) -> Result<(), ExpositionError> {
    let object_server = connection.object_server();
    for (index, path) in store.paths().enumerate() {
        tracing::debug!("Registering dbus path #{index}: {path}");
        object_server
            .at(path.as_str(), BusItem::new(path.as_str(), store.clone()))
            .await?;
    }
    tracing::info!("Registered {} dbus paths", store.len());
    Ok(())
}

/// Claims the well-known name without queueing behind an existing owner.
pub async fn claim_service_name(
    connection: &Connection,
    name: &str,
) -> Result<(), ExpositionError> {
    let reply = connection
        .request_name_with_flags(name, RequestNameFlags::DoNotQueue.into())
        .await
        .map_err(|e| match e {
            zbus::Error::NameTaken => ExpositionError::NameTaken(name.to_string()),
            other => ExpositionError::Bus(other),
        })?;
    match reply {
        RequestNameReply::PrimaryOwner | RequestNameReply::AlreadyOwner => Ok(()),
        RequestNameReply::InQueue | RequestNameReply::Exists => {
            Err(ExpositionError::NameTaken(name.to_string()))
        }
    }
}

use std::{
    borrow::Borrow,
    collections::HashMap,
    fmt,
    sync::{Mutex, PoisonError},
};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("Unknown property path: {0}")]
    UnknownPath(String),

    #[error("Property path {0} is read-only")]
    ReadOnly(String),

    #[error("Property path {0} registered twice")]
    DuplicatePath(String),
}

/// Slash-delimited address of one exposed attribute, e.g. `/Ac/L1/Power`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyPath(String);

impl PropertyPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PropertyPath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Double(f64),
    Int(i32),
    Text(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Double(v) => write!(f, "{v}"),
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Text(v) => f.write_str(v),
        }
    }
}

/// Typed value and display text of one property.
///
/// Both fields are only ever produced together by the constructors below, so a
/// reader can never see text rendered from a different value.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyRecord {
    value: PropertyValue,
    text: String,
}

impl PropertyRecord {
    /// A measurement rendered as `"<value to 2dp> <unit>"`.
    pub fn measurement(value: f64, unit: &str) -> Self {
        Self {
            value: PropertyValue::Double(value),
            text: format_measurement(value, unit),
        }
    }

    /// An identity constant whose text is the plain display form of the value.
    pub fn identity(value: PropertyValue) -> Self {
        let text = value.to_string();
        Self { value, text }
    }

    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

pub fn format_measurement(value: f64, unit: &str) -> String {
    format!("{value:.2} {unit}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathClass {
    Static,
    Dynamic,
}

/// Queued after every successful `set`, consumed by the change emitter.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub path: PropertyPath,
    pub record: PropertyRecord,
}

#[derive(Debug)]
struct Entry {
    class: PathClass,
    record: Mutex<PropertyRecord>,
}

/// Collects the full path set before the store is shared.
#[derive(Debug, Default)]
pub struct PropertyStoreBuilder {
    entries: HashMap<PropertyPath, Entry>,
    order: Vec<PropertyPath>,
}

impl PropertyStoreBuilder {
    pub fn register_static(
        &mut self,
        path: &str,
        value: PropertyValue,
    ) -> Result<&mut Self, StoreError> {
        self.insert(path, PathClass::Static, PropertyRecord::identity(value))
    }

    pub fn register_dynamic(
        &mut self,
        path: &str,
        initial: f64,
        unit: &str,
    ) -> Result<&mut Self, StoreError> {
        self.insert(
            path,
            PathClass::Dynamic,
            PropertyRecord::measurement(initial, unit),
        )
    }

    fn insert(
        &mut self,
        path: &str,
        class: PathClass,
        record: PropertyRecord,
    ) -> Result<&mut Self, StoreError> {
        if self.entries.contains_key(path) {
            return Err(StoreError::DuplicatePath(path.to_string()));
        }
        let path = PropertyPath::new(path);
        self.order.push(path.clone());
        self.entries.insert(
            path,
            Entry {
                class,
                record: Mutex::new(record),
            },
        );
        Ok(self)
    }

    pub fn build(self, changes: UnboundedSender<PropertyChange>) -> PropertyStore {
        PropertyStore {
            entries: self.entries,
            order: self.order,
            changes,
        }
    }
}

/// Current state of every exposed property.
///
/// The path set is frozen at build time, so the map itself is never locked;
/// each record sits behind its own mutex and writers to unrelated paths never
/// contend.
#[derive(Debug)]
pub struct PropertyStore {
    entries: HashMap<PropertyPath, Entry>,
    order: Vec<PropertyPath>,
    changes: UnboundedSender<PropertyChange>,
}

impl PropertyStore {
    pub fn builder() -> PropertyStoreBuilder {
        PropertyStoreBuilder::default()
    }

    pub fn get(&self, path: &str) -> Result<PropertyRecord, StoreError> {
        let entry = self
            .entries
            .get(path)
            .ok_or_else(|| StoreError::UnknownPath(path.to_string()))?;
        let record = entry.record.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(record.clone())
    }

    /// Replaces the record for a dynamic path and queues a change notification.
    pub fn set(&self, path: &str, value: f64, unit: &str) -> Result<PropertyRecord, StoreError> {
        let (key, entry) = self
            .entries
            .get_key_value(path)
            .ok_or_else(|| StoreError::UnknownPath(path.to_string()))?;
        if entry.class == PathClass::Static {
            return Err(StoreError::ReadOnly(path.to_string()));
        }

        let record = PropertyRecord::measurement(value, unit);
        let mut slot = entry.record.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = record.clone();
        // Queued while the slot is held so notifications for a path leave in mutation order.
        if self
            .changes
            .send(PropertyChange {
                path: key.clone(),
                record: record.clone(),
            })
            .is_err()
        {
            tracing::trace!("No change emitter running, dropped notification for {key}");
        }
        Ok(record)
    }

    pub fn class(&self, path: &str) -> Option<PathClass> {
        self.entries.get(path).map(|entry| entry.class)
    }

    /// All registered paths in registration order.
    pub fn paths(&self) -> impl Iterator<Item = &PropertyPath> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

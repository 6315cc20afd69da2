use crate::property_store::{PathClass, PropertyStore};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum MappingError {
    #[error("Topic {topic} targets unregistered path {path}")]
    UnknownTarget { topic: String, path: String },

    #[error("Topic {topic} targets static path {path}")]
    StaticTarget { topic: String, path: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub path: String,
    pub unit: String,
}

impl Target {
    fn new(path: &str, unit: &str) -> Self {
        Self {
            path: path.to_string(),
            unit: unit.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub topic: String,
    pub targets: Vec<Target>,
}

impl Route {
    /// Inbound topics may carry a broker-side prefix, so a route matches on suffix.
    pub fn matches(&self, topic: &str) -> bool {
        topic.ends_with(&self.topic)
    }
}

/// Fixed table from MQTT topic to the property paths it feeds.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionMapping {
    routes: Vec<Route>,
}

impl IngestionMapping {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    /// The meter's three feeds. Power also lands on the L1 path; the energy
    /// counters only feed their aggregate paths.
    pub fn reference(power_topic: &str, sold_topic: &str, purchased_topic: &str) -> Self {
        Self::new(vec![
            Route {
                topic: power_topic.to_string(),
                targets: vec![Target::new("/Ac/Power", "W"), Target::new("/Ac/L1/Power", "W")],
            },
            Route {
                topic: sold_topic.to_string(),
                targets: vec![Target::new("/Ac/Energy/Reverse", "kWh")],
            },
            Route {
                topic: purchased_topic.to_string(),
                targets: vec![Target::new("/Ac/Energy/Forward", "kWh")],
            },
        ])
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|route| route.topic.as_str())
    }

    pub fn matching<'a>(&'a self, topic: &'a str) -> impl Iterator<Item = &'a Route> {
        self.routes.iter().filter(move |route| route.matches(topic))
    }

    /// Checks that every target is a dynamic path of the store.
    pub fn validate(&self, store: &PropertyStore) -> Result<(), MappingError> {
        for route in &self.routes {
            for target in &route.targets {
                match store.class(&target.path) {
                    Some(PathClass::Dynamic) => {}
                    Some(PathClass::Static) => {
                        return Err(MappingError::StaticTarget {
                            topic: route.topic.clone(),
                            path: target.path.clone(),
                        })
                    }
                    None => {
                        return Err(MappingError::UnknownTarget {
                            topic: route.topic.clone(),
                            path: target.path.clone(),
                        })
                    }
                }
            }
        }
        Ok(())
    }
}

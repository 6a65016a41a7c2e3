use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("failed to read config file {path}: {source}")]
  Io {
    path: String,
    source: std::io::Error,
  },
  #[error("invalid yaml: {0}")]
  Yaml(#[from] serde_yaml::Error),
  #[error("room {0} has no thermostats")]
  NoThermostats(String),
  #[error("thermostat {entity_id} has weight {weight}, expected 1..=20")]
  InvalidWeight { entity_id: String, weight: f64 },
  #[error("total valve weight must be positive, got {0}")]
  WeightSum(f64),
  #[error("thermostat {entity_id} is assigned to both {first} and {second}")]
  DuplicateValve {
    entity_id: String,
    first: String,
    second: String,
  },
  #[error("boiler {0:?} is not a usable entity id")]
  UnknownBoiler(String),
  #[error("schedule rule {rule:?}: {reason}")]
  InvalidRule { rule: Option<String>, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReadingError {
  #[error("valve {0} does not belong to this room")]
  UnknownValve(String),
  #[error("valve {valve} reading is missing {fields:?}")]
  MissingFields {
    valve: String,
    fields: Vec<&'static str>,
  },
}

#[derive(Error, Debug)]
pub enum TransportError {
  #[error("publish failed: {0}")]
  Publish(String),
  #[error("failed to encode command: {0}")]
  Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HouseError {
  #[error("no room named {0}")]
  UnknownRoom(String),
}

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;

use crate::{house::House, model::ValveReading};

pub struct MessageHandler {
  valves: HashMap<String, String>,
  house: Arc<House>,
}

impl MessageHandler {
  pub fn new<'a, I>(base_topic: &str, valve_ids: I, house: Arc<House>) -> Self
  where
    I: IntoIterator<Item = &'a str>,
  {
    let valves = valve_ids
      .into_iter()
      .map(|valve_id| (format!("{}/{}", base_topic, valve_id), valve_id.to_string()))
      .collect();
    MessageHandler { valves, house }
  }

  /// Applies a valve report. Unknown topics and malformed payloads are logged
  /// and dropped.
  pub async fn handle_message(&self, message: Bytes, topic: &str) {
    let valve_id = match self.find_valve_for_topic(topic) {
      Some(valve_id) => valve_id,
      None => {
        log::debug!("ignoring message on topic {}", topic);
        return;
      }
    };
    let reading: ValveReading = match serde_json::from_slice(&message) {
      Ok(reading) => reading,
      Err(err) => {
        log::warn!("malformed report from {} on {}: {}", valve_id, topic, err);
        return;
      }
    };
    log::debug!("update state for valve {} with value {:?}", valve_id, reading);
    self.house.valve_state_changed(valve_id, &reading).await;
  }

  fn find_valve_for_topic(&self, topic: &str) -> Option<&str> {
    self.valves.get(topic).map(|valve_id| valve_id.as_str())
  }
}

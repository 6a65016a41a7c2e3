use std::collections::BTreeMap;

use crate::{
  error::{ConfigError, ReadingError},
  model::{BoostDirection, BoostFlag, TempDirection, ValveReading},
};

pub const DEFAULT_ROOM_TEMP: f64 = 20.0;
pub const TEMP_HYSTERESIS: f64 = 0.5;
/// Set-point shift applied by a valve's boost button.
pub const BOOST_STEP: f64 = 2.0;
/// Noise margin below the nominal boost step.
pub const BOOST_THRESHOLD: f64 = 1.5;

/// The valves of one room. Room temperature and valve boost are aggregated
/// from all the valves in the group.
#[derive(Debug)]
pub struct ValveGroup {
  weights: BTreeMap<String, f64>,
  weight_sum: f64,
  room_temperature: f64,
  temperature_direction: TempDirection,
  last_valve_setpoint: BTreeMap<String, f64>,
  last_valve_boost_flag: BTreeMap<String, BoostFlag>,
  pending_sync: BTreeMap<String, bool>,
  pending_sync_target: Option<f64>,
  detected_boost_direction: BoostDirection,
  detected_boost_temperature: Option<f64>,
}

impl ValveGroup {
  pub fn new<I>(room: &str, weights: I) -> Result<Self, ConfigError>
  where
    I: IntoIterator<Item = (String, f64)>,
  {
    let weights: BTreeMap<String, f64> = weights.into_iter().collect();
    if weights.is_empty() {
      return Err(ConfigError::NoThermostats(room.to_string()));
    }
    for (entity_id, weight) in weights.iter() {
      if !weight.is_finite() || *weight <= 0.0 {
        return Err(ConfigError::InvalidWeight { entity_id: entity_id.clone(), weight: *weight });
      }
    }
    let weight_sum: f64 = weights.values().sum();
    if !(weight_sum > 0.0) {
      return Err(ConfigError::WeightSum(weight_sum));
    }
    let pending_sync = weights.keys().map(|id| (id.clone(), false)).collect();
    Ok(ValveGroup {
      weights,
      weight_sum,
      room_temperature: DEFAULT_ROOM_TEMP,
      temperature_direction: TempDirection::None,
      last_valve_setpoint: BTreeMap::new(),
      last_valve_boost_flag: BTreeMap::new(),
      pending_sync,
      pending_sync_target: None,
      detected_boost_direction: BoostDirection::None,
      detected_boost_temperature: None,
    })
  }

  pub fn room_temperature(&self) -> f64 {
    self.room_temperature
  }

  pub fn temperature_direction(&self) -> TempDirection {
    self.temperature_direction
  }

  pub fn valve_ids(&self) -> impl Iterator<Item = &str> {
    self.weights.keys().map(|id| id.as_str())
  }

  pub fn contains(&self, valve_id: &str) -> bool {
    self.weights.contains_key(valve_id)
  }

  /// Fuses a valve report into the group. Sub-updates whose field is
  /// missing are skipped; the missing fields are reported in the error after
  /// the rest of the reading has been applied.
  pub fn update_state(&mut self, valve_id: &str, reading: &ValveReading) -> Result<(), ReadingError> {
    let weight = match self.weights.get(valve_id) {
      Some(weight) => *weight,
      None => return Err(ReadingError::UnknownValve(valve_id.to_string())),
    };
    let mut missing = Vec::new();

    match reading.local_temperature {
      Some(local_temperature) => {
        let previous = self.room_temperature;
        if self.weights.len() == 1 {
          self.room_temperature = local_temperature;
        } else {
          // Nudge toward the new reading by its weight share; not a recompute.
          self.room_temperature -= self.room_temperature * weight / self.weight_sum;
          self.room_temperature += local_temperature * weight / self.weight_sum;
        }
        self.temperature_direction = if previous > self.room_temperature {
          TempDirection::Cooling
        } else if previous < self.room_temperature {
          TempDirection::Heating
        } else {
          TempDirection::None
        };
        log::debug!(
          "valve {} reports {}, room temperature {} -> {} ({:?})",
          valve_id, local_temperature, previous, self.room_temperature, self.temperature_direction
        );
      }
      None => missing.push("local_temperature"),
    }

    match reading.commanded_setpoint {
      Some(setpoint) => {
        self.last_valve_setpoint.insert(valve_id.to_string(), setpoint);
        if self.waiting_synch() && Some(setpoint) == self.pending_sync_target {
          log::debug!("valve {} synched to {}", valve_id, setpoint);
          self.pending_sync.insert(valve_id.to_string(), false);
        }
      }
      None => missing.push("occupied_heating_setpoint"),
    }

    match reading.boost {
      Some(flag) => {
        self.last_valve_boost_flag.insert(valve_id.to_string(), flag);
      }
      None => missing.push("boost"),
    }

    if missing.is_empty() {
      Ok(())
    } else {
      Err(ReadingError::MissingFields { valve: valve_id.to_string(), fields: missing })
    }
  }

  /// While the room is cooling a wider margin is required before calling for
  /// heat.
  pub fn determine_heating(&self, target_temperature: f64) -> bool {
    match self.temperature_direction {
      TempDirection::Cooling => target_temperature > self.room_temperature + TEMP_HYSTERESIS,
      _ => target_temperature > self.room_temperature,
    }
  }

  /// Records a controller initiated set-point change that every valve has to
  /// acknowledge.
  pub fn schedule_setpoint(&mut self, new_target: f64) {
    for pending in self.pending_sync.values_mut() {
      *pending = true;
    }
    self.pending_sync_target = Some(new_target);
  }

  pub fn waiting_synch(&self) -> bool {
    self.pending_sync.values().any(|pending| *pending)
  }

  /// Valves keep their boost flag latched, so a boost is only visible as a
  /// set-point change reported by the valve that we did not command.
  pub fn detect_boost(&mut self, valve_id: &str, commanded_setpoint: f64) {
    if !self.waiting_synch() {
      if let Some(valve_setpoint) = self.last_valve_setpoint.get(valve_id) {
        let delta = commanded_setpoint - valve_setpoint;
        let flag = self.last_valve_boost_flag.get(valve_id).copied().unwrap_or(BoostFlag::None);
        log::debug!("valve {} boost delta {} flag {:?}", valve_id, delta, flag);
        if delta < -BOOST_THRESHOLD && flag == BoostFlag::Up {
          log::debug!("valve {} BOOST UP", valve_id);
          self.detected_boost_temperature = Some(self.room_temperature + BOOST_STEP);
          self.detected_boost_direction = BoostDirection::Up;
          return;
        } else if delta > BOOST_THRESHOLD && flag == BoostFlag::Down {
          log::debug!("valve {} BOOST DOWN", valve_id);
          self.detected_boost_temperature = Some(self.room_temperature - BOOST_STEP);
          self.detected_boost_direction = BoostDirection::Down;
          return;
        }
      }
    }
    self.detected_boost_temperature = Some(self.room_temperature);
    self.detected_boost_direction = BoostDirection::None;
  }

  pub fn has_boost(&self) -> (BoostDirection, Option<f64>) {
    (self.detected_boost_direction, self.detected_boost_temperature)
  }
}

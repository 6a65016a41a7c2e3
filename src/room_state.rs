use chrono::{DateTime, Local};
use serde::Serialize;

use crate::{
  model::FROST_PROTECTION_TEMP,
  schedule::{Schedule, ScheduleValue},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
  AwayOn,
  AwayOff,
  BoostAll,
  CancelAll,
  ValveBoostDetected,
  ManualSet,
  RoomBoostSet,
  AutoResume,
}

/// Override mode of a room. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RoomState {
  /// Following the schedule.
  Auto,
  /// House in away mode.
  Away,
  /// House wide boost.
  HouseBoost,
  /// Boost started with the button on a valve.
  ValveBoost,
  Manual,
  /// Boost requested for this room only.
  RoomBoost,
}

/// What a state needs to know about its room to pick a set-point.
pub trait RoomContext {
  fn name(&self) -> &str;
  fn setpoint(&self) -> f64;
  fn away_temp(&self) -> f64;
  fn boost_all_temp(&self) -> Option<f64>;
  fn manual_temp(&self) -> Option<f64>;
  fn valve_boost_temp(&self) -> Option<f64>;
  fn schedule(&self) -> &dyn Schedule;
}

impl RoomState {
  /// Events a state does not handle leave it unchanged.
  pub fn on_event(self, event: Event) -> RoomState {
    use Event::*;
    use RoomState::*;
    let next = match self {
      Auto => match event {
        AwayOn => Away,
        BoostAll => HouseBoost,
        ValveBoostDetected => ValveBoost,
        RoomBoostSet => RoomBoost,
        _ => self,
      },
      Away => match event {
        AwayOff => Auto,
        _ => self,
      },
      HouseBoost => match event {
        CancelAll => Auto,
        ValveBoostDetected => ValveBoost,
        ManualSet => Manual,
        RoomBoostSet => RoomBoost,
        _ => self,
      },
      ValveBoost => match event {
        AutoResume => Auto,
        ManualSet => Manual,
        _ => self,
      },
      Manual => match event {
        AwayOn => Away,
        ManualSet => Manual,
        ValveBoostDetected => ValveBoost,
        AutoResume => Auto,
        _ => self,
      },
      RoomBoost => match event {
        AutoResume => Auto,
        ValveBoostDetected => ValveBoost,
        _ => self,
      },
    };
    if next != self {
      log::debug!("state {:?} --{:?}--> {:?}", self, event, next);
    }
    next
  }

  /// Target temperature for the room in this state. `None` keeps the
  /// current set-point.
  pub fn setpoint<R: RoomContext + ?Sized>(self, room: &R, time: &DateTime<Local>) -> Option<f64> {
    match self {
      RoomState::Auto => match room.schedule().evaluate(room.name(), time) {
        None => {
          log::warn!("room {}: no schedule rule matches {}, keeping set-point {}", room.name(), time, room.setpoint());
          Some(room.setpoint())
        }
        Some(found) => match found.value {
          ScheduleValue::Off => Some(FROST_PROTECTION_TEMP),
          ScheduleValue::Temperature(value) => Some(value),
        },
      },
      RoomState::Away => Some(room.away_temp()),
      RoomState::HouseBoost => room.boost_all_temp(),
      RoomState::ValveBoost => room.valve_boost_temp(),
      RoomState::Manual => room.manual_temp(),
      RoomState::RoomBoost => room.manual_temp(),
    }
  }
}

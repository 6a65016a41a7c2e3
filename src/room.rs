use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Local};
use tokio::sync::Mutex;

use crate::{
  error::{ConfigError, ReadingError},
  model::{BoostDirection, DisplayedSetpoint, RoomSnapshot, ValveReading},
  room_state::{Event, RoomContext, RoomState},
  schedule::Schedule,
  timer::{Expiry, ExpirySender, Timer, TimerId},
  transport::ValveTransport,
  valves::{ValveGroup, BOOST_STEP},
};

pub const DEFAULT_SETPOINT: f64 = 20.0;
pub const DEFAULT_AWAY_TEMP: f64 = 16.0;
pub const VALVE_BOOST_DURATION: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq)]
pub struct Thermostat {
  pub entity_id: String,
  pub weight: f64,
}

/// A room controlled by one or more thermostatic valves.
///
/// In automatic mode the set-point comes from the room's schedule; away,
/// house boost, valve boost, manual and room boost override it. Boosts end
/// on a timer owned by the room.
pub struct Room {
  name: String,
  schedule: Arc<dyn Schedule>,
  state: RoomState,
  setpoint: f64,
  heating: bool,
  away_temp: f64,
  boost_all_temp: Option<f64>,
  manual_temp: Option<f64>,
  valve_boost_timer: Option<Timer>,
  room_boost_timer: Option<Timer>,
  valves: ValveGroup,
  transport: Arc<dyn ValveTransport>,
  send_lock: Mutex<()>,
  expiries: ExpirySender,
}

impl fmt::Display for Room {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}@{:?}, sp={}", self.name, self.state, self.setpoint)
  }
}

impl RoomContext for Room {
  fn name(&self) -> &str {
    &self.name
  }

  fn setpoint(&self) -> f64 {
    self.setpoint
  }

  fn away_temp(&self) -> f64 {
    self.away_temp
  }

  fn boost_all_temp(&self) -> Option<f64> {
    self.boost_all_temp
  }

  fn manual_temp(&self) -> Option<f64> {
    self.manual_temp
  }

  fn valve_boost_temp(&self) -> Option<f64> {
    self.valves.has_boost().1
  }

  fn schedule(&self) -> &dyn Schedule {
    self.schedule.as_ref()
  }
}

impl Room {
  pub fn new(
    name: &str,
    thermostats: Vec<Thermostat>,
    schedule: Arc<dyn Schedule>,
    transport: Arc<dyn ValveTransport>,
    expiries: ExpirySender,
  ) -> Result<Self, ConfigError> {
    let valves = ValveGroup::new(name, thermostats.into_iter().map(|t| (t.entity_id, t.weight)))?;
    Ok(Room {
      name: name.to_string(),
      schedule,
      state: RoomState::Auto,
      setpoint: DEFAULT_SETPOINT,
      heating: false,
      away_temp: DEFAULT_AWAY_TEMP,
      boost_all_temp: None,
      manual_temp: None,
      valve_boost_timer: None,
      room_boost_timer: None,
      valves,
      transport,
      send_lock: Mutex::new(()),
      expiries,
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn state(&self) -> RoomState {
    self.state
  }

  pub fn setpoint(&self) -> f64 {
    self.setpoint
  }

  pub fn room_temperature(&self) -> f64 {
    self.valves.room_temperature()
  }

  pub fn demands_heat(&self) -> bool {
    self.heating
  }

  pub fn valve_boost(&self) -> bool {
    self.valves.has_boost().0 != BoostDirection::None
  }

  pub fn valves(&self) -> &ValveGroup {
    &self.valves
  }

  pub fn contains_valve(&self, valve_id: &str) -> bool {
    self.valves.contains(valve_id)
  }

  pub fn snapshot(&self) -> RoomSnapshot {
    RoomSnapshot {
      name: self.name.clone(),
      state: format!("{:?}", self.state),
      temperature: self.room_temperature(),
      setpoint: DisplayedSetpoint(self.setpoint),
      heating: self.heating,
      valve_boost: self.valve_boost(),
      manual: self.state == RoomState::Manual,
    }
  }

  /// Handles a state report from one of the room's valves and re-affirms
  /// the room's set-point on that valve.
  pub async fn valve_state_changed(&mut self, valve_id: &str, reading: &ValveReading) {
    match self.valves.update_state(valve_id, reading) {
      Ok(()) => {}
      Err(ReadingError::UnknownValve(_)) => {
        log::warn!("room {}: ignoring report from unknown valve {}", self.name, valve_id);
        return;
      }
      Err(err) => log::warn!("room {}: {}", self.name, err),
    }
    self.valves.detect_boost(valve_id, self.setpoint);
    self.send_setpoint(valve_id).await;
  }

  /// Periodic control cycle. Schedule changes and valve boosts are picked
  /// up here.
  pub async fn tick(&mut self, time: &DateTime<Local>) {
    self.determine_heating(time).await;
    if self.state != RoomState::Away && self.state != RoomState::ValveBoost && self.valve_boost() {
      log::info!("room {} has valve boost", self.name);
      self.cancel_room_boost();
      self.transition(Event::ValveBoostDetected);
      self.cancel_valve_boost();
      let room = self.name.clone();
      self.valve_boost_timer = Some(Timer::arm(VALVE_BOOST_DURATION, &self.expiries, |timer| {
        Expiry::ValveBoost { room, timer }
      }));
    }
  }

  pub async fn away(&mut self, active: bool, target: f64, time: &DateTime<Local>) {
    log::info!("room {} away mode: {} ({})", self, active, target);
    self.away_temp = target;
    self.transition(if active { Event::AwayOn } else { Event::AwayOff });
    self.determine_heating(time).await;
  }

  /// The house boost target is the current room temperature plus the boost
  /// step.
  pub async fn boost_all(&mut self, active: bool, time: &DateTime<Local>) {
    log::info!("room {} boost all: {}", self, active);
    self.boost_all_temp = if active { Some(self.room_temperature() + BOOST_STEP) } else { None };
    self.transition(if active { Event::BoostAll } else { Event::CancelAll });
    self.determine_heating(time).await;
  }

  pub async fn manual(&mut self, active: bool, target: f64, time: &DateTime<Local>) {
    log::info!("room {} manual: {} ({})", self, active, target);
    self.manual_temp = Some(target);
    self.transition(if active { Event::ManualSet } else { Event::AutoResume });
    self.determine_heating(time).await;
  }

  /// Boosts the room to `target` for `duration_minutes`; zero cancels any
  /// override and resumes the schedule.
  pub async fn room_boost(&mut self, target: f64, duration_minutes: u64, time: &DateTime<Local>) {
    log::info!("room {} boost to {} for {} min", self, target, duration_minutes);
    if duration_minutes == 0 {
      self.auto(time).await;
      return;
    }
    self.cancel_valve_boost();
    self.cancel_room_boost();
    self.manual_temp = Some(target);
    let room = self.name.clone();
    self.room_boost_timer = Some(Timer::arm(
      Duration::from_secs(duration_minutes * 60),
      &self.expiries,
      |timer| Expiry::RoomBoost { room, timer },
    ));
    self.transition(Event::RoomBoostSet);
    self.determine_heating(time).await;
  }

  /// Back to the schedule. The set-point snaps to the room temperature
  /// until the schedule is evaluated.
  pub async fn auto(&mut self, time: &DateTime<Local>) {
    log::info!("room {} auto mode", self);
    self.setpoint = self.room_temperature();
    self.transition(Event::AutoResume);
    self.determine_heating(time).await;
  }

  pub fn valve_boost_timer(&self) -> Option<TimerId> {
    self.valve_boost_timer.as_ref().map(Timer::id)
  }

  pub fn room_boost_timer(&self) -> Option<TimerId> {
    self.room_boost_timer.as_ref().map(Timer::id)
  }

  pub async fn valve_boost_expired(&mut self, timer: TimerId, time: &DateTime<Local>) {
    match self.valve_boost_timer.take() {
      Some(armed) if armed.id() == timer => {
        log::info!("room {} valve boost end", self);
        armed.cancel();
        self.transition(Event::AutoResume);
        self.determine_heating(time).await;
      }
      armed => {
        log::debug!("room {}: stale valve boost timer {}", self.name, timer);
        self.valve_boost_timer = armed;
      }
    }
  }

  pub async fn room_boost_expired(&mut self, timer: TimerId, time: &DateTime<Local>) {
    match self.room_boost_timer.take() {
      Some(armed) if armed.id() == timer => {
        log::info!("room {} room boost end", self);
        armed.cancel();
        self.transition(Event::AutoResume);
        self.determine_heating(time).await;
      }
      armed => {
        log::debug!("room {}: stale room boost timer {}", self.name, timer);
        self.room_boost_timer = armed;
      }
    }
  }

  /// A boost timer only lives as long as the boost state it ends.
  fn transition(&mut self, event: Event) {
    let previous = self.state;
    self.state = self.state.on_event(event);
    if previous != self.state {
      match previous {
        RoomState::ValveBoost => self.cancel_valve_boost(),
        RoomState::RoomBoost => self.cancel_room_boost(),
        _ => {}
      }
    }
  }

  fn cancel_valve_boost(&mut self) {
    if let Some(timer) = self.valve_boost_timer.take() {
      timer.cancel();
    }
  }

  fn cancel_room_boost(&mut self) {
    if let Some(timer) = self.room_boost_timer.take() {
      timer.cancel();
    }
  }

  /// Picks the set-point for the current state and decides whether the room
  /// needs heat.
  async fn determine_heating(&mut self, time: &DateTime<Local>) {
    let new_setpoint = self.state.setpoint(&*self, time);
    if let Some(new_setpoint) = new_setpoint {
      if new_setpoint != self.setpoint {
        self.setpoint = new_setpoint;
        self.valves.schedule_setpoint(new_setpoint);
        self.send_setpoint_to_all().await;
      }
    }
    self.heating = self.valves.determine_heating(self.setpoint);
    log::info!("room {} demands heat: {}", self, self.heating);
  }

  async fn send_setpoint(&self, valve_id: &str) {
    let _guard = self.send_lock.lock().await;
    let setpoint = self.setpoint;
    if let Err(err) = self.transport.send_setpoint(valve_id, setpoint).await {
      log::warn!("room {}: failed to send set-point {} to {}: {}", self.name, setpoint, valve_id, err);
    }
  }

  async fn send_setpoint_to_all(&self) {
    let _guard = self.send_lock.lock().await;
    let setpoint = self.setpoint;
    for valve_id in self.valves.valve_ids() {
      if let Err(err) = self.transport.send_setpoint(valve_id, setpoint).await {
        log::warn!("room {}: failed to send set-point {} to {}: {}", self.name, setpoint, valve_id, err);
      }
    }
  }
}

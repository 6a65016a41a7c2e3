use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Local};
use futures::future::join_all;
use tokio::sync::Mutex;

use crate::{
  error::{ConfigError, HouseError},
  model::{HeatingMode, HouseSnapshot, RoomSnapshot, ValveReading},
  room::{Room, DEFAULT_AWAY_TEMP},
  timer::{Expiry, ExpiryReceiver, ExpirySender, Timer},
  transport::BoilerSwitch,
};

pub const BOOST_ALL_DURATION: Duration = Duration::from_secs(60 * 60);

struct HouseState {
  mode: HeatingMode,
  away_temp: f64,
  boost_all: bool,
  boost_timer: Option<Timer>,
  boiler_on: bool,
  rooms: Vec<RoomSnapshot>,
}

/// Drives all rooms of the house and the shared boiler.
///
/// Every room sits behind its own lock so events for one room are applied
/// one at a time while different rooms proceed independently.
pub struct House {
  name: String,
  rooms: Vec<Arc<Mutex<Room>>>,
  room_for_name: HashMap<String, usize>,
  room_for_valve: HashMap<String, usize>,
  boiler: Arc<dyn BoilerSwitch>,
  expiries: ExpirySender,
  state: Mutex<HouseState>,
}

impl House {
  pub fn new(
    name: &str,
    rooms: Vec<Room>,
    boiler: Arc<dyn BoilerSwitch>,
    expiries: ExpirySender,
  ) -> Result<Self, ConfigError> {
    let mut room_for_name = HashMap::new();
    let mut room_for_valve: HashMap<String, usize> = HashMap::new();
    for (index, room) in rooms.iter().enumerate() {
      room_for_name.insert(room.name().to_string(), index);
      for valve_id in room.valves().valve_ids() {
        if let Some(other) = room_for_valve.insert(valve_id.to_string(), index) {
          return Err(ConfigError::DuplicateValve {
            entity_id: valve_id.to_string(),
            first: rooms[other].name().to_string(),
            second: room.name().to_string(),
          });
        }
      }
    }
    let snapshots = rooms.iter().map(Room::snapshot).collect();
    Ok(House {
      name: name.to_string(),
      rooms: rooms.into_iter().map(|room| Arc::new(Mutex::new(room))).collect(),
      room_for_name,
      room_for_valve,
      boiler,
      expiries,
      state: Mutex::new(HouseState {
        mode: HeatingMode::Auto,
        away_temp: DEFAULT_AWAY_TEMP,
        boost_all: false,
        boost_timer: None,
        boiler_on: false,
        rooms: snapshots,
      }),
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn room(&self, name: &str) -> Result<Arc<Mutex<Room>>, HouseError> {
    self
      .room_for_name
      .get(name)
      .map(|index| self.rooms[*index].clone())
      .ok_or_else(|| HouseError::UnknownRoom(name.to_string()))
  }

  pub fn with_away_temp(mut self, away_temp: f64) -> Self {
    self.state.get_mut().away_temp = away_temp;
    self
  }

  /// Runs one control cycle on every room and switches the boiler on when
  /// at least one room demands heat.
  pub async fn control_heater(&self, time: &DateTime<Local>) -> bool {
    let snapshots = join_all(self.rooms.iter().map(|room| async move {
      let mut room = room.lock().await;
      room.tick(time).await;
      room.snapshot()
    }))
    .await;
    let demand = snapshots.iter().any(|room| room.heating);
    if demand {
      log::debug!("at least one room needs heat, setting boiler on");
    } else {
      log::debug!("no room needs heat, setting boiler off");
    }

    let changed = {
      let mut state = self.state.lock().await;
      state.rooms = snapshots;
      let changed = state.boiler_on != demand;
      state.boiler_on = demand;
      changed
    };
    if changed {
      log::info!("boiler {}", if demand { "on" } else { "off" });
    }
    if let Err(err) = self.boiler.set_boiler(demand).await {
      log::warn!("failed to switch boiler {}: {}", if demand { "on" } else { "off" }, err);
    }
    demand
  }

  pub async fn valve_state_changed(&self, valve_id: &str, reading: &ValveReading) {
    match self.room_for_valve.get(valve_id) {
      Some(index) => self.rooms[*index].lock().await.valve_state_changed(valve_id, reading).await,
      None => log::warn!("reading from unknown valve {}", valve_id),
    }
  }

  fn room_index(&self, name: &str) -> Result<usize, HouseError> {
    self.room_for_name.get(name).copied().ok_or_else(|| HouseError::UnknownRoom(name.to_string()))
  }

  async fn store_snapshot(&self, index: usize, snapshot: RoomSnapshot) {
    if let Some(stored) = self.state.lock().await.rooms.get_mut(index) {
      *stored = snapshot;
    }
  }

  async fn store_snapshots(&self, snapshots: Vec<RoomSnapshot>) {
    self.state.lock().await.rooms = snapshots;
  }

  /// Sets or clears away mode, optionally with a new away temperature.
  pub async fn set_away(&self, active: bool, temperature: Option<f64>, time: &DateTime<Local>) {
    let away_temp = {
      let mut state = self.state.lock().await;
      if let Some(temperature) = temperature {
        state.away_temp = temperature;
      }
      state.mode = if active { HeatingMode::Away } else { HeatingMode::Auto };
      state.away_temp
    };
    log::info!("house {} away mode {} at {}", self.name, active, away_temp);
    let mut snapshots = Vec::with_capacity(self.rooms.len());
    for room in self.rooms.iter() {
      let mut room = room.lock().await;
      room.away(active, away_temp, time).await;
      snapshots.push(room.snapshot());
    }
    self.store_snapshots(snapshots).await;
  }

  pub async fn set_away_temp(&self, temperature: f64, time: &DateTime<Local>) {
    let away = {
      let mut state = self.state.lock().await;
      state.away_temp = temperature;
      state.mode == HeatingMode::Away
    };
    log::debug!("house {} away temp set to {}", self.name, temperature);
    if away {
      let mut snapshots = Vec::with_capacity(self.rooms.len());
      for room in self.rooms.iter() {
        let mut room = room.lock().await;
        room.away(true, temperature, time).await;
        snapshots.push(room.snapshot());
      }
      self.store_snapshots(snapshots).await;
    }
  }

  /// Boosts every room for an hour. Rooms that are away stay away, and so
  /// does the house mode.
  pub async fn boost_all(&self, time: &DateTime<Local>) {
    {
      let mut state = self.state.lock().await;
      if let Some(timer) = state.boost_timer.take() {
        timer.cancel();
      }
      state.boost_all = true;
      if state.mode != HeatingMode::Away {
        state.mode = HeatingMode::Boost;
      }
      state.boost_timer = Some(Timer::arm(BOOST_ALL_DURATION, &self.expiries, |timer| Expiry::BoostAll { timer }));
    }
    log::info!("house {} boost all", self.name);
    self.deliver_boost_all(true, time).await;
  }

  async fn deliver_boost_all(&self, active: bool, time: &DateTime<Local>) {
    let mut snapshots = Vec::with_capacity(self.rooms.len());
    for room in self.rooms.iter() {
      let mut room = room.lock().await;
      room.boost_all(active, time).await;
      snapshots.push(room.snapshot());
    }
    self.store_snapshots(snapshots).await;
  }

  /// Drops every boost and manual override. Away mode is left alone.
  pub async fn cancel_overrides(&self, time: &DateTime<Local>) {
    let boosting = {
      let mut state = self.state.lock().await;
      if let Some(timer) = state.boost_timer.take() {
        timer.cancel();
      }
      if state.mode == HeatingMode::Boost {
        state.mode = HeatingMode::Auto;
      }
      std::mem::replace(&mut state.boost_all, false)
    };
    log::info!("house {} cancel overrides", self.name);
    let mut snapshots = Vec::with_capacity(self.rooms.len());
    for room in self.rooms.iter() {
      let mut room = room.lock().await;
      if boosting {
        room.boost_all(false, time).await;
      }
      room.auto(time).await;
      snapshots.push(room.snapshot());
    }
    self.store_snapshots(snapshots).await;
  }

  pub async fn set_manual(&self, room: &str, active: bool, temperature: f64, time: &DateTime<Local>) -> Result<(), HouseError> {
    let index = self.room_index(room)?;
    let snapshot = {
      let mut room = self.rooms[index].lock().await;
      room.manual(active, temperature, time).await;
      room.snapshot()
    };
    self.store_snapshot(index, snapshot).await;
    Ok(())
  }

  pub async fn boost_room(&self, room: &str, temperature: f64, duration_minutes: u64, time: &DateTime<Local>) -> Result<(), HouseError> {
    let index = self.room_index(room)?;
    let snapshot = {
      let mut room = self.rooms[index].lock().await;
      room.room_boost(temperature, duration_minutes, time).await;
      room.snapshot()
    };
    self.store_snapshot(index, snapshot).await;
    Ok(())
  }

  /// Routes an expired timer to its owner.
  pub async fn handle_expiry(&self, expiry: Expiry, time: &DateTime<Local>) {
    match expiry {
      Expiry::ValveBoost { room, timer } => match self.room_index(&room) {
        Ok(index) => {
          let snapshot = {
            let mut room = self.rooms[index].lock().await;
            room.valve_boost_expired(timer, time).await;
            room.snapshot()
          };
          self.store_snapshot(index, snapshot).await;
        }
        Err(err) => log::warn!("valve boost expiry: {}", err),
      },
      Expiry::RoomBoost { room, timer } => match self.room_index(&room) {
        Ok(index) => {
          let snapshot = {
            let mut room = self.rooms[index].lock().await;
            room.room_boost_expired(timer, time).await;
            room.snapshot()
          };
          self.store_snapshot(index, snapshot).await;
        }
        Err(err) => log::warn!("room boost expiry: {}", err),
      },
      Expiry::BoostAll { timer } => {
        let current = {
          let mut state = self.state.lock().await;
          match state.boost_timer.take() {
            Some(armed) if armed.id() == timer => {
              armed.cancel();
              state.boost_all = false;
              if state.mode == HeatingMode::Boost {
                state.mode = HeatingMode::Auto;
              }
              true
            }
            armed => {
              state.boost_timer = armed;
              false
            }
          }
        };
        if current {
          log::info!("house {} boost all end", self.name);
          self.deliver_boost_all(false, time).await;
        } else {
          log::debug!("stale boost all timer {}", timer);
        }
      }
    }
  }

  pub async fn run_expiries(self: Arc<Self>, mut expiries: ExpiryReceiver) {
    while let Some(expiry) = expiries.recv().await {
      self.handle_expiry(expiry, &Local::now()).await;
    }
  }

  /// Rooms as of the last control cycle or command, whichever came later.
  pub async fn snapshot(&self) -> HouseSnapshot {
    let state = self.state.lock().await;
    HouseSnapshot {
      name: self.name.clone(),
      mode: state.mode,
      boiler: state.boiler_on,
      away_temp: state.away_temp,
      boost: state.boost_all,
      rooms: state.rooms.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    model::BoostFlag,
    room::Thermostat,
    room_state::RoomState,
    schedule::{Schedule, ScheduleMatch, ScheduleValue},
    transport::testing::Recorder,
  };
  use chrono::TimeZone;
  use tokio::sync::mpsc;

  struct Fixed(f64);

  impl Schedule for Fixed {
    fn evaluate(&self, _room: &str, _time: &DateTime<Local>) -> Option<ScheduleMatch> {
      Some(ScheduleMatch { value: ScheduleValue::Temperature(self.0), rule: "fixed".to_string() })
    }
  }

  fn now() -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()
  }

  fn build(transport: Arc<Recorder>) -> (House, ExpiryReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let room = |name: &str, valve: &str, target: f64| {
      Room::new(
        name,
        vec![Thermostat { entity_id: valve.to_string(), weight: 1.0 }],
        Arc::new(Fixed(target)),
        transport.clone(),
        tx.clone(),
      )
      .unwrap()
    };
    let rooms = vec![room("living", "trv_living", 21.0), room("bedroom", "trv_bedroom", 17.0)];
    let house = House::new("home", rooms, transport.clone(), tx).unwrap();
    (house, rx)
  }

  fn reading(t: f64) -> ValveReading {
    ValveReading { local_temperature: Some(t), commanded_setpoint: None, boost: Some(BoostFlag::None) }
  }

  async fn state_of(house: &House, room: &str) -> RoomState {
    house.room(room).unwrap().lock().await.state()
  }

  #[tokio::test]
  async fn boiler_follows_any_room_demand() {
    let transport = Arc::new(Recorder::default());
    let (house, _rx) = build(transport.clone());
    assert!(house.control_heater(&now()).await);
    assert_eq!(transport.boiler_commands(), vec![true]);

    house.valve_state_changed("trv_living", &reading(22.0)).await;
    assert!(!house.control_heater(&now()).await);
    assert_eq!(transport.boiler_commands(), vec![true, false]);

    let snapshot = house.snapshot().await;
    assert!(!snapshot.boiler);
    assert_eq!(snapshot.rooms.len(), 2);
    assert_eq!(snapshot.rooms[0].temperature, 22.0);
  }

  #[tokio::test]
  async fn boiler_failure_is_not_fatal() {
    let (house, _rx) = build(Arc::new(Recorder::failing()));
    assert!(house.control_heater(&now()).await);
    assert!(house.snapshot().await.boiler);
  }

  #[test]
  fn valve_in_two_rooms_is_rejected() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let transport = Arc::new(Recorder::default());
    let room = |name: &str| {
      Room::new(
        name,
        vec![Thermostat { entity_id: "shared".to_string(), weight: 1.0 }],
        Arc::new(Fixed(20.0)),
        transport.clone(),
        tx.clone(),
      )
      .unwrap()
    };
    let result = House::new("home", vec![room("a"), room("b")], transport.clone(), tx.clone());
    assert!(matches!(result, Err(ConfigError::DuplicateValve { .. })));
  }

  #[tokio::test]
  async fn away_applies_to_every_room() {
    let (house, _rx) = build(Arc::new(Recorder::default()));
    house.set_away(true, Some(12.0), &now()).await;
    for name in ["living", "bedroom"] {
      let room = house.room(name).unwrap();
      let room = room.lock().await;
      assert_eq!(room.state(), RoomState::Away);
      assert_eq!(room.setpoint(), 12.0);
    }
    house.set_away_temp(14.0, &now()).await;
    assert_eq!(house.room("bedroom").unwrap().lock().await.setpoint(), 14.0);

    house.set_away(false, None, &now()).await;
    assert_eq!(state_of(&house, "living").await, RoomState::Auto);
    assert_eq!(house.snapshot().await.away_temp, 14.0);
  }

  #[tokio::test(start_paused = true)]
  async fn boost_all_ends_after_an_hour() {
    let (house, mut rx) = build(Arc::new(Recorder::default()));
    house.boost_all(&now()).await;
    assert_eq!(state_of(&house, "bedroom").await, RoomState::HouseBoost);
    assert_eq!(house.room("bedroom").unwrap().lock().await.setpoint(), 22.0);
    assert_eq!(house.snapshot().await.mode, HeatingMode::Boost);

    let expiry = rx.recv().await.unwrap();
    house.handle_expiry(expiry, &now()).await;
    assert_eq!(state_of(&house, "bedroom").await, RoomState::Auto);
    let snapshot = house.snapshot().await;
    assert!(!snapshot.boost);
    assert_eq!(snapshot.mode, HeatingMode::Auto);
  }

  #[tokio::test(start_paused = true)]
  async fn cancel_overrides_makes_boost_expiry_stale() {
    let (house, _rx) = build(Arc::new(Recorder::default()));
    house.boost_all(&now()).await;
    let timer = house.state.lock().await.boost_timer.as_ref().map(Timer::id).unwrap();
    house.set_manual("living", true, 25.0, &now()).await.unwrap();
    assert_eq!(state_of(&house, "living").await, RoomState::Manual);

    house.cancel_overrides(&now()).await;
    assert_eq!(state_of(&house, "living").await, RoomState::Auto);
    assert_eq!(state_of(&house, "bedroom").await, RoomState::Auto);
    assert!(house.state.lock().await.boost_timer.is_none());

    house.boost_room("bedroom", 23.0, 30, &now()).await.unwrap();
    house.handle_expiry(Expiry::BoostAll { timer }, &now()).await;
    assert_eq!(state_of(&house, "bedroom").await, RoomState::RoomBoost);
  }

  #[tokio::test(start_paused = true)]
  async fn boost_all_while_away_keeps_away() {
    let (house, mut rx) = build(Arc::new(Recorder::default()));
    house.set_away(true, Some(12.0), &now()).await;
    house.boost_all(&now()).await;
    assert_eq!(state_of(&house, "living").await, RoomState::Away);
    assert_eq!(house.snapshot().await.mode, HeatingMode::Away);

    house.set_away_temp(10.0, &now()).await;
    assert_eq!(house.room("living").unwrap().lock().await.setpoint(), 10.0);
    assert_eq!(house.room("bedroom").unwrap().lock().await.setpoint(), 10.0);

    let expiry = rx.recv().await.unwrap();
    house.handle_expiry(expiry, &now()).await;
    let snapshot = house.snapshot().await;
    assert_eq!(snapshot.mode, HeatingMode::Away);
    assert!(!snapshot.boost);
    assert_eq!(state_of(&house, "bedroom").await, RoomState::Away);
  }

  #[tokio::test(start_paused = true)]
  async fn commands_refresh_room_snapshots() {
    let (house, _rx) = build(Arc::new(Recorder::default()));
    house.set_away(true, Some(12.0), &now()).await;
    let snapshot = house.snapshot().await;
    assert_eq!(snapshot.rooms[0].state, "Away");
    assert_eq!(snapshot.rooms[0].setpoint.0, 12.0);

    house.set_away(false, None, &now()).await;
    house.boost_room("bedroom", 23.0, 30, &now()).await.unwrap();
    let snapshot = house.snapshot().await;
    assert_eq!(snapshot.rooms[1].name, "bedroom");
    assert_eq!(snapshot.rooms[1].state, "RoomBoost");
    assert_eq!(snapshot.rooms[1].setpoint.0, 23.0);
    assert_eq!(snapshot.rooms[0].state, "Auto");
  }

  #[tokio::test]
  async fn unknown_room_is_an_error() {
    let (house, _rx) = build(Arc::new(Recorder::default()));
    assert_eq!(
      house.set_manual("attic", true, 20.0, &now()).await,
      Err(HouseError::UnknownRoom("attic".to_string()))
    );
    assert!(house.boost_room("attic", 20.0, 30, &now()).await.is_err());
  }

  #[tokio::test]
  async fn unknown_valve_is_ignored() {
    let transport = Arc::new(Recorder::default());
    let (house, _rx) = build(transport.clone());
    house.valve_state_changed("stranger", &reading(5.0)).await;
    assert!(transport.sent().is_empty());
  }
}

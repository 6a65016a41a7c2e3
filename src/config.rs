use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use crate::{
  error::ConfigError,
  house::House,
  room::{Room, Thermostat, DEFAULT_AWAY_TEMP},
  schedule::{Rule, RuleConfig, WeeklySchedule},
  timer::ExpirySender,
  transport::{BoilerSwitch, ValveTransport},
};

const MIN_WEIGHT: f64 = 1.0;
const MAX_WEIGHT: f64 = 20.0;

#[derive(Deserialize, Debug)]
struct ReadingConfig{
    mqtt: MqttConfig,
    http: Option<HttpConfig>,
    #[serde(default = "default_name")]
    name: String,
    boiler: String,
    #[serde(default = "default_away_temp")]
    away_temp: f64,
    #[serde(default)]
    schedule_prepend: Vec<RuleConfig>,
    #[serde(default)]
    schedule_append: Vec<RuleConfig>,
    rooms: BTreeMap<String, RoomConfig>,
}

#[derive(Debug)]
pub struct RunningConfig{
    pub mqtt: MqttConfig,
    pub http: HttpConfig,
    pub name: String,
    pub boiler: String,
    pub away_temp: f64,
    pub rooms: Vec<RoomPlan>,
    pub topics: Vec<String>,
    pub qos: Vec<i32>
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig{
    pub host: String,
    pub base_topic: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_qos")]
    pub qos_value: i32,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct HttpConfig{
    pub address: IpAddr,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone)]
struct RoomConfig{
    thermostats: Vec<ThermostatConfig>,
    #[serde(default)]
    schedule: Vec<RuleConfig>,
}

#[derive(Deserialize, Debug, Clone)]
struct ThermostatConfig{
    entity_id: String,
    #[serde(default = "default_weight")]
    weight: f64,
}

/// A validated room, ready to be built.
#[derive(Debug, Clone)]
pub struct RoomPlan{
    pub name: String,
    pub thermostats: Vec<Thermostat>,
    pub schedule: Arc<WeeklySchedule>,
}

impl Default for HttpConfig {
  fn default() -> Self {
    HttpConfig { address: IpAddr::V4(Ipv4Addr::LOCALHOST), port: 3030 }
  }
}

impl HttpConfig {
  pub fn socket_addr(&self) -> SocketAddr {
    SocketAddr::new(self.address, self.port)
  }
}

fn default_name() -> String {
  "Home".to_string()
}

fn default_away_temp() -> f64 {
  DEFAULT_AWAY_TEMP
}

fn default_qos() -> i32 {
  1
}

fn default_weight() -> f64 {
  MIN_WEIGHT
}

fn to_rules(configs: &[RuleConfig]) -> Result<Vec<Rule>, ConfigError> {
  configs.iter().cloned().map(Rule::try_from).collect()
}

impl RunningConfig{
    pub fn new(file_name: &str) -> Result<RunningConfig, ConfigError>{
      let input = std::fs::read_to_string(file_name).map_err(|source| ConfigError::Io {
        path: file_name.to_string(),
        source,
      })?;
      RunningConfig::from_yaml(&input)
    }

    pub fn from_yaml(input: &str) -> Result<RunningConfig, ConfigError>{
      let init_config: ReadingConfig = serde_yaml::from_str(input)?;
      let prepend = to_rules(&init_config.schedule_prepend)?;
      let append = to_rules(&init_config.schedule_append)?;

      let mut rooms = Vec::with_capacity(init_config.rooms.len());
      for (name, room) in init_config.rooms.iter() {
        if room.thermostats.is_empty() {
          return Err(ConfigError::NoThermostats(name.clone()));
        }
        let mut thermostats = Vec::with_capacity(room.thermostats.len());
        for thermostat in room.thermostats.iter() {
          if !(MIN_WEIGHT..=MAX_WEIGHT).contains(&thermostat.weight) {
            return Err(ConfigError::InvalidWeight {
              entity_id: thermostat.entity_id.clone(),
              weight: thermostat.weight,
            });
          }
          thermostats.push(Thermostat { entity_id: thermostat.entity_id.clone(), weight: thermostat.weight });
        }

        let mut rules = prepend.clone();
        rules.extend(to_rules(&room.schedule)?);
        rules.extend(append.iter().cloned());
        let schedule = if rules.is_empty() {
          log::debug!("room {} has no schedule, using the default week", name);
          WeeklySchedule::default_week()
        } else {
          WeeklySchedule::new(rules)
        };
        rooms.push(RoomPlan { name: name.clone(), thermostats, schedule: Arc::new(schedule) });
      }

      let boiler = init_config.boiler.trim().to_string();
      let is_valve = rooms.iter().flat_map(|room| room.thermostats.iter()).any(|t| t.entity_id == boiler);
      if boiler.is_empty() || is_valve {
        return Err(ConfigError::UnknownBoiler(init_config.boiler));
      }

      let topics: Vec<String> =
        rooms.iter().flat_map(|room| room.thermostats.iter()).map(
          |thermostat|
          {
              format!("{}/{}", init_config.mqtt.base_topic, thermostat.entity_id)
          }
        ).collect();
      let qos = vec![init_config.mqtt.qos_value; topics.len()];
      let config = RunningConfig{
        mqtt: init_config.mqtt,
        http: init_config.http.unwrap_or_default(),
        name: init_config.name,
        boiler,
        away_temp: init_config.away_temp,
        rooms,
        topics,
        qos
      };

      Ok(config)
    }

    /// Builds the controller for the configured rooms. Fails when a valve is
    /// listed in more than one room.
    pub fn build_house(
      &self,
      valves: Arc<dyn ValveTransport>,
      boiler: Arc<dyn BoilerSwitch>,
      expiries: ExpirySender,
    ) -> Result<House, ConfigError> {
      let rooms = self
        .rooms
        .iter()
        .map(|plan| {
          Room::new(&plan.name, plan.thermostats.clone(), plan.schedule.clone(), valves.clone(), expiries.clone())
        })
        .collect::<Result<Vec<_>, _>>()?;
      Ok(House::new(&self.name, rooms, boiler, expiries)?.with_away_temp(self.away_temp))
    }
}

use chrono::Local;
use env_logger::Env;
use rand::Rng;
use rumqttc::MqttOptions;
use std::{env, process, sync::Arc, time::Duration};
use tokio::sync::mpsc;

use trv_heating_controller::{
  message_handler::MessageHandler,
  mqtt_client::{MqttClient, MqttPublisher},
  server::set_up_web_server,
  House, RunningConfig,
};

const SCHEDULE_INTERVAL: Duration = Duration::from_secs(60);
const CHANNEL_CAPACITY: usize = 100;

#[tokio::main]
async fn main() {
  // Initialize the logger from the environment
  let env = Env::default()
    .filter_or("TRV_LOG_LEVEL", "info")
    .write_style_or("TRV_LOG_STYLE", "always");

  env_logger::init_from_env(env);

  let config_file = env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());
  let config = RunningConfig::new(&config_file).unwrap_or_else(|err| {
    log::error!("{}", err);
    process::exit(1);
  });
  log::debug!("{:?}", config);

  let client_id = format!("trv-heating-{:08x}", rand::thread_rng().gen::<u32>());
  let mut options = MqttOptions::new(client_id, config.mqtt.host.clone(), config.mqtt.port);
  if let (Some(username), Some(password)) = (&config.mqtt.username, &config.mqtt.password) {
    options.set_credentials(username.clone(), password.clone());
  }
  let mut mqtt_client = MqttClient::new(options, CHANNEL_CAPACITY, &config.topics, &config.qos)
    .await
    .unwrap_or_else(|err| {
      log::error!("failed to subscribe: {}", err);
      process::exit(1);
    });

  let publisher = Arc::new(MqttPublisher::new(mqtt_client.client.clone(), &config.mqtt.base_topic, &config.boiler));
  let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();
  let house = config
    .build_house(publisher.clone(), publisher, expiry_tx)
    .unwrap_or_else(|err| {
      log::error!("{}", err);
      process::exit(1);
    });
  let house = Arc::new(house);
  log::info!("controlling {} rooms of {}", config.rooms.len(), house.name());

  tokio::spawn(house.clone().run_expiries(expiry_rx));
  set_up_web_server(house.clone(), config.http.socket_addr());
  tokio::spawn(control_loop(house.clone()));

  let valve_ids = config.rooms.iter().flat_map(|room| room.thermostats.iter()).map(|t| t.entity_id.as_str());
  let handler = Arc::new(MessageHandler::new(&config.mqtt.base_topic, valve_ids, house));
  mqtt_client.run(handler).await;
}

async fn control_loop(house: Arc<House>) {
  let mut interval = tokio::time::interval(SCHEDULE_INTERVAL);
  loop {
    interval.tick().await;
    house.control_heater(&Local::now()).await;
  }
}

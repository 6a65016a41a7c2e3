use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use rumqttc::{self, AsyncClient, ClientError, Event, EventLoop, Incoming, MqttOptions, QoS, SubscribeFilter};
use serde::Serialize;

use crate::{
  error::TransportError,
  message_handler::MessageHandler,
  model::{SetpointCommand, SwitchCommand},
  transport::{BoilerSwitch, ValveTransport},
};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub fn qos_from_value(value: i32) -> QoS {
  match value {
    0 => QoS::AtMostOnce,
    2 => QoS::ExactlyOnce,
    _ => QoS::AtLeastOnce,
  }
}

pub struct MqttClient {
  pub client: AsyncClient,
  event_loop: EventLoop,
}

impl MqttClient {
  pub async fn new(
    options: MqttOptions,
    cap: usize,
    topics: &[String],
    qos: &[i32],
  ) -> Result<Self, ClientError> {
    let (client, event_loop) = AsyncClient::new(options, cap);
    subscribe_to_topics(&client, topics, qos).await?;
    Ok(MqttClient {
      client,
      event_loop,
    })
  }

  /// Polls the broker forever. Reports are handled one at a time so a
  /// valve's readings are applied in arrival order.
  pub async fn run(&mut self, handler: Arc<MessageHandler>) {
    loop {
      match self.event_loop.poll().await {
        Ok(Event::Incoming(Incoming::Publish(publish))) => {
          handler.handle_message(publish.payload, &publish.topic).await;
        }
        Ok(Event::Incoming(Incoming::ConnAck(_))) => log::info!("connected to mqtt broker"),
        Ok(_) => {}
        Err(err) => {
          log::error!("mqtt connection error: {}", err);
          tokio::time::sleep(RECONNECT_DELAY).await;
        }
      }
    }
  }
}

async fn subscribe_to_topics(client: &AsyncClient, topics: &[String], qos: &[i32]) -> Result<(), ClientError> {
  log::info!("subscribing to topics: {:?}", topics);
  client.subscribe_many(subscribe_filters(topics, qos)).await
}

fn subscribe_filters(topics: &[String], qos: &[i32]) -> Vec<SubscribeFilter> {
  topics
    .iter()
    .zip(qos.iter())
    .map(|(topic, qos)| SubscribeFilter::new(topic.to_string(), qos_from_value(*qos)))
    .collect()
}

/// Sends valve and boiler commands through zigbee2mqtt.
pub struct MqttPublisher {
  client: AsyncClient,
  base_topic: String,
  boiler: String,
}

impl MqttPublisher {
  pub fn new(client: AsyncClient, base_topic: &str, boiler: &str) -> Self {
    MqttPublisher {
      client,
      base_topic: base_topic.to_string(),
      boiler: boiler.to_string(),
    }
  }

  fn set_topic(&self, entity_id: &str) -> String {
    format!("{}/{}/set", self.base_topic, entity_id)
  }

  /// Queues without waiting. Commands are also sent from inside the
  /// broker polling loop, so waiting for queue space there would stall it.
  fn publish<T: Serialize>(&self, entity_id: &str, command: &T) -> Result<(), TransportError> {
    let topic = self.set_topic(entity_id);
    let payload = serde_json::to_vec(command)?;
    log::debug!("publishing to {}: {}", topic, String::from_utf8_lossy(&payload));
    self
      .client
      .try_publish(topic, QoS::AtLeastOnce, false, payload)
      .map_err(|err| TransportError::Publish(err.to_string()))
  }
}

#[async_trait]
impl ValveTransport for MqttPublisher {
  async fn send_setpoint(&self, valve_id: &str, temperature: f64) -> Result<(), TransportError> {
    self.publish(valve_id, &SetpointCommand { occupied_heating_setpoint: temperature })
  }
}

#[async_trait]
impl BoilerSwitch for MqttPublisher {
  async fn set_boiler(&self, on: bool) -> Result<(), TransportError> {
    self.publish(&self.boiler, &SwitchCommand::new(on))
  }
}

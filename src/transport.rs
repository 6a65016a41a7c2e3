use async_trait::async_trait;

use crate::error::TransportError;

/// Delivers a set-point command to one valve. Sends are idempotent and may
/// be retried.
#[async_trait]
pub trait ValveTransport: Send + Sync {
  async fn send_setpoint(&self, valve_id: &str, temperature: f64) -> Result<(), TransportError>;
}

#[async_trait]
pub trait BoilerSwitch: Send + Sync {
  async fn set_boiler(&self, on: bool) -> Result<(), TransportError>;
}

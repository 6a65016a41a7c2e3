use serde::{Serialize, Serializer, Deserialize};

/// Frost protection floor, also the highest set-point reported as "OFF".
pub const FROST_PROTECTION_TEMP: f64 = 5.0;
pub const OFF_VALUE: &str = "OFF";

/// Latched boost attribute reported by a valve. The device never resets it
/// after the boost ends.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoostFlag {
    Up,
    Down,
    #[serde(other)]
    None,
}

/// State report from a thermostatic radiator valve. Every field may be
/// missing from a partial report.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ValveReading {
    pub local_temperature: Option<f64>,
    #[serde(rename = "occupied_heating_setpoint")]
    pub commanded_setpoint: Option<f64>,
    pub boost: Option<BoostFlag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TempDirection {
    None,
    Heating,
    Cooling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BoostDirection {
    #[serde(rename = "0")]
    None,
    #[serde(rename = "+")]
    Up,
    #[serde(rename = "-")]
    Down,
}

/// Set-point as shown to the outside: the frost floor and below read "OFF".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayedSetpoint(pub f64);

impl Serialize for DisplayedSetpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0 > FROST_PROTECTION_TEMP {
            serializer.serialize_f64(self.0)
        } else {
            serializer.serialize_str(OFF_VALUE)
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RoomSnapshot {
    pub name: String,
    pub state: String,
    pub temperature: f64,
    pub setpoint: DisplayedSetpoint,
    pub heating: bool,
    pub valve_boost: bool,
    pub manual: bool,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeatingMode {
    Auto,
    Away,
    Boost,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HouseSnapshot {
    pub name: String,
    pub mode: HeatingMode,
    pub boiler: bool,
    pub away_temp: f64,
    pub boost: bool,
    pub rooms: Vec<RoomSnapshot>,
}

/// Payload published to `{base}/{valve}/set`.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct SetpointCommand {
    pub occupied_heating_setpoint: f64,
}

/// Payload published to `{base}/{boiler}/set`.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchCommand {
    pub state: &'static str,
}

impl SwitchCommand {
    pub fn new(on: bool) -> Self {
        SwitchCommand { state: if on { "ON" } else { "OFF" } }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct AwayRequest {
    pub active: bool,
    pub temperature: Option<f64>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TemperatureRequest {
    pub temperature: f64,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ManualRequest {
    pub active: bool,
    pub temperature: f64,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RoomBoostRequest {
    pub temperature: f64,
    /// Minutes, zero resumes the schedule.
    pub duration: u64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ErrorReply {
    pub error: String,
}

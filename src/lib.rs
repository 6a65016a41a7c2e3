pub mod config;
pub mod error;
pub mod house;
pub mod message_handler;
pub mod model;
pub mod mqtt_client;
pub mod room;
pub mod room_state;
pub mod schedule;
pub mod server;
pub mod timer;
pub mod transport;
pub mod valves;

pub use config::RunningConfig;
pub use house::House;
pub use room::Room;
pub use room_state::RoomState;
pub use valves::ValveGroup;

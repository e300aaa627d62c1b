pub mod catalog;
pub mod config;
pub mod frame;
pub mod messages;
pub mod payload;
pub mod runtime;
pub mod settings;
pub mod streaming;
pub mod telemetry;
pub mod teleop;
pub mod transport;

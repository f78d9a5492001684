pub mod config;
pub mod echo;
pub mod input;
pub mod protocol;
pub mod session;
pub mod tab;
pub mod telemetry;
pub mod terminal;
pub mod transcript;
pub mod transport;

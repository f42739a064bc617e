// lib.rs

mod address;
pub use address::*;

mod config;
pub use config::*;

mod measure;
pub use measure::*;

mod payload;
pub use payload::*;

mod connectivity;
pub use connectivity::*;

mod controller;
pub use controller::*;

#[cfg(target_os = "espidf")]
mod mqtt;
#[cfg(target_os = "espidf")]
pub use mqtt::*;

#[cfg(target_os = "espidf")]
mod onewire;
#[cfg(target_os = "espidf")]
pub use onewire::*;

#[cfg(target_os = "espidf")]
mod wifi;
#[cfg(target_os = "espidf")]
pub use wifi::*;

#[cfg(test)]
mod testutil;

pub const FW_VERSION: &str = env!("CARGO_PKG_VERSION");

// EOF

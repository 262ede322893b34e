//! CLI command implementations

mod config;
mod decode;
mod devices;
mod start;

pub use config::{config, ConfigArgs};
pub use decode::{decode, DecodeArgs};
pub use devices::devices;
pub use start::{start, StartArgs};

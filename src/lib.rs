// lib.rs
#![warn(clippy::large_futures)]

pub use std::{
    pin::Pin,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
pub use tracing::{debug, error, info, warn};

mod config;
pub use config::*;

mod kvstore;
pub use kvstore::*;

mod status;
pub use status::*;

mod indicator;
pub use indicator::*;

mod aggregator;
pub use aggregator::*;

mod events;
pub use events::*;

mod serial;
pub use serial::*;

mod wifi;
pub use wifi::*;

mod presence;
pub use presence::*;

mod commands;
pub use commands::*;

mod state;
pub use state::*;

mod apiserver;
pub use apiserver::*;

#[cfg(target_os = "espidf")]
mod esp;
#[cfg(target_os = "espidf")]
pub use esp::*;

#[cfg(not(target_os = "espidf"))]
pub mod sim;

// EOF

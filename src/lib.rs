//! LoRaWAN sensor node firmware library.
//!
//! Everything except the ESP-IDF glue (deep sleep, RTC memory, GPIO) builds
//! and tests on the host. The `node` binary wires these components to real
//! hardware with the `esp32` feature, or to simulated ones without it.

// Allow the crate to reference itself by name (needed for proc-macro generated code)
extern crate self as lora_sensor_node;

pub mod clock;
pub mod config;
pub mod console;
pub mod display;
pub mod input;
pub mod lora;
pub mod node;
pub mod payload;
#[cfg(feature = "esp32")]
pub mod persistence;
#[cfg(not(target_os = "espidf"))]
pub mod persistence_host;
pub mod power;
pub mod scheduler;
pub mod sensor;
pub mod state;
pub mod stats;
#[cfg(feature = "tap-tests")]
pub mod testing;

// Re-export commonly used items
pub use config::{ConfigError, Credentials, MotionLevel, NodeConfig};
pub use lora::{LinkError, LoRaWanMac, RadioLink, Region};
pub use node::{LoopOutcome, Node, NodeParts};
pub use payload::{DownlinkCommand, UplinkPayload};
pub use power::{PowerController, PowerError, RetainedStore, SleepBackend};
pub use scheduler::{SchedulerState, TransmissionScheduler};
pub use state::{NodeState, WakeContext, WakeReason};
pub use stats::{NodeStats, StatsServer, DEFAULT_STATS_PORT};

#[cfg(feature = "tap-tests")]
pub use testing::TestRunner;

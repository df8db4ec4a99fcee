//! Unified sensor node binary.
//!
//! Runs on both ESP32 and host platforms:
//! - **Host**: `cargo run --bin node -- [config.json] [--resume]`
//! - **ESP32**: `cargo espflash flash --bin node --features esp32 --release`
//!
//! On the host, deep sleep is simulated: the wake cycle repeats in-process,
//! sleep time is scaled by `simulation.time_scale`, and retained state goes
//! to `~/.lora-sensor-node/state.hex`. `--resume` treats the first start as
//! a timer wake so the previous run's state is restored.
//!
//! ## Console Commands (host)
//!
//! - `motion` - Trigger the PIR sensor
//! - `button` - Press the PRG button
//! - `downlink <port> <hex>` - Queue a downlink
//! - `status` - Show node status
//! - `quit` - Stop
//!
//! ## Endpoints
//!
//! - Stats: http://localhost:8080/stats

#[cfg(feature = "esp32")]
use esp_idf_svc::sys as _;

use log::{error, info};
use lora_sensor_node::clock::MonotonicClock;
use lora_sensor_node::display::LogDisplay;
use lora_sensor_node::lora::SimulatedMac;
use lora_sensor_node::node::{LoopOutcome, Node, NodeParts};
use lora_sensor_node::power::PowerController;
use lora_sensor_node::sensor::SimulatedSensor;
use lora_sensor_node::stats::NodeStats;
use lora_sensor_node::{Credentials, NodeConfig, RadioLink};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// ESP32: Initialize ESP-IDF before anything else
#[cfg(feature = "esp32")]
fn platform_init() {
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    info!("ESP-IDF initialized");
}

// Host: Just initialize env_logger
#[cfg(not(feature = "esp32"))]
fn platform_init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

fn dev_eui_label(credentials: &Result<Credentials, lora_sensor_node::ConfigError>) -> String {
    match credentials {
        Ok(c) => c.dev_eui_hex(),
        Err(_) => "unknown".to_string(),
    }
}

#[cfg(feature = "esp32")]
fn main() {
    platform_init();
    info!("=== LoRa sensor node starting ===");
    info!("Platform: ESP32");

    if let Err(e) = esp32::run() {
        error!("Node failed: {}", e);
    }

    // Sleep never returns; getting here means a restart was requested or
    // bring-up failed.
    info!("Restarting");
    unsafe { esp_idf_sys::esp_restart() };
}

#[cfg(feature = "esp32")]
mod esp32 {
    use super::*;
    use esp_idf_hal::gpio::Pull;
    use esp_idf_hal::peripherals::Peripherals;
    use lora_sensor_node::input::{GpioInput, PIR_GPIO};
    use lora_sensor_node::persistence::RtcStore;
    use lora_sensor_node::power::DeepSleep;

    // The polled PIR input must be the pin deep sleep wakes on
    const _: () = assert!(PIR_GPIO == 5, "PIR input is peripherals.pins.gpio5");

    pub fn run() -> Result<(), Box<dyn std::error::Error>> {
        let peripherals = Peripherals::take()?;
        let motion_pin = GpioInput::new(peripherals.pins.gpio5.into(), Pull::Down)?;
        let button_pin = GpioInput::new(peripherals.pins.gpio0.into(), Pull::Up)?;

        let config = NodeConfig::default();
        config.validate()?;

        let store = RtcStore::take().ok_or("RTC store already taken")?;
        let mut power = PowerController::new(DeepSleep::new(), store, &config);
        let (ctx, state) = power.wake();

        let credentials = Credentials::from_build_env();
        let stats = Arc::new(NodeStats::new(dev_eui_label(&credentials)));

        // Radio and BME280 drivers are not linked into this build
        info!("LoRaWAN MAC: simulated");
        let link = RadioLink::new(SimulatedMac::new(), credentials)
            .with_radio_settings(config.radio_settings());

        let parts = NodeParts {
            config: config.clone(),
            link,
            display: LogDisplay::new(),
            sensor: Box::new(SimulatedSensor::new()),
            motion_pin: Box::new(motion_pin),
            button_pin: Box::new(button_pin),
            clock: Box::new(MonotonicClock::new()),
            stats,
        };
        let mut node = Node::new(parts, ctx, state);
        node.start();

        match node.run_until(&CancellationToken::new()) {
            LoopOutcome::Sleep { seconds } => {
                let state = *node.state();
                power.arm_wake_sources(seconds)?;
                power.enter_sleep(&state, node.display_mut())?;
            }
            outcome => {
                info!("Loop ended: {:?}", outcome);
                power.persist(node.state())?;
            }
        }
        Ok(())
    }
}

#[cfg(not(feature = "esp32"))]
#[tokio::main(flavor = "current_thread")]
async fn main() {
    platform_init();
    info!("=== LoRa sensor node starting ===");
    info!("Platform: Host");

    let args = host::Args::parse();
    let node = match host::HostNode::load(&args) {
        Ok(node) => node,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    host::run(node).await;
    // A pending blocking stdin read would otherwise hold up runtime shutdown
    std::process::exit(0);
}

#[cfg(not(feature = "esp32"))]
mod host {
    use super::*;
    use log::warn;
    use lora_sensor_node::config::{ConfigFile, SimulationSettings};
    use lora_sensor_node::console::{self, ConsoleCommand, HELP_TEXT};
    use lora_sensor_node::input::SharedPin;
    use lora_sensor_node::lora::{Downlink, DownlinkQueue};
    use lora_sensor_node::persistence_host::{self, FileStore};
    use lora_sensor_node::power::{PowerError, SimulatedSleep};
    use lora_sensor_node::sensor::SensorProvider;
    use lora_sensor_node::{ConfigError, StatsServer, WakeReason, DEFAULT_STATS_PORT};
    use std::io::Write;
    use std::path::PathBuf;
    use tokio::io::BufReader;

    pub struct Args {
        config_path: Option<PathBuf>,
        resume: bool,
    }

    impl Args {
        pub fn parse() -> Self {
            let mut args = Args {
                config_path: None,
                resume: false,
            };
            for arg in std::env::args().skip(1) {
                match arg.as_str() {
                    "--resume" => args.resume = true,
                    other => args.config_path = Some(PathBuf::from(other)),
                }
            }
            args
        }
    }

    /// Everything the node thread needs, plus the handles the console drives.
    pub struct HostNode {
        config: NodeConfig,
        file: ConfigFile,
        resume: bool,
        stats: Arc<NodeStats>,
        motion: SharedPin,
        button: SharedPin,
        downlinks: DownlinkQueue,
        cancel: CancellationToken,
    }

    impl HostNode {
        pub fn load(args: &Args) -> Result<Self, ConfigError> {
            let file = match &args.config_path {
                Some(path) => {
                    info!("Loading config from {}", path.display());
                    ConfigFile::load(path)?
                }
                None => ConfigFile::default(),
            };
            let config = file.apply(NodeConfig::default())?;
            let stats = Arc::new(NodeStats::new(dev_eui_label(&Self::credentials(&file))));

            // Idle at the inactive level
            let motion = SharedPin::new(config.motion_level.is_active(false));

            Ok(Self {
                config,
                file,
                resume: args.resume,
                stats,
                motion,
                button: SharedPin::new(true),
                downlinks: DownlinkQueue::new(),
                cancel: CancellationToken::new(),
            })
        }

        fn credentials(file: &ConfigFile) -> Result<Credentials, ConfigError> {
            file.credentials().unwrap_or_else(Credentials::from_build_env)
        }

        fn simulation(&self) -> &SimulationSettings {
            &self.file.simulation
        }

        /// Wake/sleep cycles until cancelled. Blocks.
        fn run_cycles(&self) -> Result<(), PowerError> {
            let state_path = persistence_host::default_state_path().unwrap_or_else(|e| {
                warn!("No home directory ({}), keeping state in temp dir", e);
                std::env::temp_dir().join("lora-sensor-node-state.hex")
            });
            let store = FileStore::new(state_path);
            let first_wake = if self.resume && store.exists() {
                WakeReason::Timer
            } else {
                WakeReason::ColdBoot
            };

            let sim = self.simulation();
            let sleep = SimulatedSleep::new(sim.time_scale)
                .with_motion_pin(self.motion.clone())
                .with_cancel(self.cancel.clone())
                .with_initial_cause(first_wake);
            let mut power = PowerController::new(sleep, store, &self.config);

            while !self.cancel.is_cancelled() {
                let (ctx, state) = power.wake();

                // The MAC session does not survive sleep; the network server's
                // downlink queue does
                let mac = SimulatedMac::new()
                    .with_failure_rates(sim.join_failure_percent, sim.send_failure_percent)
                    .with_downlink_queue(self.downlinks.clone());
                let link = RadioLink::new(mac, Self::credentials(&self.file))
                    .with_radio_settings(self.config.radio_settings());
                let sensor: Box<dyn SensorProvider> = if sim.sensor_missing {
                    Box::new(SimulatedSensor::missing())
                } else {
                    Box::new(SimulatedSensor::new())
                };

                let parts = NodeParts {
                    config: self.config.clone(),
                    link,
                    display: LogDisplay::new(),
                    sensor,
                    motion_pin: Box::new(self.motion.clone()),
                    button_pin: Box::new(self.button.clone()),
                    clock: Box::new(MonotonicClock::new()),
                    stats: self.stats.clone(),
                };
                let mut node = Node::new(parts, ctx, state);
                node.start();

                match node.run_until(&self.cancel) {
                    LoopOutcome::Sleep { seconds } => {
                        let state = *node.state();
                        power.arm_wake_sources(seconds)?;
                        match power.enter_sleep(&state, node.display_mut()) {
                            Ok(()) => {}
                            Err(PowerError::Interrupted) => break,
                            Err(e) => return Err(e),
                        }
                    }
                    LoopOutcome::Restart => {
                        info!("Restarting");
                        power.persist(node.state())?;
                        power.backend_mut().power_cycle();
                    }
                    LoopOutcome::Stopped | LoopOutcome::Continue => {
                        power.persist(node.state())?;
                        break;
                    }
                }
            }
            Ok(())
        }

        fn handle_command(&self, command: ConsoleCommand) {
            match command {
                ConsoleCommand::Motion => {
                    self.motion.pulse();
                    print_console("Motion triggered");
                }
                ConsoleCommand::Button => {
                    self.button.pulse();
                }
                ConsoleCommand::Downlink { port, payload } => {
                    let len = payload.len();
                    self.downlinks.push(Downlink { port, payload });
                    print_console(&format!("Queued {} byte downlink on port {}", len, port));
                }
                ConsoleCommand::Status => print_console(&console::format_status(&self.stats)),
                ConsoleCommand::Help => print_console(HELP_TEXT),
                ConsoleCommand::Quit => self.cancel.cancel(),
                ConsoleCommand::Unknown(msg) => {
                    if !msg.is_empty() {
                        print_console(&msg);
                    }
                }
            }
        }
    }

    /// Print a line to stdout (console output).
    fn print_console(msg: &str) {
        println!("{}", msg);
        let _ = std::io::stdout().flush();
    }

    pub async fn run(node: HostNode) {
        let node = Arc::new(node);

        let _stats_server = match StatsServer::start(None, DEFAULT_STATS_PORT, node.stats.clone())
        {
            Ok(server) => {
                info!(
                    "Stats server at http://localhost:{}/stats",
                    DEFAULT_STATS_PORT
                );
                Some(server)
            }
            Err(e) => {
                warn!("Failed to start stats server: {}", e);
                None
            }
        };

        let worker = {
            let node = node.clone();
            std::thread::spawn(move || {
                if let Err(e) = node.run_cycles() {
                    error!("Node stopped: {}", e);
                }
                node.cancel.cancel();
            })
        };

        print_console("Type 'help' for commands.");
        console::run_console(
            BufReader::new(tokio::io::stdin()),
            tokio::signal::ctrl_c(),
            &node.cancel,
            |command| node.handle_command(command),
        )
        .await;

        if tokio::task::spawn_blocking(move || worker.join())
            .await
            .map(|joined| joined.is_err())
            .unwrap_or(true)
        {
            error!("Node thread panicked");
        }
        info!("Node stopped");
    }
}

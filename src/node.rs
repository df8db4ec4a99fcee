//! The cooperative control loop for one wake cycle.
//!
//! A [`Node`] is built fresh at every wake from the restored [`NodeState`]
//! and polled until the scheduler asks for sleep. Each [`Node::poll`] runs,
//! in order:
//!
//! 1. radio event pump
//! 2. input polling (motion edge, button)
//! 3. pending downlink commands
//! 4. the scheduler decision, then the join or send it chose
//! 5. display timeout
//!
//! # Example
//!
//! ```ignore
//! let (ctx, state) = power.wake();
//! let mut node = Node::new(parts, ctx, state);
//! node.start();
//!
//! match node.run_until(&cancel) {
//!     LoopOutcome::Sleep { seconds } => {
//!         let state = *node.state();
//!         power.arm_wake_sources(seconds)?;
//!         power.enter_sleep(&state, node.display_mut())?;
//!     }
//!     LoopOutcome::Restart => restart(),
//!     LoopOutcome::Stopped | LoopOutcome::Continue => {}
//! }
//! ```

use crate::clock::Clock;
use crate::config::NodeConfig;
use crate::display::{show_link_error, DisplayProvider};
use crate::input::{ButtonDebouncer, MotionEdgeDetector, PinLevel};
use crate::lora::{DownlinkEvent, LinkError, LoRaWanMac, RadioLink};
use crate::payload::{DownlinkCommand, UplinkPayload};
use crate::scheduler::{Action, SendOutcome, SendTrigger, TransmissionScheduler};
use crate::sensor::{ReadingCache, ResolvedReading, SensorProvider};
use crate::state::{NodeState, WakeContext, WakeReason};
use crate::stats::NodeStats;
use log::{debug, info, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;

/// Display turns off after this long without activity (ms).
pub const DISPLAY_TIMEOUT_MS: u64 = 30_000;

/// What the caller should do after a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// Keep polling.
    Continue,
    /// Arm the wake sources and deep sleep.
    Sleep { seconds: u32 },
    /// A downlink asked for a reboot.
    Restart,
    /// The cancellation token fired.
    Stopped,
}

/// Hardware and platform pieces a node is built from.
pub struct NodeParts<M: LoRaWanMac, D: DisplayProvider> {
    pub config: NodeConfig,
    pub link: RadioLink<M>,
    pub display: D,
    pub sensor: Box<dyn SensorProvider>,
    pub motion_pin: Box<dyn PinLevel>,
    pub button_pin: Box<dyn PinLevel>,
    pub clock: Box<dyn Clock>,
    pub stats: Arc<NodeStats>,
}

/// One wake cycle of the sensor node.
pub struct Node<M: LoRaWanMac, D: DisplayProvider> {
    config: NodeConfig,
    link: RadioLink<M>,
    scheduler: TransmissionScheduler,
    display: D,
    sensor: Box<dyn SensorProvider>,
    readings: ReadingCache,
    motion_pin: Box<dyn PinLevel>,
    motion: MotionEdgeDetector,
    button_pin: Box<dyn PinLevel>,
    button: ButtonDebouncer,
    clock: Box<dyn Clock>,
    stats: Arc<NodeStats>,
    downlinks: broadcast::Receiver<DownlinkEvent>,
    wake: WakeContext,
    state: NodeState,
    send_count: u32,
    last_activity_ms: u64,
    restart_requested: bool,
}

impl<M: LoRaWanMac, D: DisplayProvider> Node<M, D> {
    /// Assemble a node from its parts and the state restored at wake.
    pub fn new(parts: NodeParts<M, D>, wake: WakeContext, state: NodeState) -> Self {
        let NodeParts {
            config,
            mut link,
            display,
            sensor,
            motion_pin,
            button_pin,
            clock,
            stats,
        } = parts;

        link.restore(&state.session);
        let downlinks = link.subscribe_downlinks();
        let mut scheduler = TransmissionScheduler::new(&config);
        let mut motion = MotionEdgeDetector::new(config.motion_level);

        // The motion that woke us counts as the edge
        if state.motion_wake {
            scheduler.notify_motion();
            motion.prime();
        }

        stats.boot_count.store(wake.boot_count, Ordering::Relaxed);

        Self {
            config,
            link,
            scheduler,
            display,
            sensor,
            readings: ReadingCache::new(),
            motion_pin,
            motion,
            button_pin,
            button: ButtonDebouncer::new(),
            clock,
            stats,
            downlinks,
            wake,
            state,
            send_count: 0,
            last_activity_ms: 0,
            restart_requested: false,
        }
    }

    /// Announce the wake and let the scheduler leave `Idle`.
    pub fn start(&mut self) {
        let reason = match self.wake.wake_reason {
            WakeReason::ColdBoot => "cold boot",
            WakeReason::Timer => "timer",
            WakeReason::ExternalSignal => "motion",
        };
        info!("Boot #{} ({})", self.wake.boot_count, reason);
        self.display
            .log_message(&format!("Boot #{}: {}", self.wake.boot_count, reason));
        if !self.sensor.is_available() {
            self.display.show_error("Sensor Error", "BME280 not found");
        }

        self.scheduler.start();
        self.refresh_status();
        self.last_activity_ms = self.clock.now_ms();
    }

    /// Run one loop iteration.
    pub fn poll(&mut self) -> LoopOutcome {
        let now = self.clock.now_ms();

        self.link.poll_events();
        self.poll_inputs(now);
        self.drain_downlinks();
        if self.restart_requested {
            return LoopOutcome::Restart;
        }

        match self
            .scheduler
            .next_action(now, self.link.is_joined(), &self.state.policy)
        {
            Action::Join => self.attempt_join(now),
            Action::Send(trigger) => {
                self.transmit(trigger, now);
                // Commands that arrived in the receive window apply before sleeping
                self.drain_downlinks();
                if self.restart_requested {
                    return LoopOutcome::Restart;
                }
            }
            Action::Wait => {}
        }

        if now.saturating_sub(self.last_activity_ms) >= DISPLAY_TIMEOUT_MS {
            self.display.sleep();
        }

        match self.scheduler.take_sleep_request() {
            Some(seconds) => LoopOutcome::Sleep { seconds },
            None => LoopOutcome::Continue,
        }
    }

    /// Poll until the node wants to sleep or restart, or `cancel` fires.
    pub fn run_until(&mut self, cancel: &CancellationToken) -> LoopOutcome {
        loop {
            if cancel.is_cancelled() {
                return LoopOutcome::Stopped;
            }
            match self.poll() {
                LoopOutcome::Continue => std::thread::sleep(self.config.loop_tick),
                outcome => return outcome,
            }
        }
    }

    fn poll_inputs(&mut self, now: u64) {
        if self.motion.update(self.motion_pin.is_high()) {
            info!("Motion detected");
            NodeStats::increment(&self.stats.motion_events);
            self.display.wake();
            self.display.log_message("Motion detected");
            self.last_activity_ms = now;
            self.scheduler.notify_motion();
        }

        if self.button.due(now) {
            let high = self.button_pin.is_high();
            if self.button.update(now, high) {
                debug!("Button pressed");
                self.display.wake();
                self.display.cycle_screen();
                self.last_activity_ms = now;
            }
        }
    }

    fn drain_downlinks(&mut self) {
        loop {
            match self.downlinks.try_recv() {
                Ok(event) => self.handle_downlink(event),
                Err(TryRecvError::Lagged(missed)) => {
                    warn!("Dropped {} downlinks", missed);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    /// Apply a downlink command.
    pub fn handle_downlink(&mut self, event: DownlinkEvent) {
        NodeStats::increment(&self.stats.downlinks);
        info!(
            "Downlink on port {}: {}",
            event.port,
            hex::encode(&event.payload)
        );

        match DownlinkCommand::parse(&event.payload) {
            DownlinkCommand::SetInterval(secs) => match self.config.with_base_interval(secs) {
                Ok(config) => {
                    self.config = config;
                    self.scheduler
                        .set_base_interval(secs, &mut self.state.policy);
                    self.display.log_message(&format!("Interval: {}s", secs));
                }
                Err(e) => warn!("Rejected interval {}s: {}", secs, e),
            },
            DownlinkCommand::Restart => {
                self.display.log_message("Restarting...");
                self.restart_requested = true;
            }
            DownlinkCommand::ForceReading => {
                self.display.log_message("Reading requested");
                self.scheduler.request_reading();
            }
            DownlinkCommand::Unknown(bytes) => {
                warn!("Unknown downlink command: {}", hex::encode(bytes));
            }
        }
    }

    fn attempt_join(&mut self, now: u64) {
        if self.scheduler.take_rejoin() {
            self.link.reset_session();
            self.sync_session();
        }
        self.display.log_message("Joining network...");

        let success = match self.link.join() {
            Ok(joined) => {
                if !joined.already_joined {
                    self.display.log_message("Joined network");
                }
                self.state.last_join_error = 0;
                true
            }
            Err(e) => {
                warn!("Join failed: {}", e);
                self.state.last_join_error = e.code();
                show_link_error(&mut self.display, e.code());
                false
            }
        };

        self.stats.record_join(success);
        self.scheduler
            .record_join(success, now, &mut self.state.policy);
        self.sync_session();
    }

    fn transmit(&mut self, trigger: SendTrigger, now: u64) {
        let motion = trigger == SendTrigger::Motion;
        let reading = self.sensor.read_environment();
        let payload = match self.readings.resolve(reading) {
            ResolvedReading::Measured(r) => {
                self.display.update_readings(&r);
                UplinkPayload::from_reading(&r, motion)
            }
            ResolvedReading::LastKnown(r) => {
                NodeStats::increment(&self.stats.sensor_fallbacks);
                UplinkPayload::from_reading(&r, motion)
            }
            ResolvedReading::Placeholder => {
                NodeStats::increment(&self.stats.sensor_fallbacks);
                UplinkPayload::placeholder(motion)
            }
        };

        debug!("Uplink ({:?}): {}", trigger, payload);
        let outcome = match self.link.send(
            &payload.encode(),
            self.config.uplink_port,
            self.config.confirmed_uplinks,
        ) {
            Ok(ack) => {
                self.send_count += 1;
                self.display.log_message(if motion {
                    "Motion alert sent"
                } else {
                    "Data sent"
                });
                debug!("Uplink acked, RSSI {:.0} dBm", ack.rssi);
                SendOutcome::Delivered
            }
            Err(LinkError::NotJoined) => {
                show_link_error(&mut self.display, LinkError::NotJoined.code());
                SendOutcome::NotJoined
            }
            Err(e) => {
                warn!("Uplink failed: {}", e);
                show_link_error(&mut self.display, e.code());
                SendOutcome::Failed
            }
        };

        if outcome != SendOutcome::NotJoined {
            self.stats.record_uplink(outcome == SendOutcome::Delivered);
        }
        self.scheduler
            .record_send(outcome, trigger, now, &mut self.state.policy);
        self.sync_session();
        self.last_activity_ms = now;
    }

    fn sync_session(&mut self) {
        self.state.session = self.link.session();
        self.stats
            .link
            .joined
            .store(self.state.session.joined, Ordering::Relaxed);
        self.stats
            .link
            .record_quality(self.state.session.last_rssi, self.state.session.last_snr);
        self.stats
            .link
            .last_error
            .store(self.state.session.last_error_code, Ordering::Relaxed);
        self.refresh_status();
    }

    fn refresh_status(&mut self) {
        self.display.update_status(
            self.link.is_joined(),
            self.link.last_rssi(),
            self.send_count,
        );
    }

    /// State to persist before sleeping.
    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn wake_context(&self) -> WakeContext {
        self.wake
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &TransmissionScheduler {
        &self.scheduler
    }

    pub fn link(&self) -> &RadioLink<M> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut RadioLink<M> {
        &mut self.link
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    /// Uplinks delivered this wake.
    pub fn send_count(&self) -> u32 {
        self.send_count
    }
}

//! Join/send/sleep decisions.
//!
//! [`TransmissionScheduler`] is a small state machine that decides, once per
//! loop iteration, whether the node should join, send or wait. It never
//! touches the radio itself: the caller executes the chosen [`Action`] and
//! reports the outcome back through [`record_join`] / [`record_send`].
//!
//! The retry bookkeeping lives in a [`TransmissionPolicy`] owned by the
//! persisted node state and passed in on every call.
//!
//! # State Machine
//!
//! ```text
//!            start / request_rejoin
//!   Idle ─────────────────────────────▶ AwaitingJoin
//!                                        │        ▲
//!                           join ok      │        │ errors > threshold
//!                     ┌──────────────────┘        │ and nothing ever sent
//!                     ▼                           │
//!   ┌──────────── Joined ◀───── retry slot ──── Backoff
//!   │ send ok       │                             ▲
//!   └──────────────▶│ send / join failed ─────────┘
//! ```
//!
//! [`record_join`]: TransmissionScheduler::record_join
//! [`record_send`]: TransmissionScheduler::record_send

use crate::config::NodeConfig;
use crate::state::TransmissionPolicy;
use log::{debug, info, warn};
use std::fmt;

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Not started yet.
    Idle,
    /// Waiting for a successful join.
    AwaitingJoin,
    /// Session active, sending on the base interval.
    Joined,
    /// Retrying after a failure.
    Backoff,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::AwaitingJoin => "awaiting-join",
            Self::Joined => "joined",
            Self::Backoff => "backoff",
        };
        f.write_str(name)
    }
}

/// Why an uplink is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendTrigger {
    /// Regular interval (or backoff retry).
    Scheduled,
    /// Motion edge.
    Motion,
    /// Network asked for a reading.
    Requested,
}

/// What the node should do now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Join,
    Send(SendTrigger),
    Wait,
}

/// Result of a send attempt as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Uplink accepted by the MAC.
    Delivered,
    /// MAC reported a failure.
    Failed,
    /// No session, nothing went over the air.
    NotJoined,
}

/// Decides when to join, send and sleep.
#[derive(Debug, Clone)]
pub struct TransmissionScheduler {
    state: SchedulerState,
    base_interval_secs: u32,
    max_backoff_secs: u32,
    motion_debounce_secs: u32,
    rejoin_threshold: u32,
    pending_motion: bool,
    pending_request: bool,
    rejoin_pending: bool,
    sleep_request: Option<u32>,
}

impl TransmissionScheduler {
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            state: SchedulerState::Idle,
            base_interval_secs: config.base_interval_secs,
            max_backoff_secs: config.max_backoff_secs,
            motion_debounce_secs: config.motion_debounce_secs,
            rejoin_threshold: config.rejoin_threshold,
            pending_motion: false,
            pending_request: false,
            rejoin_pending: false,
            sleep_request: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn base_interval_secs(&self) -> u32 {
        self.base_interval_secs
    }

    /// Leave `Idle` at boot.
    pub fn start(&mut self) {
        if self.state == SchedulerState::Idle {
            self.transition(SchedulerState::AwaitingJoin);
        }
    }

    /// Force a fresh join before the next send.
    pub fn request_rejoin(&mut self) {
        if self.state != SchedulerState::AwaitingJoin {
            info!("Rejoin requested");
            self.transition(SchedulerState::AwaitingJoin);
            self.rejoin_pending = true;
        }
    }

    /// Whether the next join must start a fresh session. Clears the flag.
    pub fn take_rejoin(&mut self) -> bool {
        std::mem::take(&mut self.rejoin_pending)
    }

    /// Apply a new base interval. The backoff is pulled back into range and
    /// a pending sleep takes the new duration.
    pub fn set_base_interval(&mut self, secs: u32, policy: &mut TransmissionPolicy) {
        self.base_interval_secs = secs;
        if let Some(pending) = self.sleep_request.as_mut() {
            *pending = secs;
        }
        policy.backoff_secs = policy.backoff_secs.clamp(secs, self.max_backoff_secs.max(secs));
        info!("Base interval set to {}s", secs);
    }

    /// Note a rising motion edge. Evaluated by the next [`Self::next_action`].
    pub fn notify_motion(&mut self) {
        self.pending_motion = true;
    }

    /// Note a network request for an immediate reading.
    pub fn request_reading(&mut self) {
        self.pending_request = true;
    }

    /// Decide the next action.
    ///
    /// `joined` is the radio link's view of the session.
    pub fn next_action(&mut self, now_ms: u64, joined: bool, policy: &TransmissionPolicy) -> Action {
        if let Some(trigger) = self.take_unscheduled(now_ms, joined, policy) {
            return Action::Send(trigger);
        }

        match self.state {
            SchedulerState::Idle => Action::Wait,
            SchedulerState::AwaitingJoin => {
                let due = match policy.last_join_attempt_ms {
                    None => true,
                    Some(last) => elapsed_secs(now_ms, last) >= policy.backoff_secs as u64,
                };
                if due {
                    Action::Join
                } else {
                    Action::Wait
                }
            }
            SchedulerState::Joined => {
                let due = match policy.last_send_ms {
                    None => true,
                    Some(last) => elapsed_secs(now_ms, last) >= self.base_interval_secs as u64,
                };
                if !due {
                    Action::Wait
                } else if joined {
                    Action::Send(SendTrigger::Scheduled)
                } else {
                    // Session gone underneath us
                    self.transition(SchedulerState::AwaitingJoin);
                    Action::Join
                }
            }
            SchedulerState::Backoff => {
                let due = match policy.last_attempt_ms() {
                    None => true,
                    Some(last) => elapsed_secs(now_ms, last) >= policy.backoff_secs as u64,
                };
                if !due {
                    Action::Wait
                } else if joined {
                    self.transition(SchedulerState::Joined);
                    Action::Send(SendTrigger::Scheduled)
                } else {
                    self.transition(SchedulerState::AwaitingJoin);
                    Action::Join
                }
            }
        }
    }

    /// Motion or requested send, if one is pending and allowed.
    ///
    /// Pending flags are consumed either way: an edge that falls inside the
    /// debounce window is dropped, not deferred.
    fn take_unscheduled(
        &mut self,
        now_ms: u64,
        joined: bool,
        policy: &TransmissionPolicy,
    ) -> Option<SendTrigger> {
        if !self.pending_motion && !self.pending_request {
            return None;
        }
        let session_ready = joined
            && matches!(self.state, SchedulerState::Joined | SchedulerState::Backoff);
        if !session_ready {
            // Keep the flags until the first join completes
            return None;
        }

        let trigger = if self.pending_motion {
            SendTrigger::Motion
        } else {
            SendTrigger::Requested
        };
        self.pending_motion = false;
        self.pending_request = false;

        let debounced = match policy.last_send_ms {
            None => true,
            Some(last) => elapsed_secs(now_ms, last) >= self.motion_debounce_secs as u64,
        };
        if debounced {
            Some(trigger)
        } else {
            debug!("{:?} send suppressed (debounce)", trigger);
            None
        }
    }

    /// Record the outcome of a join attempt.
    pub fn record_join(&mut self, success: bool, now_ms: u64, policy: &mut TransmissionPolicy) {
        policy.last_join_attempt_ms = Some(now_ms);
        if success {
            policy.reset_to_baseline(self.base_interval_secs);
            self.transition(SchedulerState::Joined);
            return;
        }

        policy.record_failure();
        self.transition(SchedulerState::Backoff);
        self.escalate_if_due(policy);
    }

    /// Record the outcome of an uplink.
    pub fn record_send(
        &mut self,
        outcome: SendOutcome,
        trigger: SendTrigger,
        now_ms: u64,
        policy: &mut TransmissionPolicy,
    ) {
        match outcome {
            SendOutcome::Delivered => {
                policy.last_send_ms = Some(now_ms);
                policy.reset_to_baseline(self.base_interval_secs);
                policy.had_successful_transmission = true;
                self.transition(SchedulerState::Joined);
            }
            SendOutcome::Failed => {
                policy.last_send_ms = Some(now_ms);
                policy.record_failure();
                policy.grow_backoff(self.max_backoff_secs);
                self.transition(SchedulerState::Backoff);
                self.escalate_if_due(policy);
            }
            SendOutcome::NotJoined => {
                self.transition(SchedulerState::AwaitingJoin);
            }
        }

        let sleep_point = trigger == SendTrigger::Scheduled
            && matches!(self.state, SchedulerState::Joined | SchedulerState::Backoff);
        self.sleep_request = sleep_point.then_some(self.base_interval_secs);
    }

    /// Sleep duration decided by the last scheduled send cycle, if any.
    pub fn take_sleep_request(&mut self) -> Option<u32> {
        self.sleep_request.take()
    }

    fn escalate_if_due(&mut self, policy: &TransmissionPolicy) {
        if policy.rejoin_due(self.rejoin_threshold) {
            warn!(
                "{} consecutive errors without a delivered uplink, rejoining",
                policy.consecutive_errors
            );
            self.transition(SchedulerState::AwaitingJoin);
            self.rejoin_pending = true;
        }
    }

    fn transition(&mut self, next: SchedulerState) {
        if self.state != next {
            debug!("Scheduler: {} -> {}", self.state, next);
            self.state = next;
        }
    }
}

fn elapsed_secs(now_ms: u64, since_ms: u64) -> u64 {
    now_ms.saturating_sub(since_ms) / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u32 = 120;
    const MAX: u32 = 3600;

    fn setup() -> (TransmissionScheduler, TransmissionPolicy) {
        let scheduler = TransmissionScheduler::new(&NodeConfig::default());
        let policy = TransmissionPolicy::new(BASE);
        (scheduler, policy)
    }

    fn joined_setup() -> (TransmissionScheduler, TransmissionPolicy) {
        let (mut s, mut p) = setup();
        s.start();
        assert_eq!(s.next_action(0, false, &p), Action::Join);
        s.record_join(true, 0, &mut p);
        (s, p)
    }

    #[test]
    fn test_cold_boot_sequence() {
        let (mut s, mut p) = setup();
        assert_eq!(s.state(), SchedulerState::Idle);
        assert_eq!(s.next_action(0, false, &p), Action::Wait);

        s.start();
        assert_eq!(s.state(), SchedulerState::AwaitingJoin);
        assert_eq!(s.next_action(0, false, &p), Action::Join);

        s.record_join(true, 100, &mut p);
        assert_eq!(s.state(), SchedulerState::Joined);
        assert_eq!(s.next_action(200, true, &p), Action::Send(SendTrigger::Scheduled));

        s.record_send(SendOutcome::Delivered, SendTrigger::Scheduled, 300, &mut p);
        assert_eq!(s.state(), SchedulerState::Joined);
        assert_eq!(p.consecutive_errors, 0);
        assert_eq!(s.take_sleep_request(), Some(BASE));
        assert_eq!(s.take_sleep_request(), None);
    }

    #[test]
    fn test_send_waits_for_interval() {
        let (mut s, mut p) = joined_setup();
        s.record_send(SendOutcome::Delivered, SendTrigger::Scheduled, 1_000, &mut p);

        assert_eq!(s.next_action(1_000 + 119_999, true, &p), Action::Wait);
        assert_eq!(
            s.next_action(1_000 + 120_000, true, &p),
            Action::Send(SendTrigger::Scheduled)
        );
    }

    #[test]
    fn test_failed_sends_grow_backoff() {
        let (mut s, mut p) = joined_setup();
        p.had_successful_transmission = true;

        let mut previous = p.backoff_secs;
        let mut now = 0;
        for _ in 0..12 {
            s.record_send(SendOutcome::Failed, SendTrigger::Scheduled, now, &mut p);
            assert_eq!(s.state(), SchedulerState::Backoff);
            assert!(p.backoff_secs >= previous);
            assert!(p.backoff_secs <= MAX);
            previous = p.backoff_secs;
            now += 10_000;
        }
        assert_eq!(p.backoff_secs, MAX);

        s.record_send(SendOutcome::Delivered, SendTrigger::Scheduled, now, &mut p);
        assert_eq!(p.backoff_secs, BASE);
        assert_eq!(p.consecutive_errors, 0);
    }

    #[test]
    fn test_backoff_retry_without_rejoin() {
        let (mut s, mut p) = joined_setup();
        s.record_send(SendOutcome::Failed, SendTrigger::Scheduled, 0, &mut p);
        assert_eq!(p.backoff_secs, 240);

        assert_eq!(s.next_action(239_000, true, &p), Action::Wait);
        assert_eq!(s.next_action(240_000, true, &p), Action::Send(SendTrigger::Scheduled));
        assert_eq!(s.state(), SchedulerState::Joined);
    }

    #[test]
    fn test_rejoin_escalation_after_send_failures() {
        let (mut s, mut p) = joined_setup();
        for i in 0..3 {
            s.record_send(SendOutcome::Failed, SendTrigger::Scheduled, i * 1000, &mut p);
            assert_eq!(s.state(), SchedulerState::Backoff);
        }
        s.record_send(SendOutcome::Failed, SendTrigger::Scheduled, 4000, &mut p);
        assert_eq!(p.consecutive_errors, 4);
        assert_eq!(s.state(), SchedulerState::AwaitingJoin);
        // Escalation is not a sleep point
        assert_eq!(s.take_sleep_request(), None);
        assert!(s.take_rejoin());
        assert!(!s.take_rejoin());
    }

    #[test]
    fn test_no_escalation_after_success() {
        let (mut s, mut p) = joined_setup();
        s.record_send(SendOutcome::Delivered, SendTrigger::Scheduled, 0, &mut p);
        for i in 1..=6 {
            s.record_send(SendOutcome::Failed, SendTrigger::Scheduled, i * 1000, &mut p);
        }
        assert_eq!(p.consecutive_errors, 6);
        assert_eq!(s.state(), SchedulerState::Backoff);
    }

    #[test]
    fn test_four_join_failures_escalate() {
        let (mut s, mut p) = setup();
        s.start();
        let mut now = 0;
        for attempt in 1..=4 {
            loop {
                match s.next_action(now, false, &p) {
                    Action::Join => break,
                    Action::Wait => now += 1_000,
                    other => panic!("unexpected {:?}", other),
                }
            }
            s.record_join(false, now, &mut p);
            if attempt < 4 {
                assert_eq!(s.state(), SchedulerState::Backoff);
            }
        }
        assert_eq!(p.consecutive_errors, 4);
        assert_eq!(s.state(), SchedulerState::AwaitingJoin);
        // Join failures do not grow the backoff
        assert_eq!(p.backoff_secs, BASE);
    }

    #[test]
    fn test_join_retry_waits_backoff() {
        let (mut s, mut p) = setup();
        s.start();
        s.record_join(false, 0, &mut p);
        assert_eq!(s.state(), SchedulerState::Backoff);
        assert_eq!(s.next_action(60_000, false, &p), Action::Wait);
        assert_eq!(s.next_action(120_000, false, &p), Action::Join);
        assert_eq!(s.state(), SchedulerState::AwaitingJoin);
    }

    #[test]
    fn test_escalated_join_does_not_spin() {
        let (mut s, mut p) = setup();
        s.start();
        for i in 0..4 {
            s.record_join(false, i * 200_000, &mut p);
        }
        assert_eq!(s.state(), SchedulerState::AwaitingJoin);
        let last = 3 * 200_000;
        assert_eq!(s.next_action(last + 1_000, false, &p), Action::Wait);
        assert_eq!(s.next_action(last + 120_000, false, &p), Action::Join);
    }

    #[test]
    fn test_not_joined_outcome() {
        let (mut s, mut p) = joined_setup();
        s.record_send(SendOutcome::NotJoined, SendTrigger::Scheduled, 5_000, &mut p);
        assert_eq!(s.state(), SchedulerState::AwaitingJoin);
        assert_eq!(p.consecutive_errors, 0);
        assert_eq!(p.last_send_ms, None);
        assert_eq!(s.take_sleep_request(), None);
    }

    #[test]
    fn test_motion_send_debounced() {
        let (mut s, mut p) = joined_setup();
        s.record_send(SendOutcome::Delivered, SendTrigger::Scheduled, 0, &mut p);
        s.take_sleep_request();

        // Many edges inside the window: all suppressed
        for t in [1_000, 5_000, 9_999] {
            s.notify_motion();
            assert_eq!(s.next_action(t, true, &p), Action::Wait);
        }

        s.notify_motion();
        assert_eq!(s.next_action(10_000, true, &p), Action::Send(SendTrigger::Motion));
    }

    #[test]
    fn test_motion_send_never_sleeps() {
        let (mut s, mut p) = joined_setup();
        s.notify_motion();
        assert_eq!(s.next_action(0, true, &p), Action::Send(SendTrigger::Motion));
        s.record_send(SendOutcome::Delivered, SendTrigger::Motion, 0, &mut p);
        assert_eq!(s.take_sleep_request(), None);
    }

    #[test]
    fn test_motion_ignored_until_joined() {
        let (mut s, mut p) = setup();
        s.start();
        s.notify_motion();
        assert_eq!(s.next_action(0, false, &p), Action::Join);
        s.record_join(true, 1_000, &mut p);
        assert_eq!(s.next_action(2_000, true, &p), Action::Send(SendTrigger::Motion));
    }

    #[test]
    fn test_requested_reading() {
        let (mut s, mut p) = joined_setup();
        s.record_send(SendOutcome::Delivered, SendTrigger::Scheduled, 0, &mut p);
        s.request_reading();
        assert_eq!(s.next_action(15_000, true, &p), Action::Send(SendTrigger::Requested));
        s.record_send(SendOutcome::Delivered, SendTrigger::Requested, 15_000, &mut p);
        assert_eq!(s.next_action(16_000, true, &p), Action::Wait);
    }

    #[test]
    fn test_failed_scheduled_send_sleeps_in_backoff() {
        let (mut s, mut p) = joined_setup();
        s.record_send(SendOutcome::Failed, SendTrigger::Scheduled, 0, &mut p);
        assert_eq!(s.state(), SchedulerState::Backoff);
        assert_eq!(s.take_sleep_request(), Some(BASE));
    }

    #[test]
    fn test_set_base_interval() {
        let (mut s, mut p) = joined_setup();
        s.set_base_interval(600, &mut p);
        assert_eq!(s.base_interval_secs(), 600);
        assert_eq!(p.backoff_secs, 600);

        s.record_send(SendOutcome::Delivered, SendTrigger::Scheduled, 0, &mut p);
        assert_eq!(s.next_action(599_000, true, &p), Action::Wait);
        assert_eq!(s.take_sleep_request(), Some(600));
    }

    #[test]
    fn test_interval_change_updates_pending_sleep() {
        let (mut s, mut p) = joined_setup();
        s.record_send(SendOutcome::Delivered, SendTrigger::Scheduled, 0, &mut p);
        s.set_base_interval(300, &mut p);
        assert_eq!(s.take_sleep_request(), Some(300));

        s.set_base_interval(900, &mut p);
        assert_eq!(s.take_sleep_request(), None);
    }

    #[test]
    fn test_lost_session_rejoins() {
        let (mut s, p) = joined_setup();
        assert_eq!(s.next_action(0, false, &p), Action::Join);
        assert_eq!(s.state(), SchedulerState::AwaitingJoin);
    }

    #[test]
    fn test_request_rejoin() {
        let (mut s, _) = joined_setup();
        s.request_rejoin();
        assert_eq!(s.state(), SchedulerState::AwaitingJoin);
        assert!(s.take_rejoin());
    }
}

#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use lora_sensor_node_macros::tap_test;

    #[tap_test]
    fn scheduler_backoff_capped() {
        let mut scheduler = TransmissionScheduler::new(&NodeConfig::default());
        let mut policy = TransmissionPolicy::new(120);
        policy.had_successful_transmission = true;
        scheduler.start();
        scheduler.record_join(true, 0, &mut policy);
        for i in 0..20 {
            scheduler.record_send(SendOutcome::Failed, SendTrigger::Scheduled, i * 1000, &mut policy);
        }
        assert_eq!(policy.backoff_secs, 3600);
    }

    #[tap_test]
    fn scheduler_join_failures_escalate() {
        let mut scheduler = TransmissionScheduler::new(&NodeConfig::default());
        let mut policy = TransmissionPolicy::new(120);
        scheduler.start();
        for i in 0..4 {
            scheduler.record_join(false, i * 1000, &mut policy);
        }
        assert_eq!(scheduler.state(), SchedulerState::AwaitingJoin);
    }
}

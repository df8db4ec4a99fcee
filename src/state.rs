//! Node state that survives deep sleep.
//!
//! Everything the node remembers between wake cycles lives in one
//! [`NodeState`] record. It is handed to the components explicitly at each
//! wake and written back to retained memory before sleeping.
//!
//! # Retained Layout
//!
//! Fixed 32 bytes, little-endian:
//!
//! | Offset | Field |
//! |--------|-------|
//! | 0..4 | magic `NODE` |
//! | 4 | layout version |
//! | 5 | flags: bit0 joined, bit1 motion wake, bit2 had success |
//! | 6..8 | last RSSI (dBm, i16) |
//! | 8..12 | boot count (u32) |
//! | 12..16 | consecutive errors (u32) |
//! | 16..20 | backoff seconds (u32) |
//! | 20..24 | last join error (i32) |
//! | 24..26 | last SNR (quarter dB, i16) |
//! | 26..28 | reserved |
//! | 28..32 | FNV-1a checksum of bytes 0..28 |

use std::fmt;

/// Live LoRaWAN session facts.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NodeSession {
    /// A network session is active.
    pub joined: bool,
    /// RSSI of the last exchange (dBm).
    pub last_rssi: f32,
    /// SNR of the last exchange (dB).
    pub last_snr: f32,
    /// Most recent join/send status code, 0 after a success.
    pub last_error_code: i32,
}

/// Retry and backoff bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmissionPolicy {
    /// Failed joins/sends since the last success.
    pub consecutive_errors: u32,
    /// Current retry delay, within `[base_interval, max_backoff]`.
    pub backoff_secs: u32,
    /// An uplink has been delivered since the last cold reset.
    pub had_successful_transmission: bool,
    /// Monotonic time of the last uplink attempt (this wake only).
    pub last_send_ms: Option<u64>,
    /// Monotonic time of the last join attempt (this wake only).
    pub last_join_attempt_ms: Option<u64>,
}

impl TransmissionPolicy {
    /// Fresh policy for a cold boot.
    pub fn new(base_interval_secs: u32) -> Self {
        Self {
            consecutive_errors: 0,
            backoff_secs: base_interval_secs,
            had_successful_transmission: false,
            last_send_ms: None,
            last_join_attempt_ms: None,
        }
    }

    /// Clear the error streak and return the backoff to baseline.
    pub fn reset_to_baseline(&mut self, base_interval_secs: u32) {
        self.consecutive_errors = 0;
        self.backoff_secs = base_interval_secs;
    }

    /// Count one more failure in the current streak.
    pub fn record_failure(&mut self) {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
    }

    /// Double the backoff, capped at `max_backoff_secs`.
    pub fn grow_backoff(&mut self, max_backoff_secs: u32) {
        self.backoff_secs = self.backoff_secs.saturating_mul(2).min(max_backoff_secs);
    }

    /// Whether the error streak calls for a fresh join.
    ///
    /// True only while no uplink has ever been delivered since cold reset.
    pub fn rejoin_due(&self, threshold: u32) -> bool {
        self.consecutive_errors > threshold && !self.had_successful_transmission
    }

    /// Most recent join or send attempt.
    pub fn last_attempt_ms(&self) -> Option<u64> {
        match (self.last_send_ms, self.last_join_attempt_ms) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// What ended the previous sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// Power-on or reset, retained memory not trusted.
    ColdBoot,
    /// Sleep timer expired.
    Timer,
    /// Motion sensor fired.
    ExternalSignal,
}

/// Facts about the current wake, fixed once set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeContext {
    pub wake_reason: WakeReason,
    pub boot_count: u32,
}

/// Everything persisted across sleep cycles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeState {
    pub boot_count: u32,
    pub session: NodeSession,
    pub policy: TransmissionPolicy,
    /// Status code of the last failed join, 0 if the last join succeeded.
    pub last_join_error: i32,
    /// The current wake was caused by motion.
    pub motion_wake: bool,
}

const MAGIC: [u8; 4] = *b"NODE";
const LAYOUT_VERSION: u8 = 1;
const CHECKSUM_OFFSET: usize = 28;

const FLAG_JOINED: u8 = 0x01;
const FLAG_MOTION_WAKE: u8 = 0x02;
const FLAG_HAD_SUCCESS: u8 = 0x04;

impl NodeState {
    /// Size of the retained record in bytes.
    pub const RETAINED_LEN: usize = 32;

    /// State after power loss.
    pub fn cold(base_interval_secs: u32) -> Self {
        Self {
            boot_count: 0,
            session: NodeSession::default(),
            policy: TransmissionPolicy::new(base_interval_secs),
            last_join_error: 0,
            motion_wake: false,
        }
    }

    /// Serialize into the retained layout.
    pub fn to_retained(&self) -> [u8; Self::RETAINED_LEN] {
        let mut out = [0u8; Self::RETAINED_LEN];
        out[0..4].copy_from_slice(&MAGIC);
        out[4] = LAYOUT_VERSION;

        let mut flags = 0;
        if self.session.joined {
            flags |= FLAG_JOINED;
        }
        if self.motion_wake {
            flags |= FLAG_MOTION_WAKE;
        }
        if self.policy.had_successful_transmission {
            flags |= FLAG_HAD_SUCCESS;
        }
        out[5] = flags;

        let rssi = self.session.last_rssi.round() as i16;
        out[6..8].copy_from_slice(&rssi.to_le_bytes());
        out[8..12].copy_from_slice(&self.boot_count.to_le_bytes());
        out[12..16].copy_from_slice(&self.policy.consecutive_errors.to_le_bytes());
        out[16..20].copy_from_slice(&self.policy.backoff_secs.to_le_bytes());
        out[20..24].copy_from_slice(&self.last_join_error.to_le_bytes());
        let snr_quarters = (self.session.last_snr * 4.0).round() as i16;
        out[24..26].copy_from_slice(&snr_quarters.to_le_bytes());

        let checksum = fnv1a(&out[..CHECKSUM_OFFSET]);
        out[CHECKSUM_OFFSET..].copy_from_slice(&checksum.to_le_bytes());
        out
    }

    /// Restore from the retained layout.
    ///
    /// The backoff is clamped into `[base_interval_secs, max_backoff_secs]`
    /// in case the configuration changed since the record was written.
    /// Timestamps are not retained: the monotonic clock restarts each wake.
    pub fn from_retained(
        bytes: &[u8],
        base_interval_secs: u32,
        max_backoff_secs: u32,
    ) -> Result<Self, StateError> {
        if bytes.len() != Self::RETAINED_LEN {
            return Err(StateError::InvalidLength(bytes.len()));
        }
        if bytes[0..4] != MAGIC {
            return Err(StateError::BadMagic);
        }
        if bytes[4] != LAYOUT_VERSION {
            return Err(StateError::UnsupportedVersion(bytes[4]));
        }
        let stored = u32::from_le_bytes([bytes[28], bytes[29], bytes[30], bytes[31]]);
        if stored != fnv1a(&bytes[..CHECKSUM_OFFSET]) {
            return Err(StateError::ChecksumMismatch);
        }

        let flags = bytes[5];
        let rssi = i16::from_le_bytes([bytes[6], bytes[7]]);
        let snr_quarters = i16::from_le_bytes([bytes[24], bytes[25]]);
        let backoff = read_u32(bytes, 16).clamp(base_interval_secs, max_backoff_secs.max(base_interval_secs));

        Ok(Self {
            boot_count: read_u32(bytes, 8),
            session: NodeSession {
                joined: flags & FLAG_JOINED != 0,
                last_rssi: rssi as f32,
                last_snr: snr_quarters as f32 / 4.0,
                last_error_code: 0,
            },
            policy: TransmissionPolicy {
                consecutive_errors: read_u32(bytes, 12),
                backoff_secs: backoff,
                had_successful_transmission: flags & FLAG_HAD_SUCCESS != 0,
                last_send_ms: None,
                last_join_attempt_ms: None,
            },
            last_join_error: read_u32(bytes, 20) as i32,
            motion_wake: flags & FLAG_MOTION_WAKE != 0,
        })
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// 32-bit FNV-1a.
fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5u32, |hash, b| {
        (hash ^ *b as u32).wrapping_mul(0x0100_0193)
    })
}

/// Retained record could not be restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Record has the wrong size.
    InvalidLength(usize),
    /// Memory never held a record (or was overwritten).
    BadMagic,
    /// Written by an incompatible firmware.
    UnsupportedVersion(u8),
    /// Record is corrupted.
    ChecksumMismatch,
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLength(len) => write!(
                f,
                "retained record is {} bytes, expected {}",
                len,
                NodeState::RETAINED_LEN
            ),
            Self::BadMagic => write!(f, "no retained record"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported retained layout v{}", v),
            Self::ChecksumMismatch => write!(f, "retained record checksum mismatch"),
        }
    }
}

impl std::error::Error for StateError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> NodeState {
        NodeState {
            boot_count: 42,
            session: NodeSession {
                joined: true,
                last_rssi: -87.4,
                last_snr: 7.25,
                last_error_code: -1106,
            },
            policy: TransmissionPolicy {
                consecutive_errors: 2,
                backoff_secs: 480,
                had_successful_transmission: true,
                last_send_ms: Some(5_000),
                last_join_attempt_ms: Some(1_000),
            },
            last_join_error: -1106,
            motion_wake: true,
        }
    }

    #[test]
    fn test_retained_restores_persisted_fields() {
        let state = sample_state();
        let bytes = state.to_retained();
        let restored = NodeState::from_retained(&bytes, 120, 3600).unwrap();

        assert_eq!(restored.boot_count, 42);
        assert!(restored.session.joined);
        assert_eq!(restored.session.last_rssi, -87.0);
        assert_eq!(restored.session.last_snr, 7.25);
        assert_eq!(restored.policy.consecutive_errors, 2);
        assert_eq!(restored.policy.backoff_secs, 480);
        assert!(restored.policy.had_successful_transmission);
        assert_eq!(restored.last_join_error, -1106);
        assert!(restored.motion_wake);
    }

    #[test]
    fn test_timestamps_not_retained() {
        let bytes = sample_state().to_retained();
        let restored = NodeState::from_retained(&bytes, 120, 3600).unwrap();
        assert_eq!(restored.policy.last_send_ms, None);
        assert_eq!(restored.policy.last_join_attempt_ms, None);
    }

    #[test]
    fn test_backoff_clamped_to_config() {
        let bytes = sample_state().to_retained();
        let restored = NodeState::from_retained(&bytes, 600, 3600).unwrap();
        assert_eq!(restored.policy.backoff_secs, 600);

        let restored = NodeState::from_retained(&bytes, 60, 300).unwrap();
        assert_eq!(restored.policy.backoff_secs, 300);
    }

    #[test]
    fn test_zeroed_memory_rejected() {
        let bytes = [0u8; NodeState::RETAINED_LEN];
        assert_eq!(
            NodeState::from_retained(&bytes, 120, 3600),
            Err(StateError::BadMagic)
        );
    }

    #[test]
    fn test_corruption_detected() {
        let mut bytes = sample_state().to_retained();
        bytes[12] ^= 0x01;
        assert_eq!(
            NodeState::from_retained(&bytes, 120, 3600),
            Err(StateError::ChecksumMismatch)
        );
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut bytes = sample_state().to_retained();
        bytes[4] = 9;
        assert_eq!(
            NodeState::from_retained(&bytes, 120, 3600),
            Err(StateError::UnsupportedVersion(9))
        );
    }

    #[test]
    fn test_wrong_length_rejected() {
        let bytes = sample_state().to_retained();
        assert_eq!(
            NodeState::from_retained(&bytes[..20], 120, 3600),
            Err(StateError::InvalidLength(20))
        );
    }

    #[test]
    fn test_backoff_growth_capped() {
        let mut policy = TransmissionPolicy::new(120);
        let mut previous = policy.backoff_secs;
        for _ in 0..10 {
            policy.grow_backoff(3600);
            assert!(policy.backoff_secs >= previous);
            assert!(policy.backoff_secs <= 3600);
            previous = policy.backoff_secs;
        }
        assert_eq!(policy.backoff_secs, 3600);

        policy.reset_to_baseline(120);
        assert_eq!(policy.backoff_secs, 120);
        assert_eq!(policy.consecutive_errors, 0);
    }

    #[test]
    fn test_rejoin_due() {
        let mut policy = TransmissionPolicy::new(120);
        for _ in 0..3 {
            policy.record_failure();
        }
        assert!(!policy.rejoin_due(3));
        policy.record_failure();
        assert!(policy.rejoin_due(3));

        policy.had_successful_transmission = true;
        assert!(!policy.rejoin_due(3));
    }

    #[test]
    fn test_last_attempt() {
        let mut policy = TransmissionPolicy::new(120);
        assert_eq!(policy.last_attempt_ms(), None);
        policy.last_join_attempt_ms = Some(10);
        assert_eq!(policy.last_attempt_ms(), Some(10));
        policy.last_send_ms = Some(30);
        assert_eq!(policy.last_attempt_ms(), Some(30));
    }
}

//! LoRaWAN support.
//!
//! This module contains:
//! - [`config`]: Region selection and radio parameters handed to the stack
//! - [`mac`]: The [`LoRaWanMac`] boundary and the stack's status codes
//! - [`link`]: [`RadioLink`], owner of the session (join, send, downlinks)
//! - [`simulated`]: In-memory MAC for host runs and tests

mod config;
mod link;
mod mac;
mod simulated;

pub use config::{RadioSettings, Region, JOIN_TIMEOUT, SPREADING_FACTOR, TX_POWER};
pub use link::{Ack, DownlinkEvent, Joined, LinkError, RadioLink};
pub use mac::{
    describe_error, Downlink, LinkQuality, LoRaWanMac, MacError, ERR_CFLIST_MISSING,
    ERR_INVALID_CREDENTIALS, ERR_INVALID_HEADER, ERR_INVALID_PACKET_LENGTH, ERR_INVALID_STATE,
    ERR_NETWORK_NOT_JOINED, ERR_NONE, ERR_NO_JOIN_ACCEPT, ERR_SECONDARY_HEADER, ERR_UNKNOWN,
};
pub use simulated::{DownlinkQueue, SentUplink, SimulatedMac};

//! Line commands for driving a simulated node from stdin.
//!
//! The host binary has no PIR or button, so the console stands in for
//! them and for the network server.
//!
//! # Commands
//!
//! - `motion` - Pulse the PIR input
//! - `button` - Press the PRG button (cycles the display)
//! - `downlink <port> <hex>` - Queue a downlink for the next uplink
//! - `status` - Show node counters
//! - `help` - Show available commands
//! - `quit` - Stop the node
//!
//! # Example Session
//!
//! ```text
//! > downlink 1 010100012c
//! Queued 5 byte downlink on port 1
//!
//! > motion
//! Motion triggered
//! ```

use crate::stats::NodeStats;
#[cfg(not(target_os = "espidf"))]
use log::{info, warn};
#[cfg(not(target_os = "espidf"))]
use std::future::Future;
use std::sync::atomic::Ordering;
#[cfg(not(target_os = "espidf"))]
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
#[cfg(not(target_os = "espidf"))]
use tokio_util::sync::CancellationToken;

/// Parsed console command.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Pulse the motion input.
    Motion,
    /// Press the button.
    Button,
    /// Queue a downlink.
    Downlink { port: u8, payload: Vec<u8> },
    /// Show node status.
    Status,
    /// Show help.
    Help,
    /// Stop the node.
    Quit,
    /// Unknown or invalid command.
    Unknown(String),
}

impl ConsoleCommand {
    /// Parse a command from input line.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if input.is_empty() {
            return ConsoleCommand::Unknown(String::new());
        }

        let mut parts = input.splitn(2, ' ');
        let cmd = parts.next().unwrap_or("");
        let args = parts.next().unwrap_or("").trim();

        match cmd.to_lowercase().as_str() {
            "motion" | "m" => ConsoleCommand::Motion,
            "button" | "b" => ConsoleCommand::Button,
            "downlink" | "dl" | "d" => Self::parse_downlink(args),
            "status" | "stat" | "s" => ConsoleCommand::Status,
            "help" | "h" | "?" => ConsoleCommand::Help,
            "quit" | "exit" | "q" => ConsoleCommand::Quit,
            _ => ConsoleCommand::Unknown(format!(
                "Unknown command: {}. Type 'help' for commands.",
                cmd
            )),
        }
    }

    fn parse_downlink(args: &str) -> Self {
        const USAGE: &str = "Usage: downlink <port 1-223> <hex payload>";

        let mut parts = args.split_whitespace();
        let (Some(port), Some(hex_payload), None) = (parts.next(), parts.next(), parts.next())
        else {
            return ConsoleCommand::Unknown(USAGE.to_string());
        };

        let port = match port.parse::<u8>() {
            Ok(port) if (1..=223).contains(&port) => port,
            _ => return ConsoleCommand::Unknown(USAGE.to_string()),
        };
        match hex::decode(hex_payload) {
            Ok(payload) if !payload.is_empty() => ConsoleCommand::Downlink { port, payload },
            _ => ConsoleCommand::Unknown(format!("Invalid hex payload: {}", hex_payload)),
        }
    }
}

/// Help text for available commands.
pub const HELP_TEXT: &str = r#"
Available commands:
  motion                 Trigger the PIR sensor
  button                 Press the PRG button
  downlink <port> <hex>  Queue a downlink for the next uplink
  status                 Show node status
  help                   Show this help
  quit                   Stop the node

Shortcuts: m=motion, b=button, d=downlink, s=status, h=help, q=quit

Downlink payloads:
  0101hhmmll  Set interval to 0xhhmmll seconds
  0201        Restart
  0202        Send a reading now
"#;

/// Format node status.
pub fn format_status(stats: &NodeStats) -> String {
    let joined = stats.link.joined.load(Ordering::Relaxed);
    format!(
        "Node Status:\n  DevEUI: {}\n  Boots: {}\n  Uptime: {}s\n  Network: {}\n  RSSI: {} dBm\n  Uplinks: {} sent, {} failed\n  Last error: {}\n",
        stats.dev_eui,
        stats.boot_count.load(Ordering::Relaxed),
        stats.uptime_secs(),
        if joined { "joined" } else { "not joined" },
        stats.link.rssi.load(Ordering::Relaxed),
        stats.uplinks_sent.load(Ordering::Relaxed),
        stats.uplinks_failed.load(Ordering::Relaxed),
        stats.link.last_error.load(Ordering::Relaxed)
    )
}

/// Read commands from `input` until `cancel` fires or `interrupt`
/// resolves (Ctrl+C in the binary).
///
/// End of input only disables the console; the interrupt stays armed.
#[cfg(not(target_os = "espidf"))]
pub async fn run_console<R, I, F>(input: R, interrupt: I, cancel: &CancellationToken, mut handle: F)
where
    R: AsyncBufRead + Unpin,
    I: Future<Output = std::io::Result<()>>,
    F: FnMut(ConsoleCommand),
{
    let mut lines = input.lines();
    let mut input_open = true;
    let mut interrupt_armed = true;
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = &mut interrupt, if interrupt_armed => match result {
                Ok(()) => {
                    info!("Ctrl+C received, shutting down");
                    cancel.cancel();
                    break;
                }
                Err(e) => {
                    warn!("Interrupt handler unavailable: {}", e);
                    interrupt_armed = false;
                }
            },
            line = lines.next_line(), if input_open => match line {
                Ok(Some(line)) => handle(ConsoleCommand::parse(&line)),
                Ok(None) => {
                    info!("stdin closed, console disabled");
                    input_open = false;
                }
                Err(e) => {
                    warn!("stdin error: {}", e);
                    input_open = false;
                }
            },
        }
    }
}

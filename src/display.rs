//! Display seam.
//!
//! The node reports status through [`DisplayProvider`] and never reads
//! anything back. [`LogDisplay`] is a text rendition of the OLED screens
//! that mirrors every update to the `log` facade; the host binary and the
//! ESP32 build without a panel driver both use it.

use crate::lora::describe_error;
use crate::sensor::EnvironmentReading;
use log::{debug, error, info};
use std::collections::VecDeque;

/// Lines kept in the on-screen log.
pub const LOG_LINES: usize = 6;

/// Characters per line on the 128 px panel with the small font.
pub const LINE_WIDTH: usize = 21;

/// Sink for status output.
pub trait DisplayProvider {
    /// Append a line to the on-screen log.
    fn log_message(&mut self, text: &str);

    /// Show an error screen.
    fn show_error(&mut self, title: &str, message: &str);

    /// Refresh the network status screen.
    fn update_status(&mut self, joined: bool, rssi: f32, send_count: u32);

    /// Refresh the sensor screen.
    fn update_readings(&mut self, _reading: &EnvironmentReading) {}

    /// Advance to the next screen (button press).
    fn cycle_screen(&mut self) {}

    /// Power the panel down.
    fn sleep(&mut self) {}

    /// Power the panel back up.
    fn wake(&mut self) {}
}

impl<T: DisplayProvider + ?Sized> DisplayProvider for Box<T> {
    fn log_message(&mut self, text: &str) {
        (**self).log_message(text)
    }

    fn show_error(&mut self, title: &str, message: &str) {
        (**self).show_error(title, message)
    }

    fn update_status(&mut self, joined: bool, rssi: f32, send_count: u32) {
        (**self).update_status(joined, rssi, send_count)
    }

    fn update_readings(&mut self, reading: &EnvironmentReading) {
        (**self).update_readings(reading)
    }

    fn cycle_screen(&mut self) {
        (**self).cycle_screen()
    }

    fn sleep(&mut self) {
        (**self).sleep()
    }

    fn wake(&mut self) {
        (**self).wake()
    }
}

/// Show a MAC status code as a "LoRaWAN Error" screen.
pub fn show_link_error<D: DisplayProvider + ?Sized>(display: &mut D, code: i32) {
    display.show_error("LoRaWAN Error", &describe_error(code));
}

/// Split a message over two display lines at a word boundary.
pub fn wrap_message(message: &str) -> (String, Option<String>) {
    if message.chars().count() <= LINE_WIDTH {
        return (message.to_string(), None);
    }
    let split = message
        .char_indices()
        .nth(LINE_WIDTH)
        .map(|(i, _)| i)
        .unwrap_or(message.len());
    let head = &message[..split];
    match head.rfind(' ') {
        Some(space) if space > 0 => (
            message[..space].to_string(),
            Some(message[space + 1..].to_string()),
        ),
        _ => (head.to_string(), Some(message[split..].to_string())),
    }
}

/// Screens reachable with the button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Main,
    Startup,
    Status,
    Sensor,
    Log,
}

impl Screen {
    /// Next screen in button order. The startup screen is only shown at boot.
    pub fn next(self) -> Self {
        match self {
            Self::Main => Self::Status,
            Self::Startup => Self::Status,
            Self::Status => Self::Sensor,
            Self::Sensor => Self::Log,
            Self::Log => Self::Main,
        }
    }
}

/// Text display that mirrors to the log.
#[derive(Debug, Clone)]
pub struct LogDisplay {
    screen: Screen,
    lines: VecDeque<String>,
    joined: bool,
    rssi: f32,
    send_count: u32,
    reading: Option<EnvironmentReading>,
    error: Option<(String, String)>,
    asleep: bool,
}

impl Default for LogDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl LogDisplay {
    pub fn new() -> Self {
        Self {
            screen: Screen::Startup,
            lines: VecDeque::with_capacity(LOG_LINES),
            joined: false,
            rssi: 0.0,
            send_count: 0,
            reading: None,
            error: None,
            asleep: false,
        }
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn is_asleep(&self) -> bool {
        self.asleep
    }

    /// On-screen log, oldest first.
    pub fn log_lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Error currently shown, if any.
    pub fn error(&self) -> Option<(&str, &str)> {
        self.error.as_ref().map(|(t, m)| (t.as_str(), m.as_str()))
    }

    /// Text of the current screen.
    pub fn render(&self) -> Vec<String> {
        if let Some((title, message)) = &self.error {
            let (first, second) = wrap_message(message);
            let mut out = vec![title.clone(), first];
            out.extend(second);
            return out;
        }
        match self.screen {
            Screen::Main | Screen::Status => vec![
                "LoRaWAN Status".to_string(),
                format!("Network: {}", if self.joined { "JOINED" } else { "NOT JOINED" }),
                format!("RSSI: {:.0} dBm", self.rssi),
                format!("Uplinks: {}", self.send_count),
            ],
            Screen::Startup => vec!["LoRa Sensor Node".to_string(), "Starting...".to_string()],
            Screen::Sensor => match &self.reading {
                Some(r) => vec![
                    "Sensor Data".to_string(),
                    format!("Temp: {:.1} C", r.temperature),
                    format!("Humidity: {:.1} %", r.humidity),
                    format!("Pressure: {:.1} hPa", r.pressure),
                ],
                None => vec!["Sensor Data".to_string(), "BME280: Not Found".to_string()],
            },
            Screen::Log => {
                let mut out = vec!["Log".to_string()];
                out.extend(self.lines.iter().cloned());
                out
            }
        }
    }

    fn push_line(&mut self, text: String) {
        if self.lines.len() == LOG_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(text);
    }
}

impl DisplayProvider for LogDisplay {
    fn log_message(&mut self, text: &str) {
        info!("[display] {}", text);
        self.push_line(text.to_string());
    }

    fn show_error(&mut self, title: &str, message: &str) {
        error!("[display] {}: {}", title, message);
        self.error = Some((title.to_string(), message.to_string()));
        self.push_line(format!("ERROR: {}", message));
    }

    fn update_status(&mut self, joined: bool, rssi: f32, send_count: u32) {
        // A successful join clears a stale error screen
        if joined && !self.joined {
            self.error = None;
        }
        if self.screen == Screen::Startup {
            self.screen = if joined { Screen::Sensor } else { Screen::Status };
        }
        self.joined = joined;
        self.rssi = rssi;
        self.send_count = send_count;
        debug!(
            "[display] status joined={} rssi={:.0} uplinks={}",
            joined, rssi, send_count
        );
    }

    fn update_readings(&mut self, reading: &EnvironmentReading) {
        self.reading = reading.available.then_some(*reading);
    }

    fn cycle_screen(&mut self) {
        self.error = None;
        self.asleep = false;
        self.screen = self.screen.next();
        debug!("[display] screen {:?}", self.screen);
    }

    fn sleep(&mut self) {
        if !self.asleep {
            debug!("[display] off");
            self.asleep = true;
        }
    }

    fn wake(&mut self) {
        if self.asleep {
            debug!("[display] on");
            self.asleep = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lora::ERR_NO_JOIN_ACCEPT;

    #[test]
    fn test_log_keeps_last_lines() {
        let mut display = LogDisplay::new();
        for i in 0..10 {
            display.log_message(&format!("line {}", i));
        }
        let lines: Vec<_> = display.log_lines().collect();
        assert_eq!(lines.len(), LOG_LINES);
        assert_eq!(lines[0], "line 4");
        assert_eq!(lines[5], "line 9");
    }

    #[test]
    fn test_link_error_screen() {
        let mut display = LogDisplay::new();
        show_link_error(&mut display, ERR_NO_JOIN_ACCEPT);
        assert_eq!(
            display.error(),
            Some(("LoRaWAN Error", "Join Accept not received"))
        );
        assert_eq!(
            display.log_lines().last(),
            Some("ERROR: Join Accept not received")
        );

        let rendered = display.render();
        assert_eq!(rendered[0], "LoRaWAN Error");
        assert_eq!(rendered[1], "Join Accept not");
        assert_eq!(rendered[2], "received");
    }

    #[test]
    fn test_wrap_message() {
        assert_eq!(wrap_message("CFList missing"), ("CFList missing".to_string(), None));
        assert_eq!(
            wrap_message("Secondary header not found"),
            (
                "Secondary header not".to_string(),
                Some("found".to_string())
            )
        );
        assert_eq!(
            wrap_message("ABCDEFGHIJKLMNOPQRSTUVWXYZ"),
            (
                "ABCDEFGHIJKLMNOPQRSTU".to_string(),
                Some("VWXYZ".to_string())
            )
        );
    }

    #[test]
    fn test_screen_cycle_skips_startup() {
        let mut display = LogDisplay::new();
        assert_eq!(display.screen(), Screen::Startup);
        display.cycle_screen();
        assert_eq!(display.screen(), Screen::Status);
        display.cycle_screen();
        display.cycle_screen();
        display.cycle_screen();
        assert_eq!(display.screen(), Screen::Main);
        display.cycle_screen();
        assert_eq!(display.screen(), Screen::Status);
    }

    #[test]
    fn test_status_leaves_startup_screen() {
        let mut display = LogDisplay::new();
        display.update_status(true, -80.0, 1);
        assert_eq!(display.screen(), Screen::Sensor);

        let mut display = LogDisplay::new();
        display.update_status(false, 0.0, 0);
        assert_eq!(display.screen(), Screen::Status);
        assert_eq!(display.render()[1], "Network: NOT JOINED");
    }

    #[test]
    fn test_join_clears_error() {
        let mut display = LogDisplay::new();
        display.show_error("Network Error", "Failed to join");
        display.update_status(true, -80.0, 0);
        assert!(display.error().is_none());
    }

    #[test]
    fn test_sensor_screen() {
        let mut display = LogDisplay::new();
        display.update_status(true, -80.0, 0);
        display.update_readings(&EnvironmentReading {
            temperature: 21.04,
            humidity: 40.0,
            pressure: 1001.0,
            available: true,
        });
        assert_eq!(display.render()[1], "Temp: 21.0 C");

        display.update_readings(&EnvironmentReading::UNAVAILABLE);
        assert_eq!(display.render()[1], "BME280: Not Found");
    }

    #[test]
    fn test_sleep_wake() {
        let mut display = LogDisplay::new();
        display.sleep();
        assert!(display.is_asleep());
        display.wake();
        assert!(!display.is_asleep());
        display.sleep();
        display.cycle_screen();
        assert!(!display.is_asleep());
    }
}

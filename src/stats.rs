//! HTTP stats server for node monitoring.
//!
//! Provides a simple `/stats` endpoint that returns node statistics as JSON.
//! Uses `tiny_http`, which works on both host and ESP32 (via std::net).
//!
//! # Example Response
//!
//! ```json
//! {
//!   "uptime_secs": 3600,
//!   "dev_eui": "70b3d57ed0000001",
//!   "boot_count": 12,
//!   "link": { "joined": true, "rssi": -87, "snr": 7.5, "last_error": 0 },
//!   "uplinks": { "sent": 30, "failed": 2 },
//!   "joins": { "attempted": 3, "succeeded": 1 },
//!   "events": { "downlinks": 1, "motion": 4, "sensor_fallbacks": 0 }
//! }
//! ```

use log::{error, info, warn};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tiny_http::{Method, Response, Server};

/// Default port for the stats server.
pub const DEFAULT_STATS_PORT: u16 = 8080;

/// Radio link figures from the latest exchange.
#[derive(Debug, Default)]
pub struct LinkStats {
    pub joined: AtomicBool,
    /// RSSI in dBm.
    pub rssi: AtomicI32,
    /// SNR in tenths of a dB.
    pub snr_tenths: AtomicI32,
    pub last_error: AtomicI32,
}

impl LinkStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record link quality after an exchange.
    pub fn record_quality(&self, rssi: f32, snr: f32) {
        self.rssi.store(rssi.round() as i32, Ordering::Relaxed);
        self.snr_tenths.store((snr * 10.0).round() as i32, Ordering::Relaxed);
    }

    fn to_json(&self) -> String {
        format!(
            r#"{{"joined":{},"rssi":{},"snr":{:.1},"last_error":{}}}"#,
            self.joined.load(Ordering::Relaxed),
            self.rssi.load(Ordering::Relaxed),
            self.snr_tenths.load(Ordering::Relaxed) as f32 / 10.0,
            self.last_error.load(Ordering::Relaxed)
        )
    }
}

/// Node statistics container.
///
/// Shared between the control loop and the server thread. All fields are
/// atomics so neither side locks.
#[derive(Debug)]
pub struct NodeStats {
    start_time: Instant,
    /// Device EUI as hex.
    pub dev_eui: String,
    pub boot_count: AtomicU32,
    pub link: LinkStats,
    pub uplinks_sent: AtomicU32,
    pub uplinks_failed: AtomicU32,
    pub joins_attempted: AtomicU32,
    pub joins_succeeded: AtomicU32,
    pub downlinks: AtomicU32,
    pub motion_events: AtomicU32,
    /// Uplinks that carried a last-known or placeholder reading.
    pub sensor_fallbacks: AtomicU32,
}

impl NodeStats {
    pub fn new(dev_eui: String) -> Self {
        Self {
            start_time: Instant::now(),
            dev_eui,
            boot_count: AtomicU32::new(0),
            link: LinkStats::new(),
            uplinks_sent: AtomicU32::new(0),
            uplinks_failed: AtomicU32::new(0),
            joins_attempted: AtomicU32::new(0),
            joins_succeeded: AtomicU32::new(0),
            downlinks: AtomicU32::new(0),
            motion_events: AtomicU32::new(0),
            sensor_fallbacks: AtomicU32::new(0),
        }
    }

    /// Get uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn record_join(&self, success: bool) {
        self.joins_attempted.fetch_add(1, Ordering::Relaxed);
        if success {
            self.joins_succeeded.fetch_add(1, Ordering::Relaxed);
        }
        self.link.joined.store(success, Ordering::Relaxed);
    }

    pub fn record_uplink(&self, delivered: bool) {
        let counter = if delivered {
            &self.uplinks_sent
        } else {
            &self.uplinks_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment(counter: &AtomicU32) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Serialize all statistics to JSON.
    pub fn to_json(&self) -> String {
        format!(
            r#"{{"uptime_secs":{},"dev_eui":"{}","boot_count":{},"link":{},"uplinks":{{"sent":{},"failed":{}}},"joins":{{"attempted":{},"succeeded":{}}},"events":{{"downlinks":{},"motion":{},"sensor_fallbacks":{}}}}}"#,
            self.uptime_secs(),
            self.dev_eui,
            self.boot_count.load(Ordering::Relaxed),
            self.link.to_json(),
            self.uplinks_sent.load(Ordering::Relaxed),
            self.uplinks_failed.load(Ordering::Relaxed),
            self.joins_attempted.load(Ordering::Relaxed),
            self.joins_succeeded.load(Ordering::Relaxed),
            self.downlinks.load(Ordering::Relaxed),
            self.motion_events.load(Ordering::Relaxed),
            self.sensor_fallbacks.load(Ordering::Relaxed)
        )
    }
}

impl Default for NodeStats {
    fn default() -> Self {
        Self::new("unknown".to_string())
    }
}

/// HTTP stats server.
///
/// Runs in a background thread and serves node statistics as JSON.
pub struct StatsServer {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl StatsServer {
    /// Start the stats server on `bind_addr` (`None` for 0.0.0.0).
    ///
    /// Drop the returned handle to stop the server.
    pub fn start(
        bind_addr: Option<IpAddr>,
        port: u16,
        stats: Arc<NodeStats>,
    ) -> Result<Self, std::io::Error> {
        let addr = match bind_addr {
            Some(ip) => format!("{}:{}", ip, port),
            None => format!("0.0.0.0:{}", port),
        };

        let server = Server::http(&addr)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::AddrInUse, format!("{}", e)))?;

        info!("Stats server listening on http://{}/stats", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let handle = thread::spawn(move || {
            Self::run_server(server, stats, shutdown_clone);
        });

        Ok(Self {
            handle: Some(handle),
            shutdown,
        })
    }

    fn run_server(server: Server, stats: Arc<NodeStats>, shutdown: Arc<AtomicBool>) {
        let content_type =
            tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).ok();
        let allow_get = tiny_http::Header::from_bytes(&b"Allow"[..], &b"GET"[..]).ok();

        loop {
            if shutdown.load(Ordering::Acquire) {
                info!("Stats server shutting down");
                break;
            }

            match server.recv_timeout(std::time::Duration::from_millis(100)) {
                Ok(Some(request)) => {
                    if request.method() != &Method::Get {
                        let mut response =
                            Response::from_string("Method Not Allowed").with_status_code(405);
                        if let Some(header) = allow_get.clone() {
                            response.add_header(header);
                        }
                        let _ = request.respond(response);
                        continue;
                    }

                    let path = request.url();
                    if path == "/stats" || path == "/stats/" {
                        let mut response =
                            Response::from_string(stats.to_json()).with_status_code(200);
                        if let Some(header) = content_type.clone() {
                            response.add_header(header);
                        }
                        if let Err(e) = request.respond(response) {
                            warn!("Failed to send response: {}", e);
                        }
                    } else {
                        let response = Response::from_string("Not Found").with_status_code(404);
                        if let Err(e) = request.respond(response) {
                            warn!("Failed to send 404: {}", e);
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Server error: {}", e);
                    break;
                }
            }
        }
    }

    /// Stop the server. May take up to 100ms due to the polling interval.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = NodeStats::new("0011".to_string());
        stats.record_join(false);
        stats.record_join(true);
        stats.record_uplink(true);
        stats.record_uplink(false);
        stats.record_uplink(true);
        NodeStats::increment(&stats.motion_events);

        assert_eq!(stats.joins_attempted.load(Ordering::Relaxed), 2);
        assert_eq!(stats.joins_succeeded.load(Ordering::Relaxed), 1);
        assert!(stats.link.joined.load(Ordering::Relaxed));
        assert_eq!(stats.uplinks_sent.load(Ordering::Relaxed), 2);
        assert_eq!(stats.uplinks_failed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.motion_events.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_node_stats_json() {
        let stats = NodeStats::new("70b3d57ed0000001".to_string());
        stats.link.record_quality(-87.2, 7.5);
        stats.boot_count.store(4, Ordering::Relaxed);
        let json = stats.to_json();

        assert!(json.contains("\"dev_eui\":\"70b3d57ed0000001\""));
        assert!(json.contains("\"boot_count\":4"));
        assert!(json.contains("\"rssi\":-87"));
        assert!(json.contains("\"snr\":7.5"));
        assert!(json.contains("\"uplinks\":{\"sent\":0,\"failed\":0}"));
    }

    #[test]
    fn test_json_is_valid() {
        let stats = NodeStats::default();
        stats.link.record_quality(-120.0, -3.25);
        let value: serde_json::Value = serde_json::from_str(&stats.to_json()).unwrap();
        assert_eq!(value["link"]["rssi"], -120);
        assert_eq!(value["events"]["downlinks"], 0);
    }

    #[test]
    fn test_server_serves_stats() {
        use std::io::{Read, Write};
        use std::net::{Ipv4Addr, TcpListener, TcpStream};

        // Grab a free port
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let stats = Arc::new(NodeStats::new("abcd".to_string()));
        let mut server =
            StatsServer::start(Some(IpAddr::V4(Ipv4Addr::LOCALHOST)), port, stats).unwrap();

        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .write_all(b"GET /stats HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).unwrap();
        assert!(body.starts_with("HTTP/1.1 200"));
        assert!(body.contains("\"dev_eui\":\"abcd\""));

        server.stop();
    }
}

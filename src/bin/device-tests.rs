//! TAP test runner binary.
//!
//! Runs the tests registered with `#[tap_test]` and prints TAP.
//!
//! # Usage
//!
//! ```bash
//! # Run on host, optionally only tests whose name contains a filter
//! cargo run --bin device-tests --features tap-tests -- [filter]
//!
//! # Flash to hardware
//! cargo espflash flash --bin device-tests --features esp32,tap-tests --release --monitor
//! ```

#[cfg(feature = "esp32")]
use esp_idf_svc::sys as _;

fn main() {
    #[cfg(feature = "esp32")]
    {
        esp_idf_svc::sys::link_patches();
        esp_idf_svc::log::EspLogger::initialize_default();
    }

    #[cfg(not(feature = "esp32"))]
    let success = {
        let filter = std::env::args().nth(1);
        lora_sensor_node::testing::run_matching(filter.as_deref())
    };
    #[cfg(feature = "esp32")]
    let success = lora_sensor_node::testing::run_all_tests();

    #[cfg(feature = "esp32")]
    {
        log::info!(
            "Tests complete ({}). Halting.",
            if success { "pass" } else { "fail" }
        );
        loop {
            std::thread::sleep(std::time::Duration::from_secs(1));
        }
    }

    #[cfg(not(feature = "esp32"))]
    std::process::exit(if success { 0 } else { 1 });
}

//! TAP (Test Anything Protocol) harness for tests that must also run on the
//! node itself.
//!
//! Pure logic (payload codec, scheduler, retained-state layout) is covered by
//! ordinary `#[test]`s on the host. Tests that should additionally run on the
//! ESP32, where libtest is unavailable, are marked `#[tap_test]` and collected
//! here through `inventory`. The `device-tests` binary prints the results as
//! TAP over the serial console.
//!
//! Only compiled with the `tap-tests` feature.
//!
//! # Usage
//!
//! ```ignore
//! #[cfg(feature = "tap-tests")]
//! mod tap_tests {
//!     use super::*;
//!     use lora_sensor_node_macros::tap_test;
//!
//!     #[tap_test]
//!     fn reference_vector_encodes() {
//!         assert_eq!(UplinkPayload::LEN, 8);
//!     }
//!
//!     #[tap_test]
//!     fn downlink_parses() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!         let bytes = hex::decode("0202")?;
//!         assert_eq!(DownlinkCommand::parse(&bytes), DownlinkCommand::ForceReading);
//!         Ok(())
//!     }
//! }
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};

pub use inventory;

/// Result type for fallible tests.
pub type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Registers and runs one test on a runner.
pub type TestRegisterFn = fn(&mut TestRunner);

/// A `#[tap_test]`, collected via inventory.
pub struct TapTestEntry {
    pub name: &'static str,
    pub register: TestRegisterFn,
}

impl TapTestEntry {
    pub const fn new(name: &'static str, register: TestRegisterFn) -> Self {
        Self { name, register }
    }
}

inventory::collect!(TapTestEntry);

/// Number of registered tests.
pub fn test_count() -> usize {
    inventory::iter::<TapTestEntry>.into_iter().count()
}

/// Run every registered test. Returns true if all passed.
pub fn run_all_tests() -> bool {
    run_matching(None)
}

/// Run the tests whose name contains `filter` (all when `None`).
pub fn run_matching(filter: Option<&str>) -> bool {
    let selected: Vec<&TapTestEntry> = inventory::iter::<TapTestEntry>
        .into_iter()
        .filter(|entry| filter.map_or(true, |f| entry.name.contains(f)))
        .collect();

    let mut runner = TestRunner::new();
    runner.print_header(selected.len());
    if let Some(f) = filter {
        TestRunner::comment(&format!("filter: {}", f));
    }
    for entry in selected {
        (entry.register)(&mut runner);
    }
    runner.finish()
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs tests and prints TAP lines.
#[derive(Debug, Default)]
pub struct TestRunner {
    tests_run: usize,
    tests_passed: usize,
    tests_failed: usize,
}

impl TestRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, name: &str, failure: Option<String>) {
        self.tests_run += 1;
        match failure {
            None => {
                self.tests_passed += 1;
                println!("ok {} - {}", self.tests_run, name);
            }
            Some(reason) => {
                self.tests_failed += 1;
                println!("not ok {} - {}", self.tests_run, name);
                println!("# {}", reason);
            }
        }
    }

    /// Run a fallible test. Errors and panics fail it.
    pub fn run<F>(&mut self, name: &str, test_fn: F)
    where
        F: FnOnce() -> TestResult + std::panic::UnwindSafe,
    {
        let failure = match catch_unwind(AssertUnwindSafe(test_fn)) {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("Error: {}", e)),
            Err(payload) => Some(format!("Panic: {}", panic_message(&payload))),
        };
        self.record(name, failure);
    }

    /// Run a test that asserts (may panic).
    pub fn run_assert<F>(&mut self, name: &str, test_fn: F)
    where
        F: FnOnce() + std::panic::UnwindSafe,
    {
        self.run(name, || {
            test_fn();
            Ok(())
        });
    }

    /// Run a test that must panic, optionally with a message containing
    /// `expected`.
    pub fn run_should_panic<F>(&mut self, name: &str, test_fn: F, expected: Option<&str>)
    where
        F: FnOnce() + std::panic::UnwindSafe,
    {
        let failure = match catch_unwind(AssertUnwindSafe(test_fn)) {
            Ok(()) => Some("Expected panic but test completed normally".to_string()),
            Err(payload) => {
                let msg = panic_message(&payload);
                match expected {
                    Some(want) if !msg.contains(want) => Some(format!(
                        "Expected panic containing '{}', got '{}'",
                        want, msg
                    )),
                    _ => None,
                }
            }
        };
        self.record(name, failure);
    }

    pub fn print_header(&self, planned_tests: usize) {
        println!("TAP version 14");
        println!("1..{}", planned_tests);
    }

    /// Print a diagnostic line.
    pub fn comment(msg: &str) {
        println!("# {}", msg);
    }

    /// Print the summary. Returns true if nothing failed.
    pub fn finish(&self) -> bool {
        println!(
            "# run {}, passed {}, failed {}",
            self.tests_run, self.tests_passed, self.tests_failed
        );
        let ok = self.tests_failed == 0;
        println!("# Result: {}", if ok { "PASS" } else { "FAIL" });
        ok
    }

    pub fn tests_run(&self) -> usize {
        self.tests_run
    }

    pub fn tests_passed(&self) -> usize {
        self.tests_passed
    }

    pub fn tests_failed(&self) -> usize {
        self.tests_failed
    }
}

mod tap_tests {
    use super::*;
    use lora_sensor_node_macros::tap_test;

    #[tap_test]
    fn runner_counts_results() {
        let mut runner = TestRunner::new();
        runner.run("pass", || Ok(()));
        runner.run("fail", || Err("boom".into()));
        runner.run_assert("panic", || panic!("intentional panic"));
        assert_eq!(runner.tests_run(), 3);
        assert_eq!(runner.tests_passed(), 1);
        assert_eq!(runner.tests_failed(), 2);
    }

    #[tap_test]
    fn runner_checks_panic_message() {
        let mut runner = TestRunner::new();
        runner.run_should_panic("match", || panic!("bad interval"), Some("interval"));
        runner.run_should_panic("mismatch", || panic!("bad port"), Some("interval"));
        runner.run_should_panic("no panic", || {}, None);
        assert_eq!(runner.tests_passed(), 1);
        assert_eq!(runner.tests_failed(), 2);
    }

    #[tap_test(should_panic = "intentional")]
    fn should_panic_attribute() {
        panic!("intentional");
    }
}

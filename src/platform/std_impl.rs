//! Standard library implementations of the platform traits.

use std::cell::Cell;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use super::{ConsoleLevel, ConsoleProvider, TimeProvider};

/// Time provider backed by `std::time`.
pub struct StdTimeProvider {
    /// Reference instant for the monotonic clock
    epoch: Instant,
}

impl StdTimeProvider {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for StdTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeProvider for StdTimeProvider {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    fn monotonic_millis(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn sleep(&self, millis: u64) {
        std::thread::sleep(Duration::from_millis(millis));
    }
}

/// A clock that only moves when told to. `sleep` advances it instantly,
/// so `run_until_idle` fires future timers without waiting.
#[derive(Debug, Default)]
pub struct ManualTimeProvider {
    now: Cell<u64>,
}

impl ManualTimeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, millis: u64) {
        self.now.set(self.now.get().saturating_add(millis));
    }

    pub fn set(&self, millis: u64) {
        self.now.set(millis);
    }
}

impl TimeProvider for ManualTimeProvider {
    fn now_millis(&self) -> i64 {
        self.now.get() as i64
    }

    fn monotonic_millis(&self) -> u64 {
        self.now.get()
    }

    fn sleep(&self, millis: u64) {
        self.advance(millis);
    }
}

/// Console provider using std print macros.
///
/// Writes to stdout for Log/Info/Debug and stderr for Warn/Error.
pub struct StdConsoleProvider;

impl StdConsoleProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StdConsoleProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleProvider for StdConsoleProvider {
    fn write(&self, level: ConsoleLevel, message: &str) {
        match level {
            ConsoleLevel::Log | ConsoleLevel::Info | ConsoleLevel::Debug => {
                println!("{message}");
            }
            ConsoleLevel::Warn | ConsoleLevel::Error => {
                eprintln!("{message}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances_on_sleep() {
        let clock = ManualTimeProvider::new();
        assert_eq!(clock.monotonic_millis(), 0);
        clock.sleep(25);
        clock.advance(5);
        assert_eq!(clock.monotonic_millis(), 30);
        clock.set(7);
        assert_eq!(clock.now_millis(), 7);
    }

    #[test]
    fn test_std_clock_is_monotonic() {
        let clock = StdTimeProvider::new();
        let a = clock.monotonic_millis();
        let b = clock.monotonic_millis();
        assert!(b >= a);
    }
}

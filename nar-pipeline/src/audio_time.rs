//! Clock sources for timed start
//!
//! Renderers that must start in lockstep share a tick epoch (typically
//! distributed by the protocol layer). Ticks and frequency are reported as a
//! pair so a hardware clock can use its native resolution.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// Tick rate of [`AudioTimeCpu`]
pub const CPU_TICKS_PER_SECOND: u64 = 1_000_000;

/// Monotonic clock shared by renderers that start together
pub trait AudioTime: Send + Sync {
    /// Current `(ticks, frequency)`; some clocks tick at a rate tied to
    /// `sample_rate`
    fn tick_count(&self, sample_rate: u32) -> (u64, u64);

    /// Realign the clock so it currently reads `ticks`
    fn set_tick_count(&self, ticks: u64);
}

/// Clock derived from the CPU's monotonic timer, in microseconds
#[derive(Debug)]
pub struct AudioTimeCpu {
    epoch: Instant,
    adjustment: AtomicI64,
}

impl AudioTimeCpu {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            adjustment: AtomicI64::new(0),
        }
    }

    fn elapsed_us(&self) -> i64 {
        self.epoch.elapsed().as_micros() as i64
    }
}

impl Default for AudioTimeCpu {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioTime for AudioTimeCpu {
    fn tick_count(&self, _sample_rate: u32) -> (u64, u64) {
        let ticks = self.elapsed_us() + self.adjustment.load(Ordering::Acquire);
        (ticks.max(0) as u64, CPU_TICKS_PER_SECOND)
    }

    fn set_tick_count(&self, ticks: u64) {
        self.adjustment
            .store(ticks as i64 - self.elapsed_us(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_clock_is_monotonic_microseconds() {
        let clock = AudioTimeCpu::new();
        let (first, freq) = clock.tick_count(44_100);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let (second, _) = clock.tick_count(44_100);
        assert_eq!(freq, CPU_TICKS_PER_SECOND);
        assert!(second >= first + 2_000);
    }

    #[test]
    fn test_set_tick_count_realigns() {
        let clock = AudioTimeCpu::new();
        clock.set_tick_count(5_000_000_000);
        let (ticks, _) = clock.tick_count(48_000);
        assert!(ticks >= 5_000_000_000);
        assert!(ticks < 5_000_000_000 + 1_000_000);
    }
}

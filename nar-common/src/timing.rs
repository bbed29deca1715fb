//! Jiffy-based timing for sample-accurate pipeline arithmetic
//!
//! The pipeline measures time in jiffies: 56,448,000 per second. That rate
//! divides evenly into every supported PCM sample rate and the common DSD
//! rates, so converting a whole number of samples to jiffies never rounds.
//!
//! | Sample rate | Jiffies per sample |
//! |-------------|--------------------|
//! | 44,100 Hz   | 1,280              |
//! | 48,000 Hz   | 1,176              |
//! | 96,000 Hz   | 588                |
//! | 192,000 Hz  | 294                |
//! | 384,000 Hz  | 147                |
//! | 2,822,400 Hz (DSD64) | 20        |
//!
//! Conversions from jiffies to samples truncate. Callers that must land on
//! a sample boundary use [`round_down_to_sample`] or [`round_up_to_sample`].
//!
//! # Examples
//!
//! ```rust
//! use nar_common::timing::*;
//!
//! let jiffies = ms_to_jiffies(5);
//! assert_eq!(jiffies, 282_240);
//! assert_eq!(jiffies_to_samples(jiffies, 44100), 220);
//! assert_eq!(samples_to_jiffies(220, 44100), 281_600);
//! ```

/// Jiffies per second
pub const JIFFIES_PER_SECOND: u64 = 56_448_000;

/// Jiffies per millisecond
pub const JIFFIES_PER_MS: u64 = JIFFIES_PER_SECOND / 1000;

/// PCM sample rates the pipeline accepts
pub const PCM_SAMPLE_RATES: [u32; 17] = [
    7_350, 8_000, 11_025, 12_000, 14_700, 16_000, 22_050, 24_000, 29_400, 32_000, 44_100, 48_000,
    88_200, 96_000, 176_400, 192_000, 352_800,
];

/// DSD sample rates the pipeline accepts (DSD64, DSD128, DSD256)
pub const DSD_SAMPLE_RATES: [u32; 3] = [2_822_400, 5_644_800, 11_289_600];

/// Whether `sample_rate` is one the pipeline can represent exactly
pub fn is_valid_sample_rate(sample_rate: u32) -> bool {
    sample_rate == 384_000
        || PCM_SAMPLE_RATES.contains(&sample_rate)
        || DSD_SAMPLE_RATES.contains(&sample_rate)
}

/// Jiffies per sample at `sample_rate`
///
/// # Panics
///
/// Panics if `sample_rate` is zero or does not divide the jiffy rate.
pub fn jiffies_per_sample(sample_rate: u32) -> u64 {
    assert!(sample_rate > 0, "sample rate must be non-zero");
    let rate = sample_rate as u64;
    assert!(
        JIFFIES_PER_SECOND % rate == 0,
        "sample rate {} does not divide the jiffy rate",
        sample_rate
    );
    JIFFIES_PER_SECOND / rate
}

/// Convert milliseconds to jiffies
pub fn ms_to_jiffies(ms: u64) -> u64 {
    ms * JIFFIES_PER_MS
}

/// Convert jiffies to milliseconds (truncating)
pub fn jiffies_to_ms(jiffies: u64) -> u64 {
    jiffies / JIFFIES_PER_MS
}

/// Convert jiffies to a whole number of samples (truncating)
pub fn jiffies_to_samples(jiffies: u64, sample_rate: u32) -> u64 {
    jiffies / jiffies_per_sample(sample_rate)
}

/// Convert samples to jiffies (exact)
pub fn samples_to_jiffies(samples: u64, sample_rate: u32) -> u64 {
    samples * jiffies_per_sample(sample_rate)
}

/// Round down to the nearest whole-sample boundary
pub fn round_down_to_sample(jiffies: u64, sample_rate: u32) -> u64 {
    let per_sample = jiffies_per_sample(sample_rate);
    jiffies - (jiffies % per_sample)
}

/// Round up to the nearest whole-sample boundary
pub fn round_up_to_sample(jiffies: u64, sample_rate: u32) -> u64 {
    let per_sample = jiffies_per_sample(sample_rate);
    match jiffies % per_sample {
        0 => jiffies,
        rem => jiffies + (per_sample - rem),
    }
}

/// Convert a clock tick count at `frequency` Hz to jiffies
///
/// Uses a 128-bit intermediate so large tick counts at high clock
/// frequencies cannot overflow.
///
/// # Panics
///
/// Panics if `frequency` is zero.
pub fn ticks_to_jiffies(ticks: u64, frequency: u64) -> u64 {
    assert!(frequency > 0, "clock frequency must be non-zero");
    ((ticks as u128 * JIFFIES_PER_SECOND as u128) / frequency as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_supported_rate_divides_evenly() {
        for rate in PCM_SAMPLE_RATES.iter().chain(DSD_SAMPLE_RATES.iter()) {
            assert_eq!(JIFFIES_PER_SECOND % *rate as u64, 0, "rate {}", rate);
        }
        assert_eq!(jiffies_per_sample(384_000), 147);
    }

    #[test]
    fn test_jiffies_per_sample_known_rates() {
        assert_eq!(jiffies_per_sample(44_100), 1280);
        assert_eq!(jiffies_per_sample(48_000), 1176);
        assert_eq!(jiffies_per_sample(2_822_400), 20);
    }

    #[test]
    #[should_panic(expected = "does not divide")]
    fn test_jiffies_per_sample_rejects_odd_rate() {
        jiffies_per_sample(44_101);
    }

    #[test]
    fn test_is_valid_sample_rate() {
        assert!(is_valid_sample_rate(44_100));
        assert!(is_valid_sample_rate(384_000));
        assert!(is_valid_sample_rate(5_644_800));
        assert!(!is_valid_sample_rate(44_101));
        assert!(!is_valid_sample_rate(0));
    }

    #[test]
    fn test_ms_round_trip_truncates() {
        assert_eq!(ms_to_jiffies(1000), JIFFIES_PER_SECOND);
        assert_eq!(jiffies_to_ms(JIFFIES_PER_MS * 3 + 1), 3);
    }

    #[test]
    fn test_sample_rounding() {
        assert_eq!(round_down_to_sample(1281, 44_100), 1280);
        assert_eq!(round_up_to_sample(1281, 44_100), 2560);
        assert_eq!(round_up_to_sample(2560, 44_100), 2560);
        assert_eq!(round_down_to_sample(0, 44_100), 0);
    }

    #[test]
    fn test_ticks_to_jiffies() {
        // 100 ticks per ms
        assert_eq!(ticks_to_jiffies(200, 100_000), 2 * JIFFIES_PER_MS);
        assert_eq!(ticks_to_jiffies(1_000_000, 1_000_000), JIFFIES_PER_SECOND);
        // Large tick counts must not overflow
        let big = u64::MAX / 2;
        assert!(ticks_to_jiffies(big, JIFFIES_PER_SECOND) == big);
    }
}

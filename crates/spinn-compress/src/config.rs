//! Compression run configuration.
//!
//! A plain struct with sensible defaults; every field maps onto a value the
//! firmware reads from SDRAM or a USER register.

use std::time::Duration;

/// Parameters for one compression run.
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Time budget per on-chip compression attempt. Written to each
    /// compressor core's USER1 in microseconds.
    pub time_per_attempt: Duration,

    /// How many rounds of attempts the sorter may launch; `None` writes the
    /// retry-forever sentinel.
    pub retry_count: Option<u32>,

    /// Minimum percentage of bitfields the sorter must merge for a result to
    /// be accepted.
    pub threshold_percentage: u32,

    /// Keep compressing below router capacity ("as much as possible") rather
    /// than stopping once the table fits.
    pub compress_as_much_as_possible: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            time_per_attempt: Duration::from_secs(10),
            retry_count: None,
            threshold_percentage: 100,
            compress_as_much_as_possible: false,
        }
    }
}

impl CompressionConfig {
    /// USER1 value for compressor cores: the attempt budget in microseconds.
    #[must_use]
    pub fn attempt_micros(&self) -> u32 {
        u32::try_from(self.time_per_attempt.as_micros()).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_attempt_budget_in_micros() {
        let config = CompressionConfig::default();
        assert_eq!(config.attempt_micros(), 10_000_000);
        assert!(config.retry_count.is_none());
    }

    #[test]
    fn oversized_budget_saturates() {
        let config = CompressionConfig {
            time_per_attempt: Duration::from_secs(1 << 40),
            ..Default::default()
        };
        assert_eq!(config.attempt_micros(), u32::MAX);
    }
}

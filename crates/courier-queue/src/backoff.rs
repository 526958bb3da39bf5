//! Exponential retry backoff.

use std::time::Duration;

/// Delay before retry number `retry_count` (1-based).
///
/// `min(base * 2^(retry_count - 1), max)`, with no jitter.
pub fn retry_delay(retry_count: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exponent = retry_count.saturating_sub(1).min(63);
    let factor = 1u64 << exponent;
    Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_from_base() {
        assert_eq!(retry_delay(1, 1_000, 30_000), Duration::from_millis(1_000));
        assert_eq!(retry_delay(2, 1_000, 30_000), Duration::from_millis(2_000));
        assert_eq!(retry_delay(3, 1_000, 30_000), Duration::from_millis(4_000));
    }

    #[test]
    fn test_caps_at_max() {
        assert_eq!(retry_delay(6, 1_000, 30_000), Duration::from_millis(30_000));
        assert_eq!(retry_delay(200, 1_000, 30_000), Duration::from_millis(30_000));
    }

    #[test]
    fn test_zero_base_is_immediate() {
        assert_eq!(retry_delay(5, 0, 30_000), Duration::ZERO);
    }
}

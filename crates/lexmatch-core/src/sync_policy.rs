use std::time::Duration;

use crate::config::SyncConfig;
use crate::models::Discrepancy;

/// `attempt` is the number of attempts already made, starting at 1.
pub(crate) const fn should_retry(attempt: u32, max_attempts: u32) -> bool {
    attempt < max_attempts
}

/// Exponential backoff with deterministic jitter of up to a quarter of the
/// baseline, keyed on the attempt and the change position so concurrent
/// retries of different events spread out.
pub(crate) fn retry_backoff(config: &SyncConfig, attempt: u32, position: u64) -> Duration {
    let min = config.retry_backoff_min_ms.max(1);
    let max = config.retry_backoff_max_ms.max(min);
    let capped_exp = attempt.saturating_sub(1).min(16);
    let baseline = min.saturating_mul(1_u64 << capped_exp).min(max);
    let jitter_bound = (baseline / 4).max(1);
    let jitter_seed = format!("sync:{attempt}:{position}");
    let hash = blake3::hash(jitter_seed.as_bytes());
    let bytes = hash.as_bytes();
    let rand = u64::from(u16::from_be_bytes([bytes[0], bytes[1]]));
    let jitter = rand % (jitter_bound + 1);
    Duration::from_millis((baseline + jitter).min(max))
}

/// Evenly spaced offsets covering `[0, total)`, at most `sample_size` of them.
pub(crate) fn sample_offsets(total: u64, sample_size: usize) -> Vec<u64> {
    if total == 0 || sample_size == 0 {
        return Vec::new();
    }
    let wanted = (sample_size as u64).min(total);
    (0..wanted).map(|i| i * total / wanted).collect()
}

pub(crate) fn push_discrepancy(sample: &mut Vec<Discrepancy>, discrepancy: Discrepancy, max: usize) {
    if sample.len() < max {
        sample.push(discrepancy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_retry_stops_at_max_attempts() {
        assert!(should_retry(1, 3));
        assert!(should_retry(2, 3));
        assert!(!should_retry(3, 3));
        assert!(!should_retry(1, 1));
    }

    #[test]
    fn retry_backoff_is_deterministic_and_bounded() {
        let config = SyncConfig::default();
        let a = retry_backoff(&config, 3, 101);
        let b = retry_backoff(&config, 3, 101);
        assert_eq!(a, b);
        assert!(a >= Duration::from_millis(800));
        assert!(a <= Duration::from_millis(1_000));
    }

    #[test]
    fn retry_backoff_never_exceeds_max() {
        let config = SyncConfig::default();
        for attempt in 1..40 {
            let delay = retry_backoff(&config, attempt, 7);
            assert!(delay <= Duration::from_millis(config.retry_backoff_max_ms));
            assert!(delay >= Duration::from_millis(config.retry_backoff_min_ms));
        }
    }

    #[test]
    fn sample_offsets_spread_over_the_range() {
        assert_eq!(sample_offsets(10, 5), vec![0, 2, 4, 6, 8]);
        assert_eq!(sample_offsets(3, 20), vec![0, 1, 2]);
        assert!(sample_offsets(0, 20).is_empty());
    }

    #[test]
    fn push_discrepancy_respects_cap() {
        let mut sample = Vec::new();
        for id in ["a", "b", "c"] {
            push_discrepancy(
                &mut sample,
                Discrepancy::MissingDocument {
                    profile_id: id.to_string(),
                },
                2,
            );
        }
        assert_eq!(sample.len(), 2);
    }
}

use std::time::Duration;

/// The two-condition batch trigger.
///
/// A batch forms immediately once the queue holds a full batch, or after the
/// flush interval has elapsed with anything at all waiting. An empty queue
/// never triggers.
pub fn should_flush(
    depth: i64,
    batch_size: usize,
    since_last_flush: Duration,
    flush_interval: Duration,
) -> bool {
    if depth <= 0 {
        return false;
    }
    depth >= batch_size as i64 || since_last_flush >= flush_interval
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(10);

    #[test]
    fn test_empty_queue_never_flushes() {
        assert!(!should_flush(0, 1_000, Duration::from_secs(60), INTERVAL));
    }

    #[test]
    fn test_size_trigger_fires_immediately() {
        assert!(should_flush(1_000, 1_000, Duration::ZERO, INTERVAL));
        assert!(should_flush(1_500, 1_000, Duration::ZERO, INTERVAL));
    }

    #[test]
    fn test_partial_batch_waits_for_interval() {
        assert!(!should_flush(5, 1_000, Duration::from_secs(9), INTERVAL));
        assert!(should_flush(5, 1_000, Duration::from_secs(10), INTERVAL));
    }

    #[test]
    fn test_single_job_flushes_on_time() {
        assert!(should_flush(1, 1_000, INTERVAL, INTERVAL));
    }
}

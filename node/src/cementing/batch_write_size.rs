use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Target time for one cementing write batch.
pub const MAXIMUM_BATCH_WRITE_TIME: Duration = Duration::from_millis(250);

/// Batches faster than this grow the next batch.
pub const MAXIMUM_BATCH_WRITE_TIME_INCREASE_CUTOFF: Duration = Duration::from_millis(
    MAXIMUM_BATCH_WRITE_TIME.as_millis() as u64 - MAXIMUM_BATCH_WRITE_TIME.as_millis() as u64 / 5,
);

pub const MINIMUM_BATCH_WRITE_SIZE: u64 = 16384;

/// How many blocks the bounded processor cements per write transaction.
///
/// The size adapts by 10% steps so that one batch takes roughly
/// [`MAXIMUM_BATCH_WRITE_TIME`]. Test networks keep it fixed so timings on a
/// loaded CI machine cannot change test outcomes.
pub struct BatchWriteSize {
    size: AtomicU64,
    adjustable: bool,
}

impl BatchWriteSize {
    pub fn new(adjustable: bool) -> Self {
        Self::with_size(MINIMUM_BATCH_WRITE_SIZE, adjustable)
    }

    pub fn with_size(size: u64, adjustable: bool) -> Self {
        Self {
            size: AtomicU64::new(size),
            adjustable,
        }
    }

    pub fn current(&self) -> u64 {
        self.size.load(Ordering::SeqCst)
    }

    /// Blocks a batch may hold before it is flushed. The 10% tolerance saves a
    /// second round trip through the write queue for chains only slightly
    /// longer than the batch size.
    pub fn with_tolerance(&self) -> u64 {
        let size = self.current();
        size + size / 10
    }

    /// Shrink after a slow batch, grow after a fast one.
    pub fn adjust(&self, time_spent_cementing: Duration) {
        if !self.adjustable {
            return;
        }
        let size = self.current();
        let amount_to_change = size / 10;
        if time_spent_cementing > MAXIMUM_BATCH_WRITE_TIME {
            self.size.store(
                MINIMUM_BATCH_WRITE_SIZE.max(size.saturating_sub(amount_to_change)),
                Ordering::SeqCst,
            );
        } else if time_spent_cementing < MAXIMUM_BATCH_WRITE_TIME_INCREASE_CUTOFF {
            self.size.store(size + amount_to_change, Ordering::SeqCst);
        }
    }

    /// Shrink only. Applied to the tail of a flush, which says nothing about
    /// whether a bigger batch would have fit.
    pub fn reduce_if_slow(&self, time_spent_cementing: Duration) {
        if self.adjustable && time_spent_cementing > MAXIMUM_BATCH_WRITE_TIME {
            let size = self.current();
            self.size.store(
                MINIMUM_BATCH_WRITE_SIZE.max(size.saturating_sub(size / 10)),
                Ordering::SeqCst,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_is_four_fifths_of_target() {
        assert_eq!(MAXIMUM_BATCH_WRITE_TIME_INCREASE_CUTOFF, Duration::from_millis(200));
    }

    #[test]
    fn grows_when_fast_and_shrinks_when_slow() {
        let size = BatchWriteSize::with_size(20_000, true);
        size.adjust(Duration::from_millis(10));
        assert_eq!(size.current(), 22_000);
        size.adjust(Duration::from_millis(300));
        assert_eq!(size.current(), 19_800);
        // Between cutoff and target nothing changes.
        size.adjust(Duration::from_millis(220));
        assert_eq!(size.current(), 19_800);
    }

    #[test]
    fn never_shrinks_below_minimum() {
        let size = BatchWriteSize::new(true);
        size.adjust(Duration::from_secs(1));
        size.reduce_if_slow(Duration::from_secs(1));
        assert_eq!(size.current(), MINIMUM_BATCH_WRITE_SIZE);
    }

    #[test]
    fn fixed_size_ignores_timings() {
        let size = BatchWriteSize::with_size(100, false);
        size.adjust(Duration::ZERO);
        size.reduce_if_slow(Duration::from_secs(5));
        assert_eq!(size.current(), 100);
        assert_eq!(size.with_tolerance(), 110);
    }
}

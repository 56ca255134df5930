//! Byte store metrics for observability.
//!
//! Tracks statistics about store operations for monitoring and debugging.

use std::sync::atomic::{AtomicU64, Ordering};

/// Byte store metrics container.
///
/// All counters are atomic for thread-safe access.
#[derive(Debug, Default)]
pub struct StoreMetrics {
    /// Number of point reads.
    pub reads: AtomicU64,
    /// Number of point reads that found nothing.
    pub read_misses: AtomicU64,
    /// Number of keys written.
    pub writes: AtomicU64,
    /// Number of keys deleted.
    pub deletes: AtomicU64,
    /// Number of batches applied.
    pub batches: AtomicU64,
    /// Total bytes written (keys and values).
    pub bytes_written: AtomicU64,
    /// Total bytes returned by reads.
    pub bytes_read: AtomicU64,
}

impl StoreMetrics {
    /// Creates a new metrics container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a read returning `bytes`, or a miss.
    pub fn record_read(&self, bytes: Option<usize>) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        match bytes {
            Some(n) => {
                self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
            }
            None => {
                self.read_misses.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Records an applied batch.
    pub fn record_batch(&self, writes: u64, deletes: u64, bytes: u64) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.writes.fetch_add(writes, Ordering::Relaxed);
        self.deletes.fetch_add(deletes, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Returns a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            read_misses: self.read_misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
        }
    }

    /// Resets all metrics to zero.
    pub fn reset(&self) {
        self.reads.store(0, Ordering::Relaxed);
        self.read_misses.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
        self.batches.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
        self.bytes_read.store(0, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of metrics values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub reads: u64,
    pub read_misses: u64,
    pub writes: u64,
    pub deletes: u64,
    pub batches: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
}

impl MetricsSnapshot {
    /// Calculates the difference between two snapshots.
    pub fn diff(&self, other: &MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            reads: self.reads.saturating_sub(other.reads),
            read_misses: self.read_misses.saturating_sub(other.read_misses),
            writes: self.writes.saturating_sub(other.writes),
            deletes: self.deletes.saturating_sub(other.deletes),
            batches: self.batches.saturating_sub(other.batches),
            bytes_written: self.bytes_written.saturating_sub(other.bytes_written),
            bytes_read: self.bytes_read.saturating_sub(other.bytes_read),
        }
    }

    /// Returns the fraction of reads that found a value (0.0 - 1.0).
    pub fn hit_rate(&self) -> f64 {
        if self.reads == 0 {
            0.0
        } else {
            (self.reads - self.read_misses) as f64 / self.reads as f64
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Store Metrics:")?;
        writeln!(f, "  Reads:          {} ({:.1}% hit)", self.reads, self.hit_rate() * 100.0)?;
        writeln!(f, "  Writes:         {}", self.writes)?;
        writeln!(f, "  Deletes:        {}", self.deletes)?;
        writeln!(f, "  Batches:        {}", self.batches)?;
        writeln!(f, "  Bytes written:  {} ({:.2} KB)", self.bytes_written, self.bytes_written as f64 / 1024.0)?;
        writeln!(f, "  Bytes read:     {} ({:.2} KB)", self.bytes_read, self.bytes_read as f64 / 1024.0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_read() {
        let metrics = StoreMetrics::new();

        metrics.record_read(Some(10));
        metrics.record_read(None);
        metrics.record_read(Some(6));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.reads, 3);
        assert_eq!(snapshot.read_misses, 1);
        assert_eq!(snapshot.bytes_read, 16);
    }

    #[test]
    fn test_metrics_snapshot_diff() {
        let metrics = StoreMetrics::new();

        metrics.record_batch(2, 0, 100);
        let snap1 = metrics.snapshot();

        metrics.record_batch(3, 1, 50);
        let snap2 = metrics.snapshot();

        let diff = snap2.diff(&snap1);
        assert_eq!(diff.batches, 1);
        assert_eq!(diff.writes, 3);
        assert_eq!(diff.deletes, 1);
        assert_eq!(diff.bytes_written, 50);
    }

    #[test]
    fn test_hit_rate() {
        let snapshot = MetricsSnapshot {
            reads: 80,
            read_misses: 20,
            ..Default::default()
        };

        assert!((snapshot.hit_rate() - 0.75).abs() < 0.001);
    }

    #[test]
    fn test_metrics_reset() {
        let metrics = StoreMetrics::new();

        metrics.record_read(Some(1));
        metrics.record_batch(1, 1, 1);

        metrics.reset();

        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Pipeline phase a subprocess belongs to, for timing purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Skew detection script.
    Detect,
    /// ImageMagick conversion.
    Normalize,
    /// Tesseract itself.
    Ocr,
}

/// Cumulative wall time per phase plus a job counter. Advisory only.
#[derive(Debug, Default)]
pub struct TimingStats {
    detect_nanos: AtomicU64,
    normalize_nanos: AtomicU64,
    ocr_nanos: AtomicU64,
    jobs: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimingSnapshot {
    pub jobs: u64,
    pub detect_secs: f64,
    pub normalize_secs: f64,
    pub ocr_secs: f64,
}

impl TimingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, phase: Phase, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.counter(phase).fetch_add(nanos, Ordering::Relaxed);
    }

    /// Returns the new job count.
    pub fn increment_jobs(&self) -> u64 {
        self.jobs.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> TimingSnapshot {
        TimingSnapshot {
            jobs: self.jobs.load(Ordering::Relaxed),
            detect_secs: nanos_to_secs(self.detect_nanos.load(Ordering::Relaxed)),
            normalize_secs: nanos_to_secs(self.normalize_nanos.load(Ordering::Relaxed)),
            ocr_secs: nanos_to_secs(self.ocr_nanos.load(Ordering::Relaxed)),
        }
    }

    fn counter(&self, phase: Phase) -> &AtomicU64 {
        match phase {
            Phase::Detect => &self.detect_nanos,
            Phase::Normalize => &self.normalize_nanos,
            Phase::Ocr => &self.ocr_nanos,
        }
    }
}

fn nanos_to_secs(nanos: u64) -> f64 {
    Duration::from_nanos(nanos).as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_accumulates_per_phase() {
        let stats = TimingStats::new();
        stats.record(Phase::Ocr, Duration::from_millis(1500));
        stats.record(Phase::Ocr, Duration::from_millis(500));
        stats.record(Phase::Detect, Duration::from_millis(250));

        let snapshot = stats.snapshot();
        assert!((snapshot.ocr_secs - 2.0).abs() < 1e-9);
        assert!((snapshot.detect_secs - 0.25).abs() < 1e-9);
        assert_eq!(snapshot.normalize_secs, 0.0);
        assert_eq!(snapshot.jobs, 0);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let stats = Arc::new(TimingStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.increment_jobs();
                        stats.record(Phase::Normalize, Duration::from_nanos(1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.jobs, 8000);
        assert!((snapshot.normalize_secs - 8000e-9).abs() < 1e-12);
    }
}

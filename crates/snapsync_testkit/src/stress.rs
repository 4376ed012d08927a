//! Concurrency stress helpers.
//!
//! These run the pipeline and the lock service from many OS threads at once
//! and report what happened; the caller decides what to assert.

use crate::fixtures::{entry, line, version, MemoryPipeline, LINES};
use crate::generators::VERSION_BASE;
use snapsync_core::{EntityStore, FieldValue, LockService, NaturalKey, SnapshotMessage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent threads.
    pub threads: usize,
    /// Number of distinct natural keys.
    pub keys: usize,
    /// Snapshots per key; every thread delivers all of them.
    pub versions_per_key: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            keys: 8,
            versions_per_key: 10,
        }
    }
}

/// Natural key used for stress entity `n`.
pub fn stress_key(n: usize) -> String {
    format!("S-{n}")
}

/// Snapshots for every key and version. Version `v` carries one line worth
/// `v`, so the committed total identifies the committed version.
pub fn stress_messages(config: &StressConfig) -> Vec<SnapshotMessage> {
    let mut messages = Vec::with_capacity(config.keys * config.versions_per_key);
    for key in 0..config.keys {
        for v in 1..=config.versions_per_key {
            let v = v as i64;
            messages.push(entry(&stress_key(key), VERSION_BASE + v).with_child(LINES, line(1, "CN", v)));
        }
    }
    messages
}

/// Every thread ingests every stress message, each in its own order.
pub fn stress_concurrent_ingest(pipeline: &MemoryPipeline, config: &StressConfig) -> StressTestResult {
    let messages = stress_messages(config);
    let start = Instant::now();

    let (successful, failed) = thread::scope(|scope| {
        let handles: Vec<_> = (0..config.threads)
            .map(|t| {
                let messages = &messages;
                scope.spawn(move || {
                    let mut order: Vec<&SnapshotMessage> = messages.iter().collect();
                    let n = order.len().max(1);
                    order.rotate_left((t * 7) % n);
                    if t % 2 == 1 {
                        order.reverse();
                    }
                    let mut ok = 0usize;
                    let mut failed = 0usize;
                    for message in order {
                        match pipeline.ingest(message) {
                            Ok(_) => ok += 1,
                            Err(_) => failed += 1,
                        }
                    }
                    (ok, failed)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().unwrap_or((0, messages.len())))
            .fold((0, 0), |acc, (ok, failed)| (acc.0 + ok, acc.1 + failed))
    });

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Checks that every stress key holds its newest version.
///
/// Returns a description of each key that does not.
pub fn latest_committed_mismatches(pipeline: &MemoryPipeline, config: &StressConfig) -> Vec<String> {
    let newest = config.versions_per_key as i64;
    let mut mismatches = Vec::new();
    for key in 0..config.keys {
        let natural_key = NaturalKey::new(stress_key(key));
        match pipeline.store().find_by_key(&natural_key) {
            Ok(Some(entity)) => {
                if entity.last_source_version != version(VERSION_BASE + newest) {
                    mismatches.push(format!(
                        "{natural_key}: committed {}",
                        entity.last_source_version
                    ));
                }
                if entity.derived("total_value") != Some(&FieldValue::Integer(newest)) {
                    mismatches.push(format!(
                        "{natural_key}: total {:?}",
                        entity.derived("total_value")
                    ));
                }
            }
            Ok(None) => mismatches.push(format!("{natural_key}: missing")),
            Err(e) => mismatches.push(format!("{natural_key}: {e}")),
        }
    }
    mismatches
}

/// Hammers one named lock from many threads and counts overlapping holders.
///
/// A failed operation is either an acquire error or an observed overlap.
pub fn stress_lock_exclusion(
    locks: &LockService,
    threads: usize,
    iterations: usize,
) -> StressTestResult {
    let inside = AtomicUsize::new(0);
    let start = Instant::now();

    let (successful, failed) = thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let inside = &inside;
                scope.spawn(move || {
                    let mut ok = 0usize;
                    let mut failed = 0usize;
                    for _ in 0..iterations {
                        let Ok(guard) = locks.acquire("stress") else {
                            failed += 1;
                            continue;
                        };
                        // Reentrant acquire must not block the holder.
                        let nested = locks.acquire("stress");
                        if inside.fetch_add(1, Ordering::SeqCst) == 0 && nested.is_ok() {
                            ok += 1;
                        } else {
                            failed += 1;
                        }
                        thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                        drop(nested);
                        drop(guard);
                    }
                    (ok, failed)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().unwrap_or((0, iterations)))
            .fold((0, 0), |acc, (ok, failed)| (acc.0 + ok, acc.1 + failed))
    });

    StressTestResult::new(successful, failed, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::memory_pipeline;
    use snapsync_core::LockConfig;

    #[test]
    fn concurrent_ingest_commits_newest() {
        let pipeline = memory_pipeline();
        let config = StressConfig {
            threads: 4,
            keys: 4,
            versions_per_key: 6,
        };

        let result = stress_concurrent_ingest(&pipeline, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.total_ops, 4 * 4 * 6);
        assert!(latest_committed_mismatches(&pipeline, &config).is_empty());
    }

    #[test]
    fn lock_is_exclusive() {
        let locks = LockService::new(LockConfig::default());
        let result = stress_lock_exclusion(&locks, 4, 200);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 800);
        assert_eq!(locks.held_count(), 0);
    }
}

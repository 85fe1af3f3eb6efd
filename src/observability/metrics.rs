//! Thread-safe per-sink counters
//!
//! Atomic counters for the connection and publish paths plus a bounded
//! window of publish latencies. Each sink owns its own [`SinkMetrics`];
//! there is no process-wide collector.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Number of publish latencies kept for percentile calculation
const LATENCY_WINDOW: usize = 1000;

/// Counters for one sink instance
#[derive(Debug, Default)]
pub struct SinkMetrics {
    // Connection metrics
    connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_lost: AtomicU64,
    connection_start_time: AtomicU64,

    // Publish metrics
    messages_published: AtomicU64,
    bytes_published: AtomicU64,
    invalid_qos: AtomicU64,
    invalid_topics: AtomicU64,
    oversized: AtomicU64,
    encoding_failures: AtomicU64,
    transport_failures: AtomicU64,
    rejected_not_connected: AtomicU64,

    publish_times: Mutex<Vec<u64>>, // in microseconds
}

impl SinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn message_published(&self, payload_len: usize, elapsed: Duration) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
        self.bytes_published
            .fetch_add(payload_len as u64, Ordering::Relaxed);
        self.record_publish_time(elapsed);
    }

    pub fn invalid_qos(&self) {
        self.invalid_qos.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invalid_topic(&self) {
        self.invalid_topics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn payload_too_large(&self) {
        self.oversized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn encoding_failed(&self) {
        self.encoding_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transport_failed(&self) {
        self.transport_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejected_not_connected(&self) {
        self.rejected_not_connected.fetch_add(1, Ordering::Relaxed);
    }

    fn record_publish_time(&self, elapsed: Duration) {
        if let Ok(mut times) = self.publish_times.lock() {
            times.push(elapsed.as_micros() as u64);

            if times.len() > LATENCY_WINDOW {
                times.remove(0);
            }
        }
    }

    /// Average, p50, p95 and p99 of the latency window in microseconds
    fn calculate_publish_time_statistics(&self) -> (f64, f64, f64, f64) {
        let Ok(times) = self.publish_times.lock() else {
            return (0.0, 0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }

        let mut sorted = times.clone();
        sorted.sort_unstable();
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;

        (
            avg,
            percentile(&sorted, 50.0),
            percentile(&sorted, 95.0),
            percentile(&sorted, 99.0),
        )
    }

    fn calculate_connection_duration(&self, now: u64) -> u64 {
        let start_time = self.connection_start_time.load(Ordering::Relaxed);
        if self.connected.load(Ordering::Relaxed) && start_time > 0 {
            now.saturating_sub(start_time)
        } else {
            0
        }
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> SinkMetricsSnapshot {
        let now = current_timestamp();
        let (avg, p50, p95, p99) = self.calculate_publish_time_statistics();

        SinkMetricsSnapshot {
            connection: ConnectionMetrics {
                connected: self.connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                connections_lost: self.connections_lost.load(Ordering::Relaxed),
                connection_duration_seconds: self.calculate_connection_duration(now),
            },
            publish: PublishMetrics {
                messages_published: self.messages_published.load(Ordering::Relaxed),
                bytes_published: self.bytes_published.load(Ordering::Relaxed),
                invalid_qos: self.invalid_qos.load(Ordering::Relaxed),
                invalid_topics: self.invalid_topics.load(Ordering::Relaxed),
                oversized: self.oversized.load(Ordering::Relaxed),
                encoding_failures: self.encoding_failures.load(Ordering::Relaxed),
                transport_failures: self.transport_failures.load(Ordering::Relaxed),
                rejected_not_connected: self.rejected_not_connected.load(Ordering::Relaxed),
                avg_publish_time_us: avg,
                publish_time_p50_us: p50,
                publish_time_p95_us: p95,
                publish_time_p99_us: p99,
            },
            timestamp: now,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SinkMetricsSnapshot {
    pub connection: ConnectionMetrics,
    pub publish: PublishMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connections_lost: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishMetrics {
    pub messages_published: u64,
    pub bytes_published: u64,
    pub invalid_qos: u64,
    pub invalid_topics: u64,
    /// Events whose packet would exceed the size limit
    pub oversized: u64,
    pub encoding_failures: u64,
    pub transport_failures: u64,
    pub rejected_not_connected: u64,
    pub avg_publish_time_us: f64,
    pub publish_time_p50_us: f64,
    pub publish_time_p95_us: f64,
    pub publish_time_p99_us: f64,
}

impl PublishMetrics {
    /// Events that reached the pipeline but were not sent
    pub fn dropped(&self) -> u64 {
        self.invalid_qos
            + self.invalid_topics
            + self.oversized
            + self.encoding_failures
            + self.transport_failures
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_value = sorted_data[index.floor() as usize] as f64;
        let upper_value = sorted_data[index.ceil() as usize] as f64;
        lower_value + (upper_value - lower_value) * index.fract()
    }
}

// Relay counters and latency tracking

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use llm_core::RelayEvent;

const MAX_LATENCY_SAMPLES: usize = 1000;

/// Rolling latency window with min/max/avg and percentiles.
#[derive(Debug, Clone)]
pub struct LatencyTracker {
    count: Arc<AtomicU64>,
    total_ms: Arc<AtomicU64>,
    min_ms: Arc<AtomicU64>,
    max_ms: Arc<AtomicU64>,
    samples: Arc<Mutex<VecDeque<u64>>>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self {
            count: Arc::new(AtomicU64::new(0)),
            total_ms: Arc::new(AtomicU64::new(0)),
            min_ms: Arc::new(AtomicU64::new(u64::MAX)),
            max_ms: Arc::new(AtomicU64::new(0)),
            samples: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_LATENCY_SAMPLES))),
        }
    }

    pub fn record(&self, latency_ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.min_ms.fetch_min(latency_ms, Ordering::Relaxed);
        self.max_ms.fetch_max(latency_ms, Ordering::Relaxed);

        if let Ok(mut samples) = self.samples.lock() {
            if samples.len() == MAX_LATENCY_SAMPLES {
                samples.pop_front();
            }
            samples.push_back(latency_ms);
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn avg_ms(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        self.total_ms.load(Ordering::Relaxed) as f64 / count as f64
    }

    pub fn min_ms(&self) -> u64 {
        match self.min_ms.load(Ordering::Relaxed) {
            u64::MAX => 0,
            v => v,
        }
    }

    pub fn max_ms(&self) -> u64 {
        self.max_ms.load(Ordering::Relaxed)
    }

    pub fn percentile(&self, p: u8) -> u64 {
        let Ok(samples) = self.samples.lock() else {
            return 0;
        };
        if samples.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let index = (sorted.len() * p as usize / 100).min(sorted.len() - 1);
        sorted[index]
    }

    pub fn stats(&self) -> LatencyStats {
        LatencyStats {
            samples: self.count(),
            avg_ms: self.avg_ms(),
            min_ms: self.min_ms(),
            max_ms: self.max_ms(),
            p50_ms: self.percentile(50),
            p95_ms: self.percentile(95),
            p99_ms: self.percentile(99),
        }
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters of the completion relay endpoint.
#[derive(Debug, Clone)]
pub struct RelayMetrics {
    pub streams_started: Arc<AtomicU64>,
    pub streams_completed: Arc<AtomicU64>,
    pub upstream_errors: Arc<AtomicU64>,
    pub rejected_requests: Arc<AtomicU64>,
    pub chunks_relayed: Arc<AtomicU64>,
    /// Time from request receipt to the first sentence chunk.
    pub first_chunk: LatencyTracker,
    /// Time from request receipt to the terminal event.
    pub stream_duration: LatencyTracker,
    started_at: Instant,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            streams_started: Arc::new(AtomicU64::new(0)),
            streams_completed: Arc::new(AtomicU64::new(0)),
            upstream_errors: Arc::new(AtomicU64::new(0)),
            rejected_requests: Arc::new(AtomicU64::new(0)),
            chunks_relayed: Arc::new(AtomicU64::new(0)),
            first_chunk: LatencyTracker::new(),
            stream_duration: LatencyTracker::new(),
            started_at: Instant::now(),
        }
    }

    pub fn record_rejected(&self) {
        self.rejected_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_started(&self) {
        self.streams_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Account for one event leaving the relay. `chunks_sent` counts chunks
    /// already sent on this stream, before `event`.
    pub fn observe(&self, event: &RelayEvent, received: Instant, chunks_sent: u64) {
        let elapsed_ms = received.elapsed().as_millis() as u64;
        match event {
            RelayEvent::Chunk(_) => {
                self.chunks_relayed.fetch_add(1, Ordering::Relaxed);
                if chunks_sent == 0 {
                    self.first_chunk.record(elapsed_ms);
                }
            }
            RelayEvent::Done => {
                self.streams_completed.fetch_add(1, Ordering::Relaxed);
                self.stream_duration.record(elapsed_ms);
            }
            RelayEvent::Error(_) => {
                self.upstream_errors.fetch_add(1, Ordering::Relaxed);
                self.stream_duration.record(elapsed_ms);
            }
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn snapshot(&self, system: SystemMetrics) -> MetricsResponse {
        MetricsResponse {
            timestamp: Utc::now(),
            system,
            relay: RelayStats {
                streams_started: self.streams_started.load(Ordering::Relaxed),
                streams_completed: self.streams_completed.load(Ordering::Relaxed),
                upstream_errors: self.upstream_errors.load(Ordering::Relaxed),
                rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
                chunks_relayed: self.chunks_relayed.load(Ordering::Relaxed),
                first_chunk_latency: self.first_chunk.stats(),
                stream_duration: self.stream_duration.stats(),
            },
        }
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    pub relay: RelayStats,
}

#[derive(Debug, Serialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub uptime_seconds: u64,
    pub system_load: Option<f64>,
}

impl SystemMetrics {
    pub fn collect(uptime_seconds: u64) -> Self {
        let mut system = sysinfo::System::new();
        system.refresh_cpu();
        system.refresh_memory();

        let system_load = {
            #[cfg(unix)]
            {
                std::fs::read_to_string("/proc/loadavg")
                    .ok()
                    .and_then(|l| l.split_whitespace().next().and_then(|s| s.parse::<f64>().ok()))
            }
            #[cfg(not(unix))]
            None
        };

        Self {
            cpu_usage_percent: system.global_cpu_info().cpu_usage(),
            memory_used_mb: system.used_memory() / 1024 / 1024,
            memory_total_mb: system.total_memory() / 1024 / 1024,
            uptime_seconds,
            system_load,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RelayStats {
    pub streams_started: u64,
    pub streams_completed: u64,
    pub upstream_errors: u64,
    pub rejected_requests: u64,
    pub chunks_relayed: u64,
    pub first_chunk_latency: LatencyStats,
    pub stream_duration: LatencyStats,
}

#[derive(Debug, Serialize)]
pub struct LatencyStats {
    pub samples: u64,
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_tracker() {
        let tracker = LatencyTracker::new();
        assert_eq!(tracker.min_ms(), 0);
        assert_eq!(tracker.percentile(50), 0);

        for ms in 1..=100 {
            tracker.record(ms);
        }
        assert_eq!(tracker.count(), 100);
        assert_eq!(tracker.min_ms(), 1);
        assert_eq!(tracker.max_ms(), 100);
        assert!((tracker.avg_ms() - 50.5).abs() < f64::EPSILON);
        assert_eq!(tracker.percentile(50), 51);
        assert_eq!(tracker.percentile(99), 100);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let tracker = LatencyTracker::new();
        for ms in 0..(MAX_LATENCY_SAMPLES as u64 + 10) {
            tracker.record(ms);
        }
        assert_eq!(tracker.samples.lock().unwrap().len(), MAX_LATENCY_SAMPLES);
        assert_eq!(tracker.samples.lock().unwrap().front(), Some(&10));
    }

    #[test]
    fn test_relay_metrics_observe() {
        let metrics = RelayMetrics::new();
        let received = Instant::now();
        metrics.record_started();
        metrics.observe(&RelayEvent::Chunk("One.".into()), received, 0);
        metrics.observe(&RelayEvent::Chunk("Two.".into()), received, 1);
        metrics.observe(&RelayEvent::Done, received, 2);

        assert_eq!(metrics.chunks_relayed.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.first_chunk.count(), 1);
        assert_eq!(metrics.streams_completed.load(Ordering::Relaxed), 1);

        metrics.observe(&RelayEvent::Error("upstream_status".into()), received, 0);
        assert_eq!(metrics.upstream_errors.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.stream_duration.count(), 2);
    }
}

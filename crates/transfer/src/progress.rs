use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default sliding window for throughput calculation.
const DEFAULT_WINDOW: Duration = Duration::from_secs(30);

/// Default retained sample count.
const DEFAULT_MAX_SAMPLES: usize = 64;

struct Sample {
    bytes: u64,
    at: Instant,
}

/// Transfer throughput over a sliding window of part completions.
///
/// The window is anchored at [`start`](Self::start) time until the first
/// samples age out, so a single part already yields a rate.
pub struct ThroughputMeter {
    started: Instant,
    samples: VecDeque<Sample>,
    window: Duration,
    max_samples: usize,
    total_bytes: u64,
    evicted: bool,
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::start(None, None)
    }
}

impl ThroughputMeter {
    /// Starts measuring now.
    ///
    /// - `window`: time window for the rate (default 30 s).
    /// - `max_samples`: maximum retained samples (default 64).
    pub fn start(window: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            started: Instant::now(),
            samples: VecDeque::new(),
            window: window.unwrap_or(DEFAULT_WINDOW),
            max_samples: max_samples.unwrap_or(DEFAULT_MAX_SAMPLES).max(1),
            total_bytes: 0,
            evicted: false,
        }
    }

    /// Records `bytes` completed at the current instant.
    pub fn record(&mut self, bytes: u64) {
        self.record_at(bytes, Instant::now());
    }

    fn record_at(&mut self, bytes: u64, at: Instant) {
        self.total_bytes += bytes;
        self.samples.push_back(Sample { bytes, at });

        while let Some(front) = self.samples.front() {
            let expired = at.duration_since(front.at) > self.window;
            if expired || self.samples.len() > self.max_samples {
                self.samples.pop_front();
                self.evicted = true;
            } else {
                break;
            }
        }
    }

    /// Bytes recorded since the meter started.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Time since the meter started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Average rate in bytes/second within the window. 0.0 without samples.
    pub fn bytes_per_second(&self) -> f64 {
        let Some(last) = self.samples.back() else {
            return 0.0;
        };
        // Until samples start expiring, measure from the start instant so
        // the first sample's bytes are counted against real elapsed time.
        let window_start = match self.samples.front() {
            Some(front) if self.evicted => front.at,
            _ => self.started,
        };
        let elapsed = last.at.duration_since(window_start);
        if elapsed.is_zero() {
            return 0.0;
        }
        let bytes: u64 = self.samples.iter().map(|s| s.bytes).sum();
        bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimates the time to move `remaining_bytes`. `None` while the rate is zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let rate = self.bytes_per_second();
        if rate <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / rate))
    }
}

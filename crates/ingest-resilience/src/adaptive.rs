//! Adaptive sizing, memory-pressure classification, and a perf monitor feeding the thread-pool
//! manager and batch scheduler's sizing decisions.
//!
//! Two independent clocks drive this module in production: sizing recommendations every ~30s,
//! memory-pressure samples every ~1s (see `Runtime` in the root crate for the scheduling loops;
//! this module only holds the pure computation, which is what's actually testable without a
//! timer).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use sysinfo::System;

/// `LOW / MEDIUM / HIGH / CRITICAL / EMERGENCY`, derived from a used/max ratio against a
/// configured threshold `T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    Low,
    Medium,
    High,
    Critical,
    Emergency,
}

impl MemoryPressure {
    pub fn classify(used: u64, max: u64, threshold: f64) -> Self {
        if max == 0 {
            return MemoryPressure::Low;
        }
        let ratio = used as f64 / max as f64;
        let t = threshold;
        if ratio >= t {
            MemoryPressure::Emergency
        } else if ratio >= 0.85 * t {
            MemoryPressure::Critical
        } else if ratio >= 0.7 * t {
            MemoryPressure::High
        } else if ratio >= 0.7 * t * 0.5 {
            MemoryPressure::Medium
        } else {
            MemoryPressure::Low
        }
    }

    pub fn should_trigger_cleanup(&self) -> bool {
        *self >= MemoryPressure::High
    }

    pub fn should_force_reclaim(&self) -> bool {
        *self >= MemoryPressure::Critical
    }
}

/// Samples process/system memory via `sysinfo` and classifies pressure against a configured
/// threshold `T`. Heap and off-heap are both represented by OS-reported used/total memory since
/// the target language has no separate managed heap.
pub struct MemoryMonitor {
    system: Mutex<System>,
    threshold: f64,
}

impl MemoryMonitor {
    pub fn new(threshold: f64) -> Self {
        Self {
            system: Mutex::new(System::new()),
            threshold,
        }
    }

    pub fn sample(&self) -> MemoryPressure {
        let mut system = self.system.lock().unwrap();
        system.refresh_memory();
        let used = system.used_memory();
        let max = system.total_memory();
        MemoryPressure::classify(used, max, self.threshold)
    }
}

/// What the sizing controller recommends for a pool's effective maximum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizeRecommendation {
    Increase(f64),
    Decrease(f64),
    Maintain,
}

/// Observed load feeding one sizing decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadSample {
    pub utilization: f64,
    pub failure_rate: f64,
    pub wait_time_micros: f64,
}

/// Tracks an exponentially-smoothed utilization plus consecutive-high/low streaks and turns a
/// stream of `LoadSample`s into `SizeRecommendation`s.
pub struct AdaptiveController {
    smoothed_utilization: Mutex<f64>,
    peak_utilization: Mutex<f64>,
    consecutive_high: AtomicU64,
    consecutive_low: AtomicU64,
}

impl AdaptiveController {
    pub fn new() -> Self {
        Self {
            smoothed_utilization: Mutex::new(0.0),
            peak_utilization: Mutex::new(0.0),
            consecutive_high: AtomicU64::new(0),
            consecutive_low: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, sample: LoadSample) -> SizeRecommendation {
        let smoothed = {
            let mut u = self.smoothed_utilization.lock().unwrap();
            *u = 0.8 * *u + 0.2 * sample.utilization;
            *u
        };
        {
            let mut peak = self.peak_utilization.lock().unwrap();
            if smoothed > *peak {
                *peak = smoothed;
            }
        }

        if smoothed > 0.8 || sample.failure_rate > 0.1 {
            self.consecutive_high.fetch_add(1, Ordering::SeqCst);
            self.consecutive_low.store(0, Ordering::SeqCst);
            let severe = sample.failure_rate > 0.3 || smoothed > 0.95;
            SizeRecommendation::Increase(if severe { 2.0 } else { 1.5 })
        } else if smoothed < 0.3 && sample.failure_rate < 0.01 && sample.wait_time_micros < 100.0 {
            let streak = self.consecutive_low.fetch_add(1, Ordering::SeqCst) + 1;
            self.consecutive_high.store(0, Ordering::SeqCst);
            let sustained = streak >= 3;
            SizeRecommendation::Decrease(if sustained { 0.6 } else { 0.8 })
        } else {
            self.consecutive_high.store(0, Ordering::SeqCst);
            self.consecutive_low.store(0, Ordering::SeqCst);
            SizeRecommendation::Maintain
        }
    }

    pub fn peak_utilization(&self) -> f64 {
        *self.peak_utilization.lock().unwrap()
    }
}

impl Default for AdaptiveController {
    fn default() -> Self {
        Self::new()
    }
}

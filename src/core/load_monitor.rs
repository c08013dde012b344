//! Debounced overload detection for the local queue.
//!
//! The monitor is fed periodic occupancy samples. A breach of the threshold
//! only counts as overload once it has lasted for the sustain window; a single
//! sample below the threshold ends it immediately.

use parking_lot::RwLock;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Outcome of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSignal {
    /// Below the threshold with no breach in progress.
    Normal,
    /// At or above the threshold, but not for long enough yet.
    Rising,
    /// The breach has lasted for the sustain window.
    Sustained,
    /// First sample back below the threshold after a breach.
    Recovered,
}

#[derive(Debug, Default)]
struct State {
    is_overloaded: bool,
    overload_start: Option<Instant>,
}

/// Point-in-time view for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MonitorSnapshot {
    pub is_overloaded: bool,
    pub in_breach: bool,
    pub breach_duration: Option<Duration>,
    pub threshold_ratio: f64,
}

#[derive(Debug)]
pub struct LoadMonitor {
    threshold_ratio: f64,
    check_interval: Duration,
    sustain: Duration,
    state: RwLock<State>,
}

impl LoadMonitor {
    pub fn new(threshold_ratio: f64, check_interval: Duration, sustain: Duration) -> Self {
        Self {
            threshold_ratio,
            check_interval,
            sustain,
            state: RwLock::new(State::default()),
        }
    }

    /// Occupancy at which a queue of `capacity` counts as breaching.
    pub fn threshold(&self, capacity: usize) -> usize {
        ((capacity as f64 * self.threshold_ratio) as usize).max(1)
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    pub fn threshold_ratio(&self) -> f64 {
        self.threshold_ratio
    }

    /// Feeds one occupancy sample taken at `now`.
    pub fn tick(&self, occupancy: usize, capacity: usize, now: Instant) -> LoadSignal {
        let threshold = self.threshold(capacity);
        let mut state = self.state.write();

        if occupancy >= threshold {
            let start = *state.overload_start.get_or_insert_with(|| {
                info!(occupancy, threshold, "queue load crossed threshold");
                now
            });
            if now.saturating_duration_since(start) >= self.sustain {
                if !state.is_overloaded {
                    state.is_overloaded = true;
                    info!(
                        occupancy,
                        sustained_ms = now.saturating_duration_since(start).as_millis() as u64,
                        "queue overload sustained"
                    );
                }
                LoadSignal::Sustained
            } else {
                debug!(occupancy, threshold, "queue above threshold; waiting out sustain window");
                LoadSignal::Rising
            }
        } else if let Some(start) = state.overload_start.take() {
            state.is_overloaded = false;
            info!(
                occupancy,
                breach_ms = now.saturating_duration_since(start).as_millis() as u64,
                "queue load recovered"
            );
            LoadSignal::Recovered
        } else {
            LoadSignal::Normal
        }
    }

    pub fn snapshot(&self, now: Instant) -> MonitorSnapshot {
        let state = self.state.read();
        MonitorSnapshot {
            is_overloaded: state.is_overloaded,
            in_breach: state.overload_start.is_some(),
            breach_duration: state
                .overload_start
                .map(|start| now.saturating_duration_since(start)),
            threshold_ratio: self.threshold_ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUSTAIN: Duration = Duration::from_secs(5);

    fn monitor() -> LoadMonitor {
        LoadMonitor::new(0.8, Duration::from_secs(1), SUSTAIN)
    }

    #[test]
    fn short_spike_never_becomes_overload() {
        let m = monitor();
        let t0 = Instant::now();
        assert_eq!(m.tick(90, 100, t0), LoadSignal::Rising);
        assert_eq!(m.tick(95, 100, t0 + Duration::from_secs(2)), LoadSignal::Rising);
        assert_eq!(m.tick(10, 100, t0 + Duration::from_secs(3)), LoadSignal::Recovered);
        assert!(!m.snapshot(t0).is_overloaded);
        assert_eq!(m.tick(10, 100, t0 + Duration::from_secs(4)), LoadSignal::Normal);
    }

    #[test]
    fn sustained_breach_is_declared_once_window_elapses() {
        let m = monitor();
        let t0 = Instant::now();
        for s in 0..5 {
            assert_eq!(m.tick(95, 100, t0 + Duration::from_secs(s)), LoadSignal::Rising);
        }
        assert_eq!(m.tick(95, 100, t0 + SUSTAIN), LoadSignal::Sustained);
        assert_eq!(m.tick(99, 100, t0 + Duration::from_secs(9)), LoadSignal::Sustained);

        let snap = m.snapshot(t0 + Duration::from_secs(9));
        assert!(snap.is_overloaded);
        assert_eq!(snap.breach_duration, Some(Duration::from_secs(9)));
    }

    #[test]
    fn one_sample_below_threshold_recovers() {
        let m = monitor();
        let t0 = Instant::now();
        m.tick(80, 100, t0);
        m.tick(80, 100, t0 + Duration::from_secs(6));
        assert_eq!(m.tick(79, 100, t0 + Duration::from_secs(7)), LoadSignal::Recovered);
        let snap = m.snapshot(t0 + Duration::from_secs(7));
        assert!(!snap.is_overloaded);
        assert!(!snap.in_breach);
    }

    #[test]
    fn threshold_is_floor_of_ratio() {
        let m = monitor();
        assert_eq!(m.threshold(100), 80);
        assert_eq!(m.threshold(10_000), 8000);
        assert_eq!(m.threshold(1), 1);
    }
}

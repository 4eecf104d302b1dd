//! Statistics and metrics for provider sessions

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Rolling message counter over a trailing window
#[derive(Debug, Clone)]
pub struct RateWindow {
    window: Duration,
    arrivals: VecDeque<Instant>,
}

impl RateWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            arrivals: VecDeque::new(),
        }
    }

    /// Record one message arriving at `now`
    pub fn record(&mut self, now: Instant) {
        self.arrivals.push_back(now);
        self.evict(now);
    }

    /// Messages per second over the window ending at `now`.
    ///
    /// Falls to zero once the window passes without arrivals.
    pub fn rate(&mut self, now: Instant) -> f64 {
        self.evict(now);
        let secs = self.window.as_secs_f64();
        if secs > 0.0 {
            self.arrivals.len() as f64 / secs
        } else {
            0.0
        }
    }

    pub fn reset(&mut self) {
        self.arrivals.clear();
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&oldest) = self.arrivals.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.arrivals.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Counters kept by a provider session
#[derive(Debug, Clone)]
pub struct SessionCounters {
    /// Rows received during snapshot phases, all cycles
    pub snapshot_rows: u64,
    /// Rows received during real-time phases, all cycles
    pub realtime_rows: u64,
    /// Frame bytes received
    pub bytes_received: u64,
    /// Frames received (any classification)
    pub messages_received: u64,
    /// Successful transport connects (including reconnects)
    pub connects: u64,
    /// Transport disconnects and errors
    pub disconnects: u64,
    /// Rows in the current snapshot cycle
    pub cycle_snapshot_rows: u64,
    /// Real-time updates in the current cycle
    pub cycle_updates: u64,
    /// Duration of the last completed snapshot
    pub last_snapshot_duration: Option<Duration>,
    rate: RateWindow,
}

impl SessionCounters {
    pub fn new(rate_window: Duration) -> Self {
        Self {
            snapshot_rows: 0,
            realtime_rows: 0,
            bytes_received: 0,
            messages_received: 0,
            connects: 0,
            disconnects: 0,
            cycle_snapshot_rows: 0,
            cycle_updates: 0,
            last_snapshot_duration: None,
            rate: RateWindow::new(rate_window),
        }
    }

    /// Record an inbound frame of `bytes` bytes
    pub fn on_message(&mut self, bytes: usize, now: Instant) {
        self.messages_received += 1;
        self.bytes_received += bytes as u64;
        self.rate.record(now);
    }

    pub fn on_snapshot_rows(&mut self, rows: usize) {
        self.snapshot_rows += rows as u64;
        self.cycle_snapshot_rows += rows as u64;
    }

    pub fn on_realtime_rows(&mut self, rows: usize) {
        self.realtime_rows += rows as u64;
        self.cycle_updates += rows as u64;
    }

    /// Reset per-cycle counters at the start of a snapshot
    pub fn start_cycle(&mut self) {
        self.cycle_snapshot_rows = 0;
        self.cycle_updates = 0;
        self.rate.reset();
    }

    /// Build a serializable view at `now`
    pub fn snapshot(&mut self, now: Instant, cached_rows: usize) -> SessionStatistics {
        SessionStatistics {
            snapshot_rows: self.snapshot_rows,
            realtime_rows: self.realtime_rows,
            bytes_received: self.bytes_received,
            messages_received: self.messages_received,
            messages_per_second: self.rate.rate(now),
            connects: self.connects,
            disconnects: self.disconnects,
            cycle_snapshot_rows: self.cycle_snapshot_rows,
            cycle_updates: self.cycle_updates,
            cached_rows: cached_rows as u64,
            last_snapshot_ms: self.last_snapshot_duration.map(|d| d.as_millis() as u64),
        }
    }
}

/// Statistics pushed in `status` events and returned by `get-statistics`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatistics {
    pub snapshot_rows: u64,
    pub realtime_rows: u64,
    pub bytes_received: u64,
    pub messages_received: u64,
    pub messages_per_second: f64,
    pub connects: u64,
    pub disconnects: u64,
    pub cycle_snapshot_rows: u64,
    pub cycle_updates: u64,
    pub cached_rows: u64,
    pub last_snapshot_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_counts_trailing_window() {
        let start = Instant::now();
        let mut window = RateWindow::new(Duration::from_secs(1));

        for i in 0..5 {
            window.record(start + Duration::from_millis(i * 100));
        }

        assert_eq!(window.rate(start + Duration::from_millis(500)), 5.0);
        // First two arrivals (t=0, t=100ms) fall out of the window
        assert_eq!(window.rate(start + Duration::from_millis(1150)), 3.0);
    }

    #[test]
    fn test_rate_decays_to_zero() {
        let start = Instant::now();
        let mut window = RateWindow::new(Duration::from_secs(1));
        window.record(start);
        window.record(start);

        assert_eq!(window.rate(start + Duration::from_secs(2)), 0.0);
    }

    #[test]
    fn test_counters_cycle_reset() {
        let now = Instant::now();
        let mut counters = SessionCounters::new(Duration::from_secs(1));

        counters.on_message(10, now);
        counters.on_snapshot_rows(3);
        counters.on_realtime_rows(2);
        counters.start_cycle();
        counters.on_snapshot_rows(1);

        let stats = counters.snapshot(now, 4);
        assert_eq!(stats.snapshot_rows, 4);
        assert_eq!(stats.realtime_rows, 2);
        assert_eq!(stats.cycle_snapshot_rows, 1);
        assert_eq!(stats.cycle_updates, 0);
        assert_eq!(stats.bytes_received, 10);
        assert_eq!(stats.cached_rows, 4);
        assert_eq!(stats.messages_per_second, 0.0);
    }

    #[test]
    fn test_statistics_serialize_camel_case() {
        let mut counters = SessionCounters::new(Duration::from_secs(1));
        let json = serde_json::to_value(counters.snapshot(Instant::now(), 0)).unwrap();

        assert!(json.get("snapshotRows").is_some());
        assert!(json.get("messagesPerSecond").is_some());
        assert!(json.get("lastSnapshotMs").is_some());
    }
}

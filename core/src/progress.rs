//! Throughput and ETA derived from completion counts.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub completed: u64,
    pub total: u64,
    pub found: u64,
    pub elapsed: Duration,
}

impl Snapshot {
    /// Completions per second.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.completed as f64 / secs
    }

    /// Time left at the current rate; `None` until there is a rate.
    pub fn eta(&self) -> Option<Duration> {
        let rate = self.rate();
        if rate <= 0.0 {
            return None;
        }
        let left = self.total.saturating_sub(self.completed) as f64;
        Some(Duration::from_secs_f64(left / rate))
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.completed as f64 * 100.0 / self.total as f64
    }

    pub fn is_finished(&self) -> bool {
        self.completed >= self.total
    }
}

/// Counts completions and decides when a progress line is due.
#[derive(Debug)]
pub struct ProgressTracker {
    completed: u64,
    total: u64,
    found: u64,
    started: Instant,
    every: Duration,
    last_emit: Option<Instant>,
}

impl ProgressTracker {
    /// `completed` and `found` start at what the checkpoint already covers.
    pub fn new(total: u64, completed: u64, found: u64, every: Duration) -> Self {
        ProgressTracker { completed, total, found, started: Instant::now(), every, last_emit: None }
    }

    /// Record one completion. Returns a snapshot when one should be shown.
    pub fn advance(&mut self, found: bool) -> Option<Snapshot> {
        self.completed += 1;
        if found {
            self.found += 1;
        }
        let now = Instant::now();
        let due = match self.last_emit {
            None => true,
            Some(t) => now.duration_since(t) >= self.every,
        };
        let snap = self.snapshot_at(now);
        if due || snap.is_finished() {
            self.last_emit = Some(now);
            Some(snap)
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_at(Instant::now())
    }

    fn snapshot_at(&self, now: Instant) -> Snapshot {
        Snapshot {
            completed: self.completed,
            total: self.total,
            found: self.found,
            elapsed: now.duration_since(self.started),
        }
    }
}

/// `1h02m03s` style rendering for log lines.
pub fn format_eta(eta: Option<Duration>) -> String {
    match eta {
        None => "unknown".to_string(),
        Some(d) => {
            let s = d.as_secs();
            if s >= 3600 {
                format!("{}h{:02}m{:02}s", s / 3600, (s % 3600) / 60, s % 60)
            } else if s >= 60 {
                format!("{}m{:02}s", s / 60, s % 60)
            } else {
                format!("{}s", s)
            }
        }
    }
}

//! Per-run counters for the position handler.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct LoggerStats {
    packets: AtomicU64,
    recorded: AtomicU64,
    no_position: AtomicU64,
    no_fix: AtomicU64,
    persist_failures: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets: u64,
    pub recorded: u64,
    pub no_position: u64,
    pub no_fix: u64,
    pub persist_failures: u64,
}

impl LoggerStats {
    pub fn inc_packets(&self) {
        self.packets.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_recorded(&self) {
        self.recorded.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_no_position(&self) {
        self.no_position.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_no_fix(&self) {
        self.no_fix.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_persist_failures(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets: self.packets.load(Ordering::Relaxed),
            recorded: self.recorded.load(Ordering::Relaxed),
            no_position: self.no_position.load(Ordering::Relaxed),
            no_fix: self.no_fix.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "packets={} recorded={} no_position={} no_fix={} persist_failures={}",
            self.packets, self.recorded, self.no_position, self.no_fix, self.persist_failures
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let stats = LoggerStats::default();
        stats.inc_packets();
        stats.inc_packets();
        stats.inc_recorded();
        stats.inc_no_fix();
        let snap = stats.snapshot();
        assert_eq!(snap.packets, 2);
        assert_eq!(snap.recorded, 1);
        assert_eq!(snap.no_fix, 1);
        assert_eq!(snap.no_position, 0);
        assert_eq!(
            snap.to_string(),
            "packets=2 recorded=1 no_position=0 no_fix=1 persist_failures=0"
        );
    }
}

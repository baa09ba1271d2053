//! Process-wide counters exposed over `/metrics`: one `AtomicU64` per
//! counted event, `Ordering::Relaxed` throughout since these are stats,
//! not synchronization.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    pub frames_accepted: AtomicU64,
    pub frames_rejected: AtomicU64,
    pub records_parsed: AtomicU64,
    pub sightings_matched: AtomicU64,
    pub sightings_unmatched: AtomicU64,
    pub pairing_matured: AtomicU64,
    pub webhook_ingested: AtomicU64,
    pub persist_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_accumulate() {
        let m = Metrics::new();
        assert_eq!(Metrics::get(&m.frames_accepted), 0);
        Metrics::inc(&m.frames_accepted);
        Metrics::add(&m.frames_accepted, 2);
        assert_eq!(Metrics::get(&m.frames_accepted), 3);
    }
}

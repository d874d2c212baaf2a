//! Universe coverage tracking
//!
//! Counts distinct universe tokens seen on the feed and reports progress
//! every `progress_every` new tokens. Once every token has been seen the
//! tracker logs completion and starts counting again.

use std::collections::HashSet;

use tracing::info;

/// Default progress reporting step.
pub const PROGRESS_EVERY: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageEvent {
    Progress { seen: usize, universe: usize },
    Complete { universe: usize },
}

#[derive(Debug)]
pub struct CoverageTracker {
    universe: HashSet<u32>,
    seen: HashSet<u32>,
    progress_every: usize,
    cycles: u64,
}

impl CoverageTracker {
    pub fn new(universe: impl IntoIterator<Item = u32>, progress_every: usize) -> Self {
        Self {
            universe: universe.into_iter().collect(),
            seen: HashSet::new(),
            progress_every: progress_every.max(1),
            cycles: 0,
        }
    }

    /// Record a tick for `token`.
    pub fn observe(&mut self, token: u32) -> Option<CoverageEvent> {
        if !self.universe.contains(&token) || !self.seen.insert(token) {
            return None;
        }

        let seen = self.seen.len();
        let universe = self.universe.len();
        if seen == universe {
            self.cycles += 1;
            info!(universe, cycle = self.cycles, "Every universe token has ticked");
            self.seen.clear();
            return Some(CoverageEvent::Complete { universe });
        }
        if seen % self.progress_every == 0 {
            info!(
                seen,
                universe,
                percent = format!("{:.2}", seen as f64 / universe as f64 * 100.0),
                "Universe coverage progress"
            );
            return Some(CoverageEvent::Progress { seen, universe });
        }
        None
    }

    pub fn seen(&self) -> usize {
        self.seen.len()
    }

    /// Completed coverage cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

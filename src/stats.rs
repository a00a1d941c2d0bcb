//! Run statistics.

use std::fmt;

/// Counters accumulated over one analysis run.
#[derive(Clone, Debug, Default)]
pub struct Stats {
    /// Transfer-function invocations (both phases).
    pub transfer_invocations: u64,
    /// Facts created where none existed before.
    pub new_facts: u64,
    /// Facts that changed across a solver scope.
    pub changed_facts: u64,
    /// Load-forwarding attempts, and how many replayed a cache.
    pub lfa_attempts: u64,
    pub lfa_cache_hits: u64,
    /// Inline contexts and peel attempts created.
    pub contexts_created: u64,
    /// Total peel iterations explored.
    pub peel_iterations: u64,
}

impl Stats {
    pub fn add(&mut self, other: &Stats) {
        self.transfer_invocations += other.transfer_invocations;
        self.new_facts += other.new_facts;
        self.changed_facts += other.changed_facts;
        self.lfa_attempts += other.lfa_attempts;
        self.lfa_cache_hits += other.lfa_cache_hits;
        self.contexts_created += other.contexts_created;
        self.peel_iterations += other.peel_iterations;
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "facts: {} new, {} changed ({} transfer evaluations)",
            self.new_facts, self.changed_facts, self.transfer_invocations
        )?;
        writeln!(
            f,
            "load forwarding: {} attempts, {} cache replays",
            self.lfa_attempts, self.lfa_cache_hits
        )?;
        write!(
            f,
            "speculation: {} contexts, {} peel iterations",
            self.contexts_created, self.peel_iterations
        )
    }
}

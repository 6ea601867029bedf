//! Filters the full target sequence against a snapshot of processed identities.

use crate::Target;
use std::collections::BTreeSet;

/// Ordered source of targets not yet attempted.
pub struct WorkQueue<I> {
    source: I,
    processed: BTreeSet<String>,
    total: u64,
    already_done: u64,
}

impl<I> WorkQueue<I>
where
    I: Iterator<Item = Target> + Clone,
{
    /// `total` is the unfiltered cardinality of `source`.
    pub fn new(source: I, total: u64, processed: BTreeSet<String>) -> Self {
        let already_done = if processed.is_empty() {
            0
        } else {
            source.clone().filter(|t| processed.contains(&t.identity())).count() as u64
        };
        WorkQueue { source, processed, total, already_done }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Targets in the source that the snapshot already covers.
    pub fn already_done(&self) -> u64 {
        self.already_done
    }

    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.already_done)
    }
}

impl<I> Iterator for WorkQueue<I>
where
    I: Iterator<Item = Target>,
{
    type Item = Target;

    fn next(&mut self) -> Option<Target> {
        let processed = &self.processed;
        self.source.by_ref().find(|t| !processed.contains(&t.identity()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::{expand, AddressRange};

    fn targets() -> Vec<Target> {
        let ranges = vec![AddressRange::parse("10.0.0.0", "10.0.0.7").unwrap()];
        expand(&ranges).map(Target::host).collect()
    }

    #[test]
    fn yields_exact_complement_in_order() {
        let all = targets();
        let processed: BTreeSet<String> = ["10.0.0.1", "10.0.0.4", "10.0.0.5"].iter().map(|s| s.to_string()).collect();
        let q = WorkQueue::new(all.clone().into_iter(), all.len() as u64, processed.clone());
        assert_eq!(q.already_done(), 3);
        assert_eq!(q.remaining(), 5);
        let left: Vec<Target> = q.collect();
        let expected: Vec<Target> = all.into_iter().filter(|t| !processed.contains(&t.identity())).collect();
        assert_eq!(left, expected);
    }

    #[test]
    fn foreign_identities_do_not_count() {
        let all = targets();
        let processed: BTreeSet<String> = ["192.168.1.1".to_string()].into_iter().collect();
        let q = WorkQueue::new(all.clone().into_iter(), all.len() as u64, processed);
        assert_eq!(q.already_done(), 0);
        assert_eq!(q.count(), 8);
    }

    #[test]
    fn fully_processed_is_empty() {
        let all = targets();
        let processed: BTreeSet<String> = all.iter().map(Target::identity).collect();
        let mut q = WorkQueue::new(all.clone().into_iter(), all.len() as u64, processed);
        assert_eq!(q.remaining(), 0);
        assert!(q.next().is_none());
    }
}

//! Per-worker check of the acquisition order, evaluated as events happen.

use crate::types::ResourceId;

/// Running audit of one worker's acquire/release stream.
///
/// Ids must be taken in strictly increasing order and released in reverse
/// order of taking, and a unit may only be counted while holding. Memory stays
/// bounded by the number of resources a worker can hold at once.
#[derive(Debug, Default)]
pub struct OrderAudit {
    held: Vec<ResourceId>,
    last_unit: u64,
    violations: u64,
}

impl OrderAudit {
    pub fn acquired(&mut self, resource: ResourceId) {
        if self.held.last().is_some_and(|&top| resource <= top) {
            self.violations += 1;
        }
        self.held.push(resource);
    }

    pub fn released(&mut self, resource: ResourceId) {
        if self.held.pop() != Some(resource) {
            self.violations += 1;
        }
    }

    /// `unit` is the worker's new total after counting.
    pub fn completed(&mut self, unit: u64) {
        if self.held.is_empty() || unit != self.last_unit + 1 {
            self.violations += 1;
        }
        self.last_unit = unit;
    }

    /// Rule breaks so far, counting anything still held as one more.
    pub fn violations(&self) -> u64 {
        self.violations + u64::from(!self.held.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle(audit: &mut OrderAudit, first: ResourceId, second: ResourceId, unit: u64) {
        audit.acquired(first);
        audit.acquired(second);
        audit.completed(unit);
        audit.released(second);
        audit.released(first);
    }

    #[test]
    fn accepts_well_ordered_cycles() {
        let mut audit = OrderAudit::default();
        for unit in 1..=50 {
            cycle(&mut audit, 0, 4, unit);
        }
        assert_eq!(audit.violations(), 0);
        assert!(audit.held.capacity() <= 4);
    }

    #[test]
    fn cancelled_partial_cycle_is_fine() {
        let mut audit = OrderAudit::default();
        audit.acquired(1);
        audit.released(1);
        assert_eq!(audit.violations(), 0);
    }

    #[test]
    fn flags_higher_id_taken_first() {
        let mut audit = OrderAudit::default();
        cycle(&mut audit, 4, 0, 1);
        assert_eq!(audit.violations(), 1);
    }

    #[test]
    fn flags_release_out_of_order() {
        let mut audit = OrderAudit::default();
        audit.acquired(0);
        audit.acquired(1);
        audit.completed(1);
        audit.released(0);
        audit.released(1);
        assert_eq!(audit.violations(), 2);
    }

    #[test]
    fn flags_unit_counted_without_holding() {
        let mut audit = OrderAudit::default();
        audit.completed(1);
        assert_eq!(audit.violations(), 1);
    }

    #[test]
    fn flags_resource_still_held() {
        let mut audit = OrderAudit::default();
        audit.acquired(2);
        assert_eq!(audit.violations(), 1);
    }

    #[test]
    fn flags_skipped_unit_number() {
        let mut audit = OrderAudit::default();
        cycle(&mut audit, 2, 3, 1);
        cycle(&mut audit, 2, 3, 3);
        assert_eq!(audit.violations(), 1);
    }
}

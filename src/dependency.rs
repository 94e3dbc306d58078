//! DependencyTracker: observed terminal phase of each prerequisite, failure
//! propagation, and submission-time cycle rejection (§4.5, §9).

use std::collections::{HashMap, HashSet};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::{Result, SchedulerError};
use crate::types::{Phase, WorkloadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedPhase {
    Unobserved,
    Terminal(Phase),
}

/// Tracks, per dependent workload, the last observed terminal phase of each
/// of its prerequisites, and maintains the dependency graph used for
/// submission-time cycle rejection.
#[derive(Default)]
pub struct DependencyTracker {
    /// dependent -> prerequisite -> observed phase
    observed: HashMap<WorkloadId, HashMap<WorkloadId, ObservedPhase>>,
    graph: DiGraph<WorkloadId, ()>,
    index_of: HashMap<WorkloadId, NodeIndex>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `dependent`'s dependency list. Rejects the whole
    /// registration — no partial edges are recorded — if any edge would
    /// close a cycle (§4.5, §9: DFS/cycle check at submission time).
    pub fn register(
        &mut self,
        dependent: WorkloadId,
        prerequisites: &[WorkloadId],
    ) -> Result<()> {
        // Build candidate edges against a scratch copy so a rejected
        // registration never mutates the real graph.
        let mut scratch = self.graph.clone();
        let mut scratch_index = self.index_of.clone();
        let ensure = |g: &mut DiGraph<WorkloadId, ()>,
                          idx: &mut HashMap<WorkloadId, NodeIndex>,
                          id: WorkloadId| {
            *idx.entry(id).or_insert_with(|| g.add_node(id))
        };

        let dep_idx = ensure(&mut scratch, &mut scratch_index, dependent);
        for prereq in prerequisites {
            let prereq_idx = ensure(&mut scratch, &mut scratch_index, *prereq);
            scratch.add_edge(dep_idx, prereq_idx, ());
        }

        if is_cyclic_directed(&scratch) {
            return Err(SchedulerError::CycleRejected {
                path: format!("{:?} -> {:?}", dependent.0, prerequisites),
            });
        }

        self.graph = scratch;
        self.index_of = scratch_index;

        let entry = self.observed.entry(dependent).or_default();
        for prereq in prerequisites {
            entry.entry(*prereq).or_insert(ObservedPhase::Unobserved);
        }
        Ok(())
    }

    /// Called when `prerequisite` reaches a terminal phase. Updates every
    /// registered dependent's recorded observation for it. Returns the set
    /// of dependents that must transition to `Failed` as a result (the
    /// prerequisite's terminal phase was not `Succeeded`), eagerly and
    /// transitively: a dependent failed here is itself a terminal
    /// transition the caller should feed back in.
    pub fn observe_terminal(
        &mut self,
        prerequisite: WorkloadId,
        terminal_phase: Phase,
    ) -> Vec<(WorkloadId, String)> {
        debug_assert!(terminal_phase.is_terminal());
        let mut newly_failed = Vec::new();

        for (dependent, prereqs) in self.observed.iter_mut() {
            if let Some(slot) = prereqs.get_mut(&prerequisite) {
                // Monotone: once set to a terminal phase it never changes
                // (§5 concurrency note — safe under concurrent delivery).
                if matches!(slot, ObservedPhase::Terminal(_)) {
                    continue;
                }
                *slot = ObservedPhase::Terminal(terminal_phase);
                if terminal_phase != Phase::Succeeded {
                    newly_failed.push((*dependent, format!("{:?}", prerequisite.0)));
                }
            }
        }

        newly_failed
    }

    /// True iff every prerequisite of `dependent` has been observed
    /// `Succeeded`. A dependent with no registered prerequisites is
    /// trivially ready.
    pub fn is_ready(&self, dependent: WorkloadId) -> bool {
        match self.observed.get(&dependent) {
            None => true,
            Some(prereqs) => prereqs
                .values()
                .all(|phase| matches!(phase, ObservedPhase::Terminal(Phase::Succeeded))),
        }
    }

    /// The prerequisite ids still outstanding (not yet observed `Succeeded`)
    /// for `dependent`.
    pub fn outstanding(&self, dependent: WorkloadId) -> Vec<WorkloadId> {
        match self.observed.get(&dependent) {
            None => vec![],
            Some(prereqs) => prereqs
                .iter()
                .filter(|(_, phase)| !matches!(phase, ObservedPhase::Terminal(Phase::Succeeded)))
                .map(|(id, _)| *id)
                .collect(),
        }
    }

    /// All prerequisite ids a dependent has never had registered as known
    /// workloads — used by the Admitter to fail a workload referencing a
    /// missing prerequisite (§4.5 mis-configured reference).
    pub fn missing_prerequisites(
        &self,
        dependent: WorkloadId,
        known_ids: &HashSet<WorkloadId>,
    ) -> Vec<WorkloadId> {
        match self.observed.get(&dependent) {
            None => vec![],
            Some(prereqs) => prereqs
                .keys()
                .filter(|id| !known_ids.contains(id))
                .copied()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn id() -> WorkloadId {
        WorkloadId(Uuid::new_v4())
    }

    #[test]
    fn ready_with_no_dependencies() {
        let tracker = DependencyTracker::new();
        assert!(tracker.is_ready(id()));
    }

    #[test]
    fn not_ready_until_all_prerequisites_succeed() {
        let mut tracker = DependencyTracker::new();
        let dependent = id();
        let p1 = id();
        let p2 = id();
        tracker.register(dependent, &[p1, p2]).unwrap();
        assert!(!tracker.is_ready(dependent));

        tracker.observe_terminal(p1, Phase::Succeeded);
        assert!(!tracker.is_ready(dependent));

        tracker.observe_terminal(p2, Phase::Succeeded);
        assert!(tracker.is_ready(dependent));
    }

    #[test]
    fn failed_prerequisite_propagates_failure() {
        let mut tracker = DependencyTracker::new();
        let dependent = id();
        let prereq = id();
        tracker.register(dependent, &[prereq]).unwrap();

        let failed = tracker.observe_terminal(prereq, Phase::Failed);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, dependent);
    }

    #[test]
    fn transitive_failure_propagation() {
        let mut tracker = DependencyTracker::new();
        let a = id();
        let b = id();
        let c = id();
        tracker.register(b, &[a]).unwrap();
        tracker.register(c, &[b]).unwrap();

        tracker.observe_terminal(a, Phase::Failed);
        let b_failed = tracker.observe_terminal(b, Phase::Failed);
        assert_eq!(b_failed[0].0, c);
    }

    #[test]
    fn cycle_is_rejected() {
        let mut tracker = DependencyTracker::new();
        let a = id();
        let b = id();
        tracker.register(a, &[b]).unwrap();
        let result = tracker.register(b, &[a]);
        assert!(result.is_err());
    }

    #[test]
    fn self_cycle_is_rejected() {
        let mut tracker = DependencyTracker::new();
        let a = id();
        assert!(tracker.register(a, &[a]).is_err());
    }

    #[test]
    fn observation_is_monotone_under_repeat_delivery() {
        let mut tracker = DependencyTracker::new();
        let dependent = id();
        let prereq = id();
        tracker.register(dependent, &[prereq]).unwrap();

        tracker.observe_terminal(prereq, Phase::Succeeded);
        // A stray re-delivery of the same terminal event must not flip it.
        let again = tracker.observe_terminal(prereq, Phase::Failed);
        assert!(again.is_empty());
        assert!(tracker.is_ready(dependent));
    }
}

//! PreemptionPlanner: selects a minimum lower-priority victim set able to
//! free enough resource for the requester (§4.6).

use crate::resource::ResourceList;
use crate::types::{NodeFlavor, Workload};

/// The GPU weight in the preemption score is a named, overridable constant
/// (§4.6, §9) rather than a literal baked into the scorer.
pub const DEFAULT_GPU_PREEMPTION_WEIGHT: i64 = 10;

fn score(candidate: &Workload, flavor: &NodeFlavor, gpu_weight: i64, gpu_vendor_key: &str) -> i64 {
    let request = candidate.request.aggregate();
    let gpu = request.gpu_count(gpu_vendor_key);
    let memory_component = if flavor.memory_kib > 0 {
        request.memory_kib() / flavor.memory_kib
    } else {
        0
    };
    let cpu_component = if flavor.cpu_millicores > 0 {
        request.cpu_millicores() / flavor.cpu_millicores
    } else {
        0
    };
    gpu_weight * gpu + memory_component + cpu_component
}

/// Selects the minimum-cost victim set sufficient to cover `requester`'s
/// request, or an empty vector if no feasible set exists. `left_over` is
/// the aggregate quota currently available before preempting anyone.
pub fn plan<'a>(
    requester: &Workload,
    running: &[&'a Workload],
    left_over: &ResourceList,
    flavor: &NodeFlavor,
    gpu_vendor_key: &str,
    gpu_weight: i64,
) -> Vec<&'a Workload> {
    if !requester.enable_preempt {
        return Vec::new();
    }

    // 1. filter: strictly lower priority, not already being preempted.
    let mut candidates: Vec<&Workload> = running
        .iter()
        .copied()
        .filter(|w| w.priority < requester.priority && !w.being_preempted)
        .collect();

    // 3. sort ascending priority, descending score, descending creation
    //    time (newest first), then by name.
    candidates.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| {
                let sa = score(a, flavor, gpu_weight, gpu_vendor_key);
                let sb = score(b, flavor, gpu_weight, gpu_vendor_key);
                sb.cmp(&sa)
            })
            .then_with(|| b.creation_time.cmp(&a.creation_time))
            .then_with(|| a.name.cmp(&b.name))
    });

    // 4. walk, accumulating until the requester's request is covered.
    let requester_request = requester.request.aggregate();
    let mut accumulator = left_over.clone();
    let mut victims = Vec::new();

    if requester_request.contains_within(&accumulator).0 {
        // Already fits without preempting anyone; nothing to do.
        return Vec::new();
    }

    for candidate in candidates {
        if candidate.priority >= requester.priority {
            // Walk hit a non-lower-priority candidate: preemption impossible.
            return Vec::new();
        }
        accumulator = accumulator.add(&candidate.request.aggregate());
        victims.push(candidate);
        if requester_request.contains_within(&accumulator).0 {
            return victims;
        }
    }

    // Walked every lower-priority candidate and still short.
    Vec::new()
}

/// Lighter per-node check (§4.6): true iff at least one same-workspace
/// victim of strictly lower priority occupies a node the requester could
/// otherwise use. The actual victim selection is left to a later tick once
/// the aggregate path has made room.
pub fn is_preemptable(requester: &Workload, candidates_on_node: &[&Workload]) -> bool {
    requester.enable_preempt
        && candidates_on_node
            .iter()
            .any(|w| w.priority < requester.priority && !w.being_preempted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{count, gpu_key};
    use crate::types::{
        ClusterId, NodeFlavorId, Phase, ResourceRequest, WorkloadId, WorkspaceId,
    };
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn flavor() -> NodeFlavor {
        NodeFlavor {
            id: NodeFlavorId(Uuid::new_v4()),
            cpu_millicores: 8000,
            memory_kib: 16 * 1024 * 1024,
            gpu_count: 8,
        }
    }

    fn workload(name: &str, priority: u32, gpus: i64, age_secs: i64, preempt: bool) -> Workload {
        Workload {
            id: WorkloadId(Uuid::new_v4()),
            workspace_id: WorkspaceId(Uuid::new_v4()),
            cluster_id: ClusterId(Uuid::new_v4()),
            name: name.to_string(),
            priority,
            request: ResourceRequest {
                per_replica: ResourceList::new().with(gpu_key("nvidia.com"), count(gpus)),
                replicas: 1,
            },
            suspended: false,
            tolerate_unhealthy_nodes: false,
            enable_preempt: preempt,
            dependencies: vec![],
            cron_entries: vec![],
            node_selector: Default::default(),
            dispatch_count: 0,
            phase: Phase::Running,
            creation_time: Utc::now() - Duration::seconds(age_secs),
            re_scheduled: false,
            being_preempted: false,
            conditions: vec![],
            queue_position: 0,
            scheduled_at: None,
            preempted_at: None,
            message: None,
        }
    }

    #[test]
    fn picks_minimal_victim_set_from_lower_priority_workloads() {
        let requester = workload("req", 3, 6, 0, true);
        let v1 = workload("v1", 1, 4, 100, false);
        let v2 = workload("v2", 1, 2, 50, false);
        let running = vec![&v1, &v2];
        let left_over = ResourceList::new().with(gpu_key("nvidia.com"), count(0));

        let victims = plan(&requester, &running, &left_over, &flavor(), "nvidia.com/gpu", 10);
        assert_eq!(victims.len(), 2);
    }

    #[test]
    fn equal_or_higher_priority_never_selected() {
        let requester = workload("req", 2, 6, 0, true);
        let v1 = workload("v1", 2, 8, 0, false); // same priority, ineligible
        let running = vec![&v1];
        let left_over = ResourceList::new().with(gpu_key("nvidia.com"), count(0));

        let victims = plan(&requester, &running, &left_over, &flavor(), "nvidia.com/gpu", 10);
        assert!(victims.is_empty());
    }

    #[test]
    fn no_preemption_when_disabled() {
        let requester = workload("req", 5, 6, 0, false);
        let v1 = workload("v1", 1, 8, 0, false);
        let running = vec![&v1];
        let left_over = ResourceList::new().with(gpu_key("nvidia.com"), count(0));

        let victims = plan(&requester, &running, &left_over, &flavor(), "nvidia.com/gpu", 10);
        assert!(victims.is_empty());
    }

    #[test]
    fn empty_when_even_all_victims_insufficient() {
        let requester = workload("req", 3, 20, 0, true);
        let v1 = workload("v1", 1, 4, 0, false);
        let running = vec![&v1];
        let left_over = ResourceList::new().with(gpu_key("nvidia.com"), count(0));

        let victims = plan(&requester, &running, &left_over, &flavor(), "nvidia.com/gpu", 10);
        assert!(victims.is_empty());
    }

    #[test]
    fn is_preemptable_requires_strictly_lower_priority_on_node() {
        let requester = workload("req", 3, 1, 0, true);
        let same_priority = workload("peer", 3, 1, 0, false);
        assert!(!is_preemptable(&requester, &[&same_priority]));

        let lower = workload("victim", 1, 1, 0, false);
        assert!(is_preemptable(&requester, &[&lower]));
    }
}

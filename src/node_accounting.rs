//! NodeAccounting: derives per-node available capacity by subtracting
//! in-flight placements of running workloads (§4.3).

use std::collections::HashMap;

use crate::resource::ResourceList;
use crate::types::{Node, Workload};

/// Where a running workload's replicas currently sit, as reported by the
/// execution layer. A workload between admission and the execution layer
/// publishing placements has no entry here yet (§4.3) — it still consumes
/// aggregate quota via [`crate::tick`] but does not fragment any node.
pub type PlacementMap<'a> = HashMap<&'a str, ResourceList>;

#[derive(Debug, Clone)]
pub struct NodeAvailability {
    pub node_name: String,
    pub available: ResourceList,
}

/// Computes per-node availability for a workspace. `placements` maps a
/// running workload id (by name, matching the keys produced by the caller)
/// to its per-node resource usage; workloads without a placement entry are
/// skipped here (they don't fragment any node yet) even though they still
/// count against the aggregate (handled separately in `tick`).
///
/// `tolerate_unhealthy` is applied symmetrically (§4.3, §9): a node excluded
/// from the candidate's capacity view by unhealthiness must also have its
/// usage excluded, or the leftover total would double-subtract and could go
/// negative.
pub fn available_per_node(
    nodes: &[Node],
    running: &[&Workload],
    placements_by_workload: &HashMap<String, PlacementMap>,
    tolerate_unhealthy: bool,
) -> Vec<NodeAvailability> {
    let mut used: HashMap<&str, ResourceList> = HashMap::new();

    for workload in running {
        let Some(placement) = placements_by_workload.get(workload.name.as_str()) else {
            continue;
        };
        for (node_name, usage) in placement {
            let Some(node) = nodes.iter().find(|n| n.name == *node_name) else {
                continue;
            };
            if !node.is_available(tolerate_unhealthy) {
                continue;
            }
            let entry = used
                .entry(node.name.as_str())
                .or_default();
            *entry = entry.add(usage);
        }
    }

    nodes
        .iter()
        .filter(|n| n.is_available(tolerate_unhealthy))
        .map(|n| {
            let usage = used.get(n.name.as_str()).cloned().unwrap_or_default();
            NodeAvailability {
                node_name: n.name.clone(),
                available: n.capacity.subtract(&usage),
            }
        })
        .collect()
}

/// Counts how many available nodes can fit one replica of `per_replica`,
/// optionally restricted by a node-label selector (§4.7 per-node fit check).
pub fn nodes_fitting<'a>(
    availabilities: &'a [NodeAvailability],
    nodes: &[Node],
    per_replica: &ResourceList,
    selector: &std::collections::BTreeMap<String, String>,
) -> Vec<&'a NodeAvailability> {
    availabilities
        .iter()
        .filter(|avail| {
            let matches_selector = nodes
                .iter()
                .find(|n| n.name == avail.node_name)
                .is_some_and(|n| n.matches_selector(selector));
            matches_selector && per_replica.contains_within(&avail.available).0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{binary_kib, count, decimal_millis, gpu_key, CPU, MEMORY};
    use crate::types::{ClusterId, HealthSummary, NodeFlavorId, Phase, ResourceRequest, WorkloadId, WorkspaceId};
    use chrono::Utc;
    use uuid::Uuid;

    fn node(name: &str, healthy: bool, gpus: i64) -> Node {
        Node {
            name: name.to_string(),
            workspace_id: WorkspaceId(Uuid::new_v4()),
            node_flavor_id: NodeFlavorId(Uuid::new_v4()),
            capacity: ResourceList::new()
                .with(CPU, decimal_millis(8000))
                .with(MEMORY, binary_kib(16 * 1024 * 1024))
                .with(gpu_key("nvidia.com"), count(gpus)),
            health: HealthSummary {
                healthy,
                reason: None,
            },
            labels: Default::default(),
        }
    }

    fn running_workload(name: &str) -> Workload {
        Workload {
            id: WorkloadId(Uuid::new_v4()),
            workspace_id: WorkspaceId(Uuid::new_v4()),
            cluster_id: ClusterId(Uuid::new_v4()),
            name: name.to_string(),
            priority: 0,
            request: ResourceRequest {
                per_replica: ResourceList::new(),
                replicas: 1,
            },
            suspended: false,
            tolerate_unhealthy_nodes: false,
            enable_preempt: false,
            dependencies: vec![],
            cron_entries: vec![],
            node_selector: Default::default(),
            dispatch_count: 1,
            phase: Phase::Running,
            creation_time: Utc::now(),
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
    fn unreferenced_node_gets_full_capacity() {
        let nodes = vec![node("n1", true, 4)];
        let running = vec![];
        let placements = HashMap::new();
        let out = available_per_node(&nodes, &running, &placements, false);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].available.gpu_count("nvidia.com/gpu"), 4);
    }

    #[test]
    fn placement_usage_is_subtracted() {
        let nodes = vec![node("n1", true, 4)];
        let w = running_workload("job-a");
        let running = vec![&w];
        let mut placements: HashMap<String, PlacementMap> = HashMap::new();
        let mut p: PlacementMap = HashMap::new();
        p.insert("n1", ResourceList::new().with(gpu_key("nvidia.com"), count(2)));
        placements.insert("job-a".to_string(), p);

        let out = available_per_node(&nodes, &running, &placements, false);
        assert_eq!(out[0].available.gpu_count("nvidia.com/gpu"), 2);
    }

    #[test]
    fn unhealthy_node_excluded_unless_tolerated() {
        let nodes = vec![node("n1", false, 4)];
        let running = vec![];
        let placements = HashMap::new();

        let strict = available_per_node(&nodes, &running, &placements, false);
        assert!(strict.is_empty());

        let tolerant = available_per_node(&nodes, &running, &placements, true);
        assert_eq!(tolerant.len(), 1);
    }

    #[test]
    fn symmetric_tolerance_never_goes_negative() {
        // A workload placed on an unhealthy node must not count as usage
        // against a strict (non-tolerating) candidate's view, since that
        // node is excluded from the view entirely; the filter is symmetric.
        let nodes = vec![node("n1", false, 4)];
        let w = running_workload("job-a");
        let running = vec![&w];
        let mut placements: HashMap<String, PlacementMap> = HashMap::new();
        let mut p: PlacementMap = HashMap::new();
        p.insert("n1", ResourceList::new().with(gpu_key("nvidia.com"), count(2)));
        placements.insert("job-a".to_string(), p);

        let strict = available_per_node(&nodes, &running, &placements, false);
        assert!(strict.is_empty());
    }
}

//! Admitter: the per-workload yes/no decision combining cron, dependencies,
//! aggregate quota, preemption, and per-node fit (§4.7).

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;

use crate::config::SchedulerConfig;
use crate::cron_gate::{next_start_at, parse_schedule};
use crate::dependency::DependencyTracker;
use crate::node_accounting::{self, NodeAvailability};
use crate::preemption;
use crate::resource::ResourceList;
use crate::types::{Condition, Node, NodeFlavor, ReasonKind, Workload, WorkloadId};

pub enum AdmitOutcome<'a> {
    /// Admit the workload; the caller applies `apply_admission` side effects
    /// and hands it to the ResourceTranslator.
    Admit,
    /// Hold with a symbolic reason. `victims` is non-empty only when the
    /// preemption planner selected a victim set this tick.
    Hold {
        reason: ReasonKind,
        victims: Vec<&'a Workload>,
    },
    /// Mis-configured spec: transition straight to `Failed` (§4.5, §4.7).
    Fail { message: String },
}

/// §4.7 admission algorithm. `left_over` and `node_availabilities` must
/// already reflect the `available`-vs-`total` view selected by the
/// workload's own `tolerate_unhealthy_nodes` flag (the caller, TickLoop,
/// picks the right view per §4.8 step 3).
#[allow(clippy::too_many_arguments)]
pub fn admit<'a>(
    workload: &Workload,
    running: &[&'a Workload],
    left_over: &ResourceList,
    node_availabilities: &[NodeAvailability],
    nodes: &[Node],
    dependencies: &DependencyTracker,
    known_workload_ids: &HashSet<WorkloadId>,
    node_flavor: &NodeFlavor,
    config: &SchedulerConfig,
) -> AdmitOutcome<'a> {
    // 1. Cron check. The schedule's next Start occurrence is anchored at the
    // workload's creation time (§6, §4.4), not at `now`: a fixed timestamp
    // that is ahead of `now` before it fires and behind it from the moment
    // it has elapsed, for as long as the workload keeps being considered.
    for entry in &workload.cron_entries {
        if entry.action != crate::types::CronAction::Start {
            continue;
        }
        match parse_schedule(&entry.schedule) {
            Ok(schedule) => {
                if let Some(next) = next_start_at(&schedule, workload.creation_time) {
                    if next > Utc::now() {
                        return AdmitOutcome::Hold {
                            reason: ReasonKind::Cronjob,
                            victims: vec![],
                        };
                    }
                }
            }
            Err(_) => {
                return AdmitOutcome::Fail {
                    message: format!("malformed cron schedule: {}", entry.schedule),
                };
            }
        }
    }

    // 2. Dependency check.
    let missing = dependencies.missing_prerequisites(workload.id, known_workload_ids);
    if !missing.is_empty() {
        return AdmitOutcome::Fail {
            message: format!("missing prerequisite workload(s): {missing:?}"),
        };
    }
    if !dependencies.is_ready(workload.id) {
        let outstanding = dependencies.outstanding(workload.id);
        let prerequisite = outstanding
            .first()
            .map(|id| format!("{:?}", id.0))
            .unwrap_or_default();
        return AdmitOutcome::Hold {
            reason: ReasonKind::Dependency { prerequisite },
            victims: vec![],
        };
    }

    // 3. Aggregate quota check.
    let request = workload.request.aggregate();
    let (fits, deficient_key) = request.contains_within(left_over);
    if !fits {
        let victims = preemption::plan(
            workload,
            running,
            left_over,
            node_flavor,
            &config.gpu_vendor_key,
            config.gpu_preemption_weight,
        );
        let reason = ReasonKind::Insufficient {
            resource: deficient_key.unwrap_or_else(|| "unknown".to_string()),
        };
        return AdmitOutcome::Hold {
            reason,
            victims,
        };
    }

    // 4. Per-node fit check.
    let fitting = node_accounting::nodes_fitting(
        node_availabilities,
        nodes,
        &workload.request.per_replica,
        &workload.node_selector,
    );
    if fitting.len() >= workload.request.replicas as usize {
        return AdmitOutcome::Admit;
    }

    let candidates_on_any_node: Vec<&Workload> = running.to_vec();
    if preemption::is_preemptable(workload, &candidates_on_any_node) {
        return AdmitOutcome::Hold {
            reason: ReasonKind::Fragmentation,
            victims: vec![],
        };
    }

    let reason = if node_availabilities.is_empty() {
        ReasonKind::AllNodesUnavailable
    } else if !workload.node_selector.is_empty()
        && !nodes.iter().any(|n| n.matches_selector(&workload.node_selector))
    {
        ReasonKind::LabelMismatch
    } else {
        ReasonKind::Fragmentation
    };
    AdmitOutcome::Hold {
        reason,
        victims: vec![],
    }
}

/// Applies the admission side effects (§4.7) to a workload being admitted.
pub fn apply_admission(workload: &mut Workload) {
    if matches!(workload.phase, crate::types::Phase::Pending) || workload.dispatch_count == 0 {
        workload.phase = crate::types::Phase::Scheduled;
    }
    workload.dispatch_count += 1;
    workload.conditions.push(Condition {
        reason: format!("Scheduled (dispatch {})", workload.dispatch_count),
        message: "admitted by the workspace scheduler".to_string(),
        observed_at: Utc::now(),
    });
    workload.queue_position = 0;
    workload.scheduled_at = Some(Utc::now());
    workload.re_scheduled = false;
}

/// Marks victims as being preempted (§4.6): the execution layer observes
/// this annotation and tears the victim down asynchronously.
pub fn mark_being_preempted(victim: &mut Workload) {
    victim.being_preempted = true;
    victim.preempted_at = Some(Utc::now());
}

/// Transitions a workload to `Failed` with a terminal reason, also applying
/// the §3 invariant that `Succeeded`/`Failed` are entered at most once.
pub fn fail(workload: &mut Workload, message: String) {
    if workload.phase.is_terminal() {
        return;
    }
    workload.phase = crate::types::Phase::Failed;
    workload.message = Some(message.clone());
    workload.conditions.push(Condition {
        reason: "Failed".to_string(),
        message,
        observed_at: Utc::now(),
    });
}

/// §4.8 step 5: queue-position assignment for still-held workloads,
/// in WorkloadOrdering order, paired with their recorded reason or a
/// generic fallback.
pub fn assign_queue_positions(
    held: &[(WorkloadId, Option<ReasonKind>)],
) -> BTreeMap<WorkloadId, (u32, ReasonKind)> {
    held.iter()
        .enumerate()
        .map(|(i, (id, reason))| {
            let position = (i + 1) as u32;
            let reason = reason.clone().unwrap_or(ReasonKind::BlockedByHigherPriority);
            (*id, (position, reason))
        })
        .collect()
}

//! TickLoop: the per-workspace scheduling tick entry point (§4.8). This is
//! the one thing the reconciler harness outside this crate's scope calls.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::admitter::{self, AdmitOutcome};
use crate::config::SchedulerConfig;
use crate::cron_gate::CronGate;
use crate::dependency::DependencyTracker;
use crate::error::Result;
use crate::node_accounting::{self, PlacementMap};
use crate::ordering;
use crate::resource::ResourceList;
use crate::store::{MirrorClient, ResourceTranslator, Store};
use crate::types::{AdmissionRecord, Decision, Phase, ReasonKind, Workload, WorkloadId, WorkspaceId};

pub struct Scheduler {
    pub store: Arc<dyn Store>,
    pub translator: Arc<dyn ResourceTranslator>,
    pub mirror: Arc<dyn MirrorClient>,
    pub cron_gate: Arc<CronGate>,
    pub dependencies: tokio::sync::Mutex<DependencyTracker>,
    pub config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        translator: Arc<dyn ResourceTranslator>,
        mirror: Arc<dyn MirrorClient>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let (cron_gate, _fired_rx) = CronGate::new();
        Arc::new(Scheduler {
            store,
            translator,
            mirror,
            cron_gate,
            dependencies: tokio::sync::Mutex::new(DependencyTracker::new()),
            config,
        })
    }

    /// Processes one scheduling tick for `workspace_id` (§4.8). Returns the
    /// admission records this tick produced; on a retryable store error, the
    /// caller (reconciler harness) decides requeue timing (§7).
    #[instrument(skip(self), fields(workspace = ?workspace_id.0))]
    pub async fn tick(&self, workspace_id: WorkspaceId) -> Result<Vec<AdmissionRecord>> {
        // 1. Load workspace; absent workspace -> tear down stray namespace.
        let workspace = match self.store.get_workspace(workspace_id).await? {
            Some(w) => w,
            None => {
                warn!("workspace not found, tearing down stray data-plane namespace");
                let _ = self
                    .mirror
                    .delete_namespace("unknown", &format!("{:?}", workspace_id.0))
                    .await;
                return Ok(vec![]);
            }
        };

        // A workspace whose NodeFlavor reference doesn't resolve can't be
        // scored or placed at all (§7): hold every pending workload with
        // MisconfiguredFlavor instead of aborting the whole tick.
        let node_flavor = match self.store.get_node_flavor(workspace.node_flavor_id).await? {
            Some(flavor) => flavor,
            None => {
                warn!("node flavor not found, holding every pending workload");
                let mut unfinished = self.store.list_unfinished_workloads(workspace_id).await?;
                ordering::sort(&mut unfinished);
                let mut records = Vec::new();
                let mut position = 0u32;
                for w in unfinished.iter_mut().filter(|w| w.is_pending()) {
                    position += 1;
                    w.queue_position = position;
                    self.store.update_workload_status(w).await?;
                    records.push(AdmissionRecord {
                        workload_id: w.id,
                        decision: Decision::Hold,
                        reason: Some(ReasonKind::MisconfiguredFlavor),
                        queue_position: position,
                    });
                }
                return Ok(records);
            }
        };
        let nodes = self.store.list_nodes(workspace_id).await?;

        // 2. Load unfinished workloads; partition; sort.
        let mut all = self.store.list_unfinished_workloads(workspace_id).await?;
        ordering::sort(&mut all);

        let known_ids: HashSet<WorkloadId> = all.iter().map(|w| w.id).collect();

        let mut pending: Vec<Workload> = all
            .iter()
            .filter(|w| w.is_pending())
            .cloned()
            .collect();
        let running: Vec<Workload> = all.iter().filter(|w| w.is_running()).cloned().collect();

        debug!(
            pending = pending.len(),
            running = running.len(),
            "loaded workspace state"
        );

        // 3. Aggregate leftover, both views. Placements are not modeled by
        // the abstract store (§4.3): the execution layer publishes them
        // out of band; we treat every running workload as placement-unknown
        // here, so node accounting gives each node its full capacity and
        // only the aggregate leftover is reduced — exactly the §4.3 rule
        // for "admitted but not yet placed" workloads, generalized to all
        // running workloads since this trait has no placement query.
        let placements: HashMap<String, PlacementMap> = HashMap::new();

        let mut running_requests_total = ResourceList::new();
        for w in &running {
            running_requests_total = running_requests_total.add(&w.request.aggregate());
        }

        let mut available_leftover = workspace.available_capacity.subtract(&running_requests_total);
        let mut total_leftover = workspace.total_capacity.subtract(&running_requests_total);

        let mut records = Vec::new();
        let mut held: Vec<(WorkloadId, Option<ReasonKind>)> = Vec::new();
        let mut running_mut: Vec<Workload> = running;

        let mut i = 0;
        while i < pending.len() {
            let tolerate = pending[i].tolerate_unhealthy_nodes;
            let leftover = if tolerate {
                &total_leftover
            } else {
                &available_leftover
            };

            let running_refs: Vec<&Workload> = running_mut.iter().collect();
            let node_availabilities =
                node_accounting::available_per_node(&nodes, &running_refs, &placements, tolerate);

            // Register this workload's dependency edges before checking
            // readiness (§4.5, §4.7 step 2): without this, a never-observed
            // prerequisite reads as "trivially ready" instead of outstanding.
            {
                let mut deps = self.dependencies.lock().await;
                if let Err(e) = deps.register(pending[i].id, &pending[i].dependencies) {
                    drop(deps);
                    admitter::fail(&mut pending[i], format!("{e}"));
                    self.store.update_workload_status(&pending[i]).await?;
                    warn!(workload = pending[i].name, error = %e, "dependency cycle rejected");
                    i += 1;
                    continue;
                }
            }

            let deps = self.dependencies.lock().await;
            let outcome = admitter::admit(
                &pending[i],
                &running_refs,
                leftover,
                &node_availabilities,
                &nodes,
                &deps,
                &known_ids,
                &node_flavor,
                &self.config,
            );
            drop(deps);

            match outcome {
                AdmitOutcome::Admit => {
                    let request = pending[i].request.aggregate();
                    admitter::apply_admission(&mut pending[i]);
                    self.store.update_workload_status(&pending[i]).await?;
                    self.translator.translate(&pending[i]).await?;

                    available_leftover = available_leftover.subtract(&request);
                    total_leftover = total_leftover.subtract(&request);
                    running_mut.push(pending[i].clone());

                    records.push(AdmissionRecord {
                        workload_id: pending[i].id,
                        decision: Decision::Admit,
                        reason: None,
                        queue_position: 0,
                    });
                    info!(workload = pending[i].name, "admitted");
                }
                AdmitOutcome::Fail { message } => {
                    // Failed is terminal (§3): it never enters the hold/
                    // queue-position pass, unlike a genuine Hold.
                    admitter::fail(&mut pending[i], message.clone());
                    self.store.update_workload_status(&pending[i]).await?;
                    warn!(workload = pending[i].name, %message, "workload failed");
                }
                AdmitOutcome::Hold { reason, victims } => {
                    let victim_ids: Vec<WorkloadId> = victims.iter().map(|v| v.id).collect();
                    for victim_id in &victim_ids {
                        if let Some(victim) =
                            running_mut.iter_mut().find(|w| w.id == *victim_id)
                        {
                            admitter::mark_being_preempted(victim);
                            self.store.update_workload_status(victim).await?;
                        }
                    }

                    let blocks = reason.blocks_queue();
                    held.push((pending[i].id, Some(reason.clone())));
                    debug!(workload = pending[i].name, reason = %reason.render(), "held");

                    let should_break = if let Some(next) = pending.get(i + 1) {
                        blocks && (workspace.fifo || pending[i].priority > next.priority)
                    } else {
                        false
                    };
                    if should_break {
                        // §4.8 step 6: remaining pending workloads are left
                        // for the position pass with a generic reason.
                        for later in &pending[i + 1..] {
                            held.push((later.id, None));
                        }
                        break;
                    }
                }
            }
            i += 1;
        }

        // 5. Queue-position update pass.
        let positions = admitter::assign_queue_positions(&held);
        for (workload_id, (position, reason)) in &positions {
            if let Some(w) = pending.iter_mut().find(|w| w.id == *workload_id) {
                w.queue_position = *position;
                self.store.update_workload_status(w).await?;
            }
            records.push(AdmissionRecord {
                workload_id: *workload_id,
                decision: Decision::Hold,
                reason: Some(reason.clone()),
                queue_position: *position,
            });
        }

        Ok(records)
    }

    /// Feeds a workload's observed terminal phase into the
    /// `DependencyTracker` (§4.5, §5): the reconciler harness calls this when
    /// its watch delivers a `Succeeded`/`Failed` transition for `workload_id`.
    /// Every dependent (discovered via `IndexDependents`, registered into the
    /// tracker if this is its first appearance) has its recorded observation
    /// updated; a non-`Succeeded` terminal phase fails the dependent
    /// immediately, and that failure is itself fed back in so the
    /// propagation reaches transitive dependents in the same call.
    #[instrument(skip(self), fields(workload = ?workload_id.0, phase = ?terminal_phase))]
    pub async fn on_terminal_transition(
        &self,
        workload_id: WorkloadId,
        terminal_phase: Phase,
    ) -> Result<()> {
        debug_assert!(terminal_phase.is_terminal());

        let dependents = self.store.index_dependents(workload_id).await?;
        {
            let mut tracker = self.dependencies.lock().await;
            for dependent in &dependents {
                // Re-registering an already-known dependent is a no-op
                // beyond re-asserting edges already present; a genuine cycle
                // can't appear here since the dependent is already stored.
                let _ = tracker.register(dependent.id, &dependent.dependencies);
            }
        }

        let newly_failed = {
            let mut tracker = self.dependencies.lock().await;
            tracker.observe_terminal(workload_id, terminal_phase)
        };

        for (dependent_id, prerequisite) in newly_failed {
            if let Some(mut dependent) = self.store.get_workload(dependent_id).await? {
                if dependent.phase.is_terminal() {
                    continue;
                }
                admitter::fail(
                    &mut dependent,
                    format!("prerequisite {prerequisite} did not succeed"),
                );
                self.store.update_workload_status(&dependent).await?;
                warn!(
                    dependent = dependent.name,
                    prerequisite, "failed by dependency propagation"
                );
                // The dependent's own failure is itself a terminal
                // transition: recurse so its own dependents fail too (§4.5
                // "propagates eagerly and transitively").
                Box::pin(self.on_terminal_transition(dependent_id, Phase::Failed)).await?;
            }
        }

        Ok(())
    }
}

/// Retries a fallible operation with the scheduler's bounded exponential
/// backoff, for transient store errors only (§5, §7). Non-retryable errors
/// propagate on the first attempt.
pub async fn with_retry<F, Fut, T>(config: &SchedulerConfig, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                let delay = config.backoff.delay_for_attempt(attempt, 0.5 + 0.5 * jitter());
                if delay >= config.backoff.max_delay {
                    return Err(e);
                }
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn jitter() -> f64 {
    // A deterministic, dependency-free jitter source: the low bits of the
    // monotonic clock. Full randomness isn't required here, only that
    // concurrent retries across workspaces don't synchronize in lockstep.
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

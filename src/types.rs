//! Data model shared by every scheduling component (§3).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::resource::ResourceList;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkloadId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeFlavorId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Pending,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Preempted,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Failed)
    }

    pub fn is_unfinished(&self) -> bool {
        !matches!(self, Phase::Succeeded | Phase::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CronAction {
    Start,
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronEntry {
    pub schedule: String,
    pub action: CronAction,
}

/// A single replica's worth of resource request, repeated `replicas` times
/// by the admitting workload.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub per_replica: ResourceList,
    pub replicas: u32,
}

impl ResourceRequest {
    pub fn aggregate(&self) -> ResourceList {
        let mut total = ResourceList::new();
        for _ in 0..self.replicas {
            total = total.add(&self.per_replica);
        }
        total
    }
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub reason: String,
    pub message: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Workload {
    pub id: WorkloadId,
    pub workspace_id: WorkspaceId,
    pub cluster_id: ClusterId,
    pub name: String,
    pub priority: u32,
    pub request: ResourceRequest,
    pub suspended: bool,
    pub tolerate_unhealthy_nodes: bool,
    pub enable_preempt: bool,
    pub dependencies: Vec<WorkloadId>,
    pub cron_entries: Vec<CronEntry>,
    pub node_selector: BTreeMap<String, String>,
    pub dispatch_count: u32,
    pub phase: Phase,
    pub creation_time: DateTime<Utc>,
    pub re_scheduled: bool,
    pub being_preempted: bool,
    pub conditions: Vec<Condition>,
    pub queue_position: u32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub preempted_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

impl Workload {
    /// §3 invariant: a workload is a failover re-queue candidate iff it has
    /// been flagged for retry and has not itself just been selected as a
    /// preemption victim.
    pub fn is_failover_requeue(&self) -> bool {
        self.re_scheduled && !self.being_preempted
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Scheduled | Phase::Running)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.phase, Phase::Pending)
    }
}

#[derive(Debug, Clone)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub cluster_id: ClusterId,
    pub node_flavor_id: NodeFlavorId,
    pub total_capacity: ResourceList,
    pub available_capacity: ResourceList,
    pub fifo: bool,
    pub preempt_enabled: bool,
    pub image_pull_secrets: Vec<String>,
    pub volumes: Vec<VolumeSpec>,
}

#[derive(Debug, Clone)]
pub struct VolumeSpec {
    pub volume_id: String,
    pub mount_path: String,
    pub size: ResourceList,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSummary {
    pub healthy: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub workspace_id: WorkspaceId,
    pub node_flavor_id: NodeFlavorId,
    pub capacity: ResourceList,
    pub health: HealthSummary,
    pub labels: BTreeMap<String, String>,
}

impl Node {
    /// A node is available iff healthy, unless the candidate workload
    /// tolerates unhealthy nodes (§3, §4.3, §9).
    pub fn is_available(&self, tolerate_unhealthy: bool) -> bool {
        self.health.healthy || tolerate_unhealthy
    }

    pub fn matches_selector(&self, selector: &BTreeMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.labels.get(k).is_some_and(|lv| lv == v))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeFlavor {
    pub id: NodeFlavorId,
    pub cpu_millicores: i64,
    pub memory_kib: i64,
    pub gpu_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Admit,
    Hold,
}

/// A symbolic, user-visible reason for a Hold decision (§6, §9). `blocks_queue`
/// decides whether this hold should stop the FIFO/priority early-exit scan in
/// the TickLoop (§4.8): cron and dependency holds never block unrelated
/// lower-priority peers, quota/fragmentation holds do under FIFO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasonKind {
    Cronjob,
    Dependency { prerequisite: String },
    Insufficient { resource: String },
    Fragmentation,
    AllNodesUnavailable,
    LabelMismatch,
    BlockedByHigherPriority,
    /// The workspace's `NodeFlavor` reference doesn't resolve (§7): every
    /// pending workload in the workspace is held with this reason rather
    /// than aborting the tick.
    MisconfiguredFlavor,
}

impl ReasonKind {
    pub fn blocks_queue(&self) -> bool {
        !matches!(self, ReasonKind::Cronjob | ReasonKind::Dependency { .. })
    }

    /// Byte-stable string rendering (§8 hold-reason determinism).
    pub fn render(&self) -> String {
        match self {
            ReasonKind::Cronjob => "CronjobReason".to_string(),
            ReasonKind::Dependency { prerequisite } => {
                format!("DependencyReason: waiting on {prerequisite}")
            }
            ReasonKind::Insufficient { resource } => format!("Insufficient {resource}"),
            ReasonKind::Fragmentation => "Fragmentation".to_string(),
            ReasonKind::AllNodesUnavailable => "AllNodesUnavailable".to_string(),
            ReasonKind::LabelMismatch => "LabelMismatch".to_string(),
            ReasonKind::BlockedByHigherPriority => {
                "blocked by higher-priority workload".to_string()
            }
            ReasonKind::MisconfiguredFlavor => "MisconfiguredFlavor".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdmissionRecord {
    pub workload_id: WorkloadId,
    pub decision: Decision,
    pub reason: Option<ReasonKind>,
    pub queue_position: u32,
}

//! CronGate: one independent recurring timer per `Start` cron entry (§4.4).
//!
//! Timer firings never mutate the store directly from the timer thread
//! (§9 design notes): each firing sends a message on an internal channel;
//! the caller (the reconciler harness, outside this crate's scope) drains
//! that channel and is responsible for the store write and the resulting
//! tick enqueue. This keeps CronGate's only shared mutable state the
//! mutex-protected timer-handle map (§5).

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::{Result, SchedulerError};
use crate::types::{CronAction, CronEntry, WorkloadId};

/// Normalizes a 5-or-6-field cron string (§6, §9 decided Open Question) to
/// the 6/7-field form the `cron` crate expects (seconds-first). A 5-field
/// string gets a `0` seconds field prepended; a 6-field string is assumed to
/// already carry seconds as its first field.
pub fn parse_schedule(raw: &str) -> Result<Schedule> {
    let field_count = raw.split_whitespace().count();
    let normalized = if field_count == 5 {
        format!("0 {raw}")
    } else {
        raw.to_string()
    };
    Schedule::from_str(&normalized)
        .map_err(|e| SchedulerError::malformed("cron schedule", format!("{raw}: {e}")))
}

/// The schedule's first occurrence strictly after `since` — the workload's
/// own reference point (its creation time), not the current tick's clock.
/// This is the fixed "next scheduled Start" the Admitter compares against
/// `now` (§4.7 step 1): for a recurring expression, computing the next
/// occurrence after `now` on every tick would always yield a time in the
/// future and could never admit, which is wrong — a workload whose schedule
/// fired once after it was created has satisfied its gate forever after,
/// even though the expression keeps recurring. Anchoring on `since` instead
/// gives a timestamp that stays fixed across ticks: still ahead of `now`
/// before it fires, at-or-behind `now` ("reported as now", §6) from the
/// moment it has elapsed onward.
pub fn next_start_at(schedule: &Schedule, since: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&since).next()
}

#[derive(Debug, Clone)]
pub struct TimerFired {
    pub workload_id: WorkloadId,
    pub fired_at: DateTime<Utc>,
}

struct TimerHandle {
    task: JoinHandle<()>,
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Owns every active cron timer, keyed by workload id. `Install` replaces a
/// workload's entire timer set atomically (§4.4): old timers are aborted
/// before new ones are spawned, so a stale schedule can never fire after an
/// update lands.
pub struct CronGate {
    timers: Mutex<HashMap<WorkloadId, Vec<TimerHandle>>>,
    fired_tx: mpsc::UnboundedSender<TimerFired>,
}

impl CronGate {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TimerFired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(CronGate {
                timers: Mutex::new(HashMap::new()),
                fired_tx: tx,
            }),
            rx,
        )
    }

    /// Replaces all timers for `workload_id` with one per `Start` entry in
    /// `entries`. Entries that fail to parse are skipped (malformed cron is
    /// a terminal, per-workload concern handled by the Admitter, not a
    /// reason to crash timer installation for the rest of the schedule).
    pub async fn install(self: &Arc<Self>, workload_id: WorkloadId, entries: &[CronEntry]) {
        self.remove(workload_id).await;

        let mut handles = Vec::new();
        for entry in entries {
            if entry.action != CronAction::Start {
                continue;
            }
            let Ok(schedule) = parse_schedule(&entry.schedule) else {
                continue;
            };
            handles.push(self.clone().spawn_timer(workload_id, schedule));
        }

        if !handles.is_empty() {
            self.timers.lock().await.insert(workload_id, handles);
        }
    }

    pub async fn remove(&self, workload_id: WorkloadId) {
        // Dropping the handles aborts their tasks (TimerHandle::drop).
        self.timers.lock().await.remove(&workload_id);
    }

    fn spawn_timer(self: Arc<Self>, workload_id: WorkloadId, schedule: Schedule) -> TimerHandle {
        let running = Arc::new(tokio::sync::Mutex::new(()));
        let task = tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let Some(next) = schedule.after(&now).next() else {
                    break;
                };
                let delay = (next - now)
                    .to_std()
                    .unwrap_or(std::time::Duration::from_secs(0));
                tokio::time::sleep(delay).await;

                // Cooperative, discard-if-still-running (§4.4, §5): a
                // `try_lock` failure means a previous firing hasn't finished,
                // so this firing is simply skipped rather than queued.
                if let Ok(_guard) = running.try_lock() {
                    let _ = self.fired_tx.send(TimerFired {
                        workload_id,
                        fired_at: Utc::now(),
                    });
                }
            }
        });
        TimerHandle { task }
    }

    pub async fn active_timer_count(&self, workload_id: WorkloadId) -> usize {
        self.timers
            .lock()
            .await
            .get(&workload_id)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

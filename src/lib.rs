//! GPU workload admission and scheduling core for a multi-cluster,
//! multi-tenant platform (see `SPEC_FULL.md`).
//!
//! This crate exposes the Workspace Scheduler only: queue discipline,
//! two-level resource feasibility, preemption, and the activation side
//! effects (cron, dependency propagation, data-plane mirroring). The
//! reconciler harness, CRD/REST layers, and the execution state machine of
//! a running workload are external collaborators, modeled here only by the
//! traits in [`store`].

pub mod admitter;
pub mod config;
pub mod cron_gate;
pub mod dependency;
pub mod error;
pub mod mirror;
pub mod node_accounting;
pub mod ordering;
pub mod preemption;
pub mod quantity;
pub mod resource;
pub mod store;
pub mod tick;
pub mod types;

pub use config::SchedulerConfig;
pub use error::{Result, SchedulerError};
pub use tick::Scheduler;

/// Installs a `tracing` subscriber reading `RUST_LOG` (defaulting to
/// `info`), matching the logging convention the rest of the ambient stack
/// uses (§2). Harness binaries call this once at startup; library
/// consumers embedding the scheduler elsewhere are free to install their
/// own subscriber instead.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

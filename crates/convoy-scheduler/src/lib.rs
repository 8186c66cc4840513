//! Convoy Scheduler - gang-aware batch placement engine
//!
//! This crate provides:
//! - The scheduler cache: snapshots, event ingest, keyed bind dispatch
//! - The per-pass session and plugin framework
//! - Actions: enqueue, allocate, backfill, preempt, reclaim
//! - Plugins: priority, gang, drf, proportion, predicates, nodeorder
//! - The periodic driver loop

pub mod actions;
pub mod api;
pub mod cache;
pub mod conf;
pub mod error;
pub mod framework;
pub mod plugins;
pub mod scheduler;
pub mod util;

// Re-export commonly used types
pub use cache::{Binder, DispatchConfig, EventRecorder, Evictor, SchedulerCache, StatusUpdater};
pub use conf::{SchedulerConf, SchedulerOpts};
pub use error::{Result, SchedulerError};
pub use framework::{Plugin, Session};
pub use scheduler::{Scheduler, SchedulerConfig};

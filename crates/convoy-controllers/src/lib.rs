//! Convoy Controllers - lifecycle reconciliation outside the scheduling pass
//!
//! This crate provides:
//! - The job controller: keyed worker pool driving a state machine through
//!   an injected `JobHandler`
//! - The pod group controller: gang membership for bare pods
//! - The garbage collector: TTL-after-finished cleanup
//! - A rate-limited work queue shared by the controllers

pub mod client;
pub mod error;
pub mod garbagecollector;
pub mod job;
pub mod podgroup;
pub mod workqueue;

// Re-export commonly used types
pub use client::{ControlClient, MockClient};
pub use error::{ControllerError, Result};
pub use garbagecollector::GarbageCollector;
pub use job::{JobAction, JobController, JobControllerConfig, JobHandler, JobStateMachine};
pub use podgroup::PodGroupController;
pub use workqueue::RateLimitedQueue;

//! Convoy Webhook - admission control for queues, jobs and pod groups
//!
//! This crate provides:
//! - Bit-exact AdmissionReview request/response handling
//! - Queue mutation (defaulting) and validation (state, deletion rules)
//! - Job and PodGroup structural validation
//! - The axum webhook server with path-based service registration

pub mod admission;
pub mod jobs;
pub mod podgroups;
pub mod queues;
pub mod server;

// Re-export commonly used types
pub use admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, PatchOperation};
pub use server::{Config, WebhookServer};

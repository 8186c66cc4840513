//! Session and plugin framework.
//!
//! A session is opened over a snapshot plus a tier configuration; plugins
//! are instantiated per pass and expose their extension points through the
//! session's composed accessors. All placement decisions are tentative and
//! commit-or-discard per job.

mod plugin;
mod session;

pub use plugin::{AllocationEvent, Plugin};
pub use session::{Operation, Session, SessionState};

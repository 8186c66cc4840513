//! Scheduling-pass actions, executed in configured order over a session.

mod allocate;
mod backfill;
mod enqueue;
mod preempt;
mod reclaim;

pub use allocate::AllocateAction;
pub use backfill::BackfillAction;
pub use enqueue::EnqueueAction;
pub use preempt::PreemptAction;
pub use reclaim::ReclaimAction;

use crate::error::Result;
use crate::framework::Session;

/// A stage of the scheduling pass. Actions never panic the pass: object
/// failures become events and the action moves on.
pub trait Action: Send {
    fn name(&self) -> &'static str;

    fn execute(&self, ssn: &mut Session) -> Result<()>;
}

/// Instantiate an action by its configured name
pub fn new_action(name: &str) -> Option<Box<dyn Action>> {
    match name {
        "enqueue" => Some(Box::new(EnqueueAction)),
        "allocate" => Some(Box::new(AllocateAction)),
        "backfill" => Some(Box::new(BackfillAction)),
        "preempt" => Some(Box::new(PreemptAction)),
        "reclaim" => Some(Box::new(ReclaimAction)),
        _ => None,
    }
}

/// Whether an action name is registered
pub fn is_known(name: &str) -> bool {
    matches!(
        name,
        "enqueue" | "allocate" | "backfill" | "preempt" | "reclaim"
    )
}

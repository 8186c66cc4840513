use super::Action;
use crate::error::Result;
use crate::framework::Session;
use convoy_core::events::reasons;
use convoy_core::{EventType, JobId, PodGroupPhase, TaskId};
use tracing::{debug, warn};

/// Best-effort placement: tasks that request no resources are slotted onto
/// any node passing the predicates, filling gaps the allocate action left.
pub struct BackfillAction;

impl Action for BackfillAction {
    fn name(&self) -> &'static str {
        "backfill"
    }

    fn execute(&self, ssn: &mut Session) -> Result<()> {
        debug!("enter backfill");

        let eligible: Vec<JobId> = ssn
            .state
            .jobs
            .values()
            .filter(|job| job.phase != PodGroupPhase::Pending)
            .filter(|job| ssn.state.queues.contains_key(&job.queue))
            .filter(|job| ssn.job_valid(job).is_ok())
            .filter(|job| {
                job.pending_tasks()
                    .iter()
                    .any(|id| job.tasks[id].res_req.is_empty())
            })
            .map(|job| job.uid.clone())
            .collect();

        for job_id in eligible {
            let task_ids: Vec<TaskId> = {
                let job = &ssn.state.jobs[&job_id];
                job.pending_tasks()
                    .into_iter()
                    .filter(|id| job.tasks[id].res_req.is_empty())
                    .collect()
            };

            for task_id in task_ids {
                let placed = {
                    let job = &ssn.state.jobs[&job_id];
                    let task = &job.tasks[&task_id];
                    ssn.state
                        .nodes
                        .values()
                        .find(|node| ssn.predicates(task, node).is_ok())
                        .map(|node| node.name.clone())
                };
                match placed {
                    Some(node) => {
                        if let Err(e) = ssn.allocate(&job_id, &task_id, &node) {
                            warn!(task = %task_id, node = %node, "backfill failed: {}", e);
                        }
                    }
                    None => {
                        let key = ssn.state.jobs[&job_id].tasks[&task_id].key();
                        ssn.record_event(
                            EventType::Warning,
                            format!("Pod/{}", key),
                            reasons::UNSCHEDULABLE,
                            "no node passes the predicates for best-effort task",
                        );
                    }
                }
            }

            let ready = ssn.job_ready(&ssn.state.jobs[&job_id]);
            if ready {
                ssn.commit_job(&job_id);
            } else {
                ssn.discard_job(&job_id);
            }
        }

        debug!("leave backfill");
        Ok(())
    }
}

use super::Action;
use crate::api::TaskInfo;
use crate::error::Result;
use crate::framework::Session;
use convoy_core::events::reasons;
use convoy_core::{EventType, JobId, PodGroupPhase, QueueId, TaskId};
use tracing::{debug, warn};

/// Across queues: a queue below its deserved share may reclaim resources
/// from queues running above theirs, provided the victims' queues are
/// reclaimable. As with preemption, victims go only if the reclaimer is
/// then pipelined; otherwise the attempt rolls back.
pub struct ReclaimAction;

impl Action for ReclaimAction {
    fn name(&self) -> &'static str {
        "reclaim"
    }

    fn execute(&self, ssn: &mut Session) -> Result<()> {
        debug!("enter reclaim");

        let queue_ids: Vec<QueueId> = ssn.state.queues.keys().cloned().collect();
        for queue_id in queue_ids {
            let queue_info = ssn.state.queues[&queue_id].clone();
            // Only queues short of their deserved share get to reclaim.
            if ssn.overused(&queue_info) {
                continue;
            }

            let mut starving: Vec<JobId> = ssn
                .state
                .jobs
                .values()
                .filter(|job| job.queue == queue_id)
                .filter(|job| job.phase != PodGroupPhase::Pending)
                .filter(|job| !job.pending_tasks().is_empty())
                .filter(|job| ssn.job_valid(job).is_ok() && !ssn.job_ready(job))
                .map(|job| job.uid.clone())
                .collect();
            starving.sort_by(|a, b| ssn.job_order(&ssn.state.jobs[a], &ssn.state.jobs[b]));

            for job_id in starving {
                attempt_reclaim(ssn, &job_id);

                let (satisfied, progressed, key) = {
                    let job = &ssn.state.jobs[&job_id];
                    (
                        ssn.job_pipelined(job),
                        ssn.has_pending_ops(&job_id),
                        job.key(),
                    )
                };
                if !progressed {
                    continue;
                }
                if satisfied {
                    ssn.commit_job(&job_id);
                } else {
                    ssn.record_event(
                        EventType::Warning,
                        format!("PodGroup/{}", key),
                        reasons::PREEMPT_FAILED,
                        "reclaimed resources would not make the gang schedulable, rolling back",
                    );
                    ssn.discard_job(&job_id);
                }
            }
        }

        debug!("leave reclaim");
        Ok(())
    }
}

fn attempt_reclaim(ssn: &mut Session, job_id: &JobId) {
    let task_ids: Vec<TaskId> = {
        let job = &ssn.state.jobs[job_id];
        let mut ids = job.pending_tasks();
        ids.sort_by(|a, b| ssn.task_order(&job.tasks[a], &job.tasks[b]));
        ids
    };

    for task_id in task_ids {
        if ssn.job_pipelined(&ssn.state.jobs[job_id]) {
            break;
        }

        let Some((node_name, victims)) = plan_for_task(ssn, job_id, &task_id) else {
            break;
        };

        for (victim_job, victim_task) in victims {
            if let Err(e) = ssn.evict(
                &victim_job,
                &victim_task,
                job_id,
                "reclaimed for a queue below its deserved share",
            ) {
                warn!(victim = %victim_task, "evict failed: {}", e);
            }
        }
        if let Err(e) = ssn.pipeline(job_id, &task_id, &node_name) {
            warn!(task = %task_id, node = %node_name, "pipeline failed: {}", e);
            break;
        }
    }
}

/// Find a node where reclaiming cross-queue victims makes room for the task
fn plan_for_task(
    ssn: &Session,
    job_id: &JobId,
    task_id: &TaskId,
) -> Option<(String, Vec<(JobId, TaskId)>)> {
    let job = &ssn.state.jobs[job_id];
    let task = &job.tasks[task_id];

    for node in ssn.state.nodes.values() {
        if ssn.predicates(task, node).is_err() {
            continue;
        }
        if task.res_req.less_equal(&node.future_idle()) {
            return Some((node.name.clone(), Vec::new()));
        }

        let candidates: Vec<&TaskInfo> = ssn
            .state
            .jobs
            .values()
            .filter(|victim_job| victim_job.queue != job.queue)
            .flat_map(|victim_job| victim_job.tasks.values())
            .filter(|t| t.node_name.as_deref() == Some(node.name.as_str()))
            .filter(|t| t.status.occupies_node() && t.preemptable)
            .collect();
        if candidates.is_empty() {
            continue;
        }

        let allowed = ssn.reclaimable(job, &candidates);
        let mut victims: Vec<&TaskInfo> = candidates
            .into_iter()
            .filter(|t| allowed.contains(&t.uid))
            .collect();
        victims.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.uid.cmp(&b.uid)));

        let mut future = node.future_idle();
        let mut chosen = Vec::new();
        for victim in victims {
            if task.res_req.less_equal(&future) {
                break;
            }
            future.add(&victim.res_req);
            chosen.push((victim.job.clone(), victim.uid.clone()));
        }
        if task.res_req.less_equal(&future) {
            return Some((node.name.clone(), chosen));
        }
    }
    None
}

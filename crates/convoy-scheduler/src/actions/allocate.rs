use super::Action;
use crate::api::QueueInfo;
use crate::error::Result;
use crate::framework::Session;
use convoy_core::events::reasons;
use convoy_core::{EventType, JobId, PodGroupPhase, QueueId, TaskId};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

/// Where a task can go this round
enum Decision {
    /// Fits the node's idle resources
    Allocate(String),
    /// Fits only idle-plus-releasing; room is being made
    Pipeline(String),
    /// No node works; the reason is recorded and the job stops here
    Stop(String),
}

/// Placement: walks queues fairly, namespaces and jobs in plugin order, and
/// places each job's tasks subject to queue quota, predicates, deterministic
/// node sampling and scoring. Gangs commit or roll back atomically; jobs
/// sharing a (queue, subgroup) tag stand or fall together.
pub struct AllocateAction;

impl Action for AllocateAction {
    fn name(&self) -> &'static str {
        "allocate"
    }

    fn execute(&self, ssn: &mut Session) -> Result<()> {
        debug!("enter allocate");

        // Eligible jobs: admitted (or externally created without a phase),
        // structurally valid, with pending work in a known queue.
        let mut eligible: Vec<JobId> = Vec::new();
        let mut invalid: Vec<(String, String)> = Vec::new();
        for job in ssn.state.jobs.values() {
            if job.phase == PodGroupPhase::Pending || job.phase == PodGroupPhase::Completed {
                continue;
            }
            if job.pending_tasks().is_empty() {
                continue;
            }
            if !ssn.state.queues.contains_key(&job.queue) {
                warn!(job = %job.uid, queue = %job.queue, "job references unknown queue");
                continue;
            }
            if let Err(reason) = ssn.job_valid(job) {
                invalid.push((job.key(), reason));
                continue;
            }
            eligible.push(job.uid.clone());
        }
        for (key, reason) in invalid {
            ssn.record_event(
                EventType::Warning,
                format!("PodGroup/{}", key),
                reasons::UNSCHEDULABLE,
                reason,
            );
        }

        // Super-gang membership by (queue, subgroup).
        let mut super_gangs: HashMap<(QueueId, String), Vec<JobId>> = HashMap::new();
        for job_id in &eligible {
            let job = &ssn.state.jobs[job_id];
            if !job.sub_group.is_empty() {
                super_gangs
                    .entry((job.queue.clone(), job.sub_group.clone()))
                    .or_default()
                    .push(job_id.clone());
            }
        }
        let mut failed_gangs: HashSet<(QueueId, String)> = HashSet::new();
        let mut gang_ready: HashMap<JobId, bool> = HashMap::new();

        // Two-level work lists: per-queue namespace order, per-namespace job
        // order, both frozen at action start.
        let mut work = build_work_lists(ssn, &eligible);
        let mut active: Vec<QueueId> = work.keys().cloned().collect();

        while !active.is_empty() {
            // Queue order is consulted live so fair-share shifts as
            // allocations land.
            let queue_id = {
                let mut best: Option<&QueueId> = None;
                for candidate in &active {
                    best = Some(match best {
                        None => candidate,
                        Some(current) => {
                            let a = &ssn.state.queues[candidate];
                            let b = &ssn.state.queues[current];
                            if ssn.queue_order(a, b) == std::cmp::Ordering::Less {
                                candidate
                            } else {
                                current
                            }
                        }
                    });
                }
                best.expect("active is non-empty").clone()
            };

            let queue_info = ssn.state.queues[&queue_id].clone();
            if ssn.overused(&queue_info) {
                debug!(queue = %queue_id, "queue is over its deserved share");
                active.retain(|q| q != &queue_id);
                continue;
            }

            let Some(job_id) = next_job(work.get_mut(&queue_id)) else {
                active.retain(|q| q != &queue_id);
                continue;
            };

            let (sub_group, gang_key) = {
                let job = &ssn.state.jobs[&job_id];
                let key = (job.queue.clone(), job.sub_group.clone());
                (job.sub_group.clone(), key)
            };
            if !sub_group.is_empty() && failed_gangs.contains(&gang_key) {
                debug!(job = %job_id, "super-gang already failed, skipping");
                continue;
            }

            attempt_job(ssn, &job_id, &queue_info);

            let (ready, pipelined, progressed) = {
                let job = &ssn.state.jobs[&job_id];
                (
                    ssn.job_ready(job),
                    ssn.job_pipelined(job),
                    ssn.has_pending_ops(&job_id),
                )
            };

            if sub_group.is_empty() {
                if ready || (progressed && pipelined) {
                    ssn.commit_job(&job_id);
                } else {
                    not_ready_event(ssn, &job_id);
                    ssn.discard_job(&job_id);
                }
            } else {
                gang_ready.insert(job_id.clone(), ready);
                if !ready {
                    // One member failing dooms the whole super-gang; unwind
                    // it now so later jobs see the freed capacity.
                    not_ready_event(ssn, &job_id);
                    failed_gangs.insert(gang_key.clone());
                    for member in &super_gangs[&gang_key] {
                        ssn.discard_job(member);
                    }
                }
            }
        }

        // Super-gangs commit only when every member reported ready.
        for (key, members) in &super_gangs {
            if failed_gangs.contains(key) {
                continue;
            }
            let all_ready = members
                .iter()
                .all(|member| gang_ready.get(member) == Some(&true));
            for member in members {
                if all_ready {
                    ssn.commit_job(member);
                } else {
                    ssn.discard_job(member);
                }
            }
        }

        debug!("leave allocate");
        Ok(())
    }
}

/// Namespace-grouped, plugin-ordered job lists for one queue
type QueueWork = VecDeque<(String, VecDeque<JobId>)>;

fn build_work_lists(ssn: &Session, eligible: &[JobId]) -> HashMap<QueueId, QueueWork> {
    let mut grouped: HashMap<QueueId, HashMap<String, Vec<JobId>>> = HashMap::new();
    for job_id in eligible {
        let job = &ssn.state.jobs[job_id];
        grouped
            .entry(job.queue.clone())
            .or_default()
            .entry(job.namespace.clone())
            .or_default()
            .push(job_id.clone());
    }

    let mut work = HashMap::new();
    for (queue_id, namespaces) in grouped {
        let mut ordered: Vec<(String, VecDeque<JobId>)> = namespaces
            .into_iter()
            .map(|(namespace, mut jobs)| {
                jobs.sort_by(|a, b| ssn.job_order(&ssn.state.jobs[a], &ssn.state.jobs[b]));
                (namespace, jobs.into())
            })
            .collect();
        ordered.sort_by(|(a, _), (b, _)| ssn.namespace_order(a, b));
        work.insert(queue_id, ordered.into());
    }
    work
}

/// Pop the next job, rotating namespaces round-robin
fn next_job(work: Option<&mut QueueWork>) -> Option<JobId> {
    let work = work?;
    while let Some((namespace, mut jobs)) = work.pop_front() {
        if let Some(job_id) = jobs.pop_front() {
            if !jobs.is_empty() {
                work.push_back((namespace, jobs));
            }
            return Some(job_id);
        }
    }
    None
}

/// Try to place every pending task of one job, stopping at the first task
/// that cannot be satisfied.
fn attempt_job(ssn: &mut Session, job_id: &JobId, queue: &QueueInfo) {
    let task_ids: Vec<TaskId> = {
        let job = &ssn.state.jobs[job_id];
        let mut ids = job.pending_tasks();
        ids.sort_by(|a, b| ssn.task_order(&job.tasks[a], &job.tasks[b]));
        ids
    };

    for task_id in task_ids {
        let decision = decide(ssn, job_id, &task_id, queue);
        match decision {
            Decision::Allocate(node) => {
                if let Err(e) = ssn.allocate(job_id, &task_id, &node) {
                    warn!(task = %task_id, node = %node, "allocate failed: {}", e);
                    break;
                }
            }
            Decision::Pipeline(node) => {
                if let Err(e) = ssn.pipeline(job_id, &task_id, &node) {
                    warn!(task = %task_id, node = %node, "pipeline failed: {}", e);
                    break;
                }
            }
            Decision::Stop(reason) => {
                let task = ssn.state.jobs[job_id].tasks[&task_id].clone();
                ssn.backoff_task(&task, reasons::UNSCHEDULABLE, reason);
                break;
            }
        }
    }
}

/// Pick the best node for one task, or the reason none works
fn decide(ssn: &Session, job_id: &JobId, task_id: &TaskId, queue: &QueueInfo) -> Decision {
    let job = &ssn.state.jobs[job_id];
    let task = &job.tasks[task_id];

    if !ssn.queue_allocatable(queue, &task.res_req) {
        return Decision::Stop(format!(
            "queue {} has no headroom for {}",
            queue.name, task.res_req
        ));
    }

    let mut feasible: Vec<&crate::api::NodeInfo> = ssn
        .state
        .nodes
        .values()
        .filter(|node| ssn.predicates(task, node).is_ok())
        .collect();
    if feasible.is_empty() {
        return Decision::Stop("no node passes the predicates".to_string());
    }

    // Deterministic sampling: the starting offset derives from the pass
    // counter, so identical snapshots reproduce identical placements.
    let sample = ssn.opts.nodes_to_find(feasible.len());
    let offset = (ssn.pass as usize) % feasible.len();
    feasible.rotate_left(offset);
    feasible.truncate(sample);

    let mut best_allocate: Option<(f64, &str)> = None;
    let mut best_pipeline: Option<(f64, &str)> = None;
    for node in &feasible {
        let score = ssn.node_score(task, node);
        if task.res_req.less_equal(&node.idle) {
            if prefers(score, &node.name, &best_allocate) {
                best_allocate = Some((score, node.name.as_str()));
            }
        } else if task.res_req.less_equal(&node.future_idle())
            && prefers(score, &node.name, &best_pipeline)
        {
            best_pipeline = Some((score, node.name.as_str()));
        }
    }

    if let Some((_, node)) = best_allocate {
        Decision::Allocate(node.to_string())
    } else if let Some((_, node)) = best_pipeline {
        Decision::Pipeline(node.to_string())
    } else {
        Decision::Stop(format!("insufficient resources on every node for {}", task.res_req))
    }
}

/// Higher score wins; node name breaks exact ties deterministically
fn prefers(score: f64, name: &str, best: &Option<(f64, &str)>) -> bool {
    match best {
        None => true,
        Some((best_score, best_name)) => {
            score > *best_score || (score == *best_score && name < *best_name)
        }
    }
}

fn not_ready_event(ssn: &mut Session, job_id: &JobId) {
    let (key, ready, min) = {
        let job = &ssn.state.jobs[job_id];
        (job.key(), job.ready_task_num(), job.min_member)
    };
    ssn.record_event(
        EventType::Warning,
        format!("PodGroup/{}", key),
        reasons::UNSCHEDULABLE,
        format!("{}/{} tasks schedulable, gang is rolled back", ready, min),
    );
}

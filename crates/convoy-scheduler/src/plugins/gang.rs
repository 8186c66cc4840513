use crate::api::{JobInfo, TaskInfo};
use crate::framework::{Plugin, SessionState};
use convoy_core::{JobId, TaskId};
use std::collections::HashMap;

/// Gang semantics: a job is ready once at least `min_member` of its tasks
/// are in a ready status, and eviction never breaks a running gang.
pub struct GangPlugin;

impl Plugin for GangPlugin {
    fn name(&self) -> &'static str {
        "gang"
    }

    fn job_valid(&self, job: &JobInfo) -> Option<Result<(), String>> {
        if (job.tasks.len() as u32) < job.min_member {
            return Some(Err(format!(
                "job has {} tasks, fewer than minMember {}",
                job.tasks.len(),
                job.min_member
            )));
        }
        if let Some(min) = &job.min_resources {
            if !min.less_equal(&job.total_request()) {
                return Some(Err(format!(
                    "aggregate task requests ({}) below minResources ({})",
                    job.total_request(),
                    min
                )));
            }
        }
        Some(Ok(()))
    }

    fn job_ready(&self, job: &JobInfo) -> Option<bool> {
        Some(job.ready_task_num() >= job.min_member)
    }

    fn job_pipelined(&self, job: &JobInfo, _state: &SessionState) -> Option<bool> {
        Some(job.ready_task_num() >= job.min_member)
    }

    fn preemptable(
        &self,
        _preemptor: &JobInfo,
        candidates: &[&TaskInfo],
        state: &SessionState,
    ) -> Option<Vec<TaskId>> {
        // A victim may go only while its gang stays above min_member.
        let mut taken: HashMap<JobId, u32> = HashMap::new();
        let mut allowed = Vec::new();

        for task in candidates {
            let Some(job) = state.jobs.get(&task.job) else {
                continue;
            };
            let already = taken.entry(task.job.clone()).or_insert(0);
            if job.ready_task_num().saturating_sub(*already + 1) >= job.min_member {
                *already += 1;
                allowed.push(task.uid.clone());
            }
        }
        Some(allowed)
    }

    fn reclaimable(
        &self,
        reclaimer: &JobInfo,
        candidates: &[&TaskInfo],
        state: &SessionState,
    ) -> Option<Vec<TaskId>> {
        self.preemptable(reclaimer, candidates, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TaskInfo;
    use crate::cache::test_util::build_pod;
    use convoy_core::{JobId, Resource, TaskStatus};

    fn job(min_member: u32, tasks: usize, ready: usize) -> JobInfo {
        let mut job = JobInfo::shell(JobId::new("c1/pg1"), "c1", "pg1");
        job.min_member = min_member;
        for i in 0..tasks {
            let pod = build_pod("c1", &format!("p{}", i), "", "Pending", "1", "1G", "pg1");
            job.add_task(TaskInfo::from_pod(&pod).unwrap());
        }
        let ids = job.pending_tasks();
        for id in ids.iter().take(ready) {
            job.update_task_status(id, TaskStatus::Allocated).unwrap();
        }
        job
    }

    #[test]
    fn test_job_valid_rejects_undersized_gang() {
        let plugin = GangPlugin;
        assert!(plugin.job_valid(&job(3, 2, 0)).unwrap().is_err());
        assert!(plugin.job_valid(&job(2, 2, 0)).unwrap().is_ok());
    }

    #[test]
    fn test_job_valid_rejects_min_resources_overshoot() {
        let plugin = GangPlugin;
        let mut j = job(1, 2, 0);
        // Two tasks of 1 cpu each cannot satisfy a 5 cpu floor.
        j.min_resources = Some(Resource::new(5000, 0));
        assert!(plugin.job_valid(&j).unwrap().is_err());

        j.min_resources = Some(Resource::new(2000, 0));
        assert!(plugin.job_valid(&j).unwrap().is_ok());
    }

    #[test]
    fn test_job_ready_counts_min_member() {
        let plugin = GangPlugin;
        assert_eq!(plugin.job_ready(&job(2, 3, 1)), Some(false));
        assert_eq!(plugin.job_ready(&job(2, 3, 2)), Some(true));
        // min_member zero means any progress is enough
        assert_eq!(plugin.job_ready(&job(0, 2, 0)), Some(true));
    }

    #[test]
    fn test_preemptable_protects_gang_floor() {
        let plugin = GangPlugin;
        let preemptor = job(1, 1, 0);

        let mut state = SessionState::default();
        // Victim gang: min 2, 3 running tasks -> exactly one may go.
        let mut victim_job = JobInfo::shell(JobId::new("c1/victims"), "c1", "victims");
        victim_job.min_member = 2;
        for i in 0..3 {
            let pod = build_pod("c1", &format!("v{}", i), "n1", "Running", "1", "1G", "victims");
            victim_job.add_task(TaskInfo::from_pod(&pod).unwrap());
        }
        let candidates: Vec<TaskInfo> = victim_job.tasks.values().cloned().collect();
        state.jobs.insert(victim_job.uid.clone(), victim_job);

        let refs: Vec<&TaskInfo> = candidates.iter().collect();
        let allowed = plugin.preemptable(&preemptor, &refs, &state).unwrap();
        assert_eq!(allowed.len(), 1);
    }
}

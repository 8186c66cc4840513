use crate::api::{JobInfo, TaskInfo};
use crate::framework::{AllocationEvent, Plugin, SessionState};
use convoy_core::{JobId, Resource, TaskId, TaskStatus};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Dominant Resource Fairness: jobs (and namespaces) with the smaller
/// dominant share of the cluster sort first. Shares update incrementally as
/// the pass allocates and evicts.
#[derive(Default)]
pub struct DrfPlugin {
    total: Resource,
    allocated: HashMap<JobId, Resource>,
    shares: HashMap<JobId, f64>,
    ns_allocated: HashMap<String, Resource>,
    ns_shares: HashMap<String, f64>,
}

impl DrfPlugin {
    fn share_of(&self, job: &JobId) -> f64 {
        self.shares.get(job).copied().unwrap_or(0.0)
    }

    fn ns_share_of(&self, namespace: &str) -> f64 {
        self.ns_shares.get(namespace).copied().unwrap_or(0.0)
    }

    fn refresh(&mut self, job: &JobId, namespace: &str) {
        let share = self
            .allocated
            .get(job)
            .map(|r| r.dominant_share(&self.total))
            .unwrap_or(0.0);
        self.shares.insert(job.clone(), share);

        let ns_share = self
            .ns_allocated
            .get(namespace)
            .map(|r| r.dominant_share(&self.total))
            .unwrap_or(0.0);
        self.ns_shares.insert(namespace.to_string(), ns_share);
    }

    fn counts(status: TaskStatus) -> bool {
        status.occupies_node() || status == TaskStatus::Pipelined
    }
}

impl Plugin for DrfPlugin {
    fn name(&self) -> &'static str {
        "drf"
    }

    fn on_session_open(&mut self, state: &SessionState) {
        self.total = state.total.clone();
        for job in state.jobs.values() {
            let mut held = Resource::empty();
            for task in job.tasks.values() {
                if Self::counts(task.status) {
                    held.add(&task.res_req);
                }
            }
            self.ns_allocated
                .entry(job.namespace.clone())
                .or_default()
                .add(&held);
            self.allocated.insert(job.uid.clone(), held);
            self.refresh(&job.uid, &job.namespace);
        }
    }

    fn job_order(&self, a: &JobInfo, b: &JobInfo) -> Option<Ordering> {
        self.share_of(&a.uid).partial_cmp(&self.share_of(&b.uid))
    }

    fn namespace_order(&self, a: &str, b: &str) -> Option<Ordering> {
        self.ns_share_of(a).partial_cmp(&self.ns_share_of(b))
    }

    fn preemptable(
        &self,
        preemptor: &JobInfo,
        candidates: &[&TaskInfo],
        state: &SessionState,
    ) -> Option<Vec<TaskId>> {
        // Preempting is fair only from jobs holding a larger dominant share.
        let preemptor_share = self.share_of(&preemptor.uid);
        let allowed = candidates
            .iter()
            .filter(|t| state.jobs.contains_key(&t.job))
            .filter(|t| self.share_of(&t.job) > preemptor_share)
            .map(|t| t.uid.clone())
            .collect();
        Some(allowed)
    }

    fn on_allocate(&mut self, event: &AllocationEvent, state: &SessionState) {
        let Some(job) = state.jobs.get(&event.job) else {
            return;
        };
        self.allocated
            .entry(event.job.clone())
            .or_default()
            .add(&event.res_req);
        self.ns_allocated
            .entry(job.namespace.clone())
            .or_default()
            .add(&event.res_req);
        self.refresh(&event.job, &job.namespace);
    }

    fn on_deallocate(&mut self, event: &AllocationEvent, state: &SessionState) {
        let Some(job) = state.jobs.get(&event.job) else {
            return;
        };
        if let Some(held) = self.allocated.get_mut(&event.job) {
            held.sub(&event.res_req);
        }
        if let Some(held) = self.ns_allocated.get_mut(&job.namespace) {
            held.sub(&event.res_req);
        }
        self.refresh(&event.job, &job.namespace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{NodeInfo, TaskInfo};
    use crate::cache::test_util::{build_node, build_pod};

    fn state_with_jobs(specs: &[(&str, &[(&str, &str, TaskStatus)])]) -> SessionState {
        let mut state = SessionState::default();
        let node = NodeInfo::from_node(&build_node("n1", "10", "10G")).unwrap();
        state.total = node.allocatable.clone();
        state.nodes.insert("n1".to_string(), node);

        for (group, tasks) in specs {
            let uid = JobId::new(format!("c1/{}", group));
            let mut job = crate::api::JobInfo::shell(uid.clone(), "c1", group);
            for (name, cpu, status) in *tasks {
                let pod = build_pod("c1", name, "", "Pending", cpu, "1G", group);
                let mut task = TaskInfo::from_pod(&pod).unwrap();
                task.status = *status;
                job.add_task(task);
            }
            state.jobs.insert(uid, job);
        }
        state
    }

    #[test]
    fn test_smaller_dominant_share_sorts_first() {
        let state = state_with_jobs(&[
            ("pg1", &[("p1", "4", TaskStatus::Running)]),
            ("pg2", &[("p2", "1", TaskStatus::Running)]),
        ]);

        let mut plugin = DrfPlugin::default();
        plugin.on_session_open(&state);

        let a = &state.jobs[&JobId::new("c1/pg1")];
        let b = &state.jobs[&JobId::new("c1/pg2")];
        assert_eq!(plugin.job_order(a, b), Some(Ordering::Greater));
        assert_eq!(plugin.job_order(b, a), Some(Ordering::Less));
    }

    #[test]
    fn test_share_updates_on_allocate_and_deallocate() {
        let state = state_with_jobs(&[
            ("pg1", &[("p1", "2", TaskStatus::Pending)]),
            ("pg2", &[("p2", "1", TaskStatus::Pending)]),
        ]);

        let mut plugin = DrfPlugin::default();
        plugin.on_session_open(&state);
        assert_eq!(plugin.share_of(&JobId::new("c1/pg1")), 0.0);

        let event = AllocationEvent {
            task: TaskId::new("c1/p1"),
            job: JobId::new("c1/pg1"),
            node: "n1".to_string(),
            res_req: Resource::new(2000, 1_000_000_000),
        };
        plugin.on_allocate(&event, &state);
        assert!((plugin.share_of(&JobId::new("c1/pg1")) - 0.2).abs() < 1e-9);

        plugin.on_deallocate(&event, &state);
        assert_eq!(plugin.share_of(&JobId::new("c1/pg1")), 0.0);
    }
}

use super::TaskInfo;
use crate::error::{Result, SchedulerError};
use convoy_core::objects::PodGroup;
use convoy_core::{JobId, PodGroupPhase, QueueId, Resource, TaskId, TaskStatus};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A gang of tasks: the scheduler-side view of a PodGroup
#[derive(Debug, Clone, Default)]
pub struct JobInfo {
    pub uid: JobId,
    pub name: String,
    pub namespace: String,
    pub queue: QueueId,
    /// Non-empty subgroup links this job into a super-gang within its queue
    pub sub_group: String,
    /// Minimum tasks that must fit simultaneously for the gang to be ready
    pub min_member: u32,
    pub min_resources: Option<Resource>,
    pub priority: i32,
    pub phase: PodGroupPhase,
    pub creation_timestamp: i64,
    /// Whether the PodGroup object itself has been observed yet
    pub has_pod_group: bool,
    pub tasks: BTreeMap<TaskId, TaskInfo>,
    /// Task ids indexed by status; kept in lockstep with `tasks`
    pub status_index: HashMap<TaskStatus, BTreeSet<TaskId>>,
}

impl JobInfo {
    /// A shell job created from a pod observed before its PodGroup
    pub fn shell(uid: JobId, namespace: &str, name: &str) -> Self {
        Self {
            uid,
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }

    /// Fill job attributes from the PodGroup object
    pub fn set_pod_group(&mut self, pg: &PodGroup, priority: i32) -> Result<()> {
        self.name = pg.metadata.name.clone();
        self.namespace = pg.metadata.namespace.clone();
        self.queue = QueueId::new(pg.spec.queue.clone());
        self.sub_group = pg.spec.sub_group.clone();
        self.min_member = pg.spec.min_member;
        self.min_resources = match &pg.spec.min_resources {
            Some(list) => Some(Resource::from_resource_list(list)?),
            None => None,
        };
        self.priority = priority;
        self.phase = PodGroupPhase::parse(&pg.status.phase);
        self.creation_timestamp = pg.metadata.creation_timestamp;
        self.has_pod_group = true;
        Ok(())
    }

    pub fn add_task(&mut self, task: TaskInfo) {
        self.status_index
            .entry(task.status)
            .or_default()
            .insert(task.uid.clone());
        self.tasks.insert(task.uid.clone(), task);
    }

    pub fn remove_task(&mut self, uid: &TaskId) -> Option<TaskInfo> {
        let task = self.tasks.remove(uid)?;
        if let Some(set) = self.status_index.get_mut(&task.status) {
            set.remove(uid);
        }
        Some(task)
    }

    /// Move a task to a new status, keeping the index consistent
    pub fn update_task_status(&mut self, uid: &TaskId, status: TaskStatus) -> Result<()> {
        let task = self.tasks.get_mut(uid).ok_or_else(|| {
            SchedulerError::invalid_operation(
                self.uid.clone(),
                format!("task {} not found in job", uid),
            )
        })?;

        let old = task.status;
        task.status = status;
        if let Some(set) = self.status_index.get_mut(&old) {
            set.remove(uid);
        }
        self.status_index
            .entry(status)
            .or_default()
            .insert(uid.clone());
        Ok(())
    }

    /// Number of tasks in a status that counts toward gang readiness
    pub fn ready_task_num(&self) -> u32 {
        self.status_index
            .iter()
            .filter(|(status, _)| status.counts_as_ready())
            .map(|(_, set)| set.len() as u32)
            .sum()
    }

    /// Pending task ids, in id order
    pub fn pending_tasks(&self) -> Vec<TaskId> {
        self.status_index
            .get(&TaskStatus::Pending)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Task ids currently in the given status
    pub fn tasks_in(&self, status: TaskStatus) -> Vec<TaskId> {
        self.status_index
            .get(&status)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Sum of all task requests
    pub fn total_request(&self) -> Resource {
        let mut total = Resource::empty();
        for task in self.tasks.values() {
            total.add(&task.res_req);
        }
        total
    }

    /// `namespace/name`, the key used for events and status updates
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::test_util::build_pod;

    fn job_with_tasks(n: usize) -> JobInfo {
        let mut job = JobInfo::shell(JobId::new("c1/pg1"), "c1", "pg1");
        for i in 0..n {
            let pod = build_pod("c1", &format!("p{}", i), "", "Pending", "1", "1G", "pg1");
            job.add_task(TaskInfo::from_pod(&pod).unwrap());
        }
        job
    }

    #[test]
    fn test_status_index_tracks_updates() {
        let mut job = job_with_tasks(2);
        assert_eq!(job.pending_tasks().len(), 2);
        assert_eq!(job.ready_task_num(), 0);

        let first = job.pending_tasks()[0].clone();
        job.update_task_status(&first, TaskStatus::Allocated).unwrap();

        assert_eq!(job.pending_tasks().len(), 1);
        assert_eq!(job.ready_task_num(), 1);
        assert_eq!(job.tasks_in(TaskStatus::Allocated), vec![first]);
    }

    #[test]
    fn test_total_request() {
        let job = job_with_tasks(3);
        let total = job.total_request();
        assert_eq!(total.milli_cpu, 3000);
        assert_eq!(total.memory, 3_000_000_000);
    }

    #[test]
    fn test_remove_task() {
        let mut job = job_with_tasks(2);
        let first = job.pending_tasks()[0].clone();
        assert!(job.remove_task(&first).is_some());
        assert_eq!(job.tasks.len(), 1);
        assert_eq!(job.pending_tasks().len(), 1);
    }

    #[test]
    fn test_update_unknown_task_fails() {
        let mut job = job_with_tasks(1);
        let missing = TaskId::new("nope");
        assert!(job.update_task_status(&missing, TaskStatus::Bound).is_err());
    }
}

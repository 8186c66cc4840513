use crate::error::{Result, SchedulerError};
use convoy_core::objects::{Pod, Toleration};
use convoy_core::{JobId, Resource, TaskId, TaskStatus, PREEMPTABLE_ANNOTATION};
use std::collections::BTreeMap;

/// One schedulable unit: the scheduler-side view of a Pod
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInfo {
    pub uid: TaskId,
    /// The job this task belongs to
    pub job: JobId,
    pub name: String,
    pub namespace: String,
    pub status: TaskStatus,
    pub res_req: Resource,
    /// Node the task is placed on, if any
    pub node_name: Option<String>,
    pub priority: i32,
    pub preemptable: bool,
    pub node_selector: BTreeMap<String, String>,
    pub tolerations: Vec<Toleration>,
    pub creation_timestamp: i64,
}

impl TaskInfo {
    /// Build a task from a Pod. Fails when the pod carries no group-name
    /// annotation; such pods are not gang-scheduled here.
    pub fn from_pod(pod: &Pod) -> Result<Self> {
        let group = pod.group_name().ok_or_else(|| {
            SchedulerError::conflict(
                format!("Pod/{}/{}", pod.metadata.namespace, pod.metadata.name),
                "pod has no group-name annotation",
            )
        })?;

        let mut res_req = Resource::empty();
        for container in &pod.spec.containers {
            res_req.add(&Resource::from_resource_list(&container.requests)?);
        }

        let uid = if pod.metadata.uid.is_empty() {
            format!("{}/{}", pod.metadata.namespace, pod.metadata.name)
        } else {
            pod.metadata.uid.clone()
        };

        let preemptable = pod
            .metadata
            .annotations
            .get(PREEMPTABLE_ANNOTATION)
            .map(|v| v != "false")
            .unwrap_or(true);

        Ok(Self {
            uid: TaskId::new(uid),
            job: JobId::new(format!("{}/{}", pod.metadata.namespace, group)),
            name: pod.metadata.name.clone(),
            namespace: pod.metadata.namespace.clone(),
            status: status_from_pod(pod),
            res_req,
            node_name: pod.spec.node_name.clone().filter(|n| !n.is_empty()),
            priority: pod.spec.priority.unwrap_or(0),
            preemptable,
            node_selector: pod.spec.node_selector.clone(),
            tolerations: pod.spec.tolerations.clone(),
            creation_timestamp: pod.metadata.creation_timestamp,
        })
    }

    /// `namespace/name`, the key used for bindings and events
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Derive the task status from the pod's phase and assignment
fn status_from_pod(pod: &Pod) -> TaskStatus {
    if pod.metadata.deletion_timestamp.is_some() {
        return TaskStatus::Releasing;
    }

    match pod.status.phase.as_str() {
        "Running" => TaskStatus::Running,
        "Succeeded" => TaskStatus::Succeeded,
        "Failed" => TaskStatus::Failed,
        "" | "Pending" => {
            if pod.spec.node_name.as_deref().unwrap_or("").is_empty() {
                TaskStatus::Pending
            } else {
                TaskStatus::Bound
            }
        }
        _ => TaskStatus::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::test_util::build_pod;
    use convoy_core::TaskStatus;

    #[test]
    fn test_from_pod_pending() {
        let pod = build_pod("c1", "p1", "", "Pending", "1", "1G", "pg1");
        let task = TaskInfo::from_pod(&pod).unwrap();

        assert_eq!(task.job.as_str(), "c1/pg1");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.res_req.milli_cpu, 1000);
        assert_eq!(task.res_req.memory, 1_000_000_000);
        assert_eq!(task.node_name, None);
        assert!(task.preemptable);
    }

    #[test]
    fn test_from_pod_bound() {
        let pod = build_pod("c1", "p1", "n1", "Pending", "1", "1G", "pg1");
        let task = TaskInfo::from_pod(&pod).unwrap();
        assert_eq!(task.status, TaskStatus::Bound);
        assert_eq!(task.node_name.as_deref(), Some("n1"));
    }

    #[test]
    fn test_from_pod_running_and_releasing() {
        let mut pod = build_pod("c1", "p1", "n1", "Running", "1", "1G", "pg1");
        assert_eq!(
            TaskInfo::from_pod(&pod).unwrap().status,
            TaskStatus::Running
        );

        pod.metadata.deletion_timestamp = Some(1);
        assert_eq!(
            TaskInfo::from_pod(&pod).unwrap().status,
            TaskStatus::Releasing
        );
    }

    #[test]
    fn test_from_pod_without_group_fails() {
        let mut pod = build_pod("c1", "p1", "", "Pending", "1", "1G", "pg1");
        pod.metadata.annotations.clear();
        assert!(TaskInfo::from_pod(&pod).is_err());
    }

    #[test]
    fn test_preemptable_annotation() {
        let mut pod = build_pod("c1", "p1", "", "Pending", "1", "1G", "pg1");
        pod.metadata.annotations.insert(
            PREEMPTABLE_ANNOTATION.to_string(),
            "false".to_string(),
        );
        assert!(!TaskInfo::from_pod(&pod).unwrap().preemptable);
    }
}

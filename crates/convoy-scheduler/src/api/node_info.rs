use super::TaskInfo;
use crate::error::{Result, SchedulerError};
use convoy_core::objects::{Node, Taint};
use convoy_core::{Resource, TaskId, TaskStatus};
use std::collections::BTreeMap;
use tracing::warn;

/// A worker machine: the scheduler-side view of a Node.
///
/// `idle = allocatable - used` is used for admission; `idle + releasing` for
/// pipelining behind terminating pods.
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    pub name: String,
    pub allocatable: Resource,
    pub used: Resource,
    /// Resources of pods marked for termination but not yet gone
    pub releasing: Resource,
    pub idle: Resource,
    /// Requests of tasks placed on this node
    pub tasks: BTreeMap<TaskId, Resource>,
    pub labels: BTreeMap<String, String>,
    pub taints: Vec<Taint>,
}

impl NodeInfo {
    pub fn from_node(node: &Node) -> Result<Self> {
        let allocatable = Resource::from_resource_list(&node.allocatable)?;
        Ok(Self {
            name: node.metadata.name.clone(),
            idle: allocatable.clone(),
            allocatable,
            used: Resource::empty(),
            releasing: Resource::empty(),
            tasks: BTreeMap::new(),
            labels: node.metadata.labels.clone(),
            taints: node.taints.clone(),
        })
    }

    /// Resources that are or will shortly be available
    pub fn future_idle(&self) -> Resource {
        let mut future = self.idle.clone();
        future.add(&self.releasing);
        future
    }

    /// Account for a task observed on this node (cache ingest path)
    pub fn add_task(&mut self, task: &TaskInfo) -> Result<()> {
        if self.tasks.contains_key(&task.uid) {
            return Ok(());
        }

        match task.status {
            s if s.occupies_node() => self.occupy(task)?,
            TaskStatus::Releasing => {
                self.occupy(task)?;
                self.releasing.add(&task.res_req);
            }
            _ => return Ok(()),
        }
        Ok(())
    }

    /// Remove a task observed leaving this node
    pub fn remove_task(&mut self, uid: &TaskId, status: TaskStatus) {
        let Some(req) = self.tasks.remove(uid) else {
            return;
        };
        match status {
            s if s.occupies_node() => {
                self.used.sub(&req);
                self.idle.add(&req);
            }
            TaskStatus::Releasing => {
                self.used.sub(&req);
                self.idle.add(&req);
                self.releasing.sub(&req);
            }
            TaskStatus::Pipelined => {
                self.releasing.add(&req);
            }
            _ => {}
        }
    }

    /// Tentatively place a task; the caller has verified `res_req <= idle`
    pub fn allocate(&mut self, task: &TaskInfo) -> Result<()> {
        self.occupy(task)
    }

    /// Undo a tentative placement
    pub fn deallocate(&mut self, task: &TaskInfo) {
        if self.tasks.remove(&task.uid).is_some() {
            self.used.sub(&task.res_req);
            self.idle.add(&task.res_req);
        }
    }

    /// Place a task against resources that are being released
    pub fn pipeline(&mut self, task: &TaskInfo) {
        self.releasing.sub(&task.res_req);
        self.tasks.insert(task.uid.clone(), task.res_req.clone());
    }

    /// Undo a pipeline placement
    pub fn unpipeline(&mut self, task: &TaskInfo) {
        if self.tasks.remove(&task.uid).is_some() {
            self.releasing.add(&task.res_req);
        }
    }

    /// Mark a placed task's resources as releasing. The task keeps holding
    /// its share of `used`/`idle` until the pod is actually gone; the
    /// releasing bucket records that the capacity frees up shortly.
    pub fn evict(&mut self, uid: &TaskId) {
        if let Some(req) = self.tasks.get(uid).cloned() {
            self.releasing.add(&req);
        }
    }

    /// Undo an eviction
    pub fn unevict(&mut self, uid: &TaskId) {
        if let Some(req) = self.tasks.get(uid).cloned() {
            self.releasing.sub(&req);
        }
    }

    fn occupy(&mut self, task: &TaskInfo) -> Result<()> {
        if !task.res_req.less_equal(&self.idle) {
            // The cluster can legitimately report pods that overshoot the
            // node under external over-commit; keep accounting consistent.
            warn!(
                node = %self.name,
                task = %task.uid,
                "task request exceeds idle resources on node"
            );
        }
        if !task.res_req.less_equal(&self.allocatable) {
            return Err(SchedulerError::internal(format!(
                "task {} request exceeds allocatable of node {}",
                task.uid, self.name
            )));
        }
        self.used.add(&task.res_req);
        self.idle.sub(&task.res_req);
        self.tasks.insert(task.uid.clone(), task.res_req.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TaskInfo;
    use crate::cache::test_util::{build_node, build_pod};

    fn node(cpu: &str, mem: &str) -> NodeInfo {
        NodeInfo::from_node(&build_node("n1", cpu, mem)).unwrap()
    }

    fn task(name: &str, cpu: &str, mem: &str) -> TaskInfo {
        TaskInfo::from_pod(&build_pod("c1", name, "", "Pending", cpu, mem, "pg1")).unwrap()
    }

    #[test]
    fn test_allocate_and_deallocate() {
        let mut n = node("2", "4Gi");
        let t = task("p1", "1", "1Gi");

        n.allocate(&t).unwrap();
        assert_eq!(n.idle.milli_cpu, 1000);
        assert_eq!(n.used.milli_cpu, 1000);

        n.deallocate(&t);
        assert_eq!(n.idle.milli_cpu, 2000);
        assert!(n.used.is_empty());
        assert!(n.tasks.is_empty());
    }

    #[test]
    fn test_evict_moves_to_releasing() {
        let mut n = node("2", "4Gi");
        let t = task("p1", "1", "1Gi");
        n.allocate(&t).unwrap();

        n.evict(&t.uid);
        assert_eq!(n.idle.milli_cpu, 1000);
        assert_eq!(n.used.milli_cpu, 1000);
        assert_eq!(n.releasing.milli_cpu, 1000);
        assert_eq!(n.future_idle().milli_cpu, 2000);

        n.unevict(&t.uid);
        assert_eq!(n.idle.milli_cpu, 1000);
        assert!(n.releasing.is_empty());
    }

    #[test]
    fn test_pipeline_consumes_releasing() {
        let mut n = node("2", "4Gi");
        let victim = task("p1", "1", "1Gi");
        n.allocate(&victim).unwrap();
        n.evict(&victim.uid);

        let incoming = task("p2", "1", "1Gi");
        n.pipeline(&incoming);
        assert!(n.releasing.is_empty());

        n.unpipeline(&incoming);
        assert_eq!(n.releasing.milli_cpu, 1000);
    }

    #[test]
    fn test_add_task_over_allocatable_is_error() {
        let mut n = node("1", "1Gi");
        let t = task("p1", "2", "2Gi");
        assert!(n.add_task(&t).is_err());
    }
}

use super::plugin::{AllocationEvent, Plugin};
use crate::api::{JobInfo, NodeInfo, QueueInfo, Snapshot, TaskInfo};
use crate::cache::SchedulerCache;
use crate::conf::{enabled, ActionConf, PluginOption, SchedulerConf, SchedulerOpts};
use crate::error::{Result, SchedulerError};
use crate::plugins;
use convoy_core::{
    EventType, JobId, PodGroupPhase, QueueId, RecordedEvent, Resource, TaskId, TaskStatus,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// The mutable per-pass view actions operate on
#[derive(Debug, Default)]
pub struct SessionState {
    pub jobs: BTreeMap<JobId, JobInfo>,
    pub nodes: BTreeMap<String, NodeInfo>,
    pub queues: BTreeMap<QueueId, QueueInfo>,
    /// Sum of allocatable resources across all nodes
    pub total: Resource,
}

struct PluginSlot {
    option: PluginOption,
    plugin: Box<dyn Plugin>,
}

/// A tentative session operation, kept per initiating job so a gang that
/// cannot be made ready unwinds without a trace.
#[derive(Debug, Clone)]
pub enum Operation {
    Allocate {
        task: TaskId,
        job: JobId,
        node: String,
    },
    Pipeline {
        task: TaskId,
        job: JobId,
        node: String,
    },
    Evict {
        task: TaskId,
        victim_job: JobId,
        node: String,
        prev_status: TaskStatus,
        reason: String,
    },
}

/// A per-pass scheduling session: an owned snapshot, the instantiated plugin
/// tiers, and the tentative decisions made by actions. Born at open, sealed
/// at close, never shared across passes.
pub struct Session {
    pub pass: u64,
    pub opts: SchedulerOpts,
    pub state: SessionState,
    conf: SchedulerConf,
    tiers: Vec<Vec<PluginSlot>>,
    stmts: HashMap<JobId, Vec<Operation>>,
    committed: Vec<Operation>,
    phase_updates: BTreeMap<JobId, PodGroupPhase>,
    events: Vec<RecordedEvent>,
}

impl Session {
    /// Open a session over a snapshot with the configured plugin tiers
    pub fn open(
        snapshot: Snapshot,
        conf: &SchedulerConf,
        opts: SchedulerOpts,
        pass: u64,
    ) -> Result<Self> {
        let mut tiers = Vec::with_capacity(conf.tiers.len());
        for tier in &conf.tiers {
            let mut slots = Vec::with_capacity(tier.plugins.len());
            for option in &tier.plugins {
                let plugin =
                    plugins::new_plugin(&option.name).ok_or(SchedulerError::UnknownPlugin {
                        name: option.name.clone(),
                    })?;
                slots.push(PluginSlot {
                    option: option.clone(),
                    plugin,
                });
            }
            tiers.push(slots);
        }

        let total = snapshot.total_allocatable();
        let state = SessionState {
            jobs: snapshot.jobs,
            nodes: snapshot.nodes,
            queues: snapshot.queues,
            total,
        };

        let mut session = Self {
            pass,
            opts,
            state,
            conf: conf.clone(),
            tiers,
            stmts: HashMap::new(),
            committed: Vec::new(),
            phase_updates: BTreeMap::new(),
            events: Vec::new(),
        };

        let Session { tiers, state, .. } = &mut session;
        for tier in tiers.iter_mut() {
            for slot in tier.iter_mut() {
                slot.plugin.on_session_open(state);
            }
        }

        debug!(
            pass,
            jobs = session.state.jobs.len(),
            nodes = session.state.nodes.len(),
            queues = session.state.queues.len(),
            "session opened"
        );
        Ok(session)
    }

    /// Arguments configured for an action, if any
    pub fn action_args(&self, action: &str) -> Option<&ActionConf> {
        self.conf.action_args(action)
    }

    // --- Composed comparator points ---

    /// First non-equal plugin answer across tiers; ties break on creation
    /// time, then stable id.
    pub fn job_order(&self, a: &JobInfo, b: &JobInfo) -> Ordering {
        for tier in &self.tiers {
            for slot in tier {
                if !enabled(&slot.option.enabled_job_order) {
                    continue;
                }
                if let Some(order) = slot.plugin.job_order(a, b) {
                    if order != Ordering::Equal {
                        return order;
                    }
                }
            }
        }
        a.creation_timestamp
            .cmp(&b.creation_timestamp)
            .then_with(|| a.uid.cmp(&b.uid))
    }

    pub fn task_order(&self, a: &TaskInfo, b: &TaskInfo) -> Ordering {
        for tier in &self.tiers {
            for slot in tier {
                if !enabled(&slot.option.enabled_task_order) {
                    continue;
                }
                if let Some(order) = slot.plugin.task_order(a, b) {
                    if order != Ordering::Equal {
                        return order;
                    }
                }
            }
        }
        a.creation_timestamp
            .cmp(&b.creation_timestamp)
            .then_with(|| a.uid.cmp(&b.uid))
    }

    pub fn queue_order(&self, a: &QueueInfo, b: &QueueInfo) -> Ordering {
        for tier in &self.tiers {
            for slot in tier {
                if !enabled(&slot.option.enabled_queue_order) {
                    continue;
                }
                if let Some(order) = slot.plugin.queue_order(a, b, &self.state) {
                    if order != Ordering::Equal {
                        return order;
                    }
                }
            }
        }
        a.name.cmp(&b.name)
    }

    pub fn namespace_order(&self, a: &str, b: &str) -> Ordering {
        for tier in &self.tiers {
            for slot in tier {
                if !enabled(&slot.option.enabled_namespace_order) {
                    continue;
                }
                if let Some(order) = slot.plugin.namespace_order(a, b) {
                    if order != Ordering::Equal {
                        return order;
                    }
                }
            }
        }
        a.cmp(b)
    }

    // --- Composed guard points ---

    /// Logical AND of every enabled predicate, short-circuiting in tier order
    pub fn predicates(&self, task: &TaskInfo, node: &NodeInfo) -> std::result::Result<(), String> {
        for tier in &self.tiers {
            for slot in tier {
                if !enabled(&slot.option.enabled_predicate) {
                    continue;
                }
                slot.plugin.predicate(task, node)?;
            }
        }
        Ok(())
    }

    /// Sum of enabled node scores across all tiers
    pub fn node_score(&self, task: &TaskInfo, node: &NodeInfo) -> f64 {
        let mut score = 0.0;
        for tier in &self.tiers {
            for slot in tier {
                if enabled(&slot.option.enabled_node_order) {
                    score += slot.plugin.node_order(task, node);
                }
            }
        }
        score
    }

    pub fn job_ready(&self, job: &JobInfo) -> bool {
        self.all_answers(
            |slot| enabled(&slot.option.enabled_job_ready),
            |slot| slot.plugin.job_ready(job),
        )
    }

    pub fn job_pipelined(&self, job: &JobInfo) -> bool {
        self.all_answers(
            |slot| enabled(&slot.option.enabled_job_pipelined),
            |slot| slot.plugin.job_pipelined(job, &self.state),
        )
    }

    pub fn job_enqueueable(&self, job: &JobInfo) -> bool {
        self.all_answers(
            |slot| enabled(&slot.option.enabled_job_enqueueable),
            |slot| slot.plugin.job_enqueueable(job, &self.state),
        )
    }

    /// First invalid answer across tiers wins
    pub fn job_valid(&self, job: &JobInfo) -> std::result::Result<(), String> {
        for tier in &self.tiers {
            for slot in tier {
                if !enabled(&slot.option.enabled_job_valid) {
                    continue;
                }
                if let Some(verdict) = slot.plugin.job_valid(job) {
                    verdict?;
                }
            }
        }
        Ok(())
    }

    /// Whether any plugin considers the queue over its deserved share
    pub fn overused(&self, queue: &QueueInfo) -> bool {
        self.tiers.iter().flatten().any(|slot| {
            slot.plugin.overused(queue, &self.state)
        })
    }

    /// Whether every plugin allows the queue to take on `candidate` more
    pub fn queue_allocatable(&self, queue: &QueueInfo, candidate: &Resource) -> bool {
        self.tiers
            .iter()
            .flatten()
            .all(|slot| slot.plugin.allocatable(queue, candidate, &self.state))
    }

    /// Victims that may be preempted on behalf of `preemptor`. Within a
    /// tier, plugin answers intersect; the first tier answering wins.
    pub fn preemptable(&self, preemptor: &JobInfo, candidates: &[&TaskInfo]) -> Vec<TaskId> {
        self.select_victims(candidates, |slot, candidates| {
            if !enabled(&slot.option.enabled_preemptable) {
                return None;
            }
            slot.plugin.preemptable(preemptor, candidates, &self.state)
        })
    }

    /// Victims that may be reclaimed on behalf of `reclaimer`
    pub fn reclaimable(&self, reclaimer: &JobInfo, candidates: &[&TaskInfo]) -> Vec<TaskId> {
        self.select_victims(candidates, |slot, candidates| {
            if !enabled(&slot.option.enabled_reclaimable) {
                return None;
            }
            slot.plugin.reclaimable(reclaimer, candidates, &self.state)
        })
    }

    fn select_victims(
        &self,
        candidates: &[&TaskInfo],
        ask: impl Fn(&PluginSlot, &[&TaskInfo]) -> Option<Vec<TaskId>>,
    ) -> Vec<TaskId> {
        for tier in &self.tiers {
            let mut answered = false;
            let mut allowed: Vec<TaskId> = candidates.iter().map(|t| t.uid.clone()).collect();
            for slot in tier {
                if let Some(victims) = ask(slot, candidates) {
                    answered = true;
                    allowed.retain(|id| victims.contains(id));
                }
            }
            if answered {
                return allowed;
            }
        }
        Vec::new()
    }

    fn all_answers(
        &self,
        gate: impl Fn(&PluginSlot) -> bool,
        ask: impl Fn(&PluginSlot) -> Option<bool>,
    ) -> bool {
        for tier in &self.tiers {
            for slot in tier {
                if !gate(slot) {
                    continue;
                }
                if let Some(false) = ask(slot) {
                    return false;
                }
            }
        }
        true
    }

    // --- Session state operations ---

    /// Tentatively place a pending task on a node with idle headroom
    pub fn allocate(&mut self, job_id: &JobId, task_id: &TaskId, node_name: &str) -> Result<()> {
        let SessionState { jobs, nodes, .. } = &mut self.state;
        let job = jobs.get_mut(job_id).ok_or_else(|| {
            SchedulerError::invalid_operation(job_id.clone(), "job not in session")
        })?;
        let task = job
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| SchedulerError::invalid_operation(job_id.clone(), "task not in job"))?;
        if task.status != TaskStatus::Pending {
            return Err(SchedulerError::invalid_operation(
                job_id.clone(),
                format!("allocate on {} task {}", task.status, task_id),
            ));
        }
        let node = nodes.get_mut(node_name).ok_or_else(|| {
            SchedulerError::invalid_operation(job_id.clone(), format!("unknown node {}", node_name))
        })?;
        if !task.res_req.less_equal(&node.idle) {
            return Err(SchedulerError::invalid_operation(
                job_id.clone(),
                format!("task {} does not fit idle of node {}", task_id, node_name),
            ));
        }

        node.allocate(&task)?;
        job.update_task_status(task_id, TaskStatus::Allocated)?;
        if let Some(stored) = job.tasks.get_mut(task_id) {
            stored.node_name = Some(node_name.to_string());
        }

        self.stmts
            .entry(job_id.clone())
            .or_default()
            .push(Operation::Allocate {
                task: task_id.clone(),
                job: job_id.clone(),
                node: node_name.to_string(),
            });
        self.notify_allocate(&AllocationEvent {
            task: task_id.clone(),
            job: job_id.clone(),
            node: node_name.to_string(),
            res_req: task.res_req,
        });
        Ok(())
    }

    /// Place a pending task against idle-plus-releasing headroom; used when
    /// room is being made by evictions.
    pub fn pipeline(&mut self, job_id: &JobId, task_id: &TaskId, node_name: &str) -> Result<()> {
        let SessionState { jobs, nodes, .. } = &mut self.state;
        let job = jobs.get_mut(job_id).ok_or_else(|| {
            SchedulerError::invalid_operation(job_id.clone(), "job not in session")
        })?;
        let task = job
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| SchedulerError::invalid_operation(job_id.clone(), "task not in job"))?;
        if task.status != TaskStatus::Pending {
            return Err(SchedulerError::invalid_operation(
                job_id.clone(),
                format!("pipeline on {} task {}", task.status, task_id),
            ));
        }
        let node = nodes.get_mut(node_name).ok_or_else(|| {
            SchedulerError::invalid_operation(job_id.clone(), format!("unknown node {}", node_name))
        })?;
        if !task.res_req.less_equal(&node.future_idle()) {
            return Err(SchedulerError::invalid_operation(
                job_id.clone(),
                format!(
                    "task {} does not fit future idle of node {}",
                    task_id, node_name
                ),
            ));
        }

        node.pipeline(&task);
        job.update_task_status(task_id, TaskStatus::Pipelined)?;
        if let Some(stored) = job.tasks.get_mut(task_id) {
            stored.node_name = Some(node_name.to_string());
        }

        self.stmts
            .entry(job_id.clone())
            .or_default()
            .push(Operation::Pipeline {
                task: task_id.clone(),
                job: job_id.clone(),
                node: node_name.to_string(),
            });
        self.notify_allocate(&AllocationEvent {
            task: task_id.clone(),
            job: job_id.clone(),
            node: node_name.to_string(),
            res_req: task.res_req,
        });
        Ok(())
    }

    /// Tentatively evict a placed task on behalf of another job
    pub fn evict(
        &mut self,
        victim_job: &JobId,
        victim_task: &TaskId,
        on_behalf_of: &JobId,
        reason: &str,
    ) -> Result<()> {
        let SessionState { jobs, nodes, .. } = &mut self.state;
        let job = jobs.get_mut(victim_job).ok_or_else(|| {
            SchedulerError::invalid_operation(victim_job.clone(), "job not in session")
        })?;
        let task = job.tasks.get(victim_task).cloned().ok_or_else(|| {
            SchedulerError::invalid_operation(victim_job.clone(), "task not in job")
        })?;
        if !task.status.occupies_node() {
            return Err(SchedulerError::invalid_operation(
                victim_job.clone(),
                format!("evict on {} task {}", task.status, victim_task),
            ));
        }
        let node_name = task.node_name.clone().ok_or_else(|| {
            SchedulerError::internal(format!("bound task {} has no node", victim_task))
        })?;

        if let Some(node) = nodes.get_mut(&node_name) {
            node.evict(victim_task);
        }
        job.update_task_status(victim_task, TaskStatus::Releasing)?;

        self.stmts
            .entry(on_behalf_of.clone())
            .or_default()
            .push(Operation::Evict {
                task: victim_task.clone(),
                victim_job: victim_job.clone(),
                node: node_name.clone(),
                prev_status: task.status,
                reason: reason.to_string(),
            });
        self.notify_deallocate(&AllocationEvent {
            task: victim_task.clone(),
            job: victim_job.clone(),
            node: node_name,
            res_req: task.res_req,
        });
        Ok(())
    }

    /// Emit an event and leave the task pending
    pub fn backoff_task(&mut self, task: &TaskInfo, reason: &str, message: impl Into<String>) {
        self.events.push(RecordedEvent::warning(
            format!("Pod/{}", task.key()),
            reason,
            message,
        ));
    }

    /// Record an event against an object
    pub fn record_event(
        &mut self,
        event_type: EventType,
        object: impl Into<String>,
        reason: &str,
        message: impl Into<String>,
    ) {
        let object = object.into();
        let message = message.into();
        self.events.push(match event_type {
            EventType::Warning => RecordedEvent::warning(object, reason, message),
            EventType::Normal => RecordedEvent::normal(object, reason, message),
        });
    }

    /// Whether the job has uncommitted tentative operations
    pub fn has_pending_ops(&self, job_id: &JobId) -> bool {
        self.stmts.get(job_id).is_some_and(|ops| !ops.is_empty())
    }

    /// Keep the job's tentative operations for flushing at close
    pub fn commit_job(&mut self, job_id: &JobId) {
        if let Some(ops) = self.stmts.remove(job_id) {
            self.committed.extend(ops);
        }
    }

    /// Unwind the job's tentative operations in reverse order
    pub fn discard_job(&mut self, job_id: &JobId) {
        let Some(ops) = self.stmts.remove(job_id) else {
            return;
        };
        for op in ops.into_iter().rev() {
            self.undo(op);
        }
    }

    /// Record a phase transition, flushed to the cache at close
    pub fn set_job_phase(&mut self, job_id: &JobId, phase: PodGroupPhase) {
        if let Some(job) = self.state.jobs.get_mut(job_id) {
            job.phase = phase;
            self.phase_updates.insert(job_id.clone(), phase);
        }
    }

    fn undo(&mut self, op: Operation) {
        match op {
            Operation::Allocate { task, job, node } => {
                let SessionState { jobs, nodes, .. } = &mut self.state;
                let Some(job_info) = jobs.get_mut(&job) else {
                    return;
                };
                let Some(stored) = job_info.tasks.get(&task).cloned() else {
                    return;
                };
                if let Some(node_info) = nodes.get_mut(&node) {
                    node_info.deallocate(&stored);
                }
                let _ = job_info.update_task_status(&task, TaskStatus::Pending);
                if let Some(t) = job_info.tasks.get_mut(&task) {
                    t.node_name = None;
                }
                self.notify_deallocate(&AllocationEvent {
                    task,
                    job,
                    node,
                    res_req: stored.res_req,
                });
            }
            Operation::Pipeline { task, job, node } => {
                let SessionState { jobs, nodes, .. } = &mut self.state;
                let Some(job_info) = jobs.get_mut(&job) else {
                    return;
                };
                let Some(stored) = job_info.tasks.get(&task).cloned() else {
                    return;
                };
                if let Some(node_info) = nodes.get_mut(&node) {
                    node_info.unpipeline(&stored);
                }
                let _ = job_info.update_task_status(&task, TaskStatus::Pending);
                if let Some(t) = job_info.tasks.get_mut(&task) {
                    t.node_name = None;
                }
                self.notify_deallocate(&AllocationEvent {
                    task,
                    job,
                    node,
                    res_req: stored.res_req,
                });
            }
            Operation::Evict {
                task,
                victim_job,
                node,
                prev_status,
                ..
            } => {
                let SessionState { jobs, nodes, .. } = &mut self.state;
                let Some(job_info) = jobs.get_mut(&victim_job) else {
                    return;
                };
                let Some(stored) = job_info.tasks.get(&task).cloned() else {
                    return;
                };
                if let Some(node_info) = nodes.get_mut(&node) {
                    node_info.unevict(&task);
                }
                let _ = job_info.update_task_status(&task, prev_status);
                self.notify_allocate(&AllocationEvent {
                    task,
                    job: victim_job,
                    node,
                    res_req: stored.res_req,
                });
            }
        }
    }

    fn notify_allocate(&mut self, event: &AllocationEvent) {
        let Session { tiers, state, .. } = self;
        for tier in tiers.iter_mut() {
            for slot in tier.iter_mut() {
                slot.plugin.on_allocate(event, state);
            }
        }
    }

    fn notify_deallocate(&mut self, event: &AllocationEvent) {
        let Session { tiers, state, .. } = self;
        for tier in tiers.iter_mut() {
            for slot in tier.iter_mut() {
                slot.plugin.on_deallocate(event, state);
            }
        }
    }

    // --- Close ---

    /// Flush committed decisions to the cache, discard everything else.
    /// Never fails; individual flush errors are logged and recorded as
    /// events so the pass always completes.
    pub fn close(mut self, cache: &SchedulerCache) {
        let leftover: Vec<JobId> = self.stmts.keys().cloned().collect();
        for job_id in leftover {
            debug!(job = %job_id, "discarding uncommitted operations at close");
            self.discard_job(&job_id);
        }

        {
            let Session { tiers, state, .. } = &mut self;
            for tier in tiers.iter_mut() {
                for slot in tier.iter_mut() {
                    slot.plugin.on_session_close(state);
                }
            }
        }

        for op in std::mem::take(&mut self.committed) {
            match op {
                Operation::Allocate { task, job, node } => {
                    let Some(info) = self
                        .state
                        .jobs
                        .get(&job)
                        .and_then(|j| j.tasks.get(&task))
                        .cloned()
                    else {
                        continue;
                    };
                    if let Err(e) = cache.bind(&info, &node) {
                        warn!(task = %task, node = %node, "bind rejected: {}", e);
                        self.events.push(RecordedEvent::warning(
                            format!("Pod/{}", info.key()),
                            convoy_core::events::reasons::FAILED_SCHEDULING,
                            e.to_string(),
                        ));
                    }
                }
                Operation::Pipeline { .. } => {
                    // Pipelined placements are intent only; the next pass
                    // re-evaluates them against fresh state.
                }
                Operation::Evict {
                    task,
                    victim_job,
                    reason,
                    ..
                } => {
                    let Some(info) = self
                        .state
                        .jobs
                        .get(&victim_job)
                        .and_then(|j| j.tasks.get(&task))
                        .cloned()
                    else {
                        continue;
                    };
                    if let Err(e) = cache.evict(&info, &reason) {
                        warn!(task = %task, "evict rejected: {}", e);
                    }
                }
            }
        }

        for (job_id, phase) in std::mem::take(&mut self.phase_updates) {
            if let Err(e) = cache.update_pod_group_phase(&job_id, phase) {
                warn!(job = %job_id, "phase update rejected: {}", e);
            }
        }

        cache.record_events(std::mem::take(&mut self.events));
        debug!(pass = self.pass, "session closed");
    }
}

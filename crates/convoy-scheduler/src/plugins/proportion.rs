use crate::api::{JobInfo, QueueInfo, TaskInfo};
use crate::framework::{AllocationEvent, Plugin, SessionState};
use convoy_core::{QueueId, Resource, TaskId, TaskStatus};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default, Clone)]
struct QueueAttr {
    weight: i32,
    deserved: Resource,
    allocated: Resource,
    request: Resource,
}

/// Weighted proportional fair-share across queues.
///
/// At session open each queue's deserved share is its weighted slice of the
/// cluster, capped at what it actually requests; surplus is redistributed
/// to still-hungry queues. Queue ordering, admission capacity, and reclaim
/// eligibility all derive from deserved vs allocated.
#[derive(Default)]
pub struct ProportionPlugin {
    attrs: HashMap<QueueId, QueueAttr>,
}

impl ProportionPlugin {
    fn attr(&self, queue: &QueueId) -> Option<&QueueAttr> {
        self.attrs.get(queue)
    }

    fn share(&self, queue: &QueueId) -> f64 {
        self.attr(queue)
            .map(|a| a.allocated.dominant_share(&a.deserved))
            .unwrap_or(0.0)
    }

    fn counts(status: TaskStatus) -> bool {
        status.occupies_node() || status == TaskStatus::Pipelined
    }

    fn compute_deserved(&mut self, total: &Resource) {
        for attr in self.attrs.values_mut() {
            attr.deserved = Resource::empty();
        }

        let mut open: Vec<QueueId> = self
            .attrs
            .iter()
            .filter(|(_, a)| !a.request.is_empty())
            .map(|(q, _)| q.clone())
            .collect();
        open.sort();

        let mut remaining = total.clone();
        while !open.is_empty() && !remaining.is_empty() {
            let total_weight: i64 = open
                .iter()
                .map(|q| self.attrs[q].weight.max(1) as i64)
                .sum();

            let mut still_hungry = Vec::new();
            for queue in &open {
                let attr = self.attrs.get_mut(queue).expect("attr exists");
                let mut slice = remaining.clone();
                slice.multi(attr.weight.max(1) as f64 / total_weight as f64);
                attr.deserved.add(&slice);

                if attr.request.less_equal(&attr.deserved) {
                    // Satisfied; cap at the request and release the surplus.
                    attr.deserved.min_with(&attr.request);
                } else {
                    still_hungry.push(queue.clone());
                }
            }

            let mut spent = Resource::empty();
            for attr in self.attrs.values() {
                spent.add(&attr.deserved);
            }
            remaining = total.clone();
            remaining.sub(&spent);

            // Nothing capped this round: the whole remainder was handed out.
            if still_hungry.len() == open.len() {
                break;
            }
            open = still_hungry;
        }

        for (queue, attr) in &self.attrs {
            debug!(queue = %queue, deserved = %attr.deserved, request = %attr.request, "queue share");
        }
    }

    fn queue_of<'a>(state: &'a SessionState, event: &AllocationEvent) -> Option<&'a QueueId> {
        state.jobs.get(&event.job).map(|j| &j.queue)
    }
}

impl Plugin for ProportionPlugin {
    fn name(&self) -> &'static str {
        "proportion"
    }

    fn on_session_open(&mut self, state: &SessionState) {
        for job in state.jobs.values() {
            let Some(queue) = state.queues.get(&job.queue) else {
                continue;
            };
            let attr = self.attrs.entry(job.queue.clone()).or_default();
            attr.weight = queue.weight;
            attr.request.add(&job.total_request());
            for task in job.tasks.values() {
                if Self::counts(task.status) {
                    attr.allocated.add(&task.res_req);
                }
            }
        }
        self.compute_deserved(&state.total);
    }

    fn queue_order(
        &self,
        a: &QueueInfo,
        b: &QueueInfo,
        _state: &SessionState,
    ) -> Option<Ordering> {
        // Smaller consumed fraction of the deserved share first; over-quota
        // queues naturally sort last.
        self.share(&a.uid).partial_cmp(&self.share(&b.uid))
    }

    fn overused(&self, queue: &QueueInfo, _state: &SessionState) -> bool {
        self.attr(&queue.uid)
            .map(|a| a.deserved.less_equal(&a.allocated))
            .unwrap_or(false)
    }

    fn allocatable(
        &self,
        queue: &QueueInfo,
        candidate: &Resource,
        _state: &SessionState,
    ) -> bool {
        let Some(attr) = self.attr(&queue.uid) else {
            return true;
        };
        let mut would = attr.allocated.clone();
        would.add(candidate);
        would.less_equal(&attr.deserved)
    }

    fn reclaimable(
        &self,
        _reclaimer: &JobInfo,
        candidates: &[&TaskInfo],
        state: &SessionState,
    ) -> Option<Vec<TaskId>> {
        let mut claimed: HashMap<QueueId, Resource> = HashMap::new();
        let mut allowed = Vec::new();

        for task in candidates {
            let Some(job) = state.jobs.get(&task.job) else {
                continue;
            };
            let Some(queue) = state.queues.get(&job.queue) else {
                continue;
            };
            if !queue.reclaimable {
                continue;
            }
            let Some(attr) = self.attr(&job.queue) else {
                continue;
            };

            // Only reclaim while the victim queue stays over its deserved share.
            let claimed_so_far = claimed.entry(job.queue.clone()).or_default();
            let mut after = attr.allocated.clone();
            after.sub(claimed_so_far);
            if after.less_equal(&attr.deserved) {
                continue;
            }
            claimed_so_far.add(&task.res_req);
            allowed.push(task.uid.clone());
        }
        Some(allowed)
    }

    fn on_allocate(&mut self, event: &AllocationEvent, state: &SessionState) {
        if let Some(queue) = Self::queue_of(state, event) {
            if let Some(attr) = self.attrs.get_mut(queue) {
                attr.allocated.add(&event.res_req);
            }
        }
    }

    fn on_deallocate(&mut self, event: &AllocationEvent, state: &SessionState) {
        if let Some(queue) = Self::queue_of(state, event) {
            if let Some(attr) = self.attrs.get_mut(queue) {
                attr.allocated.sub(&event.res_req);
            }
        }
    }
}

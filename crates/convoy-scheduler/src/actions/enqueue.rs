use super::Action;
use crate::error::Result;
use crate::framework::Session;
use crate::util::PriorityQueue;
use convoy_core::events::reasons;
use convoy_core::{EventType, JobId, PodGroupPhase, QueueId, Resource};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Over-commit headroom multiplier for admission; it controls how many
/// pending groups the scheduler tolerates beyond current capacity.
const OVER_COMMIT_FACTOR: &str = "overcommit-factor";

const DEFAULT_OVER_COMMIT_FACTOR: f64 = 1.2;

/// Admission control: moves Pending PodGroups to Inqueue while the cluster,
/// under over-commit, still has aggregate headroom for their minResources.
pub struct EnqueueAction;

impl Action for EnqueueAction {
    fn name(&self) -> &'static str {
        "enqueue"
    }

    fn execute(&self, ssn: &mut Session) -> Result<()> {
        debug!("enter enqueue");

        let factor = ssn
            .action_args(self.name())
            .and_then(|args| args.get_f64(OVER_COMMIT_FACTOR))
            .unwrap_or(DEFAULT_OVER_COMMIT_FACTOR);

        let mut total = Resource::empty();
        let mut used = Resource::empty();
        for node in ssn.state.nodes.values() {
            total.add(&node.allocatable);
            used.add(&node.used);
        }
        let mut idle = total;
        idle.multi(factor);
        idle.sub(&used);

        let mut admitted: Vec<JobId> = Vec::new();
        let mut closed: Vec<String> = Vec::new();

        {
            let mut queues: PriorityQueue<QueueId> = PriorityQueue::with_less(|a, b| {
                ssn.queue_order(&ssn.state.queues[a], &ssn.state.queues[b])
            });
            let mut queued: HashSet<QueueId> = HashSet::new();
            let mut jobs_by_queue: HashMap<QueueId, PriorityQueue<JobId>> = HashMap::new();

            for job in ssn.state.jobs.values() {
                if job.phase != PodGroupPhase::Pending {
                    continue;
                }
                let Some(queue) = ssn.state.queues.get(&job.queue) else {
                    debug!(job = %job.uid, queue = %job.queue, "job references unknown queue");
                    continue;
                };
                if !queue.is_open() {
                    closed.push(job.key());
                    continue;
                }

                if queued.insert(job.queue.clone()) {
                    queues.push(job.queue.clone());
                }
                jobs_by_queue
                    .entry(job.queue.clone())
                    .or_insert_with(|| {
                        PriorityQueue::with_less(|a: &JobId, b: &JobId| {
                            ssn.job_order(&ssn.state.jobs[a], &ssn.state.jobs[b])
                        })
                    })
                    .push(job.uid.clone());
            }

            debug!(queues = queues.len(), "try to enqueue pending groups");

            while !queues.is_empty() {
                if idle.is_empty() {
                    debug!("admission headroom exhausted");
                    break;
                }

                let queue_id = queues.pop().expect("queue set is non-empty");
                let Some(jobs) = jobs_by_queue.get_mut(&queue_id) else {
                    continue;
                };
                let Some(job_id) = jobs.pop() else {
                    continue;
                };

                let job = &ssn.state.jobs[&job_id];
                match &job.min_resources {
                    None => admitted.push(job_id),
                    Some(min) => {
                        if ssn.job_enqueueable(job) && min.less_equal(&idle) {
                            idle.sub(min);
                            admitted.push(job_id);
                        }
                    }
                }

                // Round-robin: the queue goes back until it runs dry.
                queues.push(queue_id);
            }
        }

        for key in closed {
            ssn.record_event(
                EventType::Warning,
                format!("PodGroup/{}", key),
                reasons::QUEUE_CLOSED,
                "queue is closed; the group is not admitted",
            );
        }
        for job_id in admitted {
            debug!(job = %job_id, "admitted to Inqueue");
            ssn.set_job_phase(&job_id, PodGroupPhase::Inqueue);
        }

        debug!("leave enqueue");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::test_util::*;
    use crate::conf::{SchedulerConf, SchedulerOpts};
    use crate::framework::Session;

    fn open_session(cache: &crate::cache::SchedulerCache) -> Session {
        Session::open(
            cache.snapshot(),
            &SchedulerConf::default(),
            SchedulerOpts::default(),
            1,
        )
        .unwrap()
    }

    #[test]
    fn test_over_commit_admits_two_of_three() {
        let (cache, _fakes) = build_cache();
        // 10 cpu across two nodes; factor 1.2 gives 12 cpu of headroom.
        cache.add_node(&build_node("n1", "6", "12Gi")).unwrap();
        cache.add_node(&build_node("n2", "4", "8Gi")).unwrap();
        cache.add_queue(&build_queue("c1", 1));
        for name in ["pg1", "pg2", "pg3"] {
            cache
                .add_pod_group(&build_pending_pod_group("c1", name, "c1", "5"))
                .unwrap();
        }

        let mut ssn = open_session(&cache);
        EnqueueAction.execute(&mut ssn).unwrap();

        let phases: Vec<_> = ssn
            .state
            .jobs
            .values()
            .map(|j| (j.name.clone(), j.phase))
            .collect();
        let admitted = phases
            .iter()
            .filter(|(_, p)| *p == convoy_core::PodGroupPhase::Inqueue)
            .count();
        let pending = phases
            .iter()
            .filter(|(_, p)| *p == convoy_core::PodGroupPhase::Pending)
            .count();
        assert_eq!(admitted, 2, "10 of 12 cpu admits exactly two 5-cpu groups");
        assert_eq!(pending, 1);
    }

    #[test]
    fn test_no_min_resources_admits_unconditionally() {
        let (cache, _fakes) = build_cache();
        cache.add_node(&build_node("n1", "1", "1Gi")).unwrap();
        cache.add_queue(&build_queue("c1", 1));

        let mut pg = build_pod_group("c1", "pg1", "c1", "", 0, None);
        pg.status.phase = "Pending".to_string();
        cache.add_pod_group(&pg).unwrap();

        let mut ssn = open_session(&cache);
        EnqueueAction.execute(&mut ssn).unwrap();

        let job = ssn.state.jobs.values().next().unwrap();
        assert_eq!(job.phase, convoy_core::PodGroupPhase::Inqueue);
    }

    #[test]
    fn test_closed_queue_admits_nothing() {
        let (cache, _fakes) = build_cache();
        cache.add_node(&build_node("n1", "10", "10Gi")).unwrap();
        let mut queue = build_queue("c1", 1);
        queue.spec.state = Some("Closed".to_string());
        cache.add_queue(&queue);
        cache
            .add_pod_group(&build_pending_pod_group("c1", "pg1", "c1", "1"))
            .unwrap();

        let mut ssn = open_session(&cache);
        EnqueueAction.execute(&mut ssn).unwrap();

        let job = ssn.state.jobs.values().next().unwrap();
        assert_eq!(job.phase, convoy_core::PodGroupPhase::Pending);
    }

    #[test]
    fn test_factor_is_configurable_per_pass() {
        let (cache, _fakes) = build_cache();
        cache.add_node(&build_node("n1", "10", "100Gi")).unwrap();
        cache.add_queue(&build_queue("c1", 1));
        for name in ["pg1", "pg2", "pg3"] {
            cache
                .add_pod_group(&build_pending_pod_group("c1", name, "c1", "5"))
                .unwrap();
        }

        let mut conf = SchedulerConf::default();
        conf.configurations.push(crate::conf::ActionConf {
            name: "enqueue".to_string(),
            arguments: [(OVER_COMMIT_FACTOR.to_string(), "1.5".to_string())]
                .into_iter()
                .collect(),
        });

        let mut ssn =
            Session::open(cache.snapshot(), &conf, SchedulerOpts::default(), 1).unwrap();
        EnqueueAction.execute(&mut ssn).unwrap();

        // 15 cpu of headroom admits all three 5-cpu groups.
        let admitted = ssn
            .state
            .jobs
            .values()
            .filter(|j| j.phase == convoy_core::PodGroupPhase::Inqueue)
            .count();
        assert_eq!(admitted, 3);
    }
}

use crate::error::Result;
use async_trait::async_trait;
use convoy_core::{Job, JobStatePhase};

/// The lifecycle operation requested for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    /// Reconcile the job's pods toward its spec
    Sync,
    /// Stop the job and mark it aborted
    Abort,
    /// Stop the job and mark it terminated
    Terminate,
    /// Stop the job's pods, then bring them back up
    Restart,
}

impl std::fmt::Display for JobAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The two primitive transitions of the job state machine, injected by the
/// controller so states carry no process-wide function pointers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Create or adopt pods until the job matches its spec
    async fn sync_job(&self, job: &Job) -> Result<()>;

    /// Tear the job's pods down
    async fn kill_job(&self, job: &Job) -> Result<()>;
}

/// Drives a job through its state machine using the injected handler.
pub struct JobStateMachine<'a> {
    handler: &'a dyn JobHandler,
}

impl<'a> JobStateMachine<'a> {
    pub fn new(handler: &'a dyn JobHandler) -> Self {
        Self { handler }
    }

    /// Apply `action` to `job` given its current phase
    pub async fn execute(&self, job: &Job, action: JobAction) -> Result<()> {
        let phase = job.status.state.phase;
        match action {
            JobAction::Abort | JobAction::Terminate => match phase {
                JobStatePhase::Completed
                | JobStatePhase::Failed
                | JobStatePhase::Terminated
                | JobStatePhase::Aborted => Ok(()),
                _ => self.handler.kill_job(job).await,
            },
            JobAction::Restart => {
                self.handler.kill_job(job).await?;
                self.handler.sync_job(job).await
            }
            JobAction::Sync => match phase {
                JobStatePhase::Completed
                | JobStatePhase::Failed
                | JobStatePhase::Terminated
                | JobStatePhase::Aborted => Ok(()),
                JobStatePhase::Terminating => Ok(()),
                _ => self.handler.sync_job(job).await,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingHandler {
        syncs: AtomicU32,
        kills: AtomicU32,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn sync_job(&self, _job: &Job) -> Result<()> {
            self.syncs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn kill_job(&self, _job: &Job) -> Result<()> {
            self.kills.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn job_in_phase(phase: JobStatePhase) -> Job {
        let mut job = Job::default();
        job.metadata.name = "job1".to_string();
        job.metadata.namespace = "default".to_string();
        job.status.state.phase = phase;
        job
    }

    #[tokio::test]
    async fn test_sync_runs_for_live_phases() {
        let handler = CountingHandler::default();
        let machine = JobStateMachine::new(&handler);

        machine
            .execute(&job_in_phase(JobStatePhase::Pending), JobAction::Sync)
            .await
            .unwrap();
        machine
            .execute(&job_in_phase(JobStatePhase::Running), JobAction::Sync)
            .await
            .unwrap();
        assert_eq!(handler.syncs.load(Ordering::SeqCst), 2);
        assert_eq!(handler.kills.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sync_is_noop_for_finished_jobs() {
        let handler = CountingHandler::default();
        let machine = JobStateMachine::new(&handler);

        for phase in [
            JobStatePhase::Completed,
            JobStatePhase::Failed,
            JobStatePhase::Terminated,
        ] {
            machine
                .execute(&job_in_phase(phase), JobAction::Sync)
                .await
                .unwrap();
        }
        assert_eq!(handler.syncs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_abort_kills_running_job() {
        let handler = CountingHandler::default();
        let machine = JobStateMachine::new(&handler);

        machine
            .execute(&job_in_phase(JobStatePhase::Running), JobAction::Abort)
            .await
            .unwrap();
        assert_eq!(handler.kills.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restart_kills_then_syncs() {
        let handler = CountingHandler::default();
        let machine = JobStateMachine::new(&handler);

        machine
            .execute(&job_in_phase(JobStatePhase::Running), JobAction::Restart)
            .await
            .unwrap();
        assert_eq!(handler.kills.load(Ordering::SeqCst), 1);
        assert_eq!(handler.syncs.load(Ordering::SeqCst), 1);
    }
}

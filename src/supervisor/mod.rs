//! Single-flight capture job supervision.
//!
//! [`JobSupervisor`] owns the entity → job table. `start` is a check-and-insert
//! under the table lock, so at most one job exists per entity. Each job gets a
//! waiter task (tracked in a `JoinSet`) that announces the job, runs the
//! capture process, removes the record once the process is gone and then
//! finalizes exactly once: locate the recording, deliver it, report.

mod job;
mod process;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{Local, Utc};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use job::{
    CaptureCommand, FinalizeReport, JobHandle, JobOutcome, JobSpec, JobSummary, check_program,
};

use crate::artifact::ArtifactLocator;
use crate::config::CaptureConfig;
use crate::delivery::{DeliveryPipeline, DeliverySink, messages};
use crate::error::{LivecapError, Result};
use crate::watchlist::normalize_entity;
use process::OutputPumps;

struct JobRecord {
    job_id: Uuid,
    started_at: chrono::DateTime<Utc>,
    pid: Option<u32>,
    stop: Option<oneshot::Sender<()>>,
}

type JobTable = Mutex<HashMap<String, JobRecord>>;

struct Shared<S> {
    jobs: JobTable,
    command: CaptureCommand,
    locator: ArtifactLocator,
    delivery: Arc<DeliveryPipeline<S>>,
    stop_grace: Duration,
    settle_delay: Duration,
    finalized: broadcast::Sender<FinalizeReport>,
}

pub struct JobSupervisor<S> {
    shared: Arc<Shared<S>>,
    waiters: Mutex<JoinSet<()>>,
}

/// Timing and matching knobs of the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub locator: ArtifactLocator,
    /// Time a stopped recorder gets to exit after SIGTERM before it is killed.
    pub stop_grace: Duration,
    /// Pause before scanning for the recording.
    pub settle_delay: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            locator: ArtifactLocator::default(),
            stop_grace: Duration::from_secs(10),
            settle_delay: Duration::from_secs(2),
        }
    }
}

impl SupervisorOptions {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            locator: ArtifactLocator::new(&config.extensions),
            stop_grace: config.stop_grace(),
            settle_delay: config.settle_delay(),
        }
    }
}

impl<S: DeliverySink + 'static> JobSupervisor<S> {
    pub fn new(command: CaptureCommand, delivery: Arc<DeliveryPipeline<S>>) -> Self {
        Self::with_options(command, delivery, SupervisorOptions::default())
    }

    pub fn with_options(
        command: CaptureCommand,
        delivery: Arc<DeliveryPipeline<S>>,
        options: SupervisorOptions,
    ) -> Self {
        let (finalized, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                jobs: Mutex::new(HashMap::new()),
                command,
                locator: options.locator,
                delivery,
                stop_grace: options.stop_grace,
                settle_delay: options.settle_delay,
                finalized,
            }),
            waiters: Mutex::new(JoinSet::new()),
        }
    }

    pub fn from_config(config: &CaptureConfig, delivery: Arc<DeliveryPipeline<S>>) -> Self {
        Self::with_options(
            CaptureCommand::from_config(config),
            delivery,
            SupervisorOptions::from_config(config),
        )
    }

    pub fn delivery(&self) -> &DeliveryPipeline<S> {
        &self.shared.delivery
    }

    pub fn output_dir(&self) -> &std::path::Path {
        &self.shared.command.output_dir
    }

    /// Reports of finished jobs, one per job, in completion order.
    pub fn subscribe(&self) -> broadcast::Receiver<FinalizeReport> {
        self.shared.finalized.subscribe()
    }

    /// Starts a capture job for `entity` unless one already exists.
    ///
    /// Returns as soon as the job is registered; the notification, the spawn
    /// and the wait all happen on the job's waiter task.
    pub fn start(&self, entity: &str) -> Result<JobHandle> {
        let entity =
            normalize_entity(entity).ok_or_else(|| LivecapError::InvalidEntity(entity.into()))?;
        let (stop_tx, stop_rx) = oneshot::channel();

        let handle = {
            let mut jobs = self.shared.lock_jobs();
            if jobs.contains_key(&entity) {
                return Err(LivecapError::AlreadyRunning(entity));
            }
            let handle = JobHandle {
                job_id: Uuid::new_v4(),
                entity: entity.clone(),
                started_at: Utc::now(),
            };
            jobs.insert(
                entity.clone(),
                JobRecord {
                    job_id: handle.job_id,
                    started_at: handle.started_at,
                    pid: None,
                    stop: Some(stop_tx),
                },
            );
            handle
        };

        info!(entity = %entity, job_id = %handle.job_id, "capture job registered");

        let shared = Arc::clone(&self.shared);
        let job = handle.clone();
        let mut waiters = self.lock_waiters();
        reap(&mut waiters);
        waiters.spawn(async move { shared.run_job(job, stop_rx).await });

        Ok(handle)
    }

    /// Requests termination of `entity`'s job and returns immediately.
    /// Finalization follows on the job's waiter, as for a natural exit.
    pub fn stop(&self, entity: &str) -> Result<()> {
        let id = normalize_entity(entity).ok_or_else(|| LivecapError::NotFound(entity.into()))?;
        let mut jobs = self.shared.lock_jobs();
        let record = jobs.get_mut(&id).ok_or(LivecapError::NotFound(id.clone()))?;
        match record.stop.take() {
            Some(tx) => {
                let _ = tx.send(());
                info!(entity = %id, job_id = %record.job_id, "stop requested");
            }
            None => debug!(entity = %id, "stop already requested"),
        }
        Ok(())
    }

    pub fn is_running(&self, entity: &str) -> bool {
        normalize_entity(entity).is_some_and(|id| self.shared.lock_jobs().contains_key(&id))
    }

    /// Running jobs sorted by entity.
    pub fn active(&self) -> Vec<JobSummary> {
        let jobs = self.shared.lock_jobs();
        let mut summaries: Vec<JobSummary> = jobs
            .iter()
            .map(|(entity, record)| JobSummary {
                entity: entity.clone(),
                job_id: record.job_id,
                started_at: record.started_at,
                pid: record.pid,
                stopping: record.stop.is_none(),
            })
            .collect();
        summaries.sort_by(|a, b| a.entity.cmp(&b.entity));
        summaries
    }

    pub fn len(&self) -> usize {
        self.shared.lock_jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits for every waiter spawned so far, including their finalization.
    pub async fn join_all(&self) {
        let mut waiters = std::mem::take(&mut *self.lock_waiters());
        while let Some(result) = waiters.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "capture waiter task failed");
            }
        }
    }

    /// Requests a stop for every running job without waiting.
    pub fn stop_all(&self) {
        let entities: Vec<String> = self.shared.lock_jobs().keys().cloned().collect();
        if !entities.is_empty() {
            info!(count = entities.len(), "stopping running capture jobs");
        }
        for entity in entities {
            // The job may have finished between the snapshot and here.
            let _ = self.stop(&entity);
        }
    }

    /// Stops every running job and waits until all of them are finalized.
    pub async fn shutdown(&self) {
        self.stop_all();
        self.join_all().await;
    }

    fn lock_waiters(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.waiters.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn reap(waiters: &mut JoinSet<()>) {
    while let Some(result) = waiters.try_join_next() {
        if let Err(e) = result {
            error!(error = %e, "capture waiter task failed");
        }
    }
}

impl<S> Shared<S> {
    fn lock_jobs(&self) -> MutexGuard<'_, HashMap<String, JobRecord>> {
        self.jobs.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_pid(&self, job: &JobHandle, pid: Option<u32>) {
        if let Some(record) = self.lock_jobs().get_mut(&job.entity)
            && record.job_id == job.job_id
        {
            record.pid = pid;
        }
    }

    fn release(&self, job: &JobHandle) {
        let mut jobs = self.lock_jobs();
        if jobs.get(&job.entity).is_some_and(|r| r.job_id == job.job_id) {
            jobs.remove(&job.entity);
        }
    }
}

/// Removes the job's record when dropped, so a panicking waiter cannot leave
/// the entity blocked forever.
struct RecordGuard<'a, S> {
    shared: &'a Shared<S>,
    job: &'a JobHandle,
    released: bool,
}

impl<S> RecordGuard<'_, S> {
    fn release(&mut self) {
        if !self.released {
            self.shared.release(self.job);
            self.released = true;
        }
    }
}

impl<S> Drop for RecordGuard<'_, S> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<S: DeliverySink + 'static> Shared<S> {
    async fn run_job(self: Arc<Self>, job: JobHandle, mut stop_rx: oneshot::Receiver<()>) {
        let mut guard = RecordGuard {
            shared: &self,
            job: &job,
            released: false,
        };

        self.delivery
            .notify(&messages::went_live(&job.entity, Local::now()))
            .await;

        let outcome = self.capture(&job, &mut stop_rx).await;
        guard.release();

        let report = self.finalize(&job, outcome).await;
        let _ = self.finalized.send(report);
    }

    async fn capture(&self, job: &JobHandle, stop_rx: &mut oneshot::Receiver<()>) -> JobOutcome {
        if stop_rx.try_recv().is_ok() {
            info!(entity = %job.entity, "stopped before the capture process started");
            return JobOutcome::Terminated;
        }

        let spec = self.command.render(&job.entity);
        if let Err(e) = tokio::fs::create_dir_all(&spec.output_dir).await {
            error!(entity = %job.entity, dir = %spec.output_dir.display(), error = %e, "cannot create output directory");
            return JobOutcome::SpawnFailed(format!("output directory: {e}"));
        }

        let mut child = match process::spawn(&spec) {
            Ok(child) => child,
            Err(e) => {
                error!(entity = %job.entity, program = %spec.program, error = %e, "failed to spawn capture process");
                return JobOutcome::SpawnFailed(e.to_string());
            }
        };
        let pid = child.id();
        self.set_pid(job, pid);
        info!(entity = %job.entity, job_id = %job.job_id, pid, args = ?spec.args, "capture process started");

        let pumps = OutputPumps::attach(&job.entity, &mut child);

        let outcome = tokio::select! {
            status = child.wait() => process::classify(status),
            requested = &mut *stop_rx => {
                if requested.is_ok() {
                    process::terminate(&job.entity, &mut child, self.stop_grace).await;
                    JobOutcome::Terminated
                } else {
                    process::classify(child.wait().await)
                }
            }
        };

        pumps.finish().await;
        info!(entity = %job.entity, job_id = %job.job_id, outcome = %outcome, "capture process ended");
        outcome
    }

    async fn finalize(&self, job: &JobHandle, outcome: JobOutcome) -> FinalizeReport {
        let mut artifact: Option<PathBuf> = None;
        let mut delivered = false;

        if outcome.is_failure() {
            error!(entity = %job.entity, outcome = %outcome, "capture job failed");
            self.delivery
                .notify(&messages::recording_failed(&job.entity, &outcome.to_string()))
                .await;
        }

        if outcome.may_leave_artifact() {
            if !self.settle_delay.is_zero() {
                tokio::time::sleep(self.settle_delay).await;
            }

            let locator = self.locator.clone();
            let root = self.command.output_dir.clone();
            let entity = job.entity.clone();
            artifact = tokio::task::spawn_blocking(move || locator.locate(&root, &entity))
                .await
                .unwrap_or_else(|e| {
                    error!(error = %e, "artifact scan task failed");
                    None
                });

            match &artifact {
                Some(path) => {
                    let caption = messages::recording_caption(
                        &job.entity,
                        Local::now(),
                        outcome == JobOutcome::Terminated,
                    );
                    delivered = self.delivery.deliver(path, &caption).await;
                }
                // The failure notice already told the chat nothing usable came out.
                None if outcome.is_failure() => {
                    warn!(entity = %job.entity, dir = %self.command.output_dir.display(), "no recording left by failed job");
                }
                None => {
                    warn!(entity = %job.entity, dir = %self.command.output_dir.display(), "no recording found");
                    self.delivery.notify(&messages::no_artifact(&job.entity)).await;
                }
            }
        }

        let finished_at = Utc::now();
        let report = FinalizeReport {
            entity: job.entity.clone(),
            job_id: job.job_id,
            outcome,
            artifact,
            delivered,
            started_at: job.started_at,
            finished_at,
            duration_ms: (finished_at - job.started_at).num_milliseconds(),
        };
        info!(
            entity = %report.entity,
            job_id = %report.job_id,
            outcome = %report.outcome,
            delivered = report.delivered,
            duration_ms = report.duration_ms,
            "capture job finalized"
        );
        report
    }
}

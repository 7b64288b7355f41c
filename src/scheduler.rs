use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::delivery::DeliverySink;
use crate::probe::{ActiveStatus, StatusProbe};
use crate::supervisor::JobSupervisor;
use crate::watchlist::WatchList;

/// Shared pause/resume flag between the command surface and the loop.
#[derive(Debug, Clone, Default)]
pub struct MonitorSwitch {
    paused: Arc<AtomicBool>,
}

impl MonitorSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if monitoring was already paused.
    pub fn pause(&self) -> bool {
        !self.paused.swap(true, Ordering::SeqCst)
    }

    /// Returns `false` if monitoring was already running.
    pub fn resume(&self) -> bool {
        self.paused.swap(false, Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// Delays that pace the loop.
#[derive(Debug, Clone)]
pub struct SchedulerTiming {
    /// Pause after a full pass over the watch list.
    pub poll_interval: Duration,
    /// Pause between two probes inside one pass.
    pub probe_delay: Duration,
    /// Pause after a failed pass.
    pub error_cooldown: Duration,
    /// Recheck cadence while paused.
    pub paused_recheck: Duration,
}

impl SchedulerTiming {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            poll_interval: config.check_interval(),
            probe_delay: config.probe_delay(),
            error_cooldown: config.error_cooldown(),
            paused_recheck: config.paused_recheck(),
        }
    }
}

/// What one pass over the watch list did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub probed: usize,
    pub unknown: usize,
    pub skipped_running: usize,
    pub went_live: Vec<String>,
    pub went_offline: Vec<String>,
    pub started: Vec<String>,
    pub start_failed: Vec<String>,
}

/// Polls every watched entity and starts a capture job on each
/// offline → live edge.
///
/// Entities with a running job are skipped without probing. The seen set only
/// tracks edges: going offline clears it, and the job lifecycle itself stays
/// with the supervisor.
pub struct Scheduler<P, S> {
    watch_list: Arc<WatchList>,
    probe: P,
    supervisor: Arc<JobSupervisor<S>>,
    switch: MonitorSwitch,
    timing: SchedulerTiming,
    seen: HashSet<String>,
}

impl<P: StatusProbe, S: DeliverySink + 'static> Scheduler<P, S> {
    pub fn new(
        watch_list: Arc<WatchList>,
        probe: P,
        supervisor: Arc<JobSupervisor<S>>,
        timing: SchedulerTiming,
    ) -> Self {
        Self {
            watch_list,
            probe,
            supervisor,
            switch: MonitorSwitch::new(),
            timing,
            seen: HashSet::new(),
        }
    }

    pub fn with_switch(mut self, switch: MonitorSwitch) -> Self {
        self.switch = switch;
        self
    }

    pub fn switch(&self) -> MonitorSwitch {
        self.switch.clone()
    }

    pub fn is_seen(&self, entity: &str) -> bool {
        self.seen.contains(entity)
    }

    /// One pass over the watch list.
    ///
    /// Per-entity problems never abort the pass. The pass as a whole fails
    /// only when every probe came back unknown, which points at the status
    /// source rather than at any entity.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let entities = self.watch_list.snapshot();
        self.seen.retain(|id| entities.binary_search(id).is_ok());

        let mut report = TickReport::default();
        if entities.is_empty() {
            debug!("no entities to monitor");
            return Ok(report);
        }

        for (i, entity) in entities.iter().enumerate() {
            if i > 0 && !self.timing.probe_delay.is_zero() {
                sleep(self.timing.probe_delay).await;
            }
            self.visit(entity, &mut report).await;
        }

        if report.probed > 0 && report.unknown == report.probed {
            bail!(
                "status source gave no answer for any of the {} probed entities",
                report.probed
            );
        }
        Ok(report)
    }

    async fn visit(&mut self, entity: &str, report: &mut TickReport) {
        if self.supervisor.is_running(entity) {
            debug!(entity = %entity, "capture running, skipping probe");
            report.skipped_running += 1;
            return;
        }

        let status = self.probe.probe(entity).await;
        report.probed += 1;
        debug!(entity = %entity, status = %status, "probed");

        match status {
            ActiveStatus::Active if !self.seen.contains(entity) => {
                info!(entity = %entity, "went live");
                self.seen.insert(entity.to_string());
                report.went_live.push(entity.to_string());

                match self.supervisor.start(entity) {
                    Ok(handle) => {
                        debug!(entity = %entity, job_id = %handle.job_id, "capture started");
                        report.started.push(entity.to_string());
                    }
                    Err(e) if e.is_conflict() => {
                        debug!(entity = %entity, "capture already running");
                        report.skipped_running += 1;
                    }
                    Err(e) => {
                        warn!(entity = %entity, error = %e, "could not start capture, retrying next pass");
                        self.seen.remove(entity);
                        report.start_failed.push(entity.to_string());
                    }
                }
            }
            ActiveStatus::Inactive if self.seen.remove(entity) => {
                info!(entity = %entity, "went offline");
                report.went_offline.push(entity.to_string());
            }
            ActiveStatus::Unknown => report.unknown += 1,
            _ => {}
        }
    }

    /// Runs passes until `shutdown` turns `true` (or its sender goes away).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.timing.poll_interval.as_secs(),
            "monitoring started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let pause = if self.switch.is_paused() {
                debug!("monitoring paused");
                self.timing.paused_recheck
            } else {
                tokio::select! {
                    result = self.tick() => match result {
                        Ok(report) => {
                            debug!(?report, "pass complete");
                            self.timing.poll_interval
                        }
                        Err(e) => {
                            error!(error = %e, "monitoring pass failed, cooling down");
                            self.timing.error_cooldown
                        }
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                }
            };

            tokio::select! {
                _ = sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("monitoring stopped");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::delivery::{DeliveryPipeline, SinkError};
    use crate::supervisor::{CaptureCommand, SupervisorOptions};
    use std::collections::{HashMap, VecDeque};
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Probe answering from per-entity scripts; the last answer repeats.
    #[derive(Default)]
    struct ScriptedProbe {
        scripts: Mutex<HashMap<String, VecDeque<ActiveStatus>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedProbe {
        fn script(&self, entity: &str, answers: &[ActiveStatus]) {
            self.scripts
                .lock()
                .unwrap()
                .insert(entity.to_string(), answers.iter().copied().collect());
        }

        fn calls_for(&self, entity: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|e| *e == entity).count()
        }
    }

    impl StatusProbe for ScriptedProbe {
        async fn probe(&self, entity: &str) -> ActiveStatus {
            self.calls.lock().unwrap().push(entity.to_string());
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(entity) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                Some(queue) => queue.front().copied().unwrap_or(ActiveStatus::Inactive),
                None => ActiveStatus::Inactive,
            }
        }
    }

    #[derive(Default)]
    struct CountingSink {
        files: Mutex<Vec<PathBuf>>,
    }

    impl DeliverySink for CountingSink {
        async fn send_text(&self, _text: &str) -> std::result::Result<(), SinkError> {
            Ok(())
        }

        async fn send_file(&self, path: &Path, _caption: &str) -> std::result::Result<(), SinkError> {
            self.files.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }

    struct Fixture {
        _dir: TempDir,
        watch_list: Arc<WatchList>,
        probe: Arc<ScriptedProbe>,
        supervisor: Arc<JobSupervisor<CountingSink>>,
    }

    fn fixture(script: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let watch_list = Arc::new(WatchList::load(dir.path().join("list.json"), &[]));
        let command = CaptureCommand {
            program: "sh".into(),
            args: vec!["-c".into(), script.into(), "sh".into(), "{user}".into(), "{output}".into()],
            output_dir: dir.path().join("out"),
            interval_minutes: 1,
            duration_secs: None,
        };
        let supervisor = Arc::new(JobSupervisor::with_options(
            command,
            Arc::new(DeliveryPipeline::new(CountingSink::default())),
            SupervisorOptions {
                settle_delay: Duration::ZERO,
                stop_grace: Duration::from_secs(2),
                ..SupervisorOptions::default()
            },
        ));
        Fixture {
            _dir: dir,
            watch_list,
            probe: Arc::new(ScriptedProbe::default()),
            supervisor,
        }
    }

    fn quick_timing() -> SchedulerTiming {
        SchedulerTiming {
            poll_interval: Duration::from_millis(20),
            probe_delay: Duration::ZERO,
            error_cooldown: Duration::from_millis(20),
            paused_recheck: Duration::from_millis(20),
        }
    }

    fn scheduler(f: &Fixture) -> Scheduler<Arc<ScriptedProbe>, CountingSink> {
        Scheduler::new(
            Arc::clone(&f.watch_list),
            Arc::clone(&f.probe),
            Arc::clone(&f.supervisor),
            quick_timing(),
        )
    }

    use ActiveStatus::{Active, Inactive, Unknown};

    #[tokio::test]
    async fn running_job_is_skipped_and_started_once() {
        let f = fixture("sleep 0.5");
        f.watch_list.add("alice").unwrap();
        f.probe.script("alice", &[Active]);
        let mut reports = f.supervisor.subscribe();
        let mut sched = scheduler(&f);

        let first = sched.tick().await.unwrap();
        assert_eq!(first.started, vec!["alice"]);

        let second = sched.tick().await.unwrap();
        assert_eq!(second.skipped_running, 1);
        assert!(second.started.is_empty());
        assert_eq!(f.probe.calls_for("alice"), 1);

        reports.recv().await.unwrap();
        f.supervisor.join_all().await;

        // Still live after the job ended: no new edge, no new job.
        let third = sched.tick().await.unwrap();
        assert!(third.started.is_empty());
        assert!(sched.is_seen("alice"));
    }

    #[tokio::test]
    async fn live_then_offline_starts_and_finalizes_once() {
        let f = fixture(r#"printf x > "$2/$1_001.mp4""#);
        f.watch_list.add("bob").unwrap();
        f.probe.script("bob", &[Active, Active, Active, Inactive]);
        let mut reports = f.supervisor.subscribe();
        let mut sched = scheduler(&f);

        let mut started = 0;
        for _ in 0..6 {
            started += sched.tick().await.unwrap().started.len();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        f.supervisor.join_all().await;

        assert_eq!(started, 1);
        assert!(reports.try_recv().is_ok());
        assert!(reports.try_recv().is_err());
        assert_eq!(f.supervisor.delivery().sink().files.lock().unwrap().len(), 1);
        assert!(!sched.is_seen("bob"));
    }

    #[tokio::test]
    async fn unknown_does_not_clear_seen() {
        let f = fixture("exit 0");
        f.watch_list.add("carol").unwrap();
        f.watch_list.add("dave").unwrap();
        f.probe.script("carol", &[Active, Unknown, Active]);
        let mut sched = scheduler(&f);

        sched.tick().await.unwrap();
        f.supervisor.join_all().await;
        sched.tick().await.unwrap();
        f.supervisor.join_all().await;
        let third = sched.tick().await.unwrap();

        assert!(sched.is_seen("carol"));
        assert!(third.started.is_empty());
    }

    #[tokio::test]
    async fn all_unknown_pass_is_an_error() {
        let f = fixture("exit 0");
        f.watch_list.add("erin").unwrap();
        f.probe.script("erin", &[Unknown]);
        let mut sched = scheduler(&f);

        assert!(sched.tick().await.is_err());
    }

    #[tokio::test]
    async fn removed_entities_leave_seen_set() {
        let f = fixture("exit 0");
        f.watch_list.add("frank").unwrap();
        f.probe.script("frank", &[Active]);
        let mut sched = scheduler(&f);

        sched.tick().await.unwrap();
        f.supervisor.join_all().await;
        assert!(sched.is_seen("frank"));

        f.watch_list.remove("frank").unwrap();
        let report = sched.tick().await.unwrap();
        assert_eq!(report.probed, 0);
        assert!(!sched.is_seen("frank"));
    }

    #[tokio::test]
    async fn run_honours_pause_and_shutdown() {
        let f = fixture("exit 0");
        f.watch_list.add("gina").unwrap();
        let sched = scheduler(&f);
        let switch = sched.switch();
        switch.pause();

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(sched.run(rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.probe.calls_for("gina"), 0);

        assert!(switch.resume());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(f.probe.calls_for("gina") > 0);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("loop exits on shutdown")
            .unwrap();
    }

    #[test]
    fn switch_reports_transitions() {
        let switch = MonitorSwitch::new();
        assert!(!switch.resume());
        assert!(switch.pause());
        assert!(!switch.pause());
        assert!(switch.is_paused());
        assert!(switch.resume());
    }
}

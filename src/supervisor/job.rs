use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::CaptureConfig;
use crate::error::LivecapError;

/// How a capture process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum JobOutcome {
    /// Exited with status 0.
    Clean,
    /// Exited non-zero, or died without an exit code (`None`).
    Failed(Option<i32>),
    /// Stopped on request.
    Terminated,
    /// The process never started.
    SpawnFailed(String),
}

impl JobOutcome {
    /// Any process that ran may have written a recording, even one that
    /// exited non-zero.
    pub fn may_leave_artifact(&self) -> bool {
        !matches!(self, JobOutcome::SpawnFailed(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, JobOutcome::Failed(_) | JobOutcome::SpawnFailed(_))
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Clean => write!(f, "completed"),
            JobOutcome::Failed(Some(code)) => write!(f, "exited with code {code}"),
            JobOutcome::Failed(None) => write!(f, "killed by a signal"),
            JobOutcome::Terminated => write!(f, "stopped on request"),
            JobOutcome::SpawnFailed(reason) => write!(f, "failed to start: {reason}"),
        }
    }
}

/// Fully rendered invocation for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub entity: String,
    pub program: String,
    pub args: Vec<String>,
    pub output_dir: PathBuf,
}

/// Capture command template.
///
/// Arguments may contain `{user}`, `{output}`, `{interval}` and `{duration}`.
/// With no duration configured, an argument using `{duration}` is dropped.
/// When that argument is exactly `{duration}`, a flag directly before it
/// goes too (`-duration {duration}`).
#[derive(Debug, Clone)]
pub struct CaptureCommand {
    pub program: String,
    pub args: Vec<String>,
    pub output_dir: PathBuf,
    pub interval_minutes: u64,
    pub duration_secs: Option<u64>,
}

impl CaptureCommand {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            output_dir: config.output_directory.clone(),
            interval_minutes: config.interval_minutes,
            duration_secs: config.duration_secs.filter(|d| *d > 0),
        }
    }

    pub fn render(&self, entity: &str) -> JobSpec {
        let output = self.output_dir.to_string_lossy();
        let interval = self.interval_minutes.to_string();

        let duration = self.duration_secs.map(|d| d.to_string());
        let mut args: Vec<String> = Vec::with_capacity(self.args.len());
        // Whether the last pushed argument came from a `-flag` template.
        let mut after_flag = false;

        for arg in &self.args {
            if duration.is_none() && arg.contains("{duration}") {
                if arg == "{duration}" && after_flag {
                    args.pop();
                }
                after_flag = false;
                continue;
            }
            args.push(
                arg.replace("{user}", entity)
                    .replace("{output}", &output)
                    .replace("{interval}", &interval)
                    .replace("{duration}", duration.as_deref().unwrap_or_default()),
            );
            after_flag = arg.starts_with('-');
        }

        JobSpec {
            entity: entity.to_string(),
            program: self.program.clone(),
            args,
            output_dir: self.output_dir.clone(),
        }
    }
}

/// Verifies the capture program can be executed: an explicit path must
/// exist, a bare name must resolve on `PATH`.
pub fn check_program(program: &str) -> Result<PathBuf, LivecapError> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return if candidate.is_file() {
            Ok(candidate.to_path_buf())
        } else {
            Err(LivecapError::Config(format!(
                "capture program not found: {program}"
            )))
        };
    }

    let search_path = std::env::var_os("PATH");
    search_path
        .iter()
        .flat_map(std::env::split_paths)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
        .ok_or_else(|| LivecapError::Config(format!("capture program not on PATH: {program}")))
}

/// Returned by `start`; identifies one capture job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub entity: String,
    pub started_at: DateTime<Utc>,
}

/// Point-in-time view of a running job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub entity: String,
    pub job_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub pid: Option<u32>,
    pub stopping: bool,
}

/// Result of the one-time post-job routine.
#[derive(Debug, Clone, Serialize)]
pub struct FinalizeReport {
    pub entity: String,
    pub job_id: Uuid,
    pub outcome: JobOutcome,
    pub artifact: Option<PathBuf>,
    pub delivered: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(args: &[&str], duration_secs: Option<u64>) -> CaptureCommand {
        CaptureCommand {
            program: "python3".into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            output_dir: PathBuf::from("/rec"),
            interval_minutes: 10,
            duration_secs,
        }
    }

    #[test]
    fn render_substitutes_placeholders() {
        let spec = command(&["wrapper.py", "{user}", "{output}", "{interval}"], None).render("alice");
        assert_eq!(spec.args, vec!["wrapper.py", "alice", "/rec", "10"]);
        assert_eq!(spec.output_dir, PathBuf::from("/rec"));
        assert_eq!(spec.entity, "alice");
    }

    #[test]
    fn render_drops_duration_flag_when_unset() {
        let args = ["main.py", "-user", "{user}", "-duration", "{duration}", "-output", "{output}"];
        let spec = command(&args, None).render("bob");
        assert_eq!(spec.args, vec!["main.py", "-user", "bob", "-output", "/rec"]);
    }

    #[test]
    fn render_keeps_duration_when_set() {
        let args = ["main.py", "-duration", "{duration}"];
        let spec = command(&args, Some(600)).render("bob");
        assert_eq!(spec.args, vec!["main.py", "-duration", "600"]);
    }

    #[test]
    fn render_keeps_flag_before_embedded_duration() {
        let spec = command(&["-v", "--max={duration}", "{user}"], None).render("carol");
        assert_eq!(spec.args, vec!["-v", "carol"]);
    }

    #[test]
    fn render_fills_every_placeholder_alongside_duration() {
        let spec = command(&["{user}_{duration}", "{output}/{interval}"], Some(60)).render("dave");
        assert_eq!(spec.args, vec!["dave_60", "/rec/10"]);
    }

    #[test]
    fn zero_duration_means_unbounded() {
        let config = CaptureConfig {
            duration_secs: Some(0),
            ..CaptureConfig::default()
        };
        assert_eq!(CaptureCommand::from_config(&config).duration_secs, None);
    }

    #[test]
    fn outcome_display_and_artifact_policy() {
        assert_eq!(JobOutcome::Failed(Some(2)).to_string(), "exited with code 2");
        assert_eq!(JobOutcome::Failed(None).to_string(), "killed by a signal");
        assert!(JobOutcome::Clean.may_leave_artifact());
        assert!(JobOutcome::Terminated.may_leave_artifact());
        assert!(JobOutcome::Failed(Some(1)).may_leave_artifact());
        assert!(!JobOutcome::SpawnFailed("nope".into()).may_leave_artifact());
        assert!(JobOutcome::Failed(None).is_failure());
        assert!(!JobOutcome::Terminated.is_failure());
    }

    #[test]
    fn check_program_rejects_missing_path() {
        assert!(check_program("/definitely/not/a/recorder").is_err());
        assert!(check_program("definitely-not-a-recorder-binary").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn check_program_finds_sh_on_path() {
        assert!(check_program("sh").is_ok());
    }
}

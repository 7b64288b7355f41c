//! Capture process plumbing: spawn, output forwarding, termination.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::job::{JobOutcome, JobSpec};

/// Bounded wait for the output pumps once the process is gone; a grandchild
/// holding the pipe open must not pin the waiter.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) fn spawn(spec: &JobSpec) -> io::Result<Child> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd.spawn()
}

/// Line pumps for the child's stdout (debug) and stderr (warn).
pub(crate) struct OutputPumps {
    handles: Vec<JoinHandle<()>>,
}

impl OutputPumps {
    pub(crate) fn attach(entity: &str, child: &mut Child) -> Self {
        let mut handles = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            handles.push(pump(entity.to_string(), stdout, false));
        }
        if let Some(stderr) = child.stderr.take() {
            handles.push(pump(entity.to_string(), stderr, true));
        }
        Self { handles }
    }

    pub(crate) async fn finish(self) {
        for mut handle in self.handles {
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await.is_err() {
                handle.abort();
            }
        }
    }
}

fn pump<R>(entity: String, stream: R, is_stderr: bool) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if is_stderr {
                warn!(entity = %entity, "recorder stderr: {}", line);
            } else {
                debug!(entity = %entity, "recorder: {}", line);
            }
        }
    })
}

pub(crate) fn classify(status: io::Result<ExitStatus>) -> JobOutcome {
    match status {
        Ok(status) if status.success() => JobOutcome::Clean,
        Ok(status) => JobOutcome::Failed(status.code()),
        Err(e) => {
            error!(error = %e, "failed waiting for capture process");
            JobOutcome::Failed(None)
        }
    }
}

/// Asks the process to exit (SIGTERM on unix) so the recorder can close its
/// file, then kills it if it is still alive after `grace`.
pub(crate) async fn terminate(entity: &str, child: &mut Child, grace: Duration) {
    if request_exit(child) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                info!(entity = %entity, ?status, "capture process exited after stop request");
                return;
            }
            Ok(Err(e)) => {
                warn!(entity = %entity, error = %e, "failed waiting for stopped capture process");
            }
            Err(_) => {
                warn!(entity = %entity, grace_secs = grace.as_secs(), "capture process ignored stop request, killing");
            }
        }
    }
    if let Err(e) = child.kill().await {
        warn!(entity = %entity, error = %e, "failed to kill capture process");
    }
}

#[cfg(unix)]
fn request_exit(child: &Child) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return false;
    };
    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            debug!(pid, error = %e, "SIGTERM not delivered");
            false
        }
    }
}

#[cfg(not(unix))]
fn request_exit(_child: &Child) -> bool {
    false
}

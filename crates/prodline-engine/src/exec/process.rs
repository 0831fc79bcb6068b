//! Monitored operator execution: process-group spawn, line-streamed
//! output, concurrent resource sampling, and deadline enforcement.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;

use prodline_types::errors::PipelineError;
use prodline_types::result::{exit_code, ExecutionResult, OperatorStatus, ResourceSample};

use crate::exec::monitor::{ResourceMonitor, DEFAULT_SAMPLE_INTERVAL};

/// Grace period between SIGTERM and SIGKILL when a deadline passes.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// One operator command plus everything needed to run it bounded.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub pipeline_id: String,
    pub node_id: String,
    pub operator_id: String,
    /// Full shell command line, activation prefix already applied.
    pub command: String,
    pub cwd: PathBuf,
    /// Complete child environment; the child inherits nothing else.
    pub env: HashMap<String, String>,
    pub timeout: Duration,
}

pub struct ProcessExecutor {
    pub sample_interval: Duration,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self {
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the command as a monitored child in its own process group.
    ///
    /// The child's stdout and stderr stream to the log sink line by
    /// line, a sampler task records resource usage alongside, and the
    /// whole process group is terminated when the timeout passes.
    ///
    /// # Errors
    ///
    /// Only spawn-level faults return `Err`; a nonzero exit or timeout
    /// is reported through the `ExecutionResult`.
    pub async fn execute(&self, req: &ExecutionRequest) -> Result<ExecutionResult, PipelineError> {
        tracing::info!(
            pipeline = req.pipeline_id,
            node = req.node_id,
            operator = req.operator_id,
            timeout_secs = req.timeout.as_secs(),
            "Starting operator process"
        );

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&req.command)
            .current_dir(&req.cwd)
            .env_clear()
            .envs(&req.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .with_context(|| format!("Failed to spawn operator '{}'", req.operator_id))?;

        let pid = child
            .id()
            .context("spawned child has no pid")?;

        let stdout_task = forward_lines(
            child.stdout.take().context("child stdout not piped")?,
            req.operator_id.clone(),
            false,
        );
        let stderr_task = forward_lines(
            child.stderr.take().context("child stderr not piped")?,
            req.operator_id.clone(),
            true,
        );

        let peak = Arc::new(Mutex::new(ResourceSample::default()));
        let (done_tx, done_rx) = watch::channel(false);
        let sampler = tokio::spawn(sample_loop(
            pid,
            self.sample_interval,
            req.operator_id.clone(),
            req.node_id.clone(),
            req.pipeline_id.clone(),
            peak.clone(),
            done_rx,
        ));

        let start = Instant::now();
        let waited = tokio::select! {
            status = child.wait() => Some(status),
            () = tokio::time::sleep(req.timeout) => None,
        };

        let (code, status) = match waited {
            Some(status) => {
                let status = status.context("Failed to wait for operator process")?;
                let code = unix_exit_code(&status);
                let op_status = if code == exit_code::SUCCESS {
                    OperatorStatus::Succeeded
                } else {
                    OperatorStatus::Failed
                };
                (code, op_status)
            }
            None => {
                tracing::error!(
                    operator = req.operator_id,
                    timeout_secs = req.timeout.as_secs(),
                    "Operator exceeded timeout, terminating process group"
                );
                terminate_group(pid, &mut child).await;
                (exit_code::RESOURCE, OperatorStatus::TimedOut)
            }
        };

        // Stop the sampler before finalizing so the peak is complete.
        let _ = done_tx.send(true);
        let _ = sampler.await;
        let _ = stdout_task.await;
        let _ = stderr_task.await;

        let duration_secs = start.elapsed().as_secs_f64();
        let peak = *peak.lock().unwrap_or_else(|e| e.into_inner());

        tracing::info!(
            pipeline = req.pipeline_id,
            node = req.node_id,
            operator = req.operator_id,
            exit_code = code,
            duration_secs,
            "Operator process finished"
        );

        Ok(ExecutionResult {
            operator_id: req.operator_id.clone(),
            node_id: req.node_id.clone(),
            exit_code: code,
            duration_secs,
            peak,
            status,
        })
    }
}

fn unix_exit_code(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

fn forward_lines<R>(
    reader: R,
    operator_id: String,
    is_stderr: bool,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if is_stderr {
                tracing::warn!(operator = operator_id, "{line}");
            } else {
                tracing::info!(operator = operator_id, "{line}");
            }
        }
    })
}

/// Sampler task: runs alongside the child without ever blocking it,
/// folding samples into the shared peak until told to stop.
async fn sample_loop(
    pid: u32,
    interval: Duration,
    operator_id: String,
    node_id: String,
    pipeline_id: String,
    peak: Arc<Mutex<ResourceSample>>,
    mut done: watch::Receiver<bool>,
) {
    let mut monitor = ResourceMonitor::new(pid);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; skip it so the child gets one
    // interval of runway before the first reading.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(sample) = monitor.sample() else {
                    break;
                };
                tracing::info!(
                    pipeline = pipeline_id,
                    node = node_id,
                    operator = operator_id,
                    cpu_percent = format!("{:.2}", sample.cpu_percent),
                    memory_mb = format!("{:.2}", sample.memory_mb),
                    disk_read_mb_s = format!("{:.2}", sample.disk_read_mb_s),
                    disk_write_mb_s = format!("{:.2}", sample.disk_write_mb_s),
                    net_sent_mb_s = format!("{:.2}", sample.net_sent_mb_s),
                    net_recv_mb_s = format!("{:.2}", sample.net_recv_mb_s),
                    "Resource sample"
                );
                peak.lock().unwrap_or_else(|e| e.into_inner()).fold_peak(&sample);
            }
            _ = done.changed() => break,
        }
    }
}

/// Terminate the child's entire process group: SIGTERM, a grace
/// period, then SIGKILL. Termination is unconditional; no cooperative
/// cancellation is attempted.
async fn terminate_group(pgid: u32, child: &mut Child) {
    if let Err(e) = signal_group(pgid, Signal::SIGTERM) {
        tracing::warn!(pgid, "Failed to SIGTERM process group: {e}");
    }
    match tokio::time::timeout(KILL_GRACE, child.wait()).await {
        Ok(_) => {}
        Err(_) => {
            tracing::warn!(pgid, "Process group survived SIGTERM, sending SIGKILL");
            if let Err(e) = signal_group(pgid, Signal::SIGKILL) {
                tracing::warn!(pgid, "Failed to SIGKILL process group: {e}");
            }
            let _ = child.wait().await;
        }
    }
}

/// Negative pid addresses the whole group, so descendants of the
/// immediate child receive the signal too.
fn signal_group(pgid: u32, sig: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), sig)
}

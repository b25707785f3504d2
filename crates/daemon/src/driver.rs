//! Test process management
//!
//! Launches the external test executable for a run, streams its output as
//! ordered events, and delivers termination requests. How the executable is
//! found and signalled differs per platform; nothing outside this module
//! needs to know.

use crate::config::RunnerConfig;
use runwright_common::{Agent, Error, Result, RunId};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on captured bytes per stream
const MAX_OUTPUT_BYTES: usize = 16 * 1024 * 1024;
const READ_CHUNK: usize = 8192;
const EVENT_BUFFER: usize = 64;

/// Program, argument vector and working directory of one test process.
///
/// Arguments are passed to the OS as discrete tokens; nothing is ever joined
/// into a shell command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl Invocation {
    /// Build the invocation for one run's test definition.
    pub fn for_run(config: &RunnerConfig, test_file: &str, agents: &[Agent]) -> Self {
        let program = config
            .program
            .clone()
            .unwrap_or_else(|| default_program().to_string());

        let mut args = config.args.clone();
        args.push(test_file.to_string());
        args.push(format!("--reporter={}", config.reporter));
        args.extend(agents.iter().map(|a| format!("--project={}", a)));

        Self {
            program,
            args,
            cwd: config.workspace_dir.clone(),
        }
    }
}

/// `npx` ships as a batch shim on Windows.
fn default_program() -> &'static str {
    if cfg!(windows) {
        "npx.cmd"
    } else {
        "npx"
    }
}

/// Something observed on a running process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A chunk of stdout arrived
    Stdout { bytes: usize },
}

/// Everything a finished process produced
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was ended by a signal
    pub exit_code: Option<i32>,
}

/// Cheap, cloneable reference to a running process.
///
/// Outlives the process; terminating through a stale handle does nothing.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    run_id: RunId,
    pid: Option<u32>,
    stop: CancellationToken,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// A launched test process and its output pumps
pub struct RunningProcess {
    handle: ProcessHandle,
    events: mpsc::Receiver<ProcessEvent>,
    supervisor: JoinHandle<std::io::Result<ExitStatus>>,
    stdout: JoinHandle<std::io::Result<Vec<u8>>>,
    stderr: JoinHandle<std::io::Result<Vec<u8>>>,
}

impl RunningProcess {
    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    /// Next output event, in arrival order. `None` once stdout is closed.
    pub async fn next_event(&mut self) -> Option<ProcessEvent> {
        self.events.recv().await
    }

    /// Wait for exit and collect accumulated output.
    pub async fn wait(mut self) -> Result<ProcessOutput> {
        while self.events.recv().await.is_some() {}

        let stdout = join_pump(self.stdout).await?;
        let stderr = join_pump(self.stderr).await?;
        let status = join_pump(self.supervisor).await?;

        debug!(
            "Test process for run {} exited with {:?} ({} bytes stdout, {} bytes stderr)",
            self.handle.run_id,
            status.code(),
            stdout.len(),
            stderr.len()
        );

        Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: status.code(),
        })
    }
}

async fn join_pump<T>(task: JoinHandle<std::io::Result<T>>) -> Result<T> {
    task.await
        .map_err(|e| Error::Internal(format!("process task failed: {}", e)))?
        .map_err(Error::Io)
}

/// Launches and signals test processes
#[derive(Debug, Clone, Default)]
pub struct ProcessDriver;

impl ProcessDriver {
    pub fn new() -> Self {
        Self
    }

    /// Spawn the test process for a run.
    pub fn start(&self, run_id: RunId, invocation: &Invocation) -> Result<RunningProcess> {
        debug!(
            "Test command for run {}: {} {:?} (cwd {})",
            run_id,
            invocation.program,
            invocation.args,
            invocation.cwd.display()
        );

        let mut std_cmd = std::process::Command::new(&invocation.program);
        std_cmd
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group so termination reaches browsers spawned by the runner.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }

        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Spawn(format!(
                    "`{}` not found (is Node.js with Playwright installed?): {}",
                    invocation.program, e
                ))
            } else {
                Error::Spawn(format!("failed to spawn `{}`: {}", invocation.program, e))
            }
        })?;

        let pid = child.id();
        info!("Test process for run {} started with PID {:?}", run_id, pid);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Spawn("stderr was not captured".to_string()))?;

        let (tx, events) = mpsc::channel(EVENT_BUFFER);
        let stop = CancellationToken::new();

        Ok(RunningProcess {
            handle: ProcessHandle {
                run_id,
                pid,
                stop: stop.clone(),
            },
            events,
            supervisor: tokio::spawn(supervise(child, stop, run_id)),
            stdout: tokio::spawn(pump(stdout, Some(tx))),
            stderr: tokio::spawn(pump(stderr, None)),
        })
    }

    /// Ask a process to shut down gracefully.
    ///
    /// Never fails; a handle whose process already exited is ignored.
    pub fn terminate(&self, handle: &ProcessHandle) {
        if !handle.stop.is_cancelled() {
            info!("Terminating test process for run {}", handle.run_id);
        }
        handle.stop.cancel();
    }
}

async fn supervise(
    mut child: Child,
    stop: CancellationToken,
    run_id: RunId,
) -> std::io::Result<ExitStatus> {
    tokio::select! {
        status = child.wait() => status,
        _ = stop.cancelled() => {
            send_terminate(&mut child, run_id);
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child, run_id: RunId) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        // ESRCH: the group is already gone
        if e != nix::errno::Errno::ESRCH {
            warn!("Failed to signal test process for run {}: {}", run_id, e);
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child, run_id: RunId) {
    if let Err(e) = child.start_kill() {
        warn!("Failed to stop test process for run {}: {}", run_id, e);
    }
}

/// Read a stream to the end, emitting an event per chunk when asked to.
async fn pump<R: AsyncRead + Unpin>(
    mut reader: R,
    events: Option<mpsc::Sender<ProcessEvent>>,
) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];
    let mut truncated = false;

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }

        let room = MAX_OUTPUT_BYTES.saturating_sub(buf.len());
        if room < n && !truncated {
            warn!(max_bytes = MAX_OUTPUT_BYTES, "test output exceeded limit, truncating");
            truncated = true;
        }
        buf.extend_from_slice(&chunk[..n.min(room)]);

        if let Some(tx) = &events {
            // Receiver gone means nobody tracks progress anymore; keep draining.
            let _ = tx.send(ProcessEvent::Stdout { bytes: n }).await;
        }
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_invocation_passes_discrete_arguments() {
        let config = RunnerConfig {
            program: Some("npx".to_string()),
            ..Default::default()
        };
        let inv = Invocation::for_run(
            &config,
            "dynamic-abc.spec.js",
            &[Agent::Chromium, Agent::Webkit],
        );

        assert_eq!(inv.program, "npx");
        assert_eq!(
            inv.args,
            vec![
                "playwright",
                "test",
                "dynamic-abc.spec.js",
                "--reporter=json",
                "--project=chromium",
                "--project=webkit",
            ]
        );
    }

    #[test]
    fn test_default_program_is_platform_specific() {
        let inv = Invocation::for_run(&RunnerConfig::default(), "t.spec.js", &[Agent::Firefox]);
        if cfg!(windows) {
            assert_eq!(inv.program, "npx.cmd");
        } else {
            assert_eq!(inv.program, "npx");
        }
    }

    #[cfg(unix)]
    fn sh(script: &str) -> Invocation {
        Invocation {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            cwd: PathBuf::from("."),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_collects_output_and_exit_code() {
        let driver = ProcessDriver::new();
        let mut running = driver
            .start(RunId::new(), &sh("printf out; printf err >&2; exit 3"))
            .unwrap();

        let mut chunks = 0;
        while let Some(ProcessEvent::Stdout { bytes }) = running.next_event().await {
            assert!(bytes > 0);
            chunks += 1;
        }
        assert!(chunks >= 1);

        let output = running.wait().await.unwrap();
        assert_eq!(output.stdout, "out");
        assert_eq!(output.stderr, "err");
        assert_eq!(output.exit_code, Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_stops_running_process() {
        let driver = ProcessDriver::new();
        let running = driver.start(RunId::new(), &sh("exec sleep 30")).unwrap();
        let handle = running.handle().clone();

        driver.terminate(&handle);

        let output = tokio::time::timeout(Duration::from_secs(10), running.wait())
            .await
            .expect("process should exit after SIGTERM")
            .unwrap();
        assert_eq!(output.exit_code, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_after_exit_is_noop() {
        let driver = ProcessDriver::new();
        let running = driver.start(RunId::new(), &sh("exit 0")).unwrap();
        let handle = running.handle().clone();

        let output = running.wait().await.unwrap();
        assert_eq!(output.exit_code, Some(0));

        driver.terminate(&handle);
        driver.terminate(&handle);
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_error() {
        let driver = ProcessDriver::new();
        let inv = Invocation {
            program: "runwright-definitely-not-installed".to_string(),
            args: vec![],
            cwd: PathBuf::from("."),
        };

        match driver.start(RunId::new(), &inv) {
            Err(Error::Spawn(msg)) => assert!(msg.contains("not found")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("spawn should fail"),
        }
    }
}

//! Child process control: oneshot runs, detached launches and pid files.

use chrono::Utc;
use squad_core::{PidFile, Result, SquadError};
use squad_store::AgentPaths;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// A fully resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Layered over the inherited process environment
    pub env: BTreeMap<String, String>,
    /// Written to the child's stdin, which is then closed
    pub stdin: Option<String>,
}

/// How a oneshot child ended, with its captured output lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneshotRun {
    pub code: Option<i32>,
    pub signal: Option<String>,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOutcome {
    pub stopped: bool,
    pub pid: Option<u32>,
}

/// Run to completion, teeing stdout and stderr into the agent's log files.
///
/// Failure to start the command is reported as [`SquadError::Process`].
#[instrument(skip(invocation, stdout_log, stderr_log), fields(command = %invocation.command))]
pub async fn run_oneshot(invocation: &Invocation, stdout_log: &Path, stderr_log: &Path) -> Result<OneshotRun> {
    let mut child = Command::new(&invocation.command)
        .args(&invocation.args)
        .current_dir(&invocation.cwd)
        .envs(&invocation.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SquadError::Process(format!("failed to start {}: {}", invocation.command, e)))?;

    let stdin = child.stdin.take();
    let feed = async move {
        if let Some(mut pipe) = stdin {
            if let Some(text) = &invocation.stdin {
                // A child that never reads its input closes the pipe early.
                if let Err(e) = pipe.write_all(text.as_bytes()).await {
                    debug!("stdin not fully written: {}", e);
                }
            }
        }
    };

    let (_, stdout_lines, stderr_lines) = tokio::join!(
        feed,
        capture(child.stdout.take(), stdout_log),
        capture(child.stderr.take(), stderr_log),
    );
    let status = child.wait().await?;

    Ok(OneshotRun {
        code: status.code(),
        signal: exit_signal(&status),
        stdout_lines: stdout_lines?,
        stderr_lines: stderr_lines?,
    })
}

/// Copy a pipe into `log_path` line by line and return the lines.
async fn capture<R: AsyncRead + Unpin>(pipe: Option<R>, log_path: &Path) -> Result<Vec<String>> {
    let Some(pipe) = pipe else {
        return Ok(Vec::new());
    };
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut log = OpenOptions::new().create(true).append(true).open(log_path).await?;

    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    let mut lines = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        log.write_all(&buf).await?;
        let line = String::from_utf8_lossy(&buf);
        lines.push(line.trim_end_matches(['\n', '\r']).to_string());
    }
    log.flush().await?;
    Ok(lines)
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<String> {
    use nix::sys::signal::Signal;
    use std::os::unix::process::ExitStatusExt;

    status.signal().map(|raw| match Signal::try_from(raw) {
        Ok(signal) => signal.as_str().to_string(),
        Err(_) => raw.to_string(),
    })
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<String> {
    None
}

/// Launch a long-lived child in its own process group and record its pid.
///
/// Output is appended to the agent's log files; stdin is closed.
#[instrument(skip(invocation, paths), fields(command = %invocation.command))]
pub async fn start_detached(invocation: &Invocation, paths: &AgentPaths) -> Result<PidFile> {
    fs::create_dir_all(&paths.root).await?;
    let stdout = append_handle(&paths.stdout)?;
    let stderr = append_handle(&paths.stderr)?;

    let mut command = Command::new(&invocation.command);
    command
        .args(&invocation.args)
        .current_dir(&invocation.cwd)
        .envs(&invocation.env)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr);
    #[cfg(unix)]
    command.process_group(0);

    let child = command
        .spawn()
        .map_err(|e| SquadError::Process(format!("failed to start {}: {}", invocation.command, e)))?;
    let pid = child
        .id()
        .ok_or_else(|| SquadError::Process(format!("{} exited before reporting a pid", invocation.command)))?;

    let record = PidFile {
        pid,
        command: invocation.command.clone(),
        args: invocation.args.clone(),
        started_at: Utc::now(),
    };
    fs::write(&paths.pid, serde_json::to_string_pretty(&record)?).await?;

    info!("Started {} as pid {}", invocation.command, pid);
    Ok(record)
}

fn append_handle(path: &Path) -> Result<std::fs::File> {
    Ok(std::fs::OpenOptions::new().create(true).append(true).open(path)?)
}

/// The recorded pid, if the file exists and parses.
pub async fn read_pid(path: &Path) -> Result<Option<PidFile>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_str(&content) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            debug!("Ignoring unreadable pid file {}: {}", path.display(), e);
            Ok(None)
        }
    }
}

/// Signal-0 probe. A process owned by another user still counts as alive.
#[cfg(unix)]
pub fn is_pid_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_pid_alive(_pid: u32) -> bool {
    false
}

/// Terminate the process recorded in `pid_path` and remove the file.
pub async fn stop_pid(pid_path: &Path) -> Result<StopOutcome> {
    let Some(record) = read_pid(pid_path).await? else {
        return Ok(StopOutcome {
            stopped: false,
            pid: None,
        });
    };
    if !is_pid_alive(record.pid) {
        remove_pid_file(pid_path).await?;
        debug!("Pid {} already gone", record.pid);
        return Ok(StopOutcome {
            stopped: false,
            pid: Some(record.pid),
        });
    }

    terminate(record.pid)?;
    remove_pid_file(pid_path).await?;
    info!("Sent SIGTERM to {}", record.pid);
    Ok(StopOutcome {
        stopped: true,
        pid: Some(record.pid),
    })
}

async fn remove_pid_file(pid_path: &Path) -> Result<()> {
    match fs::remove_file(pid_path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn terminate(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| SquadError::Process(format!("invalid pid {}", pid)))?;
    kill(Pid::from_raw(raw), Signal::SIGTERM)
        .map_err(|e| SquadError::Process(format!("failed to signal {}: {}", pid, e)))
}

#[cfg(not(unix))]
fn terminate(pid: u32) -> Result<()> {
    Err(SquadError::Process(format!(
        "stopping pid {} is not supported on this platform",
        pid
    )))
}

//! Local shell execution with a timeout and bounded output capture.

use std::io::{ErrorKind, Read};
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Shell used for local templates.
pub const LOCAL_SHELL: &str = "/bin/sh";

/// Default bound on captured output per stream.
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 100_000;

/// Output captured from a local process or a remote session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal or the remote side sent no status.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Run `command` through `/bin/sh -c` in a process group of its own.
///
/// The shell is reaped and the whole group is killed before returning, so a
/// pipeline member or background job can neither outlive the call nor keep the
/// output pipes open past `timeout`. At most `output_limit_bytes` per stream are
/// kept; the rest is drained and counted.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes = output_limit_bytes))]
pub fn run_shell(command: &str, timeout: Duration, output_limit_bytes: usize) -> Result<CommandOutput> {
    let mut child = spawn_shell(command)?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_reader = spawn_reader(stdout, output_limit_bytes);
    let stderr_reader = spawn_reader(stderr, output_limit_bytes);

    let waited = child.wait_timeout(timeout).context("wait for shell");
    let timed_out = matches!(waited, Ok(None));
    if timed_out {
        warn!(timeout_secs = timeout.as_secs(), "command timed out, killing its process group");
    }
    kill_process_group(&mut child);
    let status = match waited {
        Ok(Some(status)) => status,
        Ok(None) => child.wait().context("reap shell after kill")?,
        Err(err) => {
            if let Err(reap_err) = child.wait() {
                debug!(err = %reap_err, "reap shell after failed wait");
            }
            return Err(err);
        }
    };

    let (stdout, stdout_truncated) = join_reader(stdout_reader).context("collect stdout")?;
    let (stderr, stderr_truncated) = join_reader(stderr_reader).context("collect stderr")?;
    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "shell finished");
    Ok(CommandOutput {
        exit_code: status.code(),
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn spawn_shell(command: &str) -> Result<Child> {
    let mut cmd = Command::new(LOCAL_SHELL);
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    cmd.process_group(0);

    debug!("spawning local shell");
    cmd.spawn().map_err(|err| {
        error!(err = %err, "failed to spawn shell");
        anyhow::Error::new(err).context("spawn shell")
    })
}

/// SIGKILL every process in the shell's group. The group id is the shell's pid.
#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(child.id()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        // ESRCH: the group is already empty.
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => {
            warn!(err = %err, "kill process group failed, killing the shell only");
            if let Err(err) = child.kill() {
                debug!(err = %err, "kill shell");
            }
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    if let Err(err) = child.kill() {
        debug!(err = %err, "kill shell");
    }
}

type Reader = thread::JoinHandle<Result<(Vec<u8>, usize)>>;

fn spawn_reader<R: Read + Send + 'static>(stream: R, limit: usize) -> Reader {
    thread::spawn(move || read_stream_limited(stream, limit))
}

fn join_reader(handle: Reader) -> Result<(Vec<u8>, usize)> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

/// Keeps the first `limit` bytes pushed into it and counts the rest.
#[derive(Debug)]
pub(crate) struct BoundedBuffer {
    kept: Vec<u8>,
    limit: usize,
    discarded: usize,
}

impl BoundedBuffer {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            kept: Vec::new(),
            limit,
            discarded: 0,
        }
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.kept.len());
        let keep = chunk.len().min(room);
        self.kept.extend_from_slice(&chunk[..keep]);
        self.discarded += chunk.len() - keep;
    }

    /// Kept bytes and the number of bytes discarded.
    pub(crate) fn into_parts(self) -> (Vec<u8>, usize) {
        (self.kept, self.discarded)
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buffer = BoundedBuffer::new(limit);
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => return Ok(buffer.into_parts()),
            Ok(n) => buffer.push(&chunk[..n]),
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err).context("read output"),
        }
    }
}

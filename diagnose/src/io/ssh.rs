//! Remote command execution over a secure shell session.
//!
//! Every call opens its own TCP connection and session and tears both down
//! before returning, whichever path it takes. Nothing is cached between calls.

use std::io::{ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use ssh2::Session;
use tracing::{debug, instrument, warn};

use crate::core::auth::{Credentials, DEFAULT_SSH_PORT};
use crate::io::process::{BoundedBuffer, CommandOutput};

/// Bound on connect, handshake and authentication.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause between polls when neither stream has data.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

const FALLBACK_USER: &str = "root";

/// Where and as whom a remote command runs.
#[derive(Debug, Clone)]
pub struct RemoteTarget<'a> {
    pub node: &'a str,
    /// `None` under the `none` policy: connect to the node and use the ssh agent.
    pub credentials: Option<&'a Credentials>,
}

impl RemoteTarget<'_> {
    fn host(&self) -> &str {
        match self.credentials {
            Some(creds) => creds.host_or(self.node),
            None => self.node,
        }
    }

    fn port(&self) -> u16 {
        self.credentials
            .map(|creds| creds.port)
            .unwrap_or(DEFAULT_SSH_PORT)
    }

    fn username(&self) -> String {
        self.credentials
            .and_then(|creds| creds.username.clone())
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| FALLBACK_USER.to_string())
    }
}

/// Open session; disconnects on drop.
struct Connection {
    session: Session,
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(err) = self.session.disconnect(None, "diagnosis command finished", None) {
            debug!(err = %err, "ssh disconnect failed");
        }
    }
}

/// Run `command` on the target and capture its output.
///
/// Stdout and stderr are read interleaved until both reach EOF or `timeout`
/// elapses. A timed-out command is reported with `timed_out` set and no exit code.
#[instrument(skip_all, fields(node = target.node, timeout_secs = timeout.as_secs()))]
pub fn run_remote(
    target: &RemoteTarget<'_>,
    command: &str,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    let connection = connect(target)?;
    let session = &connection.session;
    session.set_timeout(millis(timeout));

    let mut channel = session.channel_session().context("open ssh channel")?;
    channel.exec(command).context("exec remote command")?;

    session.set_blocking(false);
    let captured = read_interleaved(
        &mut channel.stream(0),
        &mut channel.stderr(),
        timeout,
        output_limit_bytes,
    );
    session.set_blocking(true);
    let captured = captured?;

    let (stdout, stdout_truncated) = captured.stdout.into_parts();
    let (stderr, stderr_truncated) = captured.stderr.into_parts();
    let exit_code = if captured.timed_out {
        warn!(timeout_secs = timeout.as_secs(), "remote command timed out");
        None
    } else {
        channel.wait_close().context("close ssh channel")?;
        let code = channel.exit_status().context("remote exit status")?;
        debug!(exit_code = code, "remote command finished");
        Some(code)
    };
    Ok(CommandOutput {
        exit_code,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out: captured.timed_out,
    })
}

fn connect(target: &RemoteTarget<'_>) -> Result<Connection> {
    let host = target.host();
    let port = target.port();
    let addr = (host, port)
        .to_socket_addrs()
        .with_context(|| format!("resolve {}:{}", host, port))?
        .next()
        .ok_or_else(|| anyhow!("no address for {}:{}", host, port))?;

    debug!(%addr, "connecting");
    let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
        .with_context(|| format!("connect {}", addr))?;

    let mut session = Session::new().context("create ssh session")?;
    session.set_timeout(millis(CONNECT_TIMEOUT));
    session.set_tcp_stream(tcp);
    let mut connection = Connection { session };
    connection
        .session
        .handshake()
        .with_context(|| format!("ssh handshake with {}", addr))?;
    authenticate(&connection.session, target)?;
    Ok(connection)
}

/// Password first, then the key file; the ssh agent only when neither is configured.
fn authenticate(session: &Session, target: &RemoteTarget<'_>) -> Result<()> {
    let user = target.username();
    let password = target.credentials.and_then(|c| c.password.as_deref());
    let key_path = target.credentials.and_then(|c| c.key_path.as_deref());

    if let Some(password) = password {
        if let Err(err) = session.userauth_password(&user, password) {
            warn!(user = %user, err = %err, "password authentication rejected");
        }
    }
    if !session.authenticated() {
        if let Some(key_path) = key_path {
            let key = expand_home(key_path);
            session
                .userauth_pubkey_file(&user, None, &key, None)
                .with_context(|| format!("public key authentication as {}", user))?;
        }
    }
    if !session.authenticated() && password.is_none() && key_path.is_none() {
        session
            .userauth_agent(&user)
            .with_context(|| format!("ssh agent authentication as {}", user))?;
    }
    if !session.authenticated() {
        bail!("ssh authentication failed for {}@{}", user, target.host());
    }
    Ok(())
}

struct Interleaved {
    stdout: BoundedBuffer,
    stderr: BoundedBuffer,
    timed_out: bool,
}

struct StreamState {
    buffer: BoundedBuffer,
    eof: bool,
}

/// Poll two non-blocking streams in turn so neither can stall the other
/// behind a full channel window.
fn read_interleaved<O: Read, E: Read>(
    stdout: &mut O,
    stderr: &mut E,
    timeout: Duration,
    limit: usize,
) -> Result<Interleaved> {
    let deadline = Instant::now() + timeout;
    let mut out = StreamState {
        buffer: BoundedBuffer::new(limit),
        eof: false,
    };
    let mut err = StreamState {
        buffer: BoundedBuffer::new(limit),
        eof: false,
    };
    let timed_out = loop {
        let out_progress = drain_available(stdout, &mut out).context("read remote stdout")?;
        let err_progress = drain_available(stderr, &mut err).context("read remote stderr")?;
        if out.eof && err.eof {
            break false;
        }
        if !out_progress && !err_progress {
            if Instant::now() >= deadline {
                break true;
            }
            thread::sleep(POLL_INTERVAL);
        }
    };
    Ok(Interleaved {
        stdout: out.buffer,
        stderr: err.buffer,
        timed_out,
    })
}

/// Read until the stream would block or ends. Returns whether anything arrived.
fn drain_available<R: Read>(reader: &mut R, state: &mut StreamState) -> Result<bool> {
    let mut chunk = [0u8; 8192];
    let mut progressed = false;
    while !state.eof {
        match reader.read(&mut chunk) {
            Ok(0) => state.eof = true,
            Ok(n) => {
                state.buffer.push(&chunk[..n]);
                progressed = true;
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => break,
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(progressed)
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

fn millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;

    use super::*;

    /// Replays a script of reads; `None` is a would-block. Ends with EOF.
    struct ScriptedStream(VecDeque<Option<Vec<u8>>>);

    impl ScriptedStream {
        fn new(steps: &[Option<&str>]) -> Self {
            Self(
                steps
                    .iter()
                    .map(|step| step.map(|text| text.as_bytes().to_vec()))
                    .collect(),
            )
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                None => Ok(0),
                Some(None) => Err(io::Error::from(ErrorKind::WouldBlock)),
                Some(Some(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
            }
        }
    }

    /// Never produces data and never ends.
    struct Silent;

    impl Read for Silent {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::from(ErrorKind::WouldBlock))
        }
    }

    #[test]
    fn stderr_is_read_while_stdout_is_idle() {
        let mut stdout = ScriptedStream::new(&[None, None, None, Some("done")]);
        let mut stderr = ScriptedStream::new(&[Some("e1 "), None, Some("e2 "), None, Some("e3")]);
        let captured =
            read_interleaved(&mut stdout, &mut stderr, Duration::from_secs(5), 100).expect("read");
        assert!(!captured.timed_out);
        assert_eq!(captured.stdout.into_parts(), (b"done".to_vec(), 0));
        assert_eq!(captured.stderr.into_parts(), (b"e1 e2 e3".to_vec(), 0));
    }

    #[test]
    fn silent_streams_time_out() {
        let started = Instant::now();
        let captured = read_interleaved(
            &mut Silent,
            &mut ScriptedStream::new(&[Some("partial")]),
            Duration::from_millis(100),
            100,
        )
        .expect("read");
        assert!(captured.timed_out);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(captured.stderr.into_parts(), (b"partial".to_vec(), 0));
    }

    #[test]
    fn interleaved_capture_respects_the_limit() {
        let mut stdout = ScriptedStream::new(&[Some("abcdef")]);
        let mut stderr = ScriptedStream::new(&[]);
        let captured =
            read_interleaved(&mut stdout, &mut stderr, Duration::from_secs(5), 4).expect("read");
        assert_eq!(captured.stdout.into_parts(), (b"abcd".to_vec(), 2));
    }

    #[test]
    fn target_defaults_to_node_and_port_22() {
        let target = RemoteTarget {
            node: "10.1.2.3",
            credentials: None,
        };
        assert_eq!(target.host(), "10.1.2.3");
        assert_eq!(target.port(), DEFAULT_SSH_PORT);
    }

    #[test]
    fn credentials_override_host_port_and_user() {
        let creds = Credentials {
            username: Some("ops".to_string()),
            host: Some("db.internal".to_string()),
            port: 2222,
            ..Credentials::default()
        };
        let target = RemoteTarget {
            node: "db-1",
            credentials: Some(&creds),
        };
        assert_eq!(target.host(), "db.internal");
        assert_eq!(target.port(), 2222);
        assert_eq!(target.username(), "ops");
    }

    #[test]
    fn expand_home_only_touches_tilde_prefix() {
        assert_eq!(expand_home("/etc/key"), PathBuf::from("/etc/key"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/.ssh/id"), home.join(".ssh/id"));
        }
    }

    #[test]
    fn unreachable_host_fails_without_hanging() {
        let creds = Credentials {
            username: Some("nobody".to_string()),
            host: Some("127.0.0.1".to_string()),
            port: 1,
            ..Credentials::default()
        };
        let target = RemoteTarget {
            node: "local",
            credentials: Some(&creds),
        };
        let err = run_remote(&target, "true", Duration::from_secs(1), 100).unwrap_err();
        assert!(format!("{:#}", err).contains("connect"));
    }
}

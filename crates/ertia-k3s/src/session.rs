//! Remote sessions over the OpenSSH client
//!
//! A session is an OpenSSH control master opened with one of the private
//! keys in the keys directory. Commands and uploads are multiplexed over the
//! control socket, so authentication happens once per install call.
//!
//! # Privilege escalation
//!
//! Escalated commands run through `sudo` unless the session user is `root`.
//! When the node has an install password, it is written to sudo's stdin
//! (`sudo -S`); otherwise sudo must not prompt (`sudo -n`).

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use ertia_common::Secret;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::command::{quote, CommandOutput, RemoteCommand};
use crate::error::K3sError;
use crate::Attempt;

const ROOT_USER: &str = "root";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Unix socket paths are capped near 104 bytes and OpenSSH appends a
/// temporary suffix to the control path while binding it.
const CONTROL_NAME_LEN: usize = 12;
const SOCKET_PATH_TOO_LONG: &str = "too long for Unix domain socket";

/// Where and as whom to connect
#[derive(Clone, Debug)]
pub struct SessionTarget {
    /// Node name, for logs
    pub node: String,
    /// Address to connect to
    pub address: IpAddr,
    /// Login user
    pub user: String,
    /// Password for privilege escalation
    pub password: Option<Secret>,
}

/// An authenticated connection to one node
#[async_trait]
pub trait RemoteSession: Send {
    /// Write `contents` to `remote_path` on the node
    async fn upload(
        &mut self,
        remote_path: &str,
        contents: &[u8],
        timeout: Duration,
    ) -> Result<(), K3sError>;

    /// Run a command and capture its output
    ///
    /// A command that exits non-zero is not an error here; callers inspect
    /// [`CommandOutput::success`].
    async fn run(
        &mut self,
        command: &RemoteCommand,
        timeout: Duration,
    ) -> Result<CommandOutput, K3sError>;

    /// Tear the connection down. Further calls are no-ops.
    async fn close(&mut self);
}

/// Opens sessions to nodes
#[async_trait]
pub trait SessionOpener: Send + Sync {
    /// Try to open a session
    ///
    /// `NotReady` means no key was accepted (yet); the node may still be
    /// booting. Local problems such as a missing keys directory are errors.
    async fn open(&self, target: &SessionTarget)
        -> Result<Attempt<Box<dyn RemoteSession>>, K3sError>;
}

/// Private key files in `dir`, sorted, skipping `*.pub` and non-files
pub fn discover_private_keys(dir: &Path) -> Result<Vec<PathBuf>, K3sError> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        K3sError::config(format!("cannot read keys directory {}: {}", dir.display(), e))
    })?;

    let mut keys = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| K3sError::io(dir, e))?.path();
        let is_public = path.extension().is_some_and(|ext| ext == "pub");
        if path.is_file() && !is_public {
            keys.push(path);
        }
    }
    keys.sort();
    Ok(keys)
}

/// Build the remote shell line, wrapping escalated commands in sudo
///
/// Returns the line and whether the password has to be fed on stdin.
pub fn remote_line(command: &RemoteCommand, user: &str, has_password: bool) -> (String, bool) {
    let line = command.to_shell();
    if !command.is_escalated() || user == ROOT_USER {
        return (line, false);
    }
    if has_password {
        (format!("sudo -S -p '' sh -c {}", quote(&line)), true)
    } else {
        (format!("sudo -n sh -c {}", quote(&line)), false)
    }
}

/// Opens sessions with the local `ssh` binary
#[derive(Clone, Debug)]
pub struct OpenSshConnector {
    keys_dir: PathBuf,
    control_dir: PathBuf,
    connect_timeout: Duration,
    ssh_binary: String,
}

impl OpenSshConnector {
    /// Use the private keys found in `keys_dir`
    pub fn new(keys_dir: impl Into<PathBuf>) -> Self {
        Self {
            keys_dir: keys_dir.into(),
            control_dir: std::env::temp_dir(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ssh_binary: "ssh".to_string(),
        }
    }

    /// Time allowed for the TCP connect and handshake
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Use a different ssh executable
    pub fn with_ssh_binary(mut self, binary: impl Into<String>) -> Self {
        self.ssh_binary = binary.into();
        self
    }

    fn control_path(&self) -> PathBuf {
        let id = Uuid::new_v4().simple().to_string();
        self.control_dir
            .join(format!("ertia-{}", &id[..CONTROL_NAME_LEN]))
    }

    fn master_args(&self, key: &Path, control: &Path, destination: &str) -> Vec<String> {
        let mut args: Vec<String> = common_options()
            .into_iter()
            .chain([
                "-o".to_string(),
                format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
                "-o".to_string(),
                "IdentitiesOnly=yes".to_string(),
                "-o".to_string(),
                "ControlPersist=yes".to_string(),
                "-i".to_string(),
            ])
            .collect();
        args.push(key.display().to_string());
        args.extend(["-M", "-S"].map(String::from));
        args.push(control.display().to_string());
        args.extend(["-f", "-N"].map(String::from));
        args.push(destination.to_string());
        args
    }
}

fn common_options() -> Vec<String> {
    [
        "-o",
        "BatchMode=yes",
        "-o",
        "StrictHostKeyChecking=no",
        "-o",
        "UserKnownHostsFile=/dev/null",
        "-o",
        "LogLevel=ERROR",
    ]
    .map(String::from)
    .to_vec()
}

fn destination(target: &SessionTarget) -> String {
    format!("{}@{}", target.user, target.address)
}

#[async_trait]
impl SessionOpener for OpenSshConnector {
    async fn open(
        &self,
        target: &SessionTarget,
    ) -> Result<Attempt<Box<dyn RemoteSession>>, K3sError> {
        let keys = discover_private_keys(&self.keys_dir)?;
        if keys.is_empty() {
            return Err(K3sError::config(format!(
                "no private keys in {}",
                self.keys_dir.display()
            )));
        }

        let destination = destination(target);
        for key in &keys {
            let control = self.control_path();
            let args = self.master_args(key, &control, &destination);

            let mut cmd = Command::new(&self.ssh_binary);
            cmd.args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            // -f backgrounds the master once authenticated, so the foreground
            // process exits as soon as the outcome is known
            let deadline = self.connect_timeout + Duration::from_secs(5);
            let output = match tokio::time::timeout(deadline, cmd.output()).await {
                Ok(result) => result.map_err(K3sError::Spawn)?,
                Err(_) => {
                    debug!(node = %target.node, key = %key.display(), "SSH connect timed out");
                    continue;
                }
            };

            if output.status.success() {
                debug!(node = %target.node, key = %key.display(), "SSH session established");
                return Ok(Attempt::Completed(Box::new(OpenSshSession {
                    ssh_binary: self.ssh_binary.clone(),
                    control,
                    destination,
                    user: target.user.clone(),
                    password: target.password.clone(),
                    closed: false,
                })));
            }

            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains(SOCKET_PATH_TOO_LONG) {
                return Err(K3sError::config(format!(
                    "SSH control socket path {} is too long, point TMPDIR at a shorter directory",
                    control.display()
                )));
            }
            debug!(
                node = %target.node,
                key = %key.display(),
                stderr = %stderr.trim(),
                "SSH key rejected or host unreachable"
            );
        }

        warn!(node = %target.node, address = %target.address, keys = keys.len(), "No SSH key was accepted");
        Ok(Attempt::NotReady)
    }
}

/// Session multiplexed over an OpenSSH control socket
pub struct OpenSshSession {
    ssh_binary: String,
    control: PathBuf,
    destination: String,
    user: String,
    password: Option<Secret>,
    closed: bool,
}

impl OpenSshSession {
    fn command(&self, remote: &str) -> Command {
        let mut cmd = Command::new(&self.ssh_binary);
        cmd.args(common_options())
            .arg("-S")
            .arg(&self.control)
            .arg(&self.destination)
            .arg("--")
            .arg(remote)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn exec(
        &self,
        remote: &str,
        stdin: &[u8],
        timeout: Duration,
        description: &str,
    ) -> Result<CommandOutput, K3sError> {
        let mut child = self.command(remote).spawn().map_err(K3sError::Spawn)?;
        let stdin_pipe = child.stdin.take();
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let finished = {
            let run = async {
                let feed = async {
                    if let Some(mut pipe) = stdin_pipe {
                        // The remote side may exit before reading all input
                        if let Err(e) = pipe.write_all(stdin).await {
                            debug!(error = %e, "Remote command closed stdin early");
                        }
                    }
                };
                let (_, out, err) = tokio::join!(
                    feed,
                    drain(stdout_pipe, &mut stdout),
                    drain(stderr_pipe, &mut stderr)
                );
                match out.and(err) {
                    Ok(()) => child.wait().await,
                    Err(e) => Err(e),
                }
            };
            tokio::time::timeout(timeout, run).await
        };

        match finished {
            Ok(status) => {
                let success = status.map_err(K3sError::Spawn)?.success();
                Ok(CommandOutput::from_streams(success, &stdout, &stderr))
            }
            Err(_) => {
                if let Err(e) = child.start_kill() {
                    debug!(error = %e, "Timed out command already exited");
                }
                Err(K3sError::Timeout {
                    command: description.to_string(),
                    after: timeout,
                    output: CommandOutput::from_streams(false, &stdout, &stderr).combined(),
                })
            }
        }
    }
}

/// Read `pipe` to the end, appending each chunk to `buf` as it arrives
async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>, buf: &mut Vec<u8>) -> std::io::Result<()> {
    let Some(mut pipe) = pipe else {
        return Ok(());
    };
    let mut chunk = [0u8; 8192];
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

#[async_trait]
impl RemoteSession for OpenSshSession {
    async fn upload(
        &mut self,
        remote_path: &str,
        contents: &[u8],
        timeout: Duration,
    ) -> Result<(), K3sError> {
        let remote = format!("cat > {}", quote(remote_path));
        let description = format!("upload {}", remote_path);
        let output = self
            .exec(&remote, contents, timeout, &description)
            .await
            .map_err(|e| K3sError::Upload {
                path: remote_path.to_string(),
                message: e.to_string(),
            })?;

        if output.success {
            Ok(())
        } else {
            Err(K3sError::Upload {
                path: remote_path.to_string(),
                message: output.combined(),
            })
        }
    }

    async fn run(
        &mut self,
        command: &RemoteCommand,
        timeout: Duration,
    ) -> Result<CommandOutput, K3sError> {
        let (line, feed_password) = remote_line(command, &self.user, self.password.is_some());
        let stdin = match (&self.password, feed_password) {
            (Some(password), true) => format!("{}\n", password.expose()).into_bytes(),
            _ => Vec::new(),
        };
        debug!(command = %command.describe(), destination = %self.destination, "Running remote command");
        self.exec(&line, &stdin, timeout, &command.describe()).await
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let result = Command::new(&self.ssh_binary)
            .arg("-S")
            .arg(&self.control)
            .args(["-O", "exit"])
            .arg(&self.destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = result {
            warn!(error = %e, destination = %self.destination, "Failed to stop SSH control master");
        }
        let _ = tokio::fs::remove_file(&self.control).await;
    }
}

impl Drop for OpenSshSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Best effort: the control master would otherwise outlive us
        let _ = std::process::Command::new(&self.ssh_binary)
            .arg("-S")
            .arg(&self.control)
            .args(["-O", "exit"])
            .arg(&self.destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
    }
}

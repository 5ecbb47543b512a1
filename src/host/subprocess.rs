//! Subprocess host implementation
//!
//! Runs one agent as a child process. The protocol is line-oriented:
//! the child signals readiness by writing its first line to stdout, each
//! delivery is one payload line on stdin, and an optional acknowledgment
//! line on stdout upgrades the outcome from `Sent` to `Acknowledged`.

use std::env;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec};

use super::{Host, HostFactory};
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::types::{AgentIdentity, DeliveryOutcome};

/// Environment variable carrying the session identity into the child
pub const IDENTITY_ENV_VAR: &str = "AGENT_RELAY_IDENTITY";

/// Placeholder substituted with the identity in host argv templates
pub const IDENTITY_PLACEHOLDER: &str = "{identity}";

/// One agent hosted as a child process with piped stdio
pub struct SubprocessHost {
    identity: AgentIdentity,
    program: PathBuf,
    args: Vec<String>,
    readiness_timeout: Duration,
    delivery_timeout: Duration,
    shutdown_grace: Duration,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<FramedRead<ChildStdout, LinesCodec>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl SubprocessHost {
    /// Create a host for `identity`, resolving the program path
    ///
    /// # Errors
    /// Returns `HostUnavailable` if the program cannot be found.
    pub fn new(
        identity: AgentIdentity,
        program: &str,
        args: &[String],
        readiness_timeout: Duration,
        delivery_timeout: Duration,
        shutdown_grace: Duration,
    ) -> Result<Self> {
        let program = resolve_program(&identity, program)?;
        let args = args
            .iter()
            .map(|a| a.replace(IDENTITY_PLACEHOLDER, identity.as_str()))
            .collect();

        Ok(Self {
            identity,
            program,
            args,
            readiness_timeout,
            delivery_timeout,
            shutdown_grace,
            child: None,
            stdin: None,
            stdout: None,
            stderr_task: None,
        })
    }

    async fn wait_ready(&mut self) -> Result<()> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| RelayError::host_unavailable(self.identity.as_str(), "no stdout"))?;

        match tokio::time::timeout(self.readiness_timeout, stdout.next()).await {
            Ok(Some(Ok(line))) => {
                log::debug!("[{}] host ready: {}", self.identity, line.trim());
                Ok(())
            }
            Ok(Some(Err(e))) => Err(RelayError::host_unavailable(
                self.identity.as_str(),
                format!("readiness read failed: {e}"),
            )),
            Ok(None) => Err(RelayError::host_unavailable(
                self.identity.as_str(),
                "host exited before signalling readiness",
            )),
            Err(_) => Err(RelayError::readiness_timeout(self.identity.as_str())),
        }
    }
}

#[async_trait]
impl Host for SubprocessHost {
    async fn start(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Ok(());
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(IDENTITY_ENV_VAR, self.identity.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            // Pipe stderr so the child cannot touch the parent terminal
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            RelayError::host_unavailable(
                self.identity.as_str(),
                format!("failed to spawn {}: {e}", self.program.display()),
            )
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RelayError::host_unavailable(self.identity.as_str(), "no stdin handle"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RelayError::host_unavailable(self.identity.as_str(), "no stdout handle"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RelayError::host_unavailable(self.identity.as_str(), "no stderr handle"))?;

        // Drain stderr so the child never blocks on a full pipe
        let identity = self.identity.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = FramedRead::new(stderr, LinesCodec::new());
            while let Some(Ok(line)) = lines.next().await {
                log::debug!("[{identity}] stderr: {line}");
            }
        });

        self.stdin = Some(stdin);
        self.stdout = Some(FramedRead::new(stdout, LinesCodec::new()));
        self.stderr_task = Some(stderr_task);
        self.child = Some(child);

        if let Err(e) = self.wait_ready().await {
            let _ = self.stop().await;
            return Err(e);
        }
        Ok(())
    }

    async fn deliver(&mut self, payload: &str) -> Result<DeliveryOutcome> {
        if !self.is_alive() {
            return Err(RelayError::host_terminated(format!(
                "host for '{}' has exited",
                self.identity
            )));
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| RelayError::delivery_failed("stdin not available"))?;

        let mut line = payload.to_string();
        line.push('\n');
        let write = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await?;
            Ok::<_, std::io::Error>(())
        };
        if let Err(e) = write.await {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                return Err(RelayError::host_terminated(format!(
                    "host for '{}' closed stdin: {e}",
                    self.identity
                )));
            }
            return Err(RelayError::delivery_failed(format!(
                "write to host '{}': {e}",
                self.identity
            )));
        }

        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| RelayError::delivery_failed("stdout not available"))?;

        match tokio::time::timeout(self.delivery_timeout, stdout.next()).await {
            Ok(Some(Ok(_ack))) => Ok(DeliveryOutcome::Acknowledged),
            Ok(Some(Err(e))) => Err(RelayError::delivery_failed(format!(
                "acknowledgment read failed: {e}"
            ))),
            Ok(None) => Err(RelayError::host_terminated(format!(
                "host for '{}' closed stdout",
                self.identity
            ))),
            // The write succeeded and the host is alive; count it delivered
            Err(_) => Ok(DeliveryOutcome::Sent),
        }
    }

    async fn stop(&mut self) -> Result<()> {
        // Close stdin to signal the process to exit gracefully
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }
        self.stdout = None;

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(self.shutdown_grace, child.wait()).await {
                Ok(Ok(status)) => {
                    log::debug!("[{}] host exited with {status}", self.identity);
                }
                Ok(Err(e)) => {
                    if let Some(task) = self.stderr_task.take() {
                        task.abort();
                    }
                    return Err(RelayError::Io(e));
                }
                Err(_) => {
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                    log::warn!("[{}] host killed after shutdown grace period", self.identity);
                }
            }
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

/// Resolve the host program via PATH, falling back to a literal path
fn resolve_program(identity: &AgentIdentity, program: &str) -> Result<PathBuf> {
    if let Ok(path) = which::which(program) {
        return Ok(path);
    }

    let literal = PathBuf::from(program);
    if literal.is_file() {
        return Ok(literal);
    }

    // Last resort: relative to the current directory
    if let Ok(cwd) = env::current_dir() {
        let candidate = cwd.join(program);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    Err(RelayError::host_unavailable(
        identity.as_str(),
        format!("host program '{program}' not found"),
    ))
}

/// Factory producing [`SubprocessHost`]s from one command template
pub struct SubprocessHostFactory {
    program: String,
    args: Vec<String>,
    readiness_timeout: Duration,
    delivery_timeout: Duration,
    shutdown_grace: Duration,
}

impl SubprocessHostFactory {
    /// Build a factory from the relay configuration
    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            program: config.host_program.clone(),
            args: config.host_args.clone(),
            readiness_timeout: config.readiness_timeout,
            delivery_timeout: config.delivery_timeout,
            shutdown_grace: config.shutdown_timeout,
        }
    }
}

#[async_trait]
impl HostFactory for SubprocessHostFactory {
    async fn create(&self, identity: &AgentIdentity) -> Result<Box<dyn Host>> {
        let host = SubprocessHost::new(
            identity.clone(),
            &self.program,
            &self.args,
            self.readiness_timeout,
            self.delivery_timeout,
            self.shutdown_grace,
        )?;
        Ok(Box::new(host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_template_substitutes_identity() {
        let host = SubprocessHost::new(
            AgentIdentity::from("worker1"),
            "/bin/cat",
            &["--role".to_string(), "{identity}".to_string()],
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(host.args, vec!["--role".to_string(), "worker1".to_string()]);
    }

    #[test]
    fn missing_program_is_host_unavailable() {
        let result = SubprocessHost::new(
            AgentIdentity::from("worker1"),
            "definitely-not-a-real-binary-name",
            &[],
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(RelayError::HostUnavailable { .. })));
    }
}

//! Child-process sandbox backend

use super::{SandboxBackend, SandboxConnection, SandboxError};
use async_trait::async_trait;
use ember_config::SandboxSettings;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Runs each context as a child process
///
/// The child gets a cleared environment (only `PATH` survives) and a private
/// temporary working directory that is removed when the child exits. Each
/// envelope is one line on stdin/stdout; stderr is forwarded to debug logs.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    program: String,
    args: Vec<String>,
}

impl ProcessSandbox {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_settings(settings: &SandboxSettings) -> Result<Self, SandboxError> {
        let (program, args) = settings
            .command
            .split_first()
            .ok_or_else(|| SandboxError::Spawn("sandbox command is empty".to_string()))?;
        Ok(Self::new(program.clone(), args.iter().cloned()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl SandboxBackend for ProcessSandbox {
    async fn spawn(&self) -> Result<SandboxConnection, SandboxError> {
        let workdir = tempfile::Builder::new()
            .prefix("ember-sandbox-")
            .tempdir()
            .map_err(|e| SandboxError::Spawn(format!("cannot create working directory: {}", e)))?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env_clear()
            .current_dir(workdir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }

        let mut child = command
            .spawn()
            .map_err(|e| SandboxError::Spawn(format!("{}: {}", self.program, e)))?;
        let pid = child.id();
        debug!(program = %self.program, ?pid, "sandbox process started");

        let (Some(mut stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(SandboxError::Spawn("child stdio is not piped".to_string()));
        };

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                let line = format!("{}\n", text);
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    debug!(error = %e, "sandbox stdin closed");
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if inbound_tx.send(line).is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "ember::sandbox::stderr", "{}", line);
            }
        });

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx => {
                    if let Err(e) = child.kill().await {
                        warn!(?pid, error = %e, "failed to kill sandbox process");
                    }
                }
                status = child.wait() => {
                    debug!(?pid, ?status, "sandbox process exited");
                }
            }
            drop(workdir);
        });

        Ok(SandboxConnection::new(outbound_tx, inbound_rx, shutdown_tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings_splits_command() {
        let settings = SandboxSettings {
            command: vec!["deno".into(), "run".into(), "runner.ts".into()],
            ..Default::default()
        };
        let sandbox = ProcessSandbox::from_settings(&settings).unwrap();
        assert_eq!(sandbox.program(), "deno");
        assert_eq!(sandbox.args, vec!["run".to_string(), "runner.ts".to_string()]);
    }

    #[test]
    fn test_empty_command_is_rejected() {
        let settings = SandboxSettings {
            command: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(
            ProcessSandbox::from_settings(&settings),
            Err(SandboxError::Spawn(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let sandbox = ProcessSandbox::new("ember-no-such-program", Vec::<String>::new());
        assert!(matches!(sandbox.spawn().await, Err(SandboxError::Spawn(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_echo_process_round_trip() {
        let sandbox = ProcessSandbox::new("cat", Vec::<String>::new());
        let mut connection = sandbox.spawn().await.unwrap();
        let mut inbound = connection.take_inbound().unwrap();

        connection.send(&crate::protocol::SandboxMessage::log("hi")).unwrap();
        let echoed = inbound.recv().await.unwrap();
        assert_eq!(
            crate::protocol::parse_envelope(&echoed).unwrap(),
            crate::protocol::SandboxMessage::log("hi")
        );

        connection.close();
        assert!(inbound.recv().await.is_none());
    }
}

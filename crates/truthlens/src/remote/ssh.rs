//! `ssh`/`scp` subprocess transport.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{RemoteCommand, RemoteOutput, RemoteTransport, TransportError};
use crate::config::RemoteHostConfig;

/// Exit status ssh reserves for its own failures.
const SSH_ERROR_STATUS: i32 = 255;

#[derive(Debug, Clone)]
pub struct SshTransport {
    destination: String,
    port: u16,
    identity_file: Option<PathBuf>,
    connect_timeout: Duration,
    ssh_program: String,
    scp_program: String,
}

impl SshTransport {
    pub fn new(config: &RemoteHostConfig) -> Self {
        Self {
            destination: config.destination(),
            port: config.port,
            identity_file: config.identity_file.clone(),
            connect_timeout: config.connect_timeout,
            ssh_program: "ssh".to_string(),
            scp_program: "scp".to_string(),
        }
    }

    /// Override the binaries (e.g. a wrapper script).
    pub fn with_programs(mut self, ssh: impl Into<String>, scp: impl Into<String>) -> Self {
        self.ssh_program = ssh.into();
        self.scp_program = scp.into();
        self
    }

    /// Options shared by ssh and scp. They differ only in the port flag.
    fn common_args(&self, port_flag: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)).into(),
            port_flag.into(),
            self.port.to_string().into(),
        ];
        if let Some(identity) = &self.identity_file {
            args.push("-i".into());
            args.push(identity.as_os_str().to_owned());
        }
        args
    }

    fn ssh_args(&self, command: &RemoteCommand) -> Vec<OsString> {
        let mut args = self.common_args("-p");
        args.push("--".into());
        args.push(self.destination.clone().into());
        args.push(command.shell_line().into());
        args
    }

    fn scp_args(&self, local: &Path, remote_path: &str) -> Vec<OsString> {
        let mut args = self.common_args("-P");
        args.push("-q".into());
        args.push("--".into());
        args.push(local.as_os_str().to_owned());
        args.push(format!("{}:{}", self.destination, remote_path).into());
        args
    }

    async fn run(&self, program: &str, args: Vec<OsString>) -> Result<Output, TransportError> {
        tracing::trace!(program, ?args, "Running transport command");
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| TransportError::Spawn {
                program: program.to_string(),
                source,
            })
    }

    fn check(program: &str, output: Output) -> Result<Output, TransportError> {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match output.status.code() {
            Some(0) => Ok(output),
            Some(SSH_ERROR_STATUS) => Err(TransportError::Connection(stderr)),
            code => Err(TransportError::CommandFailed {
                program: program.to_string(),
                exit_code: code,
                stderr,
            }),
        }
    }
}

#[async_trait]
impl RemoteTransport for SshTransport {
    async fn copy_to(&self, local: &Path, remote_path: &str) -> Result<(), TransportError> {
        let output = self
            .run(&self.scp_program, self.scp_args(local, remote_path))
            .await?;
        Self::check(&self.scp_program, output).map(|_| ())
    }

    async fn execute(&self, command: &RemoteCommand) -> Result<RemoteOutput, TransportError> {
        let output = self.run(&self.ssh_program, self.ssh_args(command)).await?;
        let exit_code = output.status.code();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if exit_code == Some(SSH_ERROR_STATUS) {
            return Err(TransportError::Connection(stderr.trim().to_string()));
        }
        Ok(RemoteOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }

    async fn remove(&self, paths: &[String]) -> Result<(), TransportError> {
        if paths.is_empty() {
            return Ok(());
        }
        let command = RemoteCommand::new("rm")
            .arg("-f")
            .arg("--")
            .args(paths.iter().cloned());
        let output = self.run(&self.ssh_program, self.ssh_args(&command)).await?;
        Self::check(&self.ssh_program, output).map(|_| ())
    }
}

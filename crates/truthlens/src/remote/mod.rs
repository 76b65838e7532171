//! Remote copy-and-execute over a pluggable transport.
//!
//! [`RemoteTransport`] is the seam: [`SshTransport`] drives the system
//! `ssh`/`scp` binaries, tests substitute scripted transports. Arguments
//! always travel as structured values; the only place they are joined into
//! a line is [`RemoteCommand::shell_line`], which quotes each one.

mod channel;
mod ssh;

use std::path::Path;

use async_trait::async_trait;

pub use channel::RemoteExecutionChannel;
#[cfg(test)]
pub(crate) use channel::testing;
pub use ssh::SshTransport;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to remote host failed: {0}")]
    Connection(String),

    #[error("{program} exited with status {exit_code:?}: {stderr}")]
    CommandFailed {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },
}

/// A program invocation on the remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory; `None` runs in the login directory.
    pub cwd: Option<String>,
}

impl RemoteCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<String>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Line for a POSIX remote shell, every word quoted on its own.
    pub fn shell_line(&self) -> String {
        let words = std::iter::once(&self.program)
            .chain(&self.args)
            .map(|w| shell_quote(w))
            .collect::<Vec<_>>()
            .join(" ");
        match &self.cwd {
            Some(dir) => format!("cd {} && {}", shell_quote(dir), words),
            None => words,
        }
    }
}

/// Result of a remote program run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Copy a local file to `remote_path` on the host.
    async fn copy_to(&self, local: &Path, remote_path: &str) -> Result<(), TransportError>;

    /// Run a command. A non-zero exit of the program itself is an `Ok`
    /// output, not an error.
    async fn execute(&self, command: &RemoteCommand) -> Result<RemoteOutput, TransportError>;

    /// Delete remote files; missing files are not an error.
    async fn remove(&self, paths: &[String]) -> Result<(), TransportError>;
}

/// POSIX single-quote a word unless it is made only of safe characters.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-=:,+@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

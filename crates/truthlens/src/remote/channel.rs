//! The copy-in, execute, clean-up unit of work.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::{RemoteCommand, RemoteOutput, RemoteTransport};
use crate::artifact::RemotePaths;
use crate::attempt::AttemptError;
use crate::config::RemoteHostConfig;

/// Remote paths that still need deleting.
///
/// Cleared by [`CleanupGuard::finish`]; if the owning future is dropped
/// first, deletion is handed to a background task instead.
struct CleanupGuard {
    pending: Option<(Arc<dyn RemoteTransport>, Vec<String>)>,
}

impl CleanupGuard {
    fn new(transport: Arc<dyn RemoteTransport>, paths: &RemotePaths) -> Self {
        let paths = paths.all().iter().map(|p| p.to_string()).collect();
        Self {
            pending: Some((transport, paths)),
        }
    }

    async fn finish(mut self, grace: Duration) {
        let Some((transport, paths)) = self.pending.take() else {
            return;
        };
        match tokio::time::timeout(grace, transport.remove(&paths)).await {
            Ok(Ok(())) => tracing::debug!(?paths, "Removed remote artifacts"),
            Ok(Err(e)) => {
                tracing::warn!(?paths, error = %e, "Failed to remove remote artifacts")
            }
            Err(_) => tracing::warn!(
                ?paths,
                grace_secs = grace.as_secs_f64(),
                "Timed out removing remote artifacts"
            ),
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let Some((transport, paths)) = self.pending.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(?paths, "No runtime available, remote artifacts left behind");
            return;
        };
        tracing::debug!(?paths, "Dispatch cancelled, scheduling remote cleanup");
        handle.spawn(async move {
            if let Err(e) = transport.remove(&paths).await {
                tracing::warn!(?paths, error = %e, "Failed to remove remote artifacts");
            }
        });
    }
}

#[derive(Clone)]
pub struct RemoteExecutionChannel {
    transport: Arc<dyn RemoteTransport>,
}

impl RemoteExecutionChannel {
    pub fn new(transport: Arc<dyn RemoteTransport>) -> Self {
        Self { transport }
    }

    /// Copy the image and script to `paths`, run the script, then remove
    /// both remote files.
    ///
    /// The first three steps share `timeout` minus the host's cleanup grace;
    /// cleanup gets the grace. Cleanup runs whatever the outcome.
    pub async fn run(
        &self,
        image_path: &Path,
        script_path: &Path,
        paths: &RemotePaths,
        host: &RemoteHostConfig,
        timeout: Duration,
    ) -> Result<RemoteOutput, AttemptError> {
        let grace = host.cleanup_grace.min(timeout / 2);
        let work_budget = timeout.saturating_sub(grace);
        let command = RemoteCommand::new(&host.python_path)
            .arg(&paths.script)
            .arg(&paths.image)
            .current_dir(&host.project_path);

        let guard = CleanupGuard::new(self.transport.clone(), paths);
        let work = async {
            self.transport.copy_to(image_path, &paths.image).await?;
            self.transport.copy_to(script_path, &paths.script).await?;
            self.transport.execute(&command).await
        };

        let result = match tokio::time::timeout(work_budget, work).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(AttemptError::Transport(e.to_string())),
            Err(_) => Err(AttemptError::Timeout(timeout)),
        };
        guard.finish(grace).await;
        result
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transports shared by channel and orchestrator tests.

    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::remote::TransportError;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Behavior {
        /// Execute prints this stdout with exit 0.
        Succeed(String),
        /// Execute exits non-zero with this stdout.
        ExitWith(i32, String),
        /// The image copy fails.
        CopyFails,
        /// Execute never returns.
        Hang,
    }

    pub struct ScriptedTransport {
        behavior: Behavior,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl RemoteTransport for ScriptedTransport {
        async fn copy_to(&self, local: &Path, remote_path: &str) -> Result<(), TransportError> {
            self.record(format!("copy {remote_path}"));
            if self.behavior == Behavior::CopyFails {
                return Err(TransportError::Connection("connection refused".into()));
            }
            if !local.exists() {
                return Err(TransportError::CommandFailed {
                    program: "scp".into(),
                    exit_code: Some(1),
                    stderr: format!("{}: No such file", local.display()),
                });
            }
            Ok(())
        }

        async fn execute(&self, command: &RemoteCommand) -> Result<RemoteOutput, TransportError> {
            self.record(format!("exec {}", command.shell_line()));
            match &self.behavior {
                Behavior::Succeed(stdout) => Ok(RemoteOutput {
                    exit_code: Some(0),
                    stdout: stdout.clone(),
                    stderr: String::new(),
                }),
                Behavior::ExitWith(code, stdout) => Ok(RemoteOutput {
                    exit_code: Some(*code),
                    stdout: stdout.clone(),
                    stderr: "Traceback (most recent call last)".to_string(),
                }),
                Behavior::Hang => std::future::pending().await,
                Behavior::CopyFails => unreachable!("copy failed before execute"),
            }
        }

        async fn remove(&self, paths: &[String]) -> Result<(), TransportError> {
            self.record(format!("remove {}", paths.join(" ")));
            Ok(())
        }
    }
}

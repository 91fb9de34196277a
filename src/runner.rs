use crate::error::AdminError;
use crate::local_tree::SyncCommand;
use anyhow::{Context, Result};
use tracing::info;

/// Executes external sync commands.
#[allow(async_fn_in_trait)]
pub trait SyncRunner {
    /// Run `command` to completion; a non-zero exit is an error.
    async fn run(&mut self, command: &SyncCommand) -> Result<()>;
}

/// Spawns each command as a child process, inheriting stdio.
pub struct ProcessRunner;

impl SyncRunner for ProcessRunner {
    async fn run(&mut self, command: &SyncCommand) -> Result<()> {
        info!(%command, "running");
        let status = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .status()
            .await
            .with_context(|| format!("failed to spawn `{}`", command.program))?;
        if !status.success() {
            return Err(AdminError::Subprocess {
                command: command.to_string(),
                status: status.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::SyncRunner;
    use crate::local_tree::SyncCommand;
    use anyhow::Result;

    /// Records commands instead of running them.
    #[derive(Default)]
    pub struct RecordingRunner {
        pub commands: Vec<SyncCommand>,
    }

    impl SyncRunner for RecordingRunner {
        async fn run(&mut self, command: &SyncCommand) -> Result<()> {
            self.commands.push(command.clone());
            Ok(())
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let cmd = SyncCommand {
            program: "sh".into(),
            args: vec!["-c".into(), "exit 3".into()],
        };
        let err = ProcessRunner.run(&cmd).await.unwrap_err();
        let typed = err.downcast_ref::<AdminError>();
        assert!(matches!(typed, Some(AdminError::Subprocess { .. })));
    }

    #[tokio::test]
    async fn zero_exit_succeeds() {
        let cmd = SyncCommand {
            program: "true".into(),
            args: vec![],
        };
        ProcessRunner.run(&cmd).await.unwrap();
    }
}

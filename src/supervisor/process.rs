use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};

use super::command_line::{check_length, split_command_line};
use super::error::{LaunchSummary, SupervisorError};
use crate::config::environment::{build_environment, EnvironmentPolicy};
use crate::config::Config;

pub const COMMAND_KEY: &str = "Command";
pub const WORKING_DIR_KEY: &str = "WorkingDir";
pub const REDIRECT_OUTPUT_KEY: &str = "RedirectOutput";

/// Everything needed to start a worker, read from its config.
#[derive(Debug, Clone)]
pub struct WorkerLaunch {
    pub command_line: String,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub environment: BTreeMap<String, String>,
    pub redirect: Option<PathBuf>,
}

impl WorkerLaunch {
    pub fn from_config(config: &Config) -> Result<Self, SupervisorError> {
        let command_line = config.get_value(COMMAND_KEY)?.to_string();
        let working_dir = PathBuf::from(config.get_value(WORKING_DIR_KEY)?);
        check_length(&command_line)?;

        let mut parts = split_command_line(&command_line).into_iter();
        let program = parts.next().unwrap_or_default();
        let args = parts.collect();

        let environment = build_environment(config, &EnvironmentPolicy::from_config(config));
        let redirect = config.try_get_value(REDIRECT_OUTPUT_KEY).map(PathBuf::from);

        Ok(Self {
            command_line,
            program,
            args,
            working_dir,
            environment,
            redirect,
        })
    }

    pub fn summary(&self) -> LaunchSummary {
        LaunchSummary {
            command_line: self.command_line.clone(),
            working_dir: self.working_dir.clone(),
            redirect: self.redirect.clone(),
        }
    }

    /// Start the worker.
    ///
    /// The child replaces its environment with [`WorkerLaunch::environment`].
    /// With a redirect file, stdout and stderr both go to it (truncated
    /// first). The returned handle does not kill the worker when dropped.
    pub fn spawn(&self) -> Result<Child, SupervisorError> {
        if self.program.is_empty() {
            return Err(SupervisorError::ProcessSpawnFailed {
                launch: self.summary(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command line"),
            });
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .env_clear()
            .envs(&self.environment)
            .stdin(Stdio::null())
            .kill_on_drop(false);

        if let Some(path) = &self.redirect {
            let redirect_err = |source| SupervisorError::RedirectSetupFailed {
                path: path.clone(),
                source,
            };
            let stdout = File::create(path).map_err(redirect_err)?;
            let stderr = stdout.try_clone().map_err(redirect_err)?;
            cmd.stdout(Stdio::from(stdout)).stderr(Stdio::from(stderr));
        }

        // Windows: hide console window
        crate::utils::apply_creation_flags(&mut cmd);

        let child = cmd.spawn().map_err(|source| SupervisorError::ProcessSpawnFailed {
            launch: self.summary(),
            source,
        })?;
        tracing::info!(
            "Spawned worker (pid {:?}): {} [cwd {}]",
            child.id(),
            self.command_line,
            self.working_dir.display()
        );
        Ok(child)
    }
}

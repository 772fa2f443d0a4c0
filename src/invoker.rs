//! Process boundary to the ledger command-line tool
//!
//! Everything that leaves this process goes through a [`CommandRunner`]. The
//! production runner spawns the configured base command (for example
//! `cardano-cli`, or `ssh node-host cardano-cli`) with the node socket in the
//! environment and the data directory as working directory.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::errors::{Result, ToolkitError};

/// Runs one invocation of the external CLI and returns its combined output
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Execute `<base command> <args...>`
    ///
    /// A nonzero exit status is a [`ToolkitError::Process`] carrying the full
    /// command line and everything the tool printed.
    async fn run(&self, args: &[String]) -> Result<String>;
}

/// Spawns the real CLI as a child process
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    command: Vec<String>,
    socket_path: Option<PathBuf>,
    working_dir: PathBuf,
    debug: bool,
}

impl ProcessRunner {
    pub fn new(command: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            socket_path: None,
            working_dir: working_dir.into(),
            debug: false,
        }
    }

    pub fn with_socket_path(mut self, socket_path: Option<PathBuf>) -> Self {
        self.socket_path = socket_path;
        self
    }

    /// Mirror child output to our own stdout/stderr
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    fn statement(&self, args: &[String]) -> String {
        self.command
            .iter()
            .chain(args.iter())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, args: &[String]) -> Result<String> {
        let statement = self.statement(args);
        let (program, base_args) = self
            .command
            .split_first()
            .ok_or_else(|| ToolkitError::validation("empty cli command"))?;

        let mut cmd = Command::new(program);
        cmd.args(base_args)
            .args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(socket) = &self.socket_path {
            cmd.env("CARDANO_NODE_SOCKET_PATH", socket);
        }

        debug!(command = %statement, "exec");

        let output = cmd.output().await.map_err(|source| ToolkitError::Spawn {
            command: statement.clone(),
            source,
        })?;

        if self.debug {
            let _ = tokio::io::stdout().write_all(&output.stdout).await;
            let _ = tokio::io::stderr().write_all(&output.stderr).await;
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(ToolkitError::Process {
                command: statement,
                output: combined,
                status: output.status.code(),
            });
        }

        Ok(combined)
    }
}

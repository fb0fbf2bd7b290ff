//! Rule suite collaborator.
//!
//! The suite decides whether a submission is conformant. This crate only
//! consumes its verdict; [`ExternalSuite`] runs it as a separate program.

use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::github::StatusState;
use crate::snapshot::PrSnapshot;

/// Result of evaluating a PR against the rule suite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Body of the status comment.
    #[serde(default)]
    pub comment: String,
    /// Desired managed labels, in order.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Desired status check state.
    #[serde(default)]
    pub state: StatusState,
}

impl Verdict {
    /// Returns true if the suite had nothing new to say.
    pub fn is_empty(&self) -> bool {
        self.comment.is_empty() && self.labels.is_empty()
    }
}

/// Evaluates a PR snapshot.
#[async_trait]
pub trait RuleSuite: Send + Sync {
    async fn evaluate(&self, snapshot: &PrSnapshot) -> Result<Verdict>;
}

/// Rule suite run as an external program.
///
/// The snapshot is written to the program's stdin as JSON and the verdict is
/// read from its stdout as JSON.
#[derive(Debug, Clone)]
pub struct ExternalSuite {
    command: String,
    args: Vec<String>,
}

impl ExternalSuite {
    /// Creates a suite running `command` with `args`.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[async_trait]
impl RuleSuite for ExternalSuite {
    async fn evaluate(&self, snapshot: &PrSnapshot) -> Result<Verdict> {
        let input = serde_json::to_vec(snapshot)?;

        tracing::debug!(
            pr = %snapshot.pr(),
            command = %self.command,
            bytes = input.len(),
            "running rule suite"
        );

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Suite(format!("failed to spawn {}: {}", self.command, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Suite("rule suite stdin was not piped".to_string()))?;
        let write = async move {
            stdin.write_all(&input).await?;
            stdin.shutdown().await
        };

        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output
            .map_err(|e| Error::Suite(format!("failed to wait for {}: {}", self.command, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Suite(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }
        if let Err(e) = written {
            // The program may legitimately ignore its input.
            tracing::debug!(pr = %snapshot.pr(), error = %e, "rule suite did not read the snapshot");
        }

        let verdict: Verdict = serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::Suite(format!("unparsable verdict from {}: {}", self.command, e)))?;

        tracing::info!(
            pr = %snapshot.pr(),
            state = verdict.state.as_str(),
            labels = ?verdict.labels,
            "rule suite verdict"
        );
        Ok(verdict)
    }
}

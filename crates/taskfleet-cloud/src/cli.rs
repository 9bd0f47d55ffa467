//! Provider command-line tool runner
//!
//! Providers talk to their cloud through its official CLI (`aws`, `gcloud`,
//! `az`, `kubectl`), which also takes care of credential discovery.

use crate::error::{CloudError, Result};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Invokes one CLI with fixed leading arguments and environment
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: String,
    base_args: Vec<String>,
    env: BTreeMap<String, String>,
}

impl CommandRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    /// Arguments prepended to every invocation
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run the command and return stdout
    pub async fn run(&self, args: &[&str]) -> Result<String> {
        self.execute(args, None).await
    }

    /// Run the command with `input` written to stdin
    pub async fn run_with_input(&self, args: &[&str], input: &str) -> Result<String> {
        self.execute(args, Some(input)).await
    }

    /// Run the command and parse stdout as JSON
    pub async fn run_json<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T> {
        let output = self.run(args).await?;
        Ok(serde_json::from_str(&output)?)
    }

    async fn execute(&self, args: &[&str], input: Option<&str>) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args);
        cmd.args(args);
        cmd.envs(&self.env);
        cmd.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        tracing::debug!("Running: {} {}", self.program, args.join(" "));

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => CloudError::MissingTool(self.program.clone()),
            _ => CloudError::Io(e),
        })?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(input.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CloudError::CommandFailed {
                program: self.program.clone(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_tool() {
        let runner = CommandRunner::new("taskfleet-definitely-not-installed");
        let err = runner.run(&["--version"]).await.unwrap_err();
        assert!(matches!(err, CloudError::MissingTool(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdin_and_env() {
        let runner = CommandRunner::new("sh")
            .with_args(["-c"])
            .with_env("GREETING", "hello");
        let output = runner
            .run_with_input(&["read line; echo \"$GREETING $line\""], "world\n")
            .await
            .unwrap();
        assert_eq!(output.trim(), "hello world");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_carries_stderr() {
        let runner = CommandRunner::new("sh").with_args(["-c"]);
        let err = runner.run(&["echo oops >&2; exit 3"]).await.unwrap_err();
        match err {
            CloudError::CommandFailed { program, stderr } => {
                assert_eq!(program, "sh");
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

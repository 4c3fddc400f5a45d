//! Administrator-only host access. `read_file` is gated on identity alone;
//! `shell_command` additionally goes through the approval gateway before it
//! ever reaches `invoke`.

use crate::skills::{str_arg, ParamSpec, RiskLevel, Skill};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::warn;

const MAX_FILE_BYTES: u64 = 1024 * 1024;
const SHELL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ReadFile;

#[async_trait]
impl Skill for ReadFile {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file on the server."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required("file_path", "string")]
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::Medium
    }

    fn admin_only(&self) -> bool {
        true
    }

    async fn invoke(&self, args: &Map<String, Value>) -> anyhow::Result<String> {
        let path = str_arg(args, "file_path")?;
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(_) => anyhow::bail!("File '{path}' does not exist."),
        };
        if metadata.len() > MAX_FILE_BYTES {
            anyhow::bail!("File is too large to read (max 1MB).");
        }
        let bytes = tokio::fs::read(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

pub struct ShellCommand;

#[async_trait]
impl Skill for ShellCommand {
    fn name(&self) -> &str {
        "shell_command"
    }

    fn description(&self) -> &str {
        "DANGEROUS: Execute a shell command on the server. Use with extreme caution."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required("command", "string")]
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::High
    }

    fn admin_only(&self) -> bool {
        true
    }

    async fn invoke(&self, args: &Map<String, Value>) -> anyhow::Result<String> {
        let command = str_arg(args, "command")?;
        warn!("Executing shell command: {}", command);

        let run = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .output();
        let output = match tokio::time::timeout(SHELL_TIMEOUT, run).await {
            Ok(result) => result?,
            Err(_) => anyhow::bail!("Command timed out after 10 seconds."),
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.stderr.is_empty() {
            text.push_str("\nErrors:\n");
            text.push_str(&String::from_utf8_lossy(&output.stderr));
        }
        if text.is_empty() {
            text = "Command executed successfully (no output).".to_string();
        }
        Ok(text)
    }
}

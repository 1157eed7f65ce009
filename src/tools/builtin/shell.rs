//! Shell tool
//!
//! `execute_shell` runs a command through the platform shell and reports its
//! output and exit code. A non-zero exit is a normal result; only failing to
//! start the command or running past its timeout is a tool error.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context};
use schemars::JsonSchema;
use serde::Deserialize;
use tokio::process::Command;

use super::truncate_chars;
use crate::tools::descriptor::ToolDescriptor;
use crate::tools::registry::ToolError;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Longest stdout or stderr handed back to the model
const MAX_OUTPUT_CHARS: usize = 10_000;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteShellArgs {
    /// Shell command to execute
    pub command: String,
    /// Maximum execution time in seconds (default: 30)
    pub timeout: Option<u64>,
}

/// Descriptors for `execute_shell`
pub fn shell_tools() -> Result<Vec<ToolDescriptor>, ToolError> {
    Ok(vec![ToolDescriptor::from_typed_async(
        "execute_shell",
        "Execute a shell command and return its output and exit code",
        execute_shell,
    )?])
}

fn shell_command(script: &str) -> Command {
    if cfg!(target_os = "windows") {
        let mut command = Command::new("cmd");
        command.args(["/C", script]);
        command
    } else {
        let mut command = Command::new("sh");
        command.args(["-c", script]);
        command
    }
}

async fn execute_shell(args: ExecuteShellArgs) -> anyhow::Result<String> {
    let secs = args.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS);
    if secs == 0 {
        bail!("timeout must be at least 1 second");
    }

    let child = shell_command(&args.command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("starting '{}'", args.command))?;

    // Dropping the wait on timeout drops the child, which kills it
    let output = match tokio::time::timeout(Duration::from_secs(secs), child.wait_with_output()).await
    {
        Ok(output) => output.with_context(|| format!("running '{}'", args.command))?,
        Err(_) => bail!("command timed out after {} seconds", secs),
    };

    let mut text = String::new();
    for (label, bytes) in [("STDOUT", &output.stdout), ("STDERR", &output.stderr)] {
        if bytes.is_empty() {
            continue;
        }
        let stream = String::from_utf8_lossy(bytes);
        let (kept, truncated) = truncate_chars(&stream, MAX_OUTPUT_CHARS);
        text.push_str(&format!("{}:\n{}\n", label, kept));
        if truncated {
            text.push_str("... (truncated)\n");
        }
    }

    match output.status.code() {
        Some(code) => text.push_str(&format!("\nReturn Code: {}", code)),
        None => text.push_str("\nReturn Code: none (terminated by signal)"),
    }
    Ok(text)
}

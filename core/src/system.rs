//! Shell execution, application launch, clipboard, and host info.
//!
//! Command output is captured with byte and line caps so a chatty child
//! cannot flood a tool result; the safety gate has already vetted the
//! command string by the time anything here runs.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use serde_json::Value as JsonValue;
use serde_json::json;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::BufReader;
use tokio::process::Command;
use tracing::debug;

use deskpilot_protocol::ShellKind;

use crate::error::Result;
use crate::error::ToolError;
use crate::platform::Desktop;
use crate::util::now_iso;
use crate::util::truncate_chars;

// Caps applied to each captured stream.
const MAX_STREAM_OUTPUT: usize = 10 * 1024;
const MAX_STREAM_OUTPUT_LINES: usize = 256;

const MAX_CLIPBOARD_HISTORY: usize = 50;

#[derive(Debug)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Run one shell command with a wall-clock cap, capturing truncated
/// output. The child is killed when the cap fires.
pub async fn run_shell_command(
    shell: ShellKind,
    command: &str,
    timeout: Duration,
) -> Result<CommandOutput> {
    let argv = shell.argv(command);
    let start = Instant::now();

    let mut child = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            ToolError::external(format!("failed to spawn {}: {e}", argv[0]))
                .with_hint(format!("Is '{}' available on this host?", argv[0]))
        })?;

    let stdout_reader = child
        .stdout
        .take()
        .ok_or_else(|| ToolError::internal("stdout pipe was unexpectedly not available"))?;
    let stderr_reader = child
        .stderr
        .take()
        .ok_or_else(|| ToolError::internal("stderr pipe was unexpectedly not available"))?;

    let stdout_handle = tokio::spawn(read_capped(BufReader::new(stdout_reader)));
    let stderr_handle = tokio::spawn(read_capped(BufReader::new(stderr_reader)));

    let exit_status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            let _ = child.start_kill();
            return Err(ToolError::timeout("command", timeout));
        }
    };

    let stdout = String::from_utf8_lossy(&stdout_handle.await??).to_string();
    let stderr = String::from_utf8_lossy(&stderr_handle.await??).to_string();

    Ok(CommandOutput {
        exit_code: exit_status.code().unwrap_or(-1),
        stdout,
        stderr,
        duration: start.elapsed(),
    })
}

/// Read to EOF, keeping only the first `MAX_STREAM_OUTPUT` bytes /
/// `MAX_STREAM_OUTPUT_LINES` lines. Reading continues past the caps to
/// avoid back-pressuring the child.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(8 * 1024);
    let mut tmp = [0u8; 8192];
    let mut remaining_bytes = MAX_STREAM_OUTPUT;
    let mut remaining_lines = MAX_STREAM_OUTPUT_LINES;

    loop {
        let n = reader.read(&mut tmp).await?;
        if n == 0 {
            break;
        }
        if remaining_bytes > 0 && remaining_lines > 0 {
            let mut copy_len = 0;
            for &b in &tmp[..n] {
                if remaining_bytes == 0 || remaining_lines == 0 {
                    break;
                }
                copy_len += 1;
                remaining_bytes -= 1;
                if b == b'\n' {
                    remaining_lines -= 1;
                }
            }
            buf.extend_from_slice(&tmp[..copy_len]);
        }
    }
    Ok(buf)
}

pub struct SystemTools {
    desktop: Arc<dyn Desktop>,
    clipboard_history: Mutex<VecDeque<JsonValue>>,
}

impl SystemTools {
    pub fn new(desktop: Arc<dyn Desktop>) -> Self {
        Self {
            desktop,
            clipboard_history: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn run_command(
        &self,
        command: &str,
        shell: ShellKind,
        timeout_secs: u64,
    ) -> Result<JsonValue> {
        let output =
            run_shell_command(shell, command, Duration::from_secs(timeout_secs.max(1))).await?;
        debug!(
            "command finished with exit code {} in {:?}",
            output.exit_code, output.duration
        );
        Ok(json!({
            "success": output.exit_code == 0,
            "exit_code": output.exit_code,
            "stdout": output.stdout,
            "stderr": output.stderr,
            "duration_ms": output.duration.as_millis() as u64,
            "shell": shell.to_string(),
        }))
    }

    pub async fn open_application(
        &self,
        app_name: Option<&str>,
        app_path: Option<&str>,
    ) -> Result<JsonValue> {
        let target = app_path
            .or(app_name)
            .ok_or_else(|| ToolError::invalid("open_application needs app_name or app_path"))?;

        // `start` resolves registered app names and shell shortcuts the
        // way a user launching it would.
        let mut command = if cfg!(target_os = "windows") && app_path.is_none() {
            let mut c = Command::new("cmd");
            c.args(["/c", "start", "", target]);
            c
        } else {
            Command::new(target)
        };
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command.spawn().map_err(|e| {
            ToolError::external(format!("failed to launch '{target}': {e}"))
                .with_hint("Check the application name or provide a full path.")
        })?;

        Ok(json!({
            "success": true,
            "launched": target,
        }))
    }

    pub fn clipboard(&self, action: &str, text: Option<&str>) -> Result<JsonValue> {
        match action {
            "read" => {
                let content = self.desktop.clipboard_read()?;
                self.push_history("read", &content);
                Ok(json!({
                    "success": true,
                    "action": "read",
                    "text": content,
                }))
            }
            "write" => {
                let text =
                    text.ok_or_else(|| ToolError::invalid("clipboard write needs text"))?;
                self.desktop.clipboard_write(text)?;
                self.push_history("write", text);
                Ok(json!({
                    "success": true,
                    "action": "write",
                    "length": text.chars().count(),
                }))
            }
            other => Err(ToolError::invalid(format!(
                "Unknown clipboard action '{other}'"
            ))
            .with_hint("Valid actions: read, write")),
        }
    }

    fn push_history(&self, action: &str, text: &str) {
        if let Ok(mut history) = self.clipboard_history.lock() {
            history.push_back(json!({
                "action": action,
                "text": truncate_chars(text, 500),
                "timestamp": now_iso(),
            }));
            while history.len() > MAX_CLIPBOARD_HISTORY {
                history.pop_front();
            }
        }
    }

    pub fn clipboard_history(&self, limit: usize) -> Result<JsonValue> {
        let entries: Vec<JsonValue> = self
            .clipboard_history
            .lock()
            .map(|history| {
                let skip = history.len().saturating_sub(limit);
                history.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default();
        Ok(json!({
            "success": true,
            "entries": entries,
            "count": entries.len(),
        }))
    }

    pub fn system_info(&self) -> Result<JsonValue> {
        let info = os_info::get();
        let monitors = self.desktop.monitors().map(|m| m.len()).unwrap_or(0);
        Ok(json!({
            "success": true,
            "os": info.os_type().to_string(),
            "os_version": info.version().to_string(),
            "hostname": whoami::fallible::hostname().unwrap_or_default(),
            "username": whoami::username(),
            "monitors": monitors,
        }))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::platform::sim::SimDesktop;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn command_output_is_captured() {
        let output = run_shell_command(ShellKind::Sh, "echo safe", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(output.exit_code, 0);
        assert!(output.stdout.contains("safe"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_raised() {
        let sim = Arc::new(SimDesktop::new());
        let tools = SystemTools::new(sim);
        let result = tools.run_command("exit 3", ShellKind::Sh, 10).await.unwrap();
        assert_eq!(result["success"], json!(false));
        assert_eq!(result["exit_code"], json!(3));
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let err = run_shell_command(ShellKind::Sh, "sleep 30", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ToolErrorKind::Timeout);
    }

    #[tokio::test]
    async fn output_is_truncated_at_the_caps() {
        let output = run_shell_command(
            ShellKind::Sh,
            "yes truncated | head -n 100000",
            Duration::from_secs(20),
        )
        .await
        .unwrap();
        assert!(output.stdout.len() <= MAX_STREAM_OUTPUT);
    }

    #[test]
    fn clipboard_round_trip_with_history() {
        let sim = Arc::new(SimDesktop::new());
        let tools = SystemTools::new(sim);
        tools.clipboard("write", Some("copied text")).unwrap();
        let read = tools.clipboard("read", None).unwrap();
        assert_eq!(read["text"], json!("copied text"));

        let history = tools.clipboard_history(10).unwrap();
        assert_eq!(history["count"], json!(2));
    }

    #[test]
    fn unknown_clipboard_action_is_rejected() {
        let sim = Arc::new(SimDesktop::new());
        let tools = SystemTools::new(sim);
        let err = tools.clipboard("swap", None).unwrap_err();
        assert_eq!(err.kind, crate::error::ToolErrorKind::InvalidInput);
    }
}

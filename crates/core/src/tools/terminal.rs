//! # Sandboxed Command Execution
//!
//! Shell command execution with a blocked-pattern screen, a wall-clock
//! timeout, and combined STDOUT/STDERR/exit-code formatting. Like the file
//! tools, failures come back as `Error: …` strings.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use super::file_ops::FAILURE_MARKER;

/// Command fragments rejected before execution
const BLOCKED_PATTERNS: &[&str] = &[
    // Destructive file operations
    "rm -rf /", "mkfs", "dd if=", // Privilege escalation
    "sudo ", "su -", "doas ", // Host process control
    "shutdown", "reboot", // Fork bombs
    ":(){",
];

fn fail(message: impl AsRef<str>) -> String {
    format!("{FAILURE_MARKER} {}", message.as_ref())
}

/// Screen a command against the blocked patterns
pub fn validate_command(command: &str) -> Result<(), String> {
    for blocked in BLOCKED_PATTERNS {
        if command.contains(blocked) {
            return Err(format!(
                "Command contains blocked pattern: '{}'",
                blocked.trim()
            ));
        }
    }
    Ok(())
}

/// Run a shell command in `cwd`, bounded by `timeout`.
///
/// Output format: `STDOUT:` and `STDERR:` sections when non-empty, plus an
/// `Exit code:` trailer for non-zero exits.
pub async fn run_command(command: &str, cwd: &str, timeout: Duration) -> String {
    tracing::info!(
        "run_command: {} (cwd={cwd}, timeout={}s)",
        command.chars().take(100).collect::<String>(),
        timeout.as_secs()
    );

    if let Err(e) = validate_command(command) {
        tracing::warn!("run_command blocked: {e}");
        return fail(e);
    }

    if !Path::new(cwd).exists() {
        return fail(format!("Working directory does not exist: {cwd}"));
    }

    let child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(e) => return fail(format!("Failed to execute command: {e}")),
    };

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return fail(format!("Failed to execute command: {e}")),
        Err(_) => {
            tracing::error!("run_command timeout: {command}");
            return fail(format!(
                "Command timeout after {} seconds",
                timeout.as_secs()
            ));
        }
    };

    let mut formatted = String::new();
    if !output.stdout.is_empty() {
        formatted.push_str("STDOUT:\n");
        formatted.push_str(&String::from_utf8_lossy(&output.stdout));
        formatted.push('\n');
    }
    if !output.stderr.is_empty() {
        formatted.push_str("STDERR:\n");
        formatted.push_str(&String::from_utf8_lossy(&output.stderr));
        formatted.push('\n');
    }

    match output.status.code() {
        Some(0) | None => {}
        Some(code) => {
            tracing::warn!("command exited with code {code}");
            formatted.push_str(&format!("\nExit code: {code}"));
        }
    }

    if formatted.is_empty() {
        "(no output)".to_string()
    } else {
        formatted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout() {
        let out = run_command("echo conductor", ".", Duration::from_secs(10)).await;
        assert!(out.contains("STDOUT:"));
        assert!(out.contains("conductor"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_reported() {
        let out = run_command("exit 3", ".", Duration::from_secs(10)).await;
        assert!(out.contains("Exit code: 3"));
    }

    #[tokio::test]
    async fn test_timeout_kills_and_reports() {
        let out = run_command("sleep 30", ".", Duration::from_millis(100)).await;
        assert!(out.starts_with(FAILURE_MARKER));
        assert!(out.contains("timeout"));
    }

    #[tokio::test]
    async fn test_missing_cwd_is_an_error() {
        let out = run_command("echo hi", "/no/such/dir", Duration::from_secs(5)).await;
        assert!(out.starts_with(FAILURE_MARKER));
        assert!(out.contains("Working directory"));
    }

    #[test]
    fn test_blocked_patterns() {
        assert!(validate_command("sudo make install").is_err());
        assert!(validate_command("rm -rf / --no-preserve-root").is_err());
        assert!(validate_command("cargo check").is_ok());
    }
}

//! # File Operation Tools
//!
//! Safe read/write/list with path validation. Failures are reported as
//! `Error: …` strings rather than a distinct error type; the gateway keys
//! its success flag off that leading marker.

use std::path::Path;

use crate::config::ToolPolicy;

/// Reserved marker that flags a failed tool result
pub const FAILURE_MARKER: &str = "Error:";

fn fail(message: impl AsRef<str>) -> String {
    format!("{FAILURE_MARKER} {}", message.as_ref())
}

/// Validate a path for an operation; extension checks apply to read/write
fn validate_path(path: &str, operation: &str, policy: &ToolPolicy) -> Result<(), String> {
    if path.contains("..") {
        tracing::warn!("{operation} blocked: path traversal in {path}");
        return Err(format!("Path traversal not allowed: {path}"));
    }

    if matches!(operation, "read" | "write") && !policy.allowed_extensions.is_empty() {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"));
        if let Some(ext) = ext {
            if !policy.allowed_extensions.contains(&ext) {
                tracing::warn!("{operation} blocked: extension {ext} not allowed");
                return Err(format!("File extension not allowed: {ext}"));
            }
        }
    }

    Ok(())
}

/// Read a file's contents, subject to size and extension limits
pub async fn read_file(path: &str, policy: &ToolPolicy) -> String {
    tracing::info!("read_file: {path}");

    if let Err(e) = validate_path(path, "read", policy) {
        return fail(e);
    }

    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(_) => return fail(format!("File {path} does not exist")),
    };

    if meta.len() > policy.max_file_size {
        return fail(format!(
            "File too large ({} bytes, max {})",
            meta.len(),
            policy.max_file_size
        ));
    }

    match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            fail(format!("Unable to decode file as UTF-8: {e}"))
        }
        Err(e) => fail(format!("Failed to read file: {e}")),
    }
}

/// Write content to a file, creating parent directories as needed
pub async fn write_file(path: &str, content: &str, policy: &ToolPolicy) -> String {
    tracing::info!("write_file: {path} ({} bytes)", content.len());

    if let Err(e) = validate_path(path, "write", policy) {
        return fail(e);
    }

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return fail(format!("Failed to create directory: {e}"));
            }
        }
    }

    match tokio::fs::write(path, content).await {
        Ok(()) => format!("Successfully wrote to {path}"),
        Err(e) => fail(format!("Failed to write file: {e}")),
    }
}

/// List a directory with file/dir markers and sizes
pub async fn list_dir(path: &str, policy: &ToolPolicy) -> String {
    tracing::info!("list_dir: {path}");

    if let Err(e) = validate_path(path, "list", policy) {
        return fail(e);
    }

    let mut reader = match tokio::fs::read_dir(path).await {
        Ok(reader) => reader,
        Err(_) => return fail(format!("Directory {path} does not exist")),
    };

    let mut entries = Vec::new();
    loop {
        match reader.next_entry().await {
            Ok(Some(entry)) => {
                let name = entry.file_name().to_string_lossy().into_owned();
                match entry.metadata().await {
                    Ok(meta) if meta.is_dir() => entries.push(format!("[DIR]  {name}")),
                    Ok(meta) => entries.push(format!("[FILE] {name} ({} bytes)", meta.len())),
                    Err(_) => entries.push(format!("[FILE] {name}")),
                }
            }
            Ok(None) => break,
            Err(e) => return fail(format!("Failed to list directory: {e}")),
        }
    }

    if entries.is_empty() {
        return "(empty directory)".to_string();
    }

    entries.sort();
    entries.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn policy() -> ToolPolicy {
        Settings::default().tool_policy()
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        let path = path.to_str().unwrap();

        let wrote = write_file(path, "# notes\n", &policy()).await;
        assert!(wrote.starts_with("Successfully wrote"), "{wrote}");

        assert_eq!(read_file(path, &policy()).await, "# notes\n");
    }

    #[tokio::test]
    async fn test_traversal_is_blocked() {
        let out = read_file("../../etc/passwd.txt", &policy()).await;
        assert!(out.starts_with(FAILURE_MARKER));
        assert!(out.contains("traversal"));
    }

    #[tokio::test]
    async fn test_disallowed_extension_is_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.sqlite3");

        let out = write_file(path.to_str().unwrap(), "x", &policy()).await;
        assert!(out.starts_with(FAILURE_MARKER));
        assert!(out.contains("extension"));
    }

    #[tokio::test]
    async fn test_missing_file_reports_error_string() {
        let out = read_file("/nonexistent/deeply/nested.rs", &policy()).await;
        assert!(out.starts_with(FAILURE_MARKER));
        assert!(out.contains("does not exist"));
    }

    #[tokio::test]
    async fn test_list_dir_marks_kinds() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();
        tokio::fs::write(dir.path().join("a.rs"), "fn a() {}")
            .await
            .unwrap();

        let out = list_dir(dir.path().to_str().unwrap(), &policy()).await;
        assert!(out.contains("[DIR]  sub"));
        assert!(out.contains("[FILE] a.rs"));
    }

    #[tokio::test]
    async fn test_list_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out = list_dir(dir.path().to_str().unwrap(), &policy()).await;
        assert_eq!(out, "(empty directory)");
    }
}

// report-assembly-service/src/convert/mod.rs
//
// External renderer plumbing: every LibreOffice and pdftoppm invocation goes
// through one timed runner so a hung process can never wedge a generation.

pub mod rasterize;
pub mod soffice;

use std::path::Path;
use std::process::Output;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::{EngineError, Result};

pub use rasterize::Rasterizer;
pub use soffice::{ConvertTarget, MacroCall, SofficeRunner};

/// Run a command with a hard wall-clock bound. The child is killed when the
/// bound elapses.
pub(crate) async fn run_with_timeout(mut command: Command, timeout: Duration) -> Result<Output> {
    command.kill_on_drop(true);
    let started = std::time::Instant::now();
    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| EngineError::RendererTimeout(timeout.as_secs()))??;
    debug!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        status = %output.status,
        "renderer subprocess finished"
    );
    Ok(output)
}

/// Collapse a failed invocation's stderr (falling back to stdout, then the
/// exit status) into one diagnostic line.
pub(crate) fn failure_detail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = stderr.trim();
    if !detail.is_empty() {
        return detail.to_string();
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let detail = stdout.trim();
    if !detail.is_empty() {
        return detail.to_string();
    }
    output.status.to_string()
}

/// `file://` URL for a local path, percent-encoded the way LibreOffice
/// expects its macro parameters.
pub(crate) fn path_to_file_url(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    let mut encoded = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' => encoded.push(b as char),
            b'/' | b'-' | b'_' | b'.' | b'~' | b':' => encoded.push(b as char),
            _ => encoded.push_str(&format!("%{b:02X}")),
        }
    }
    if encoded.starts_with('/') {
        format!("file://{encoded}")
    } else {
        format!("file:///{encoded}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn file_urls_are_absolute_and_encoded() {
        let url = path_to_file_url(&PathBuf::from("/tmp/site photos/img 1.png"));
        assert_eq!(url, "file:///tmp/site%20photos/img%201.png");
    }

    #[tokio::test]
    async fn timeout_kills_and_reports_the_bound() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let err = run_with_timeout(cmd, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RendererTimeout(0)));
    }

    #[tokio::test]
    async fn missing_binary_surfaces_as_io_error() {
        let cmd = Command::new("definitely-not-a-real-binary-xyz");
        let err = run_with_timeout(cmd, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, EngineError::IoError(_)));
    }
}

// report-assembly-service/src/convert/rasterize.rs

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tracing::info;

use crate::config::RasterizerConfig;
use crate::convert::{failure_detail, run_with_timeout};
use crate::error::{EngineError, Result};

/// pdftoppm wrapper: renders each PDF page to `<prefix>-<n>.png` and returns
/// the page files in page order.
#[derive(Debug, Clone)]
pub struct Rasterizer {
    command: String,
    dpi: u32,
    timeout: Duration,
}

impl Rasterizer {
    pub fn new(config: &RasterizerConfig, timeout: Duration) -> Self {
        Self {
            command: config.command.clone(),
            dpi: config.dpi,
            timeout,
        }
    }

    pub async fn pdf_to_pages(
        &self,
        input: &Path,
        pages_dir: &Path,
        base_name: &str,
    ) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(pages_dir).await?;
        let mut cmd = Command::new(&self.command);
        cmd.arg("-png")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg(input)
            .arg(pages_dir.join(base_name));
        info!(input = %input.display(), dpi = self.dpi, "rasterizing pdf pages");
        let output = run_with_timeout(cmd, self.timeout).await?;
        if !output.status.success() {
            return Err(EngineError::RasterizeFailed(failure_detail(&output)));
        }
        collect_pages(pages_dir, base_name).await
    }
}

/// Gather `<base>-<n>.png` outputs sorted by page number. pdftoppm pads page
/// numbers inconsistently across versions, so the sort must be numeric.
async fn collect_pages(pages_dir: &Path, base_name: &str) -> Result<Vec<PathBuf>> {
    let prefix = format!("{base_name}-");
    let mut pages = Vec::new();
    let mut entries = tokio::fs::read_dir(pages_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix) && name.to_lowercase().ends_with(".png") {
            pages.push((page_number(&name), entry.path()));
        }
    }
    pages.sort_by_key(|(n, _)| *n);
    Ok(pages.into_iter().map(|(_, p)| p).collect())
}

fn page_number(file_name: &str) -> u32 {
    file_name
        .rsplit('-')
        .next()
        .and_then(|tail| tail.split('.').next())
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(0)
}

// report-assembly-service/src/convert/soffice.rs

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RendererConfig;
use crate::convert::{failure_detail, path_to_file_url, run_with_timeout};
use crate::error::{EngineError, Result};

#[cfg(windows)]
const WINDOWS_CANDIDATES: &[&str] = &[
    r"C:\Program Files\LibreOffice\program\soffice.com",
    r"C:\Program Files\LibreOffice\program\soffice.exe",
    r"C:\Program Files (x86)\LibreOffice\program\soffice.com",
    r"C:\Program Files (x86)\LibreOffice\program\soffice.exe",
];

/// Conversion targets the engine uses. PDF gets a fallback filter because
/// some LibreOffice builds reject the explicit Writer export name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertTarget {
    Pdf,
    Odt,
    Docx,
}

impl ConvertTarget {
    fn primary_filter(self) -> &'static str {
        match self {
            ConvertTarget::Pdf => "pdf:writer_pdf_Export",
            ConvertTarget::Odt => "odt",
            ConvertTarget::Docx => "docx",
        }
    }

    fn fallback_filter(self) -> Option<&'static str> {
        match self {
            ConvertTarget::Pdf => Some("pdf"),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ConvertTarget::Pdf => "pdf",
            ConvertTarget::Odt => "odt",
            ConvertTarget::Docx => "docx",
        }
    }
}

/// The Basic macros the engine invokes. Arguments are joined into the single
/// `macro:///…` argv token LibreOffice expects; no shell is involved, so the
/// literal text argument needs no quoting.
#[derive(Debug, Clone)]
pub enum MacroCall {
    /// Replace a text occurrence with a page-fit photo, save, close.
    InsertPhotoReplaceText {
        image: PathBuf,
        document: PathBuf,
        source_text: String,
    },
    /// Append a page-fit photo at the end of the document, save, close.
    AppendPhoto { image: PathBuf, document: PathBuf },
    /// Refresh tables of contents and other indexes in place.
    UpdateIndexes { document: PathBuf },
}

impl MacroCall {
    pub(crate) fn to_arg(&self) -> String {
        match self {
            MacroCall::InsertPhotoReplaceText {
                image,
                document,
                source_text,
            } => format!(
                "macro:///Standard.Insert.InsertPhotoReplaceText_FitToPage({},{},{})",
                path_to_file_url(image),
                path_to_file_url(document),
                source_text
            ),
            MacroCall::AppendPhoto { image, document } => format!(
                "macro:///Standard.Insert.InsertPhotoSaveAndClose_FitToPage({},{})",
                path_to_file_url(image),
                path_to_file_url(document)
            ),
            MacroCall::UpdateIndexes { document } => format!(
                "macro:///Standard.Module1.UpdateIndexes({})",
                document.display()
            ),
        }
    }
}

/// Headless LibreOffice wrapper: document conversion with a disposable user
/// profile per invocation, and macro execution against the default profile
/// (the server macros live there).
#[derive(Debug, Clone)]
pub struct SofficeRunner {
    path: String,
    timeout: Duration,
}

impl SofficeRunner {
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            path: resolve_soffice_path(config.soffice_path.as_deref()),
            timeout: Duration::from_secs(config.invocation_timeout_secs),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_path(path: &str, timeout: Duration) -> Self {
        Self {
            path: path.to_string(),
            timeout,
        }
    }

    /// Convert `input` into `outdir`, returning the produced file's path.
    pub async fn convert(
        &self,
        input: &Path,
        outdir: &Path,
        target: ConvertTarget,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(outdir).await?;
        // Isolated profile so parallel conversions never fight over locks.
        let profile_dir = outdir.join(format!("lo-profile-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&profile_dir).await?;

        let mut result = self
            .convert_once(input, outdir, &profile_dir, target.primary_filter())
            .await;
        if let (Err(err), Some(fallback)) = (&result, target.fallback_filter()) {
            warn!(%err, fallback, "primary filter failed, retrying");
            result = self
                .convert_once(input, outdir, &profile_dir, fallback)
                .await;
        }
        // The throwaway profile goes regardless of the outcome.
        if let Err(err) = tokio::fs::remove_dir_all(&profile_dir).await {
            warn!(%err, profile = %profile_dir.display(), "could not remove renderer profile");
        }
        result?;

        let stem = input
            .file_stem()
            .ok_or_else(|| EngineError::InvalidInput("input path has no file name".into()))?;
        let produced = outdir.join(format!(
            "{}.{}",
            stem.to_string_lossy(),
            target.extension()
        ));
        if !produced.is_file() {
            return Err(EngineError::ConversionFailed(format!(
                "renderer reported success but {} was not produced",
                produced.display()
            )));
        }
        Ok(produced)
    }

    async fn convert_once(
        &self,
        input: &Path,
        outdir: &Path,
        profile_dir: &Path,
        filter: &str,
    ) -> Result<()> {
        let mut cmd = Command::new(&self.path);
        cmd.arg("--headless")
            .arg("--nocrashreport")
            .arg("--nolockcheck")
            .arg("--nodefault")
            .arg("--nologo")
            .arg("--norestore")
            .arg(format!(
                "-env:UserInstallation={}",
                path_to_file_url(profile_dir)
            ))
            .arg("--convert-to")
            .arg(filter)
            .arg("--outdir")
            .arg(outdir)
            .arg(input);
        info!(input = %input.display(), filter, "converting document");
        let output = run_with_timeout(cmd, self.timeout).await?;
        if !output.status.success() {
            return Err(EngineError::ConversionFailed(failure_detail(&output)));
        }
        Ok(())
    }

    /// Cheap reachability check before a conversion that must not fail late.
    pub async fn preflight(&self) -> Result<()> {
        let mut cmd = Command::new(&self.path);
        cmd.arg("--headless").arg("--version");
        let output = run_with_timeout(cmd, self.timeout).await?;
        if !output.status.success() {
            return Err(EngineError::RendererUnavailable(failure_detail(&output)));
        }
        Ok(())
    }

    /// Execute a server-side Basic macro.
    pub async fn run_macro(&self, call: &MacroCall) -> Result<()> {
        let mut cmd = Command::new(&self.path);
        cmd.arg("--headless")
            .arg("--invisible")
            .arg("--nologo")
            .arg("--norestore")
            .arg(call.to_arg());
        info!(macro_arg = %call.to_arg(), "running renderer macro");
        let output = run_with_timeout(cmd, self.timeout).await?;
        if !output.status.success() {
            return Err(EngineError::MacroFailed(failure_detail(&output)));
        }
        Ok(())
    }
}

fn resolve_soffice_path(explicit: Option<&str>) -> String {
    if let Some(path) = explicit.filter(|p| !p.trim().is_empty()) {
        return path.to_string();
    }
    #[cfg(windows)]
    for candidate in WINDOWS_CANDIDATES {
        if Path::new(candidate).is_file() {
            return (*candidate).to_string();
        }
    }
    "soffice".to_string()
}

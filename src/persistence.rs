// report-assembly-service/src/persistence.rs
//
// Document storage behind a trait so the engine never cares where templates
// and reports live. The shipped implementation keeps one JSON file per
// document under a root directory.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::models::{Report, Template};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_template(&self, id: &str) -> Result<Option<Template>>;
    async fn save_template(&self, template: &Template) -> Result<()>;
    async fn list_templates(&self) -> Result<Vec<Template>>;
    async fn delete_template(&self, id: &str) -> Result<bool>;

    async fn get_report(&self, id: &str) -> Result<Option<Report>>;
    async fn save_report(&self, report: &Report) -> Result<()>;
    async fn list_reports(&self) -> Result<Vec<Report>>;
    async fn delete_report(&self, id: &str) -> Result<bool>;
}

/// File-backed store: `<root>/templates/<id>.json`, `<root>/reports/<id>.json`.
/// Saves are last-write-wins; a malformed file is skipped on list rather than
/// failing the whole listing.
pub struct JsonStore {
    templates_dir: PathBuf,
    reports_dir: PathBuf,
}

impl JsonStore {
    pub async fn open(root: &std::path::Path) -> Result<Self> {
        let store = Self {
            templates_dir: root.join("templates"),
            reports_dir: root.join("reports"),
        };
        tokio::fs::create_dir_all(&store.templates_dir).await?;
        tokio::fs::create_dir_all(&store.reports_dir).await?;
        Ok(store)
    }

    fn doc_path(dir: &std::path::Path, id: &str) -> Result<PathBuf> {
        // Ids are uuids; anything with path syntax is hostile input.
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(EngineError::InvalidInput(format!("invalid document id '{id}'")));
        }
        Ok(dir.join(format!("{id}.json")))
    }

    async fn read_doc<T: DeserializeOwned>(
        dir: &std::path::Path,
        id: &str,
    ) -> Result<Option<T>> {
        let path = Self::doc_path(dir, id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_doc<T: Serialize>(dir: &std::path::Path, id: &str, doc: &T) -> Result<()> {
        let path = Self::doc_path(dir, id)?;
        let json = serde_json::to_vec_pretty(doc)?;
        // Write-then-rename so a crash never leaves a half-written document.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn list_docs<T: DeserializeOwned>(dir: &std::path::Path) -> Result<Vec<T>> {
        let mut docs = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice(&bytes) {
                Ok(doc) => docs.push(doc),
                Err(err) => {
                    warn!(path = %path.display(), %err, "skipping unreadable document")
                }
            }
        }
        Ok(docs)
    }

    async fn delete_doc(dir: &std::path::Path, id: &str) -> Result<bool> {
        let path = Self::doc_path(dir, id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl DocumentStore for JsonStore {
    async fn get_template(&self, id: &str) -> Result<Option<Template>> {
        Self::read_doc(&self.templates_dir, id).await
    }

    async fn save_template(&self, template: &Template) -> Result<()> {
        Self::write_doc(&self.templates_dir, &template.id, template).await
    }

    async fn list_templates(&self) -> Result<Vec<Template>> {
        Self::list_docs(&self.templates_dir).await
    }

    async fn delete_template(&self, id: &str) -> Result<bool> {
        Self::delete_doc(&self.templates_dir, id).await
    }

    async fn get_report(&self, id: &str) -> Result<Option<Report>> {
        Self::read_doc(&self.reports_dir, id).await
    }

    async fn save_report(&self, report: &Report) -> Result<()> {
        Self::write_doc(&self.reports_dir, &report.id, report).await
    }

    async fn list_reports(&self) -> Result<Vec<Report>> {
        Self::list_docs(&self.reports_dir).await
    }

    async fn delete_report(&self, id: &str) -> Result<bool> {
        Self::delete_doc(&self.reports_dir, id).await
    }
}

// report-assembly-service/src/appendix.rs
//
// Appendix items live on disk under <appendix_dir>/<report_id>/<item_id>/:
// the original upload, a jpeg thumbnail, and (for PDFs) one PNG per page.
// At generation time the items are appended to the working document as
// page-fit photos, in their stored order.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::convert::{MacroCall, Rasterizer, SofficeRunner};
use crate::error::Result;
use crate::images;
use crate::models::{AppendixItem, AppendixKind, Report};

const THUMB_MAX: u32 = 256;
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

pub struct AppendixManager {
    base_dir: PathBuf,
    rasterizer: Rasterizer,
}

impl AppendixManager {
    pub fn new(base_dir: &Path, rasterizer: Rasterizer) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            rasterizer,
        }
    }

    fn report_root(&self, report_id: &str) -> PathBuf {
        self.base_dir.join(report_id)
    }

    /// Store one uploaded file as an appendix item of the report.
    ///
    /// Unsupported extensions are skipped with `Ok(None)`. PDFs are
    /// rasterized up front so generation never depends on the rasterizer
    /// being available. A failed thumbnail is tolerated; a failed page
    /// rasterization is not, since the pages are the appendix content.
    pub async fn ingest(
        &self,
        report: &mut Report,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<Option<AppendixItem>> {
        let ext = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        let kind = if ext == "pdf" {
            AppendixKind::Pdf
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            AppendixKind::Image
        } else {
            warn!(name = %original_name, "unsupported appendix upload skipped");
            return Ok(None);
        };

        let item_id = Uuid::new_v4().to_string();
        let item_dir = self.report_root(&report.id).join(&item_id);
        tokio::fs::create_dir_all(&item_dir).await?;
        let original_path = item_dir.join(format!("original.{ext}"));
        tokio::fs::write(&original_path, bytes).await?;

        let mut item = AppendixItem {
            id: item_id,
            kind,
            original_name: original_name.to_string(),
            original_path: original_path.clone(),
            thumb_path: None,
            page_images: Vec::new(),
            page_count: 0,
            order: report.appendix_items.len() as i64,
            created_at: Utc::now(),
        };

        match kind {
            AppendixKind::Image => {
                item.thumb_path = self.write_thumb(&item_dir, bytes).await;
            }
            AppendixKind::Pdf => {
                let pages = self
                    .rasterizer
                    .pdf_to_pages(&original_path, &item_dir.join("pages"), "page")
                    .await?;
                if let Some(first) = pages.first() {
                    let first_bytes = tokio::fs::read(first).await?;
                    item.thumb_path = self.write_thumb(&item_dir, &first_bytes).await;
                }
                item.page_count = pages.len();
                item.page_images = pages;
            }
        }
        info!(report = %report.id, item = %item.id, ?kind, pages = item.page_count, "appendix item ingested");
        report.appendix_items.push(item.clone());
        Ok(Some(item))
    }

    async fn write_thumb(&self, item_dir: &Path, bytes: &[u8]) -> Option<PathBuf> {
        match images::make_thumbnail(bytes, THUMB_MAX) {
            Ok(jpeg) => {
                let path = item_dir.join("thumb.jpg");
                match tokio::fs::write(&path, jpeg).await {
                    Ok(()) => Some(path),
                    Err(err) => {
                        warn!(%err, "thumbnail write failed");
                        None
                    }
                }
            }
            Err(err) => {
                warn!(%err, "thumbnail encode failed");
                None
            }
        }
    }

    /// Apply new order values by item id and re-sort the list. Unknown ids
    /// are ignored.
    pub fn reorder(report: &mut Report, updates: &[(String, i64)]) {
        for (item_id, order) in updates {
            if let Some(item) = report.appendix_items.iter_mut().find(|i| &i.id == item_id) {
                item.order = *order;
            }
        }
        report.appendix_items.sort_by_key(|i| i.order);
    }

    /// Remove an item from the report and delete its files.
    ///
    /// Directories are derived from the stored file paths as well as the
    /// canonical `<report>/<item>` layout, and anything outside the report's
    /// own appendix root is refused.
    pub async fn remove(&self, report: &mut Report, item_id: &str) -> Result<bool> {
        let Some(idx) = report.appendix_items.iter().position(|i| i.id == item_id) else {
            return Ok(false);
        };
        let removed = report.appendix_items.remove(idx);
        let root = self.report_root(&report.id);

        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(parent) = removed.original_path.parent() {
            candidates.push(parent.to_path_buf());
        }
        if let Some(parent) = removed.thumb_path.as_deref().and_then(Path::parent) {
            candidates.push(parent.to_path_buf());
        }
        candidates.push(root.join(&removed.id));
        candidates.dedup();
        for dir in candidates {
            if !dir.starts_with(&root) {
                warn!(dir = %dir.display(), "refusing to delete outside the report's appendix root");
                continue;
            }
            if let Err(err) = tokio::fs::remove_dir_all(&dir).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(dir = %dir.display(), %err, "appendix item dir removal failed");
                }
            }
        }
        if report.appendix_items.is_empty() {
            self.remove_all(&report.id).await?;
        }
        info!(report = %report.id, item = %item_id, "appendix item removed");
        Ok(true)
    }

    /// Delete the report's whole appendix directory (on report deletion).
    pub async fn remove_all(&self, report_id: &str) -> Result<()> {
        let root = self.report_root(report_id);
        if !root.starts_with(&self.base_dir) {
            return Ok(());
        }
        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Append every item to the working document, in order: images as single
    /// photos, PDFs as one photo per rasterized page.
    pub async fn append_to_document(
        &self,
        soffice: &SofficeRunner,
        items: &[AppendixItem],
        document: &Path,
    ) -> Result<()> {
        let mut sorted: Vec<&AppendixItem> = items.iter().collect();
        sorted.sort_by_key(|i| i.order);
        for item in sorted {
            match item.kind {
                AppendixKind::Image => {
                    soffice
                        .run_macro(&MacroCall::AppendPhoto {
                            image: item.original_path.clone(),
                            document: document.to_path_buf(),
                        })
                        .await?;
                }
                AppendixKind::Pdf => {
                    for page in &item.page_images {
                        soffice
                            .run_macro(&MacroCall::AppendPhoto {
                                image: page.clone(),
                                document: document.to_path_buf(),
                            })
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RasterizerConfig;
    use crate::models::Template;
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;
    use std::time::Duration;

    fn manager(base: &Path) -> AppendixManager {
        let raster = Rasterizer::new(
            &RasterizerConfig {
                command: "pdftoppm".into(),
                dpi: 200,
            },
            Duration::from_secs(30),
        );
        AppendixManager::new(base, raster)
    }

    fn report() -> Report {
        Report::new(&Template::new("T", "u1"), "u1")
    }

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::new_rgb8(64, 48);
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[tokio::test]
    async fn image_upload_creates_original_and_thumb() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let mut report = report();
        let item = mgr
            .ingest(&mut report, "site plan.PNG", &png_bytes())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.kind, AppendixKind::Image);
        assert!(item.original_path.is_file());
        assert!(item.thumb_path.as_deref().unwrap().is_file());
        assert_eq!(item.order, 0);
        assert_eq!(report.appendix_items.len(), 1);
    }

    #[tokio::test]
    async fn unsupported_extension_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let mut report = report();
        let item = mgr
            .ingest(&mut report, "notes.txt", b"plain text")
            .await
            .unwrap();
        assert!(item.is_none());
        assert!(report.appendix_items.is_empty());
    }

    #[tokio::test]
    async fn reorder_sorts_by_new_order() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let mut report = report();
        let a = mgr.ingest(&mut report, "a.png", &png_bytes()).await.unwrap().unwrap();
        let b = mgr.ingest(&mut report, "b.png", &png_bytes()).await.unwrap().unwrap();
        AppendixManager::reorder(&mut report, &[(a.id.clone(), 5), (b.id.clone(), 1)]);
        let names: Vec<_> = report
            .appendix_items
            .iter()
            .map(|i| i.original_name.as_str())
            .collect();
        assert_eq!(names, vec!["b.png", "a.png"]);
    }

    #[tokio::test]
    async fn remove_deletes_the_item_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let mut report = report();
        let item = mgr.ingest(&mut report, "a.png", &png_bytes()).await.unwrap().unwrap();
        let item_dir = item.original_path.parent().unwrap().to_path_buf();
        assert!(item_dir.is_dir());
        assert!(mgr.remove(&mut report, &item.id).await.unwrap());
        assert!(!item_dir.exists());
        assert!(report.appendix_items.is_empty());
        assert!(!mgr.remove(&mut report, &item.id).await.unwrap());
    }

    #[tokio::test]
    async fn remove_refuses_paths_outside_the_report_root() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let mut report = report();
        let outside = tempfile::tempdir().unwrap();
        let marker = outside.path().join("keep.txt");
        std::fs::write(&marker, b"important").unwrap();
        report.appendix_items.push(AppendixItem {
            id: "rogue".into(),
            kind: AppendixKind::Image,
            original_name: "x.png".into(),
            original_path: marker.clone(),
            thumb_path: None,
            page_images: Vec::new(),
            page_count: 0,
            order: 0,
            created_at: Utc::now(),
        });
        assert!(mgr.remove(&mut report, "rogue").await.unwrap());
        // The stored path pointed elsewhere; the guard left it alone.
        assert!(marker.is_file());
    }
}

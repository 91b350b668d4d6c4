// report-assembly-service/src/pipeline.rs
//
// Document assembly: template import/analysis and the generation sequence
// working copy -> inline images -> text render -> field refresh settings ->
// appendix append -> index refresh -> optional PDF conversion -> cleanup.
// Render failures abort before any output exists; a failed conversion takes
// the intermediate document down with it; macro refresh and appendix append
// are best-effort.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::appendix::AppendixManager;
use crate::artifacts::ArtifactSet;
use crate::config::Config;
use crate::convert::{ConvertTarget, MacroCall, Rasterizer, SofficeRunner};
use crate::docx::tokenizer::{self, analyze_tokens};
use crate::docx::Package;
use crate::error::{EngineError, Result};
use crate::images;
use crate::models::{GenerationStat, ImageExtent, Report, Template, VariableType};
use crate::render;

pub const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Docx,
    Pdf,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Docx => "docx",
            OutputFormat::Pdf => "pdf",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Docx => DOCX_CONTENT_TYPE,
            OutputFormat::Pdf => PDF_CONTENT_TYPE,
        }
    }
}

/// Finished document plus the stat row describing it. All files behind it
/// are gone by the time this is returned.
#[derive(Debug)]
pub struct GeneratedReport {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
    pub stat: GenerationStat,
}

/// What an uploaded package contains, before any template metadata exists.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PackageAnalysis {
    pub tokens: Vec<String>,
    pub media: Vec<MediaPlaceholder>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MediaPlaceholder {
    pub target: String,
    pub file_name: String,
    pub extent: Option<ImageExtent>,
}

pub struct Pipeline {
    config: Config,
    soffice: SofficeRunner,
    http: Client,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        let soffice = SofficeRunner::new(&config.renderer);
        Self {
            config,
            soffice,
            http: Client::new(),
        }
    }

    pub fn rasterizer(&self) -> Rasterizer {
        Rasterizer::new(
            &self.config.rasterizer,
            std::time::Duration::from_secs(self.config.renderer.invocation_timeout_secs),
        )
    }

    pub fn appendix_manager(&self) -> AppendixManager {
        AppendixManager::new(&self.config.storage.appendix_dir, self.rasterizer())
    }

    /// Inventory an uploaded package: distinct tokens plus every media part
    /// with its discovered on-page extent.
    pub fn analyze_package(bytes: &[u8]) -> Result<PackageAnalysis> {
        let package = Package::from_bytes(bytes)?;
        let media = package
            .media_part_names()
            .into_iter()
            .map(|target| {
                let extent = images::find_extent_for_target(&package, &target);
                let file_name = target.rsplit('/').next().unwrap_or(&target).to_string();
                MediaPlaceholder {
                    target,
                    file_name,
                    extent,
                }
            })
            .collect();
        Ok(PackageAnalysis {
            tokens: analyze_tokens(&package),
            media,
        })
    }

    /// Import an uploaded package as the template's source document.
    ///
    /// Source phrases become `{{name}}` tokens, image variables missing an
    /// extent are enriched from the package, and the tokenized package is
    /// persisted as the immutable source. A PDF preview is attempted but its
    /// failure never fails the import.
    pub async fn import_template(&self, template: &mut Template, upload: &[u8]) -> Result<()> {
        let mut package = Package::from_bytes(upload)?;
        let rewritten = tokenizer::tokenize_template(&mut package, &mut template.variables)?;
        for var in template
            .variables
            .iter_mut()
            .filter(|v| v.var_type == VariableType::Image && v.image_extent.is_none())
        {
            if let Some(target) = var.image_target.as_deref() {
                var.image_extent = images::find_extent_for_target(&package, target);
            }
        }

        self.config.storage.ensure_dirs()?;
        let source_path = self
            .config
            .storage
            .uploads_dir
            .join(format!("template-{}.docx", template.id));
        package.save(&source_path)?;
        template.source_docx_path = Some(source_path.clone());
        template.updated_at = Utc::now();
        info!(template = %template.id, rewritten, "template imported");

        match self.build_preview(&source_path, &template.id).await {
            Ok(preview) => template.preview_pdf_path = Some(preview),
            Err(err) => warn!(template = %template.id, %err, "preview build failed, import continues"),
        }
        Ok(())
    }

    async fn build_preview(&self, source: &Path, template_id: &str) -> Result<PathBuf> {
        let previews = &self.config.storage.template_previews_dir;
        let produced = self
            .soffice
            .convert(source, previews, ConvertTarget::Pdf)
            .await?;
        let preview = previews.join(format!("{template_id}.pdf"));
        if produced != preview {
            tokio::fs::rename(&produced, &preview).await?;
        }
        Ok(preview)
    }

    /// Assemble a report document from its template.
    pub async fn generate(
        &self,
        template: &Template,
        report: &Report,
        format: OutputFormat,
    ) -> Result<GeneratedReport> {
        let started = Instant::now();
        let source = template
            .source_docx_path
            .as_deref()
            .filter(|p| p.is_file())
            .ok_or_else(|| EngineError::MissingSourcePackage(template.id.clone()))?;
        self.config.storage.ensure_dirs()?;

        let mut artifacts = ArtifactSet::new();
        let working = artifacts.track(
            self.config
                .storage
                .uploads_dir
                .join(format!("work-{}.docx", Uuid::new_v4())),
        );
        tokio::fs::copy(source, &working).await?;
        info!(template = %template.id, report = %report.id, ?format, "generation started");

        let kml_data = report.kml_data.clone().unwrap_or_default();
        let values = render::resolve_values(&template.variables, &report.values, &kml_data);

        // Macro-based image insertion runs on the file before the text pass
        // so anchor phrases are still present.
        self.insert_inline_images(template, report, &working, &mut artifacts)
            .await;

        let mut package = Package::open(&working)?;
        for var in template
            .variables
            .iter()
            .filter(|v| v.var_type == VariableType::Image)
        {
            let Some(serde_json::Value::String(provided)) = report.values.get(&var.name) else {
                continue;
            };
            if let Some(bytes) = images::resolve_bytes(provided, &self.config.storage, &self.http).await
            {
                images::substitute_media(&mut package, var, &bytes);
            }
        }
        render::render_package(&mut package, &values)?;
        enable_update_fields_on_open(&mut package);
        package.save(&working)?;

        // Appendix pages and index refresh mutate the document through the
        // renderer; both are tolerated failures.
        if !report.appendix_items.is_empty() {
            if let Err(err) = self
                .appendix_manager()
                .append_to_document(&self.soffice, &report.appendix_items, &working)
                .await
            {
                warn!(report = %report.id, %err, "appendix append failed, continuing without it");
            }
        }
        if let Err(err) = self
            .soffice
            .run_macro(&MacroCall::UpdateIndexes {
                document: working.clone(),
            })
            .await
        {
            warn!(report = %report.id, %err, "index refresh failed, continuing");
        }

        let bytes = match format {
            OutputFormat::Docx => tokio::fs::read(&working).await?,
            OutputFormat::Pdf => {
                self.soffice.preflight().await?;
                let pdf = self
                    .soffice
                    .convert(&working, &self.config.storage.uploads_dir, ConvertTarget::Pdf)
                    .await?;
                artifacts.track(&pdf);
                tokio::fs::read(&pdf).await?
            }
        };
        artifacts.sweep();

        let sha256 = hex::encode(Sha256::digest(&bytes));
        let stat = GenerationStat {
            id: Uuid::new_v4().to_string(),
            template_id: template.id.clone(),
            report_id: Some(report.id.clone()),
            format: format.extension().to_string(),
            file_name: format!("report.{}", format.extension()),
            size_bytes: bytes.len() as u64,
            sha256_checksum: sha256,
            duration_ms: started.elapsed().as_millis() as u64,
            generated_at: Utc::now(),
        };
        info!(
            report = %report.id,
            format = %stat.format,
            size = stat.size_bytes,
            duration_ms = stat.duration_ms,
            "generation finished"
        );
        Ok(GeneratedReport {
            file_name: stat.file_name.clone(),
            content_type: format.content_type(),
            bytes,
            stat,
        })
    }

    /// Replace each image variable's anchor text with the photo via the
    /// renderer macro, retrying until the anchor is gone or the retry limit
    /// is hit. The whole phase is best-effort.
    async fn insert_inline_images(
        &self,
        template: &Template,
        report: &Report,
        working: &Path,
        artifacts: &mut ArtifactSet,
    ) {
        for var in template
            .variables
            .iter()
            .filter(|v| v.var_type == VariableType::Image)
        {
            let Some(serde_json::Value::String(provided)) = report.values.get(&var.name) else {
                continue;
            };
            let Some(image) =
                images::resolve_file(provided, &self.config.storage, &self.http).await
            else {
                continue;
            };
            if images::is_macro_scratch(&image, &self.config.storage) {
                artifacts.track(&image);
            }
            let anchor = match var.source_text.as_deref().filter(|s| !s.trim().is_empty()) {
                Some(text) => text.to_string(),
                None => format!("{{{{{}}}}}", var.name),
            };
            let call = MacroCall::InsertPhotoReplaceText {
                image: image.clone(),
                document: working.to_path_buf(),
                source_text: anchor.clone(),
            };
            let mut attempts = 0;
            while attempts < self.config.renderer.macro_retry_limit {
                attempts += 1;
                if let Err(err) = self.soffice.run_macro(&call).await {
                    warn!(variable = %var.name, %err, "inline image macro failed, phase skipped");
                    return;
                }
                match document_contains_text(working, &anchor) {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(err) => {
                        warn!(variable = %var.name, %err, "anchor check failed");
                        break;
                    }
                }
            }
            info!(variable = %var.name, attempts, "inline image inserted");
        }
    }
}

/// True when any text part of the on-disk document still contains the text.
pub fn document_contains_text(path: &Path, needle: &str) -> Result<bool> {
    let package = Package::open(path)?;
    tokenizer::contains_source_text(&package, needle)
}

/// Force `<w:updateFields w:val="true"/>` in the settings part so Word
/// refreshes the table of contents on open. Creates the part when absent.
pub fn enable_update_fields_on_open(package: &mut Package) {
    const SETTINGS: &str = "word/settings.xml";
    let xml = package
        .read_text(SETTINGS)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| {
            concat!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>",
                "<w:settings xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">",
                "</w:settings>"
            )
            .to_string()
        });
    let updated = if xml.contains("<w:updateFields") {
        let re = regex::Regex::new(r"<w:updateFields[^>]*/>").expect("static regex");
        re.replace(&xml, "<w:updateFields w:val=\"true\"/>").into_owned()
    } else {
        xml.replace("</w:settings>", "<w:updateFields w:val=\"true\"/></w:settings>")
    };
    package.write_text(SETTINGS, updated);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::package::test_package;

    #[test]
    fn update_fields_inserted_into_existing_settings() {
        let settings = "<?xml version=\"1.0\"?><w:settings xmlns:w=\"x\">\
                        <w:zoom w:percent=\"100\"/></w:settings>";
        let mut pkg = test_package(&[("word/settings.xml", settings.as_bytes())]);
        enable_update_fields_on_open(&mut pkg);
        let xml = pkg.read_text("word/settings.xml").unwrap();
        assert!(xml.contains("<w:updateFields w:val=\"true\"/></w:settings>"));
    }

    #[test]
    fn update_fields_forced_true_when_present() {
        let settings = "<w:settings xmlns:w=\"x\">\
                        <w:updateFields w:val=\"false\"/></w:settings>";
        let mut pkg = test_package(&[("word/settings.xml", settings.as_bytes())]);
        enable_update_fields_on_open(&mut pkg);
        let xml = pkg.read_text("word/settings.xml").unwrap();
        assert!(xml.contains("<w:updateFields w:val=\"true\"/>"));
        assert!(!xml.contains("w:val=\"false\""));
    }

    #[test]
    fn update_fields_part_created_when_missing() {
        let mut pkg = test_package(&[("word/document.xml", b"<w:document/>")]);
        enable_update_fields_on_open(&mut pkg);
        let xml = pkg.read_text("word/settings.xml").unwrap();
        assert!(xml.contains("<w:updateFields w:val=\"true\"/>"));
    }

    #[test]
    fn analysis_lists_tokens_and_media_with_extents() {
        let doc = "<?xml version=\"1.0\"?><w:document><w:body>\
                   <w:p><w:r><w:t>{{client}} {{inspectionDate}}</w:t></w:r></w:p>\
                   <w:p><w:r><w:drawing><wp:inline>\
                   <wp:extent cx=\"914400\" cy=\"914400\"/>\
                   <a:graphic><pic:blipFill><a:blip r:embed=\"rId4\"/>\
                   </pic:blipFill></a:graphic>\
                   </wp:inline></w:drawing></w:r></w:p>\
                   </w:body></w:document>";
        let rels = "<Relationships>\
                    <Relationship Id=\"rId4\" Type=\"image\" Target=\"media/photo.png\"/>\
                    </Relationships>";
        let pkg = test_package(&[
            ("word/document.xml", doc.as_bytes()),
            ("word/_rels/document.xml.rels", rels.as_bytes()),
            ("word/media/photo.png", b"png"),
        ]);
        let analysis = Pipeline::analyze_package(&pkg.to_bytes().unwrap()).unwrap();
        assert_eq!(analysis.tokens, vec!["client", "inspectionDate"]);
        assert_eq!(analysis.media.len(), 1);
        assert_eq!(analysis.media[0].file_name, "photo.png");
        assert_eq!(
            analysis.media[0].extent,
            Some(ImageExtent { cx: 914_400, cy: 914_400 })
        );
    }
}

// report-assembly-service/tests/generation.rs
//
// End-to-end assembly runs against a synthesized package. The renderer macro
// phases degrade gracefully when no LibreOffice is present, so the DOCX path
// is fully hermetic; the PDF path runs against a stub renderer script.

use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use report_assembly::config::{
    Config, RasterizerConfig, RendererConfig, ServiceConfig, StorageConfig,
};
use report_assembly::models::{Report, Template, Variable, VariableType};
use report_assembly::pipeline::{OutputFormat, Pipeline};
use report_assembly::EngineError;

fn docx_with_body(body: &str) -> Vec<u8> {
    let document = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
         <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
         <w:body>{body}</w:body></w:document>"
    );
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, content) in [
        ("[Content_Types].xml", "<Types/>"),
        ("word/document.xml", document.as_str()),
    ] {
        writer.start_file(name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn document_text(docx: &[u8]) -> String {
    let mut archive = ZipArchive::new(Cursor::new(docx)).unwrap();
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .unwrap()
        .read_to_string(&mut xml)
        .unwrap();
    xml
}

fn config_for(root: &Path, soffice: Option<&str>) -> Config {
    Config {
        service: ServiceConfig {
            name: "report-assembly-test".into(),
            log_level: "warn".into(),
        },
        storage: StorageConfig::under_root(root),
        renderer: RendererConfig {
            soffice_path: soffice.map(str::to_string),
            invocation_timeout_secs: 30,
            macro_retry_limit: 3,
        },
        rasterizer: RasterizerConfig {
            command: "pdftoppm".into(),
            dpi: 100,
        },
    }
}

fn valuation_template() -> Template {
    let mut template = Template::new("Valuation Report", "surveyor-1");
    let mut client = Variable::new("clientName", VariableType::Text);
    client.source_text = Some("CLIENT NAME HERE".into());
    let date = Variable::new("inspectionDate", VariableType::Date);
    let mut area = Variable::new("plotArea", VariableType::Kml);
    area.kml_field = Some("AREA_SQM".into());
    let mut total = Variable::new("totalValue", VariableType::Calculated);
    total.expression = Some("plotArea * 2".into());
    template.variables = vec![client, date, area, total];
    template
}

#[cfg(unix)]
fn stub_soffice(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join("soffice-stub.sh");
    let body = r#"#!/bin/sh
# --version preflight and macro invocations just succeed
input=""; outdir=""; convert=0
while [ $# -gt 0 ]; do
  case "$1" in
    --convert-to) convert=1 ;;
    --outdir) outdir="$2"; shift ;;
    --*|-env:*|macro:*) ;;
    *) input="$1" ;;
  esac
  shift
done
if [ "$convert" = "1" ]; then
  base=$(basename "$input" .docx)
  printf '%%PDF-1.4 stub' > "$outdir/$base.pdf"
fi
exit 0
"#;
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn no_work_files_left(storage: &StorageConfig) -> bool {
    std::fs::read_dir(&storage.uploads_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .all(|e| !e.file_name().to_string_lossy().starts_with("work-"))
        })
        .unwrap_or(true)
}

#[tokio::test]
async fn import_then_generate_docx_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path(), Some("/bin/false"));
    let storage = config.storage.clone();
    let pipeline = Pipeline::new(config);

    let mut template = valuation_template();
    let upload = docx_with_body(
        "<w:p><w:r><w:t>Prepared for CLIENT NAME HERE on {{inspectionDate}}</w:t></w:r></w:p>\
         <w:p><w:r><w:t>Area: {{plotArea}} Total: {{totalValue}} Ref: {{fileRef}}</w:t></w:r></w:p>",
    );
    pipeline.import_template(&mut template, &upload).await.unwrap();
    assert!(template.source_docx_path.as_deref().unwrap().is_file());
    assert!(template.variables[0].tokenized);
    // Preview needs the renderer; its failure must not fail the import.
    assert!(template.preview_pdf_path.is_none());

    let mut report = Report::new(&template, "surveyor-1");
    report.values.insert("clientName".into(), "N. Ioannou".into());
    report
        .values
        .insert("inspectionDate".into(), "2026-03-05".into());
    let mut kml = serde_json::Map::new();
    kml.insert("AREA_SQM".into(), serde_json::json!(450));
    report.kml_data = Some(kml);

    let generated = pipeline
        .generate(&template, &report, OutputFormat::Docx)
        .await
        .unwrap();
    assert_eq!(generated.file_name, "report.docx");
    assert_eq!(generated.stat.size_bytes, generated.bytes.len() as u64);
    assert_eq!(generated.stat.sha256_checksum.len(), 64);

    let xml = document_text(&generated.bytes);
    assert!(xml.contains("Prepared for N. Ioannou on Mar 05, 2026"));
    assert!(xml.contains("Area: 450 Total: 900"));
    // Unfilled token degrades to a visible marker.
    assert!(xml.contains("Ref: [fileRef]"));
    assert!(!xml.contains("{{"));

    // Fields refresh on open, and no intermediates survive.
    let mut archive = ZipArchive::new(Cursor::new(&generated.bytes[..])).unwrap();
    let mut settings = String::new();
    archive
        .by_name("word/settings.xml")
        .unwrap()
        .read_to_string(&mut settings)
        .unwrap();
    assert!(settings.contains("<w:updateFields w:val=\"true\"/>"));
    assert!(no_work_files_left(&storage));
}

#[tokio::test]
async fn generate_is_repeatable_from_the_same_source() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path(), Some("/bin/false"));
    let pipeline = Pipeline::new(config);

    let mut template = valuation_template();
    let upload = docx_with_body("<w:p><w:r><w:t>Client: CLIENT NAME HERE</w:t></w:r></w:p>");
    pipeline.import_template(&mut template, &upload).await.unwrap();

    let mut report = Report::new(&template, "surveyor-1");
    report.values.insert("clientName".into(), "First Run".into());
    let first = pipeline
        .generate(&template, &report, OutputFormat::Docx)
        .await
        .unwrap();
    assert!(document_text(&first.bytes).contains("Client: First Run"));

    // The source stays tokenized; a second run renders fresh values.
    report.values.insert("clientName".into(), "Second Run".into());
    let second = pipeline
        .generate(&template, &report, OutputFormat::Docx)
        .await
        .unwrap();
    let xml = document_text(&second.bytes);
    assert!(xml.contains("Client: Second Run"));
    assert!(!xml.contains("First Run"));
}

#[cfg(unix)]
#[tokio::test]
async fn pdf_output_via_stub_renderer() {
    let dir = tempfile::tempdir().unwrap();
    let stub = stub_soffice(dir.path());
    let config = config_for(dir.path(), Some(&stub.to_string_lossy()));
    let storage = config.storage.clone();
    let pipeline = Pipeline::new(config);

    let mut template = valuation_template();
    let upload = docx_with_body("<w:p><w:r><w:t>CLIENT NAME HERE</w:t></w:r></w:p>");
    pipeline.import_template(&mut template, &upload).await.unwrap();
    // The stub produces the preview too.
    assert!(template.preview_pdf_path.as_deref().unwrap().is_file());

    let mut report = Report::new(&template, "surveyor-1");
    report.values.insert("clientName".into(), "PDF Client".into());
    let generated = pipeline
        .generate(&template, &report, OutputFormat::Pdf)
        .await
        .unwrap();
    assert_eq!(generated.file_name, "report.pdf");
    assert_eq!(generated.content_type, "application/pdf");
    assert!(generated.bytes.starts_with(b"%PDF"));
    assert!(no_work_files_left(&storage));
}

#[cfg(unix)]
#[tokio::test]
async fn failed_pdf_conversion_removes_the_intermediate_docx() {
    let dir = tempfile::tempdir().unwrap();
    // Preflight succeeds under /bin/true but no pdf is ever produced.
    let config = config_for(dir.path(), Some("/bin/true"));
    let storage = config.storage.clone();
    let pipeline = Pipeline::new(config);

    let mut template = valuation_template();
    let upload = docx_with_body("<w:p><w:r><w:t>CLIENT NAME HERE</w:t></w:r></w:p>");
    pipeline.import_template(&mut template, &upload).await.unwrap();

    let report = Report::new(&template, "surveyor-1");
    let err = pipeline
        .generate(&template, &report, OutputFormat::Pdf)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ConversionFailed(_)));
    assert!(no_work_files_left(&storage));
}

#[tokio::test]
async fn image_value_replaces_the_first_media_part_without_a_declared_target() {
    use base64::Engine;

    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path(), Some("/bin/false"));
    let pipeline = Pipeline::new(config);

    let mut template = Template::new("Photo Report", "surveyor-1");
    template.variables = vec![Variable::new("sitePhoto", VariableType::Image)];

    // Upload carrying a picture placeholder but no metadata tying the
    // variable to it.
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let document = "<?xml version=\"1.0\"?>\
                    <w:document xmlns:w=\"x\"><w:body>\
                    <w:p><w:r><w:t>Site photograph below</w:t></w:r></w:p>\
                    </w:body></w:document>";
    for (name, content) in [
        ("[Content_Types].xml", "<Types/>".as_bytes()),
        ("word/document.xml", document.as_bytes()),
        ("word/media/image1.png", b"placeholder".as_slice()),
    ] {
        writer.start_file(name, options).unwrap();
        writer.write_all(content).unwrap();
    }
    let upload = writer.finish().unwrap().into_inner();
    pipeline.import_template(&mut template, &upload).await.unwrap();

    let photo = {
        let img = image::DynamicImage::new_rgb8(32, 32);
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    };
    let mut report = Report::new(&template, "surveyor-1");
    report.values.insert(
        "sitePhoto".into(),
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&photo)
        )
        .into(),
    );

    let generated = pipeline
        .generate(&template, &report, OutputFormat::Docx)
        .await
        .unwrap();
    let mut archive = ZipArchive::new(Cursor::new(&generated.bytes[..])).unwrap();
    let mut media = Vec::new();
    archive
        .by_name("word/media/image1.png")
        .unwrap()
        .read_to_end(&mut media)
        .unwrap();
    assert_ne!(media, b"placeholder");
    assert!(image::load_from_memory(&media).is_ok());
}

#[tokio::test]
async fn generation_without_imported_source_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(config_for(dir.path(), Some("/bin/false")));
    let template = valuation_template();
    let report = Report::new(&template, "surveyor-1");
    let err = pipeline
        .generate(&template, &report, OutputFormat::Docx)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MissingSourcePackage(_)));
}

// report-assembly-service/src/main.rs

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use report_assembly::config::Config;
use report_assembly::error::EngineError;
use report_assembly::models::{ReportStatus, Template};
use report_assembly::persistence::{DocumentStore, JsonStore};
use report_assembly::pipeline::{OutputFormat, Pipeline};

/// One-shot jobs the binary executes against the document store.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Job {
    /// Inventory an uploaded package: tokens and media placeholders.
    Analyze { package_path: PathBuf },
    /// Import a package as a template's source document.
    Import {
        template: Template,
        upload_path: PathBuf,
    },
    /// Assemble and download a report document.
    Generate {
        report_id: String,
        format: String,
        output_path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Print to stderr BEFORE logging initialization to catch early failures
    eprintln!("Starting report-assembly-service...");

    let config = match Config::load() {
        Ok(cfg) => {
            eprintln!("Configuration loaded successfully");
            cfg
        }
        Err(e) => {
            eprintln!("FATAL: Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    eprintln!("Initializing logging...");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.service.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();
    eprintln!("Logging initialized");

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting Report Assembly Service"
    );

    let job_path = std::env::args().nth(1).context("usage: report-assembly-service <job.json>")?;
    let job_json = std::fs::read(&job_path)
        .with_context(|| format!("reading job file {job_path}"))?;
    let job: Job = serde_json::from_slice(&job_json).context("parsing job file")?;

    config.storage.ensure_dirs().context("creating storage directories")?;
    let store: Arc<dyn DocumentStore> = Arc::new(
        JsonStore::open(&config.storage.store_dir)
            .await
            .context("opening document store")?,
    );
    let pipeline = Pipeline::new(config);

    run_job(job, &pipeline, store.as_ref()).await?;
    Ok(())
}

async fn run_job(
    job: Job,
    pipeline: &Pipeline,
    store: &dyn DocumentStore,
) -> anyhow::Result<()> {
    match job {
        Job::Analyze { package_path } => {
            let bytes = std::fs::read(&package_path)
                .with_context(|| format!("reading {}", package_path.display()))?;
            let analysis = Pipeline::analyze_package(&bytes).context("analyzing package")?;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        Job::Import {
            mut template,
            upload_path,
        } => {
            let bytes = std::fs::read(&upload_path)
                .with_context(|| format!("reading {}", upload_path.display()))?;
            pipeline
                .import_template(&mut template, &bytes)
                .await
                .context("importing template")?;
            store
                .save_template(&template)
                .await
                .context("saving template")?;
            info!(template = %template.id, "template stored");
        }
        Job::Generate {
            report_id,
            format,
            output_path,
        } => {
            let format = match format.as_str() {
                "docx" => OutputFormat::Docx,
                "pdf" => OutputFormat::Pdf,
                other => bail!("unknown output format '{other}'"),
            };
            let mut report = store
                .get_report(&report_id)
                .await?
                .ok_or_else(|| EngineError::ReportNotFound(report_id.clone()))?;
            if !report.may_download() {
                bail!(
                    "report {} is in status '{}'; downloads require Final Review or Submitted",
                    report_id,
                    report.status.as_str()
                );
            }
            let template = store
                .get_template(&report.template_id)
                .await?
                .ok_or_else(|| EngineError::TemplateNotFound(report.template_id.clone()))?;

            report.merge_kml(&template.variables);
            let generated = pipeline
                .generate(&template, &report, format)
                .await
                .context("generating report")?;
            std::fs::write(&output_path, &generated.bytes)
                .with_context(|| format!("writing {}", output_path.display()))?;

            // A completed download moves the report to its terminal status.
            if let Err(err) = report.status.validate_transition("Submitted") {
                warn!(%err, "report kept its current status");
            } else {
                report.status = ReportStatus::Submitted;
            }
            report.last_generated_at = Some(Utc::now());
            report.updated_at = Utc::now();
            store.save_report(&report).await.context("saving report")?;
            info!(
                report = %report.id,
                output = %output_path.display(),
                sha256 = %generated.stat.sha256_checksum,
                size = generated.stat.size_bytes,
                duration_ms = generated.stat.duration_ms,
                "report generated"
            );
        }
    }
    Ok(())
}

// report-assembly-service/src/config.rs

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub renderer: RendererConfig,
    pub rasterizer: RasterizerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub log_level: String,
}

/// Every directory the engine touches is explicit configuration; components
/// receive the paths at construction instead of reading process-wide constants.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub uploads_dir: PathBuf,
    pub images_dir: PathBuf,
    pub template_previews_dir: PathBuf,
    pub appendix_dir: PathBuf,
    pub store_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RendererConfig {
    /// Explicit soffice path; when unset the platform default resolution applies.
    pub soffice_path: Option<String>,
    pub invocation_timeout_secs: u64,
    pub macro_retry_limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RasterizerConfig {
    pub command: String,
    pub dpi: u32,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            // Start with default values
            .set_default("service.name", "report-assembly-service")?
            .set_default("service.log_level", "info")?
            .set_default("storage.uploads_dir", "./uploads")?
            .set_default("storage.images_dir", "./uploads/images")?
            .set_default("storage.template_previews_dir", "./uploads/template-previews")?
            .set_default("storage.appendix_dir", "./uploads/appendix")?
            .set_default("storage.store_dir", "./store")?
            .set_default("renderer.invocation_timeout_secs", "120")?
            .set_default("renderer.macro_retry_limit", "50")?
            .set_default("rasterizer.command", "pdftoppm")?
            .set_default("rasterizer.dpi", "200")?
            // Load from config file if it exists
            .add_source(File::with_name("config").required(false))
            // Override with environment variables (e.g., REPORT__RENDERER__SOFFICE_PATH)
            .add_source(Environment::with_prefix("REPORT").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

impl StorageConfig {
    /// Create every configured directory up front so request handling never
    /// races on first-use directory creation.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            &self.uploads_dir,
            &self.images_dir,
            &self.template_previews_dir,
            &self.appendix_dir,
            &self.store_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Rooted storage config for tests and embedded use.
    pub fn under_root(root: &Path) -> Self {
        Self {
            uploads_dir: root.join("uploads"),
            images_dir: root.join("uploads/images"),
            template_previews_dir: root.join("uploads/template-previews"),
            appendix_dir: root.join("uploads/appendix"),
            store_dir: root.join("store"),
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            soffice_path: None,
            invocation_timeout_secs: 120,
            macro_retry_limit: 50,
        }
    }
}

impl Default for RasterizerConfig {
    fn default() -> Self {
        Self {
            command: "pdftoppm".to_string(),
            dpi: 200,
        }
    }
}

// report-assembly-service/src/error.rs

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Package error: {0}")]
    PackageError(#[from] zip::result::ZipError),

    #[error("XML error: {0}")]
    XmlError(#[from] quick_xml::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Base64 decoding error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Report not found: {0}")]
    ReportNotFound(String),

    #[error("Template has no source package: {0}")]
    MissingSourcePackage(String),

    #[error("Template rendering failed: {0}")]
    RenderFailed(String),

    #[error("Document renderer unavailable: {0}")]
    RendererUnavailable(String),

    #[error("Macro invocation failed: {0}")]
    MacroFailed(String),

    #[error("Format conversion failed: {0}")]
    ConversionFailed(String),

    #[error("Page rasterization failed: {0}")]
    RasterizeFailed(String),

    #[error("Renderer call timed out after {0}s")]
    RendererTimeout(u64),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl EngineError {
    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.to_string(),
            error_type: match self {
                EngineError::IoError(_) => "io_error",
                EngineError::PackageError(_) => "package_error",
                EngineError::XmlError(_) => "xml_error",
                EngineError::SerializationError(_) => "serialization_error",
                EngineError::Base64Error(_) => "base64_error",
                EngineError::ImageError(_) => "image_error",
                EngineError::TemplateNotFound(_) => "template_not_found",
                EngineError::ReportNotFound(_) => "report_not_found",
                EngineError::MissingSourcePackage(_) => "missing_source_package",
                EngineError::RenderFailed(_) => "render_failed",
                EngineError::RendererUnavailable(_) => "renderer_unavailable",
                EngineError::MacroFailed(_) => "macro_failed",
                EngineError::ConversionFailed(_) => "conversion_failed",
                EngineError::RasterizeFailed(_) => "rasterize_failed",
                EngineError::RendererTimeout(_) => "renderer_timeout",
                EngineError::InvalidStatusTransition { .. } => "invalid_status_transition",
                EngineError::InvalidInput(_) => "invalid_input",
            }
            .to_string(),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_type: String,
}

// report-assembly-service/src/lib.rs
//
// Assembly engine for DOCX report templates: tokenized packages, value
// rendering, image composition, LibreOffice-backed conversion, appendix
// assembly, and the artifact lifecycle around a generation.

pub mod appendix;
pub mod artifacts;
pub mod config;
pub mod convert;
pub mod docx;
pub mod error;
pub mod images;
pub mod models;
pub mod persistence;
pub mod pipeline;
pub mod render;

pub use config::Config;
pub use error::{EngineError, Result};
pub use pipeline::{GeneratedReport, OutputFormat, Pipeline};

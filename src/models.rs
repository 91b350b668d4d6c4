// report-assembly-service/src/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    Text,
    Kml,
    Image,
    Select,
    Date,
    Calculated,
}

/// Declared on-page size of an embedded picture, in EMUs (914400 per inch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageExtent {
    pub cx: u64,
    pub cy: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub id: String,
    /// Unique key within the template; appears as `{{name}}` once tokenized.
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: VariableType,
    #[serde(default)]
    pub description: Option<String>,
    /// Original phrase in the uploaded document, used to locate the insertion
    /// point at tokenize time (and as the image anchor text).
    #[serde(default)]
    pub source_text: Option<String>,
    #[serde(default)]
    pub kml_field: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub expression: Option<String>,
    /// Relationship id of the picture this variable replaces, if any.
    #[serde(default)]
    pub image_rel_id: Option<String>,
    /// Media part path, e.g. `word/media/image3.png`.
    #[serde(default)]
    pub image_target: Option<String>,
    #[serde(default)]
    pub image_extent: Option<ImageExtent>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub is_required: bool,
    /// Set after import verification found `{{name}}` in the package text.
    #[serde(default)]
    pub tokenized: bool,
}

impl Variable {
    pub fn new(name: &str, var_type: VariableType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            var_type,
            description: None,
            source_text: None,
            kml_field: None,
            options: Vec::new(),
            expression: None,
            image_rel_id: None,
            image_target: None,
            image_extent: None,
            group_id: None,
            is_required: false,
            tokenized: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requires_kml: bool,
    /// Tokenized source package; fixed at import, never mutated afterwards.
    #[serde(default)]
    pub source_docx_path: Option<PathBuf>,
    /// Cached unfilled PDF preview for quick first-stage display.
    #[serde(default)]
    pub preview_pdf_path: Option<PathBuf>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub variable_groups: Vec<VariableGroup>,
    pub created_by: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Template {
    pub fn new(name: &str, created_by: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: String::new(),
            requires_kml: false,
            source_docx_path: None,
            preview_pdf_path: None,
            variables: Vec::new(),
            variable_groups: Vec::new(),
            created_by: created_by.to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Report status workflow: strictly forward, one step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    Draft,
    #[serde(rename = "Initial Review")]
    InitialReview,
    #[serde(rename = "Final Review")]
    FinalReview,
    Submitted,
}

impl ReportStatus {
    pub const FLOW: [ReportStatus; 4] = [
        ReportStatus::Draft,
        ReportStatus::InitialReview,
        ReportStatus::FinalReview,
        ReportStatus::Submitted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Draft => "Draft",
            ReportStatus::InitialReview => "Initial Review",
            ReportStatus::FinalReview => "Final Review",
            ReportStatus::Submitted => "Submitted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::FLOW.iter().copied().find(|st| st.as_str() == s)
    }

    fn index(&self) -> usize {
        Self::FLOW.iter().position(|st| st == self).unwrap_or(0)
    }

    /// Same status is a no-op; otherwise only an advance of exactly one step
    /// through the flow is allowed.
    pub fn can_transition_to(&self, next: ReportStatus) -> bool {
        if *self == next {
            return true;
        }
        next.index() == self.index() + 1
    }

    pub fn validate_transition(&self, next: &str) -> Result<ReportStatus> {
        let parsed = ReportStatus::parse(next).ok_or_else(|| {
            EngineError::InvalidStatusTransition {
                from: self.as_str().to_string(),
                to: next.to_string(),
            }
        })?;
        if !self.can_transition_to(parsed) {
            return Err(EngineError::InvalidStatusTransition {
                from: self.as_str().to_string(),
                to: next.to_string(),
            });
        }
        Ok(parsed)
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppendixKind {
    Image,
    Pdf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendixItem {
    pub id: String,
    pub kind: AppendixKind,
    #[serde(default)]
    pub original_name: String,
    pub original_path: PathBuf,
    #[serde(default)]
    pub thumb_path: Option<PathBuf>,
    /// One raster image per page for PDFs; empty for plain images.
    #[serde(default)]
    pub page_images: Vec<PathBuf>,
    #[serde(default)]
    pub page_count: usize,
    #[serde(default)]
    pub order: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub template_id: String,
    /// Snapshot of the template name at creation; later renames don't follow.
    #[serde(default)]
    pub template_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    pub status: ReportStatus,
    /// Raw value map: variable name -> string, ISO date, image reference, or
    /// nested KML object under the `kmlData` key.
    #[serde(default)]
    pub values: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub kml_data: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub appendix_items: Vec<AppendixItem>,
    pub created_by: String,
    #[serde(default)]
    pub last_generated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Report {
    pub fn new(template: &Template, created_by: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            template_id: template.id.clone(),
            template_name: template.name.clone(),
            name: String::new(),
            title: String::new(),
            status: ReportStatus::Draft,
            values: serde_json::Map::new(),
            kml_data: None,
            appendix_items: Vec::new(),
            created_by: created_by.to_string(),
            last_generated_at: None,
            is_archived: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Pull kml payload values into the stored value map: each kml variable
    /// with a matching payload key gets the stringified value written under
    /// the variable's name (and its declared field name, when different).
    pub fn merge_kml(&mut self, variables: &[Variable]) {
        let Some(kml) = self.kml_data.clone() else {
            return;
        };
        for var in variables.iter().filter(|v| v.var_type == VariableType::Kml) {
            let field = var.kml_field.as_deref().unwrap_or(&var.name);
            let Some(raw) = kml.get(field).or_else(|| kml.get(&var.name)) else {
                continue;
            };
            let text = match raw {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            self.values
                .insert(var.name.clone(), serde_json::Value::String(text.clone()));
            if field != var.name {
                self.values
                    .insert(field.to_string(), serde_json::Value::String(text));
            }
        }
    }

    /// Downloads are gated to late-stage reports.
    pub fn may_download(&self) -> bool {
        matches!(
            self.status,
            ReportStatus::FinalReview | ReportStatus::Submitted
        )
    }
}

/// Recorded once per successful generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationStat {
    pub id: String,
    pub template_id: String,
    #[serde(default)]
    pub report_id: Option<String>,
    pub format: String,
    pub file_name: String,
    pub size_bytes: u64,
    pub sha256_checksum: String,
    pub duration_ms: u64,
    pub generated_at: DateTime<Utc>,
}

// report-assembly-service/src/render/mod.rs
//
// Turns a tokenized package plus a report's value map into a filled document:
// value resolution (kml aliasing, calculated expressions, date normalization)
// followed by token substitution across every text part.

pub mod expr;

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use regex::Regex;
use serde_json::Map;
use tracing::{debug, warn};

use crate::docx::{Package, TextRunIndex};
use crate::error::{EngineError, Result};
use crate::models::{Variable, VariableType};

const DATE_FORMAT: &str = "%b %d, %Y";

/// A variable's final rendered value; `None` means "leave a `[name]` marker".
pub type ResolvedValues = Map<String, serde_json::Value>;

/// Resolve the values that token substitution will draw from.
///
/// Starts from the report's stored values and then, per declared variable:
/// kml variables are filled from the kml payload (preferring the declared
/// `kml_field` key, falling back to the variable name, and aliasing the result
/// under both keys); calculated variables are evaluated, with any evaluation
/// error degrading to an empty value; date variables are reformatted; image
/// variables are blanked so the text pass never inlines raw image data.
/// Empty strings are dropped entirely so their tokens fall back to `[name]`.
pub fn resolve_values(
    variables: &[Variable],
    stored: &Map<String, serde_json::Value>,
    kml_data: &Map<String, serde_json::Value>,
) -> ResolvedValues {
    let mut resolved = stored.clone();

    for var in variables.iter().filter(|v| v.var_type == VariableType::Kml) {
        let field = var.kml_field.as_deref().unwrap_or(&var.name);
        let value = kml_data
            .get(field)
            .or_else(|| kml_data.get(&var.name))
            .map(stringify)
            .or_else(|| resolved.get(field).map(stringify))
            .or_else(|| resolved.get(&var.name).map(stringify));
        if let Some(value) = value {
            resolved.insert(var.name.clone(), value.clone().into());
            if field != var.name {
                resolved.insert(field.to_string(), value.into());
            }
        }
    }

    for var in variables {
        match var.var_type {
            VariableType::Calculated => {
                let Some(expression) = var.expression.as_deref() else {
                    continue;
                };
                match expr::evaluate(expression, &resolved) {
                    Ok(value) => {
                        resolved.insert(var.name.clone(), value.into());
                    }
                    Err(err) => {
                        warn!(variable = %var.name, %err, "calculated value failed, leaving empty");
                        resolved.insert(var.name.clone(), String::new().into());
                    }
                }
            }
            VariableType::Date => {
                if let Some(serde_json::Value::String(raw)) = resolved.get(&var.name) {
                    let formatted = format_report_date(raw);
                    resolved.insert(var.name.clone(), formatted.into());
                }
            }
            VariableType::Image => {
                resolved.remove(&var.name);
            }
            _ => {}
        }
    }

    resolved.retain(|_, v| !matches!(v, serde_json::Value::Null));
    resolved.retain(|_, v| !matches!(v, serde_json::Value::String(s) if s.trim().is_empty()));
    resolved
}

fn stringify(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Normalize a date value to `Mon DD, YYYY`.
///
/// Plain ISO dates (`YYYY-MM-DD`) are treated as calendar dates in UTC so the
/// printed day never shifts with the server's zone; timestamped inputs are
/// rendered in local time; anything unparseable passes through untouched.
pub fn format_report_date(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        let at_midnight = date.and_hms_opt(0, 0, 0).expect("midnight exists");
        return Utc
            .from_utc_datetime(&at_midnight)
            .format(DATE_FORMAT)
            .to_string();
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return ts.with_timezone(&Local).format(DATE_FORMAT).to_string();
    }
    if let Ok(ts) = DateTime::parse_from_rfc2822(trimmed) {
        return ts.with_timezone(&Local).format(DATE_FORMAT).to_string();
    }
    raw.to_string()
}

/// Substitute every `{{name}}` token in the package's text parts.
///
/// Tokens with a resolved value get that value; tokens without one are
/// rewritten to a visible `[name]` marker so reviewers can spot gaps in the
/// output instead of shipping raw template syntax. Each literal spelling found
/// in the text is replaced on its own, so case variants of the same name all
/// disappear from the output.
pub fn render_package(package: &mut Package, values: &ResolvedValues) -> Result<()> {
    let token_re = Regex::new(r"(?s)\{\{\s*(.*?)\s*\}\}").expect("static regex");
    for part in package.text_part_names() {
        let Some(xml) = package.read_text(&part) else {
            continue;
        };
        let mut index = TextRunIndex::parse(&xml).map_err(|e| render_failed(&part, e))?;
        index.normalize_token_whitespace();
        let text = index.text();
        let mut touched = false;
        let mut done: Vec<String> = Vec::new();
        for cap in token_re.captures_iter(&text) {
            let literal = cap[0].to_string();
            let name = cap[1].trim();
            if name.is_empty() || done.contains(&literal) {
                continue;
            }
            let replacement = match lookup(values, name) {
                Some(value) => value,
                None => format!("[{name}]"),
            };
            let hits = index.replace_all(&literal, &replacement, 1000);
            if hits > 0 {
                debug!(token = %name, part = %part, hits, "token replaced");
                touched = true;
            }
            done.push(literal);
        }
        if touched {
            let xml = index.to_xml().map_err(|e| render_failed(&part, e))?;
            package.write_text(&part, xml);
        }
    }
    Ok(())
}

fn render_failed(part: &str, err: EngineError) -> EngineError {
    EngineError::RenderFailed(format!("text part {part}: {err}"))
}

/// Exact key first, then a case-insensitive scan, so a token's spelling need
/// not match the stored value's key exactly.
fn lookup(values: &ResolvedValues, name: &str) -> Option<String> {
    if let Some(v) = values.get(name) {
        return Some(stringify(v));
    }
    let folded = name.to_lowercase();
    values
        .iter()
        .find(|(k, _)| k.to_lowercase() == folded)
        .map(|(_, v)| stringify(v))
}

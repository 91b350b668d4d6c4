// report-assembly-service/src/docx/tokenizer.rs

use regex::Regex;
use tracing::{debug, warn};

use crate::docx::package::Package;
use crate::docx::textrun::TextRunIndex;
use crate::error::Result;
use crate::models::Variable;

/// Passes over the needle per variable when converting source text to tokens.
/// Bounds the loop when a variable's name still contains its own source text.
pub const REPLACE_PASS_CAP: u32 = 50;

fn token_pattern() -> Regex {
    Regex::new(r"(?s)\{\{\s*(.*?)\s*\}\}").expect("static regex")
}

fn tag_pattern() -> Regex {
    Regex::new(r"<[^>]*>").expect("static regex")
}

/// Scan every text part for `{{name}}` tokens and return the distinct names
/// in order of first appearance.
///
/// The scan runs over the raw XML so tokens broken across `<w:t>` fragments
/// by intervening markup are still found; embedded tags are stripped and
/// standard entities decoded before comparison. Deduplication is
/// case-insensitive, keeping the first-seen spelling.
pub fn analyze_tokens(package: &Package) -> Vec<String> {
    let token_re = token_pattern();
    let tag_re = tag_pattern();
    let mut seen = Vec::<String>::new();
    let mut names = Vec::new();
    for part in package.text_part_names() {
        let Some(xml) = package.read_text(&part) else {
            continue;
        };
        for cap in token_re.captures_iter(&xml) {
            let raw = &cap[1];
            let name = decode_entities(&tag_re.replace_all(raw, ""));
            let name = name.trim().to_string();
            if name.is_empty() {
                continue;
            }
            let folded = name.to_lowercase();
            if !seen.contains(&folded) {
                seen.push(folded);
                names.push(name);
            }
        }
    }
    names
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#160;", " ")
        .replace('\u{a0}', " ")
        .replace("&amp;", "&")
}

/// True when any text part still carries the given literal text.
pub fn contains_source_text(package: &Package, needle: &str) -> Result<bool> {
    if needle.trim().is_empty() {
        return Ok(false);
    }
    for part in package.text_part_names() {
        let Some(xml) = package.read_text(&part) else {
            continue;
        };
        if TextRunIndex::parse(&xml)?.contains(needle) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Replace each variable's source text with its `{{name}}` token across all
/// text parts, then verify each variable's token against the final text.
///
/// Returns the number of parts rewritten. The `tokenized` flag is set by
/// re-scanning for the literal `{{name}}`, so an upload that already carries
/// the token verbatim counts even when no replacement happened; a variable
/// whose token appears nowhere is left untokenized rather than failing the
/// whole pass.
pub fn tokenize_template(package: &mut Package, variables: &mut [Variable]) -> Result<usize> {
    let mut rewritten = 0;
    for part in package.text_part_names() {
        let Some(xml) = package.read_text(&part) else {
            continue;
        };
        let mut index = TextRunIndex::parse(&xml)?;
        let mut touched = false;
        for var in variables.iter_mut() {
            let Some(source) = var.source_text.as_deref() else {
                continue;
            };
            if source.trim().is_empty() {
                continue;
            }
            let token = format!("{{{{{}}}}}", var.name);
            let hits = index.replace_all(source, &token, REPLACE_PASS_CAP);
            if hits > 0 {
                debug!(variable = %var.name, part = %part, hits, "tokenized source text");
                var.tokenized = true;
                touched = true;
            }
        }
        if touched {
            index.normalize_token_whitespace();
            package.write_text(&part, index.to_xml()?);
            rewritten += 1;
        }
    }
    for var in variables.iter_mut() {
        if !var.tokenized {
            let token = format!("{{{{{}}}}}", var.name);
            var.tokenized = contains_source_text(package, &token)?;
        }
    }
    for var in variables.iter().filter(|v| !v.tokenized) {
        if var.source_text.as_deref().is_some_and(|s| !s.trim().is_empty()) {
            warn!(variable = %var.name, "source text not found in any text part");
        }
    }
    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::package::test_package;
    use crate::models::{Variable, VariableType};

    fn package_with_document(body: &str) -> Package {
        let xml = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
             <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
             <w:body>{body}</w:body></w:document>"
        );
        test_package(&[("word/document.xml", xml.as_bytes())])
    }

    fn var(name: &str, var_type: VariableType, source: &str) -> Variable {
        let mut v = Variable::new(name, var_type);
        v.source_text = Some(source.to_string());
        v
    }

    #[test]
    fn finds_tokens_split_by_markup() {
        let pkg = package_with_document(
            "<w:p><w:r><w:t>{{client</w:t></w:r><w:r><w:t>Name}}</w:t></w:r></w:p>\
             <w:p><w:r><w:t>{{ inspectionDate }}</w:t></w:r></w:p>",
        );
        assert_eq!(analyze_tokens(&pkg), vec!["clientName", "inspectionDate"]);
    }

    #[test]
    fn dedupes_case_insensitively_keeping_first_spelling() {
        let pkg = package_with_document(
            "<w:p><w:r><w:t>{{Owner}} and {{owner}} and {{OWNER}}</w:t></w:r></w:p>",
        );
        assert_eq!(analyze_tokens(&pkg), vec!["Owner"]);
    }

    #[test]
    fn decodes_entities_in_token_names() {
        let pkg =
            package_with_document("<w:p><w:r><w:t>{{name&amp;suffix}}</w:t></w:r></w:p>");
        assert_eq!(analyze_tokens(&pkg), vec!["name&suffix"]);
    }

    #[test]
    fn tokenize_rewrites_matching_parts_and_flags_variables() {
        let mut pkg = package_with_document(
            "<w:p><w:r><w:t>Report for ACME Ltd prepared today</w:t></w:r></w:p>",
        );
        let mut vars = vec![
            var("clientName", VariableType::Text, "ACME Ltd"),
            var("missing", VariableType::Text, "not in the doc"),
        ];
        let rewritten = tokenize_template(&mut pkg, &mut vars).unwrap();
        assert_eq!(rewritten, 1);
        assert!(vars[0].tokenized);
        assert!(!vars[1].tokenized);
        assert_eq!(analyze_tokens(&pkg), vec!["clientName"]);
        assert!(!contains_source_text(&pkg, "ACME Ltd").unwrap());
    }

    #[test]
    fn pre_tokenized_upload_verifies_without_source_text() {
        let mut pkg =
            package_with_document("<w:p><w:r><w:t>For {{clientName}}</w:t></w:r></w:p>");
        let mut vars = vec![Variable::new("clientName", VariableType::Text)];
        let rewritten = tokenize_template(&mut pkg, &mut vars).unwrap();
        assert_eq!(rewritten, 0);
        assert!(vars[0].tokenized);
    }

    #[test]
    fn tokenize_survives_name_containing_source_text() {
        let mut pkg =
            package_with_document("<w:p><w:r><w:t>Signed on Date line</w:t></w:r></w:p>");
        let mut vars = vec![var("Date", VariableType::Date, "Date")];
        tokenize_template(&mut pkg, &mut vars).unwrap();
        assert!(vars[0].tokenized);
    }

    #[test]
    fn blank_source_text_is_ignored() {
        let pkg = package_with_document("<w:p><w:r><w:t>anything</w:t></w:r></w:p>");
        assert!(!contains_source_text(&pkg, "   ").unwrap());
    }
}

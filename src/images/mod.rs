// report-assembly-service/src/images/mod.rs
//
// Image slots: resolving user-provided image values to bytes or files,
// cover-fit substitution into package media parts, and the srcRect cropping
// that keeps Word from squashing the picture back to the frame's aspect.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use regex::Regex;
use reqwest::Client;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::docx::Package;
use crate::error::Result;
use crate::models::{ImageExtent, Variable};

pub const EMU_PER_INCH: u64 = 914_400;
const RENDER_DPI: u64 = 96;
const UPLOADS_PREFIX: &str = "/uploads/images/";

/// Crop rectangle in 100 000ths of the image dimension, as `<a:srcRect>`
/// expects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrcRect {
    pub l: u32,
    pub t: u32,
    pub r: u32,
    pub b: u32,
}

pub fn extent_to_pixels(extent: ImageExtent) -> (u32, u32) {
    let px = |emu: u64| ((emu * RENDER_DPI + EMU_PER_INCH / 2) / EMU_PER_INCH).max(1) as u32;
    (px(extent.cx), px(extent.cy))
}

/// Encoding format matching the media part's extension, so Word keeps
/// accepting the part. Unknown formats (EMF, WMF, TIFF) are re-encoded as PNG.
pub fn target_format(target: &str) -> ImageFormat {
    let ext = Path::new(target)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => ImageFormat::Jpeg,
        "png" => ImageFormat::Png,
        "webp" => ImageFormat::WebP,
        _ => ImageFormat::Png,
    }
}

fn relationship_pattern() -> Regex {
    Regex::new(r#"<Relationship[^>]*Id="([^"]+)"[^>]*Target="([^"]+)""#).expect("static regex")
}

fn blip_pattern(rid: &str) -> Regex {
    Regex::new(&format!(
        r#"<a:blip[^>]*r:(?:embed|link)="{}"[^>]*/>"#,
        regex::escape(rid)
    ))
    .expect("escaped rid regex")
}

fn resolve_rel_target(target: &str) -> String {
    let t = target.trim_start_matches("../");
    if t.starts_with("word/") {
        t.to_string()
    } else {
        format!("word/{t}")
    }
}

/// Relationship ids in `part`'s rels file whose target is the given media part.
fn rids_for_target(package: &Package, part: &str, target: &str) -> Vec<String> {
    let base = part.rsplit('/').next().unwrap_or(part);
    let rels_part = format!("word/_rels/{base}.rels");
    let Some(rels_xml) = package.read_text(&rels_part) else {
        return Vec::new();
    };
    relationship_pattern()
        .captures_iter(&rels_xml)
        .filter(|cap| resolve_rel_target(&cap[2]) == target)
        .map(|cap| cap[1].to_string())
        .collect()
}

/// Find the declared on-page extent of the picture backed by a media part.
///
/// Walks each text part's relationships to the part's rId, locates the
/// `<a:blip>` referencing it, and scans a window around it for the drawing's
/// `<wp:extent>`.
pub fn find_extent_for_target(package: &Package, target: &str) -> Option<ImageExtent> {
    let extent_re =
        Regex::new(r#"(?i)<wp:extent[^>]*cx="([0-9]+)"[^>]*cy="([0-9]+)""#).expect("static regex");
    for part in package.text_part_names() {
        let Some(xml) = package.read_text(&part) else {
            continue;
        };
        for rid in rids_for_target(package, &part, target) {
            for blip in blip_pattern(&rid).find_iter(&xml) {
                let window = window_around(&xml, blip.start(), blip.end(), 1500);
                if let Some(cap) = extent_re.captures(window) {
                    let cx = cap[1].parse().unwrap_or(0);
                    let cy = cap[2].parse().unwrap_or(0);
                    if cx > 0 && cy > 0 {
                        return Some(ImageExtent { cx, cy });
                    }
                }
            }
        }
    }
    None
}

fn window_around(xml: &str, start: usize, end: usize, radius: usize) -> &str {
    let mut lo = start.saturating_sub(radius);
    while lo > 0 && !xml.is_char_boundary(lo) {
        lo -= 1;
    }
    let mut hi = (end + radius).min(xml.len());
    while hi < xml.len() && !xml.is_char_boundary(hi) {
        hi += 1;
    }
    &xml[lo..hi]
}

/// Symmetric crop that makes an image of `img_w`×`img_h` cover a frame of
/// `frame_w`×`frame_h` without distortion. `None` when nothing needs cropping
/// or a dimension is zero.
pub fn compute_src_rect_cover(
    frame_w: u32,
    frame_h: u32,
    img_w: u32,
    img_h: u32,
) -> Option<SrcRect> {
    if frame_w == 0 || frame_h == 0 || img_w == 0 || img_h == 0 {
        return None;
    }
    let frame_ar = f64::from(frame_w) / f64::from(frame_h);
    let img_ar = f64::from(img_w) / f64::from(img_h);
    let to_pct = |v: f64| (v.clamp(0.0, 1.0) * 100_000.0).round() as u32;
    let mut rect = SrcRect { l: 0, t: 0, r: 0, b: 0 };
    if img_ar > frame_ar {
        let target_w = frame_ar * f64::from(img_h);
        let side = (f64::from(img_w) - target_w) / f64::from(img_w) / 2.0;
        rect.l = to_pct(side);
        rect.r = rect.l;
    } else if img_ar < frame_ar {
        let target_h = f64::from(img_w) / frame_ar;
        let side = (f64::from(img_h) - target_h) / f64::from(img_h) / 2.0;
        rect.t = to_pct(side);
        rect.b = rect.t;
    }
    Some(rect)
}

/// Inject `<a:srcRect>` into the blipFill referencing `rid`, removing any
/// existing stretch/srcRect so the crop is authoritative. Returns `None` when
/// the rid's blip or its enclosing blipFill cannot be located.
fn apply_src_rect_for_rid(xml: &str, rid: &str, rect: SrcRect) -> Option<String> {
    let blip = blip_pattern(rid).find(xml)?;
    let open_re = Regex::new(r"<([A-Za-z0-9]+:)?blipFill[^>]*>").expect("static regex");
    let open = open_re
        .find_iter(xml)
        .take_while(|m| m.end() <= blip.end())
        .last()?;
    let prefix = open_re
        .captures(open.as_str())
        .and_then(|c| c.get(1).map(|p| p.as_str().to_string()))
        .unwrap_or_default();
    let close_tag = format!("</{prefix}blipFill>");
    let close_idx = xml[blip.end()..].find(&close_tag)? + blip.end();
    let block = &xml[open.start()..close_idx + close_tag.len()];

    let stretch_re = Regex::new(r"(?s)<a:stretch>.*?</a:stretch>").expect("static regex");
    let src_rect_re = Regex::new(r"<a:srcRect[^>]*/>").expect("static regex");
    let without_stretch = stretch_re.replace_all(block, "").into_owned();
    let cleaned = src_rect_re.replace_all(&without_stretch, "");
    let insert = format!(
        r#"<a:srcRect l="{}" t="{}" r="{}" b="{}"/>"#,
        rect.l, rect.t, rect.r, rect.b
    );
    let new_block = cleaned.replace(&close_tag, &format!("{insert}{close_tag}"));
    Some(format!(
        "{}{}{}",
        &xml[..open.start()],
        new_block,
        &xml[close_idx + close_tag.len()..]
    ))
}

/// Apply cover cropping for every drawing that references `target`.
pub fn apply_cover_cropping(
    package: &mut Package,
    target: &str,
    img_w: u32,
    img_h: u32,
    frame_w: u32,
    frame_h: u32,
) {
    let Some(rect) = compute_src_rect_cover(frame_w, frame_h, img_w, img_h) else {
        return;
    };
    for part in package.text_part_names() {
        let Some(mut xml) = package.read_text(&part) else {
            continue;
        };
        let mut touched = false;
        for rid in rids_for_target(package, &part, target) {
            if let Some(next) = apply_src_rect_for_rid(&xml, &rid, rect) {
                xml = next;
                touched = true;
            }
        }
        if touched {
            package.write_text(&part, xml);
        }
    }
}

/// Replace the media part behind an image variable with the provided bytes,
/// cover-fit to the declared extent when one is known.
///
/// Any decoding or encoding failure skips the slot; a broken photo must not
/// sink the whole document.
pub fn substitute_media(package: &mut Package, var: &Variable, bytes: &[u8]) {
    let Some(target) = var
        .image_target
        .as_deref()
        .filter(|t| t.starts_with("word/"))
        .map(str::to_string)
        .or_else(|| package.media_part_names().into_iter().next())
    else {
        warn!(variable = %var.name, "no media part to substitute");
        return;
    };
    let format = target_format(&target);
    let img = match image::load_from_memory(bytes) {
        Ok(img) => img,
        Err(err) => {
            warn!(variable = %var.name, %err, "image value could not be decoded, slot skipped");
            return;
        }
    };
    let extent = var
        .image_extent
        .or_else(|| find_extent_for_target(package, &target));
    let final_img = match extent {
        Some(extent) => {
            let (px_w, px_h) = extent_to_pixels(extent);
            let resized = img.resize_to_fill(px_w, px_h, FilterType::Lanczos3);
            apply_cover_cropping(package, &target, img.width(), img.height(), px_w, px_h);
            resized
        }
        None => img,
    };
    match encode(&final_img, format) {
        Ok(encoded) => {
            debug!(variable = %var.name, target = %target, bytes = encoded.len(), "media part replaced");
            package.write(&target, encoded);
        }
        Err(err) => warn!(variable = %var.name, %err, "image re-encode failed, slot skipped"),
    }
}

fn encode(img: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    match format {
        // JPEG has no alpha channel
        ImageFormat::Jpeg => img.to_rgb8().write_to(&mut out, format)?,
        _ => img.write_to(&mut out, format)?,
    }
    Ok(out.into_inner())
}

/// JPEG thumbnail fit inside `max`×`max`, quality 80.
pub fn make_thumbnail(bytes: &[u8], max: u32) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes)?;
    let small = img.resize(max, max, FilterType::Lanczos3).to_rgb8();
    let mut out = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut out, 80);
    small.write_with_encoder(encoder)?;
    Ok(out.into_inner())
}

/// Resolve an image value (data URL, `/uploads/images/…` path, local file
/// path, or http(s) URL) to raw bytes. Any failure yields `None`.
pub async fn resolve_bytes(
    provided: &str,
    storage: &StorageConfig,
    http: &Client,
) -> Option<Vec<u8>> {
    let provided = provided.trim();
    if provided.is_empty() {
        return None;
    }
    if let Some(rest) = provided.strip_prefix("data:") {
        let b64 = rest.split_once(',').map(|(_, b)| b)?;
        return BASE64.decode(b64).ok();
    }
    if let Some(local) = uploads_path(provided, storage) {
        return tokio::fs::read(local).await.ok();
    }
    if provided.starts_with("http://") || provided.starts_with("https://") {
        let resp = http.get(provided).send().await.ok()?.error_for_status().ok()?;
        return resp.bytes().await.ok().map(|b| b.to_vec());
    }
    let as_path = Path::new(provided);
    if as_path.is_file() {
        return tokio::fs::read(as_path).await.ok();
    }
    None
}

/// Like [`resolve_bytes`] but materializes a local file for macro insertion.
///
/// Existing local paths are used as-is; everything else is normalized to a
/// PNG written under the images dir with a `macro-` prefix so the caller can
/// recognize and delete it afterwards.
pub async fn resolve_file(
    provided: &str,
    storage: &StorageConfig,
    http: &Client,
) -> Option<PathBuf> {
    let provided = provided.trim();
    if provided.is_empty() {
        return None;
    }
    let as_path = Path::new(provided);
    if as_path.is_file() {
        return Some(as_path.to_path_buf());
    }
    if let Some(local) = uploads_path(provided, storage) {
        if local.is_file() {
            return Some(local);
        }
        return None;
    }
    let bytes = resolve_bytes(provided, storage, http).await?;
    let img = image::load_from_memory(&bytes).ok()?;
    let out = storage
        .images_dir
        .join(format!("macro-{}.png", Uuid::new_v4()));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).ok()?;
    tokio::fs::write(&out, buf.into_inner()).await.ok()?;
    Some(out)
}

/// True for macro scratch files created by [`resolve_file`].
pub fn is_macro_scratch(path: &Path, storage: &StorageConfig) -> bool {
    path.starts_with(&storage.images_dir)
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("macro-"))
}

fn uploads_path(provided: &str, storage: &StorageConfig) -> Option<PathBuf> {
    let name = provided
        .strip_prefix(UPLOADS_PREFIX)
        .or_else(|| provided.strip_prefix("uploads/images/"))?;
    // A traversal component would escape the images dir.
    if name.is_empty() || name.contains('/') || name.contains("..") {
        return None;
    }
    Some(storage.images_dir.join(name))
}

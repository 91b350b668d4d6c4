// report-assembly-service/src/docx/package.rs

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::Result;

/// An OOXML package: a ZIP container holding named XML and media parts.
///
/// The whole archive is materialized into memory on open; parts keep their raw
/// bytes so binary media survives a read-modify-write cycle untouched. Nothing
/// reaches disk until [`Package::to_bytes`] / [`Package::save`].
pub struct Package {
    /// Part names in original archive order.
    names: Vec<String>,
    parts: HashMap<String, Vec<u8>>,
}

impl Package {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut names = Vec::with_capacity(archive.len());
        let mut parts = HashMap::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut buf = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut buf)?;
            names.push(name.clone());
            parts.insert(name, buf);
        }
        Ok(Self { names, parts })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn read_bytes(&self, part: &str) -> Option<&[u8]> {
        self.parts.get(part).map(|b| b.as_slice())
    }

    /// Decode a part as UTF-8 text; `None` when the part is missing or binary.
    pub fn read_text(&self, part: &str) -> Option<String> {
        self.parts
            .get(part)
            .and_then(|b| String::from_utf8(b.clone()).ok())
    }

    /// Replace a part in place, appending it when new.
    pub fn write(&mut self, part: &str, bytes: Vec<u8>) {
        if !self.parts.contains_key(part) {
            self.names.push(part.to_string());
        }
        self.parts.insert(part.to_string(), bytes);
    }

    pub fn write_text(&mut self, part: &str, text: String) {
        self.write(part, text.into_bytes());
    }

    pub fn contains(&self, part: &str) -> bool {
        self.parts.contains_key(part)
    }

    pub fn part_names(&self, prefix: &str) -> Vec<String> {
        self.names
            .iter()
            .filter(|n| n.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Text-bearing document parts: `word/*.xml` excluding relationship files.
    pub fn text_part_names(&self) -> Vec<String> {
        self.names
            .iter()
            .filter(|n| n.starts_with("word/") && n.ends_with(".xml") && !n.contains("/_rels/"))
            .cloned()
            .collect()
    }

    pub fn media_part_names(&self) -> Vec<String> {
        self.part_names("word/media/")
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for name in &self.names {
            writer.start_file(name.as_str(), options)?;
            writer.write_all(&self.parts[name])?;
        }
        let cursor = writer.finish()?;
        Ok(cursor.into_inner())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
}

/// Builds an in-memory package from raw parts. Test scaffolding shared by
/// the docx modules.
#[cfg(test)]
pub(crate) fn test_package(parts: &[(&str, &[u8])]) -> Package {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, body) in parts {
        writer.start_file(*name, options).unwrap();
        writer.write_all(body).unwrap();
    }
    let bytes = writer.finish().unwrap().into_inner();
    Package::from_bytes(&bytes).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Package {
        test_package(&[
            ("[Content_Types].xml", "<Types/>".as_bytes()),
            ("word/document.xml", "<w:document/>".as_bytes()),
            ("word/_rels/document.xml.rels", "<Relationships/>".as_bytes()),
            ("word/media/image1.png", &[0x89u8, 0x50, 0x4e, 0x47][..]),
        ])
    }

    #[test]
    fn read_write_roundtrip_preserves_parts() {
        let mut pkg = sample();
        pkg.write_text("word/document.xml", "<w:document>x</w:document>".into());
        let reloaded = Package::from_bytes(&pkg.to_bytes().unwrap()).unwrap();
        assert_eq!(
            reloaded.read_text("word/document.xml").unwrap(),
            "<w:document>x</w:document>"
        );
        // Binary media untouched
        assert_eq!(
            reloaded.read_bytes("word/media/image1.png").unwrap(),
            &[0x89, 0x50, 0x4e, 0x47]
        );
    }

    #[test]
    fn text_parts_exclude_rels() {
        let pkg = sample();
        let parts = pkg.text_part_names();
        assert_eq!(parts, vec!["word/document.xml".to_string()]);
        assert_eq!(pkg.media_part_names(), vec!["word/media/image1.png"]);
    }

    #[test]
    fn corrupt_archive_is_an_error() {
        assert!(Package::from_bytes(b"definitely not a zip").is_err());
    }

    #[test]
    fn read_text_on_binary_part_is_none() {
        let mut pkg = sample();
        pkg.write("word/media/image1.png", vec![0xff, 0xfe, 0x00, 0x80]);
        assert!(pkg.read_text("word/media/image1.png").is_none());
    }
}

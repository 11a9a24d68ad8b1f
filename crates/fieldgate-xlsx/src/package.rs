use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::zip_util::{canonical_part_name, InflateGuard};

/// Maximum allowed *uncompressed* size for a single package part.
pub const MAX_PACKAGE_PART_BYTES: u64 = 256 * 1024 * 1024; // 256 MiB

/// Maximum allowed *inflated* bytes across all parts of a package.
pub const MAX_PACKAGE_TOTAL_BYTES: u64 = 512 * 1024 * 1024; // 512 MiB

#[derive(Debug, Error)]
pub enum XlsxError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("xml attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    #[error("xml decode error: {0}")]
    Deserialize(#[from] quick_xml::DeError),
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("utf-8 error: {0}")]
    FromUtf8(#[from] std::string::FromUtf8Error),
    #[error("missing xlsx part: {0}")]
    MissingPart(String),
    #[error("workbook has no sheet named {0:?}")]
    MissingSheet(String),
    #[error("invalid xlsx: {0}")]
    Invalid(String),
    #[error("xlsx package part is too large to load safely: {part} is {size} bytes (max {max} bytes)")]
    PartTooLarge { part: String, size: u64, max: u64 },
    #[error("xlsx package is too large to load safely: {total} bytes uncompressed (max {max})")]
    PackageTooLarge { total: u64, max: u64 },
}

/// Size limits enforced while inflating a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageLimits {
    /// Maximum allowed uncompressed bytes for any single part.
    pub max_part_bytes: u64,
    /// Maximum allowed uncompressed bytes across the whole package.
    pub max_total_bytes: u64,
}

impl Default for PackageLimits {
    fn default() -> Self {
        Self {
            max_part_bytes: MAX_PACKAGE_PART_BYTES,
            max_total_bytes: MAX_PACKAGE_TOTAL_BYTES,
        }
    }
}

/// In-memory XLSX package: a map of part name to bytes.
///
/// Parts that are never touched are written back byte-for-byte.
#[derive(Debug, Clone, Default)]
pub struct XlsxPackage {
    parts: BTreeMap<String, Vec<u8>>,
}

impl XlsxPackage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, XlsxError> {
        Self::from_bytes_limited(bytes, PackageLimits::default())
    }

    pub fn from_bytes_limited(bytes: &[u8], limits: PackageLimits) -> Result<Self, XlsxError> {
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes))?;

        let mut parts = BTreeMap::new();
        let mut guard = InflateGuard::new(limits);
        for i in 0..zip.len() {
            let mut file = zip.by_index(i)?;
            if !file.is_file() {
                continue;
            }

            let name = file.name().to_string();
            let declared = file.size();
            let buf = guard.read(&mut file, declared, &name)?;
            parts.insert(name, buf);
        }

        log::debug!("loaded xlsx package with {} parts", parts.len());
        Ok(Self { parts })
    }

    /// Read the whole file into memory and close it before parsing.
    pub fn open(path: impl AsRef<Path>, limits: PackageLimits) -> Result<Self, XlsxError> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::from_bytes_limited(&bytes, limits)
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        if let Some(bytes) = self.parts.get(name) {
            return Some(bytes.as_slice());
        }
        let wanted = canonical_part_name(name);
        self.parts
            .iter()
            .find(|(key, _)| canonical_part_name(key) == wanted)
            .map(|(_, bytes)| bytes.as_slice())
    }

    /// Like [`XlsxPackage::part`], but missing parts and invalid UTF-8 are errors.
    pub fn part_str(&self, name: &str) -> Result<&str, XlsxError> {
        let bytes = self
            .part(name)
            .ok_or_else(|| XlsxError::MissingPart(name.to_string()))?;
        Ok(std::str::from_utf8(bytes)?)
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.keys().map(String::as_str)
    }

    /// Replace a part, reusing the stored spelling of its name when an equivalent one exists.
    pub fn set_part(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        let name = name.into();
        let wanted = canonical_part_name(&name);
        let key = self
            .parts
            .keys()
            .find(|key| canonical_part_name(key) == wanted)
            .cloned()
            .unwrap_or(name);
        self.parts.insert(key, bytes);
    }

    pub fn write_to_bytes(&self) -> Result<Vec<u8>, XlsxError> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> Result<(), XlsxError> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::FileOptions::<()>::default()
            .compression_method(zip::CompressionMethod::Deflated);

        for (name, bytes) in &self.parts {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(bytes)?;
        }

        let cursor = zip.finish()?;
        w.write_all(&cursor.into_inner())?;
        Ok(())
    }

    /// Write the package to `dest` atomically.
    ///
    /// The package is written to a temp file in the destination directory, synced and then
    /// renamed into place. On any error the temp file is removed and `dest` is left untouched.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn save(&self, dest: impl AsRef<Path>) -> Result<(), XlsxError> {
        let dest = dest.as_ref();
        let dir = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        self.write_to(tmp.as_file_mut())?;
        tmp.as_file_mut().flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(dest).map_err(|err| XlsxError::Io(err.error))?;

        log::debug!("saved xlsx package to {}", dest.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use zip::write::FileOptions;
    use zip::{CompressionMethod, ZipWriter};

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::<()>::default().compression_method(CompressionMethod::Deflated);
        for (name, bytes) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn part_lookup_tolerates_non_canonical_names() {
        let pkg = XlsxPackage::from_bytes(&build_zip(&[("XL\\Workbook.xml", b"<workbook/>")]))
            .unwrap();
        assert_eq!(pkg.part("xl/workbook.xml"), Some(&b"<workbook/>"[..]));
        assert_eq!(pkg.part_str("/xl/workbook.xml").unwrap(), "<workbook/>");
        assert!(matches!(
            pkg.part_str("xl/styles.xml"),
            Err(XlsxError::MissingPart(_))
        ));
    }

    #[test]
    fn set_part_keeps_existing_spelling() {
        let mut pkg =
            XlsxPackage::from_bytes(&build_zip(&[("XL/Workbook.xml", b"old")])).unwrap();
        pkg.set_part("xl/workbook.xml", b"new".to_vec());
        assert_eq!(pkg.part_names().collect::<Vec<_>>(), vec!["XL/Workbook.xml"]);
        assert_eq!(pkg.part("xl/workbook.xml"), Some(&b"new"[..]));
    }

    #[test]
    fn limits_reject_oversized_packages() {
        let bytes = build_zip(&[("a.xml", b"0123456789"), ("b.xml", b"0123456789")]);
        let err = XlsxPackage::from_bytes_limited(
            &bytes,
            PackageLimits {
                max_part_bytes: 100,
                max_total_bytes: 15,
            },
        )
        .unwrap_err();
        assert!(matches!(err, XlsxError::PackageTooLarge { max: 15, .. }));
    }

    #[test]
    fn roundtrip_preserves_untouched_parts() {
        let pkg = XlsxPackage::from_bytes(&build_zip(&[
            ("[Content_Types].xml", b"<Types/>"),
            ("xl/media/image1.png", &[0x89, b'P', b'N', b'G']),
        ]))
        .unwrap();
        let reread = XlsxPackage::from_bytes(&pkg.write_to_bytes().unwrap()).unwrap();
        assert_eq!(
            reread.part("xl/media/image1.png"),
            Some(&[0x89, b'P', b'N', b'G'][..])
        );
    }

    #[test]
    fn save_replaces_destination_atomically() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let dest = dir.path().join("out.xlsx");
        std::fs::write(&dest, b"previous")?;

        let pkg = XlsxPackage::from_bytes(&build_zip(&[("a.xml", b"<a/>")]))?;
        pkg.save(&dest)?;

        let reopened = XlsxPackage::open(&dest, PackageLimits::default())?;
        assert_eq!(reopened.part("a.xml"), Some(&b"<a/>"[..]));
        let leftovers = std::fs::read_dir(dir.path())?.count();
        assert_eq!(leftovers, 1);
        Ok(())
    }
}

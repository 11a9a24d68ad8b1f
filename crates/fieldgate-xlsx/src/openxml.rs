use quick_xml::events::Event;
use quick_xml::Reader;

use crate::package::{XlsxError, XlsxPackage};

pub const REL_TYPE_WORKSHEET: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";
pub const REL_TYPE_TABLE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/table";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub type_uri: String,
    pub target: String,
    pub target_mode: Option<String>,
}

impl Relationship {
    pub fn is_external(&self) -> bool {
        self.target_mode
            .as_deref()
            .is_some_and(|mode| mode.trim().eq_ignore_ascii_case("External"))
    }
}

/// `xl/worksheets/sheet1.xml` -> `xl/worksheets/_rels/sheet1.xml.rels`.
pub fn rels_part_name(part_name: &str) -> String {
    let part_name = part_name.strip_prefix('/').unwrap_or(part_name);
    match part_name.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part_name}.rels"),
    }
}

/// Resolve a relationship target against the part that owns the relationship.
pub fn resolve_target(base_part: &str, target: &str) -> String {
    // Part names never carry fragments.
    let target = target.split_once('#').map_or(target, |(base, _)| base);
    if target.is_empty() {
        return base_part.strip_prefix('/').unwrap_or(base_part).to_string();
    }

    let (target, base_dir) = match target.strip_prefix('/') {
        Some(absolute) => (absolute, ""),
        None => (
            target,
            base_part.rsplit_once('/').map_or("", |(dir, _)| dir),
        ),
    };

    let mut components: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            _ => components.push(segment),
        }
    }
    components.join("/")
}

pub fn parse_relationships(xml: &[u8]) -> Result<Vec<Relationship>, XlsxError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut relationships = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(start) | Event::Empty(start)
                if start.local_name().as_ref() == b"Relationship" =>
            {
                let mut id = None;
                let mut target = None;
                let mut type_uri = None;
                let mut target_mode = None;
                for attr in start.attributes() {
                    let attr = attr?;
                    let value = attr.unescape_value()?.into_owned();
                    match local_name(attr.key.as_ref()) {
                        b"Id" => id = Some(value),
                        b"Target" => target = Some(value),
                        b"Type" => type_uri = Some(value),
                        b"TargetMode" => target_mode = Some(value),
                        _ => {}
                    }
                }
                if let (Some(id), Some(target), Some(type_uri)) = (id, target, type_uri) {
                    relationships.push(Relationship {
                        id,
                        type_uri,
                        target,
                        target_mode,
                    });
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(relationships)
}

/// Relationships declared by `part_name`. A part without a `.rels` part has none.
pub fn part_relationships(
    package: &XlsxPackage,
    part_name: &str,
) -> Result<Vec<Relationship>, XlsxError> {
    match package.part(&rels_part_name(part_name)) {
        Some(bytes) => parse_relationships(bytes),
        None => Ok(Vec::new()),
    }
}

/// Build `local` with the same namespace prefix as `sibling_name` (`x:sheetData` -> `x:cols`).
pub(crate) fn prefixed_tag(sibling_name: &[u8], local: &str) -> String {
    match sibling_name.iter().rposition(|&b| b == b':') {
        Some(idx) => {
            let prefix = String::from_utf8_lossy(&sibling_name[..idx]);
            format!("{prefix}:{local}")
        }
        None => local.to_string(),
    }
}

pub fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|b| *b == b':') {
        Some(idx) => &name[idx + 1..],
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rels_part_name_places_rels_next_to_part() {
        assert_eq!(
            rels_part_name("xl/worksheets/sheet1.xml"),
            "xl/worksheets/_rels/sheet1.xml.rels"
        );
        assert_eq!(rels_part_name("/xl/workbook.xml"), "xl/_rels/workbook.xml.rels");
    }

    #[test]
    fn resolve_target_handles_relative_absolute_and_fragments() {
        assert_eq!(
            resolve_target("xl/worksheets/sheet1.xml", "../tables/table1.xml"),
            "xl/tables/table1.xml"
        );
        assert_eq!(
            resolve_target("xl/workbook.xml", "/xl/worksheets/sheet2.xml"),
            "xl/worksheets/sheet2.xml"
        );
        assert_eq!(
            resolve_target("xl/workbook.xml", "worksheets/sheet1.xml#frag"),
            "xl/worksheets/sheet1.xml"
        );
    }

    #[test]
    fn parse_relationships_captures_target_mode() {
        let rels = br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://example.com" TargetMode="External"/>
  <Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/table" Target="../tables/table1.xml"/>
</Relationships>"#;

        let parsed = parse_relationships(rels).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed[0].is_external());
        assert_eq!(parsed[1].type_uri, REL_TYPE_TABLE);
        assert!(!parsed[1].is_external());
    }
}

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::address::sheet_names_match;
use crate::openxml::{self, local_name, resolve_target};
use crate::package::{XlsxError, XlsxPackage};

pub const DEFAULT_WORKBOOK_PART: &str = "xl/workbook.xml";

pub const PRINT_AREA: &str = "_xlnm.Print_Area";
pub const PRINT_TITLES: &str = "_xlnm.Print_Titles";
pub const FILTER_DATABASE: &str = "_xlnm._FilterDatabase";

const REL_TYPE_OFFICE_DOCUMENT_SUFFIX: &str = "/officeDocument";

/// A `<sheet>` entry of the workbook part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkbookSheet {
    pub name: String,
    pub sheet_id: u32,
    pub rel_id: String,
}

/// A worksheet with its resolved part name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetInfo {
    pub name: String,
    /// Zero-based tab position; what `localSheetId` refers to.
    pub position: usize,
    pub part: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinedName {
    pub name: String,
    pub local_sheet_id: Option<u32>,
    pub hidden: bool,
    pub formula: String,
}

impl DefinedName {
    pub fn is_print_area(&self) -> bool {
        self.name.eq_ignore_ascii_case(PRINT_AREA)
    }

    pub fn is_print_titles(&self) -> bool {
        self.name.eq_ignore_ascii_case(PRINT_TITLES)
    }

    pub fn is_filter_database(&self) -> bool {
        self.name.eq_ignore_ascii_case(FILTER_DATABASE)
    }
}

pub fn parse_workbook_sheets(workbook_xml: &str) -> Result<Vec<WorkbookSheet>, XlsxError> {
    let mut reader = Reader::from_str(workbook_xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut sheets = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Empty(e) | Event::Start(e) if e.local_name().as_ref() == b"sheet" => {
                sheets.push(parse_sheet_element(&e)?);
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

fn parse_sheet_element(e: &BytesStart<'_>) -> Result<WorkbookSheet, XlsxError> {
    let mut name = None;
    let mut sheet_id = None;
    let mut rel_id = None;

    for attr in e.attributes() {
        let attr = attr?;
        let key = attr.key.as_ref();
        match key {
            b"name" => name = Some(attr.unescape_value()?.into_owned()),
            b"sheetId" => {
                let v = attr.unescape_value()?;
                sheet_id = Some(
                    v.trim()
                        .parse::<u32>()
                        .map_err(|_| XlsxError::Invalid(format!("invalid sheetId {v:?}")))?,
                );
            }
            _ if local_name(key) == b"id" => rel_id = Some(attr.unescape_value()?.into_owned()),
            _ => {}
        }
    }

    let missing = |attr: &str| XlsxError::Invalid(format!("<sheet> without {attr}"));
    Ok(WorkbookSheet {
        name: name.ok_or_else(|| missing("name"))?,
        sheet_id: sheet_id.ok_or_else(|| missing("sheetId"))?,
        rel_id: rel_id.ok_or_else(|| missing("r:id"))?,
    })
}

pub fn parse_defined_names(workbook_xml: &str) -> Result<Vec<DefinedName>, XlsxError> {
    let mut reader = Reader::from_str(workbook_xml);
    reader.config_mut().trim_text(false);

    let mut buf = Vec::new();
    let mut names = Vec::new();
    let mut current: Option<DefinedName> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"definedName" => {
                current = defined_name_header(&e)?;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"definedName" => {
                names.extend(defined_name_header(&e)?);
            }
            Event::Text(t) => {
                if let Some(name) = current.as_mut() {
                    name.formula.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some(name) = current.as_mut() {
                    name.formula.push_str(std::str::from_utf8(c.as_ref())?);
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"definedName" => {
                if let Some(mut name) = current.take() {
                    name.formula = name.formula.trim().to_string();
                    names.push(name);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(names)
}

fn defined_name_header(e: &BytesStart<'_>) -> Result<Option<DefinedName>, XlsxError> {
    let mut name = None;
    let mut local_sheet_id = None;
    let mut hidden = false;
    for attr in e.attributes() {
        let attr = attr?;
        match attr.key.as_ref() {
            b"name" => name = Some(attr.unescape_value()?.into_owned()),
            b"localSheetId" => local_sheet_id = attr.unescape_value()?.trim().parse::<u32>().ok(),
            b"hidden" => {
                let v = attr.unescape_value()?;
                hidden = v == "1" || v.eq_ignore_ascii_case("true");
            }
            _ => {}
        }
    }
    Ok(name.map(|name| DefinedName {
        name,
        local_sheet_id,
        hidden,
        formula: String::new(),
    }))
}

impl XlsxPackage {
    /// The main workbook part, from the package relationships when present.
    pub fn workbook_part(&self) -> Result<String, XlsxError> {
        let relationships = openxml::part_relationships(self, "")?;
        Ok(relationships
            .iter()
            .find(|rel| rel.type_uri.ends_with(REL_TYPE_OFFICE_DOCUMENT_SUFFIX) && !rel.is_external())
            .map(|rel| resolve_target("", &rel.target))
            .unwrap_or_else(|| DEFAULT_WORKBOOK_PART.to_string()))
    }

    /// Worksheets in tab order with their resolved part names.
    pub fn sheets(&self) -> Result<Vec<SheetInfo>, XlsxError> {
        let workbook_part = self.workbook_part()?;
        let sheets = parse_workbook_sheets(self.part_str(&workbook_part)?)?;

        let rel_by_id: HashMap<String, openxml::Relationship> =
            openxml::part_relationships(self, &workbook_part)?
                .into_iter()
                .map(|rel| (rel.id.clone(), rel))
                .collect();

        sheets
            .into_iter()
            .enumerate()
            .map(|(position, sheet)| {
                let rel = rel_by_id.get(&sheet.rel_id).ok_or_else(|| {
                    XlsxError::Invalid(format!(
                        "missing relationship {} for sheet {:?}",
                        sheet.rel_id, sheet.name
                    ))
                })?;
                Ok(SheetInfo {
                    name: sheet.name,
                    position,
                    part: resolve_target(&workbook_part, &rel.target),
                })
            })
            .collect()
    }

    /// Look a worksheet up by name (case-insensitive, like Excel).
    pub fn sheet(&self, name: &str) -> Result<SheetInfo, XlsxError> {
        self.sheets()?
            .into_iter()
            .find(|sheet| sheet_names_match(&sheet.name, name))
            .ok_or_else(|| XlsxError::MissingSheet(name.to_string()))
    }

    pub fn defined_names(&self) -> Result<Vec<DefinedName>, XlsxError> {
        let workbook_part = self.workbook_part()?;
        parse_defined_names(self.part_str(&workbook_part)?)
    }
}

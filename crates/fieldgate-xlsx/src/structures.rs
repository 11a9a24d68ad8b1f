//! Read-only extraction of the worksheet structures that pin columns in place.
//!
//! References are kept as written in the part. Turning them into areas is left to the caller so
//! a single malformed reference never hides the rest of the sheet.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Deserialize;

use crate::openxml::{self, local_name, resolve_target, REL_TYPE_TABLE};
use crate::package::{XlsxError, XlsxPackage};
use crate::workbook::SheetInfo;

/// A data validation rule: the cells it applies to and the formulas it evaluates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataValidationRef {
    pub sqref: String,
    pub formulas: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorksheetStructures {
    pub merge_cells: Vec<String>,
    /// The sheet-level `<autoFilter ref>`; custom views carry their own and are ignored.
    pub auto_filter: Option<String>,
    /// Classic and x14 validations.
    pub data_validations: Vec<DataValidationRef>,
    /// `sqref` of every conditional formatting block, classic and x14.
    pub conditional_formats: Vec<String>,
    pub table_rel_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextTarget {
    Formula,
    Sqref,
}

pub fn read_worksheet_structures(xml: &str) -> Result<WorksheetStructures, XlsxError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut out = WorksheetStructures::default();

    let mut depth = 0usize;
    let mut validation: Option<DataValidationRef> = None;
    let mut formatting: Option<String> = None;
    let mut text_target: Option<TextTarget> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) => {
                match e.local_name().as_ref() {
                    b"mergeCell" => out.merge_cells.extend(attr_value(&e, b"ref")?),
                    b"autoFilter" if depth == 1 => out.auto_filter = attr_value(&e, b"ref")?,
                    b"tablePart" => out.table_rel_ids.extend(relationship_id(&e)?),
                    b"dataValidation" => {
                        validation = Some(DataValidationRef {
                            sqref: attr_value(&e, b"sqref")?.unwrap_or_default(),
                            formulas: Vec::new(),
                        });
                    }
                    b"conditionalFormatting" => {
                        formatting = Some(attr_value(&e, b"sqref")?.unwrap_or_default());
                    }
                    b"formula1" | b"formula2" => {
                        if let Some(dv) = validation.as_mut() {
                            dv.formulas.push(String::new());
                            text_target = Some(TextTarget::Formula);
                        }
                    }
                    b"sqref" if validation.is_some() || formatting.is_some() => {
                        text_target = Some(TextTarget::Sqref);
                    }
                    _ => {}
                }
                depth += 1;
            }
            Event::Empty(e) => match e.local_name().as_ref() {
                b"mergeCell" => out.merge_cells.extend(attr_value(&e, b"ref")?),
                b"autoFilter" if depth == 1 => out.auto_filter = attr_value(&e, b"ref")?,
                b"tablePart" => out.table_rel_ids.extend(relationship_id(&e)?),
                b"dataValidation" => out.data_validations.extend(
                    attr_value(&e, b"sqref")?.map(|sqref| DataValidationRef {
                        sqref,
                        formulas: Vec::new(),
                    }),
                ),
                b"conditionalFormatting" => {
                    out.conditional_formats.extend(attr_value(&e, b"sqref")?)
                }
                _ => {}
            },
            Event::Text(t) => {
                let text = t.unescape()?;
                match text_target {
                    Some(TextTarget::Formula) => {
                        if let Some(formula) =
                            validation.as_mut().and_then(|dv| dv.formulas.last_mut())
                        {
                            formula.push_str(&text);
                        }
                    }
                    Some(TextTarget::Sqref) => {
                        let sqref = match (validation.as_mut(), formatting.as_mut()) {
                            (Some(dv), _) => Some(&mut dv.sqref),
                            (None, Some(cf)) => Some(cf),
                            (None, None) => None,
                        };
                        if let Some(sqref) = sqref {
                            if !sqref.is_empty() {
                                sqref.push(' ');
                            }
                            sqref.push_str(text.trim());
                        }
                    }
                    None => {}
                }
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                match e.local_name().as_ref() {
                    b"formula1" | b"formula2" | b"sqref" => text_target = None,
                    b"dataValidation" => out.data_validations.extend(validation.take()),
                    b"conditionalFormatting" => {
                        out.conditional_formats
                            .extend(formatting.take().filter(|s| !s.trim().is_empty()));
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, XlsxError> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn relationship_id(e: &BytesStart<'_>) -> Result<Option<String>, XlsxError> {
    for attr in e.attributes() {
        let attr = attr?;
        if local_name(attr.key.as_ref()) == b"id" {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

#[derive(Debug, Deserialize)]
#[serde(rename = "table")]
struct TableXml {
    #[serde(rename = "@name", default)]
    name: Option<String>,
    #[serde(rename = "@displayName", default)]
    display_name: Option<String>,
    #[serde(rename = "@ref")]
    reference: String,
}

/// A structured table (ListObject) anchored on a worksheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    pub reference: String,
    pub part: String,
}

pub fn parse_table(xml: &str, part: &str) -> Result<TableInfo, XlsxError> {
    let table: TableXml = quick_xml::de::from_str(xml)?;
    let name = table
        .display_name
        .or(table.name)
        .unwrap_or_else(|| part.to_string());
    Ok(TableInfo {
        name,
        reference: table.reference,
        part: part.to_string(),
    })
}

impl XlsxPackage {
    pub fn worksheet_structures(&self, sheet: &SheetInfo) -> Result<WorksheetStructures, XlsxError> {
        read_worksheet_structures(self.part_str(&sheet.part)?)
    }

    /// Tables referenced by the sheet's `<tableParts>`, in document order.
    pub fn sheet_tables(
        &self,
        sheet: &SheetInfo,
        structures: &WorksheetStructures,
    ) -> Result<Vec<TableInfo>, XlsxError> {
        if structures.table_rel_ids.is_empty() {
            return Ok(Vec::new());
        }
        let relationships = openxml::part_relationships(self, &sheet.part)?;

        let mut tables = Vec::with_capacity(structures.table_rel_ids.len());
        for rel_id in &structures.table_rel_ids {
            let rel = relationships
                .iter()
                .find(|rel| &rel.id == rel_id && rel.type_uri == REL_TYPE_TABLE)
                .ok_or_else(|| {
                    XlsxError::Invalid(format!(
                        "table part {rel_id} of {} has no relationship",
                        sheet.part
                    ))
                })?;
            let part = resolve_target(&sheet.part, &rel.target);
            tables.push(parse_table(self.part_str(&part)?, &part)?);
        }
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    const SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"
    xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"
    xmlns:x14="http://schemas.microsoft.com/office/spreadsheetml/2009/9/main"
    xmlns:xm="http://schemas.microsoft.com/office/excel/2006/main">
  <sheetData/>
  <autoFilter ref="A1:AB40"/>
  <customSheetViews>
    <customSheetView guid="{00000000-0000-0000-0000-000000000000}">
      <autoFilter ref="C1:C2"/>
    </customSheetView>
  </customSheetViews>
  <mergeCells count="1"><mergeCell ref="Z2:AC2"/></mergeCells>
  <conditionalFormatting sqref="AA2:AA40 AC2:AC40">
    <cfRule type="expression" priority="1"><formula>AA2&gt;0</formula></cfRule>
  </conditionalFormatting>
  <dataValidations count="2">
    <dataValidation type="list" sqref="B2:B40"><formula1>Lists!$AA$1:$AA$9</formula1></dataValidation>
    <dataValidation type="whole" sqref="C2"/>
  </dataValidations>
  <tableParts count="1"><tablePart r:id="rId3"/></tableParts>
  <extLst>
    <ext uri="{CCE6A557-97BC-4b89-ADB6-D9C93CAAB3DF}">
      <x14:dataValidations count="1">
        <x14:dataValidation type="list">
          <x14:formula1><xm:f>Codes!$A$1:$A$4</xm:f></x14:formula1>
          <xm:sqref>AB2:AB40</xm:sqref>
        </x14:dataValidation>
      </x14:dataValidations>
    </ext>
    <ext uri="{78C0D931-6437-407d-A8EE-F0AAD7539E65}">
      <x14:conditionalFormattings>
        <x14:conditionalFormatting>
          <x14:cfRule type="dataBar" id="{1}"/>
          <xm:sqref>AD1:AD9</xm:sqref>
        </x14:conditionalFormatting>
      </x14:conditionalFormattings>
    </ext>
  </extLst>
</worksheet>"#;

    #[test]
    fn reads_classic_and_x14_structures() {
        let found = read_worksheet_structures(SHEET).unwrap();
        assert_eq!(found.merge_cells, vec!["Z2:AC2".to_string()]);
        assert_eq!(found.auto_filter.as_deref(), Some("A1:AB40"));
        assert_eq!(found.table_rel_ids, vec!["rId3".to_string()]);
        assert_eq!(
            found.conditional_formats,
            vec!["AA2:AA40 AC2:AC40".to_string(), "AD1:AD9".to_string()]
        );
        assert_eq!(
            found.data_validations,
            vec![
                DataValidationRef {
                    sqref: "B2:B40".to_string(),
                    formulas: vec!["Lists!$AA$1:$AA$9".to_string()],
                },
                DataValidationRef {
                    sqref: "C2".to_string(),
                    formulas: Vec::new(),
                },
                DataValidationRef {
                    sqref: "AB2:AB40".to_string(),
                    formulas: vec!["Codes!$A$1:$A$4".to_string()],
                },
            ]
        );
    }

    #[test]
    fn parse_table_prefers_display_name() {
        let xml = r#"<table xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" id="1" name="Table1" displayName="Prices" ref="Z1:AB20" headerRowCount="1">
  <autoFilter ref="Z1:AB20"/>
  <tableColumns count="3"><tableColumn id="1" name="Z"/><tableColumn id="2" name="AA"/><tableColumn id="3" name="AB"/></tableColumns>
</table>"#;
        let table = parse_table(xml, "xl/tables/table1.xml").unwrap();
        assert_eq!(table.name, "Prices");
        assert_eq!(table.reference, "Z1:AB20");
    }

    #[test]
    fn malformed_xml_is_an_error() {
        assert!(read_worksheet_structures("<worksheet><mergeCells></worksheet>").is_err());
    }
}

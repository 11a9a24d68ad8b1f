//! The worksheet `<cols>` section as an editable model, and the streaming rewrite that puts it
//! back.

use std::io::Cursor;

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::openxml::prefixed_tag;
use crate::package::XlsxError;

/// Highest outline level Excel accepts on a column.
pub const MAX_OUTLINE_LEVEL: u8 = 7;

/// Row height written when a `<sheetFormatPr>` has to be created.
const DEFAULT_ROW_HEIGHT: &str = "15";

/// One `<col min max ...>` entry. Attributes other than `min`/`max` are kept in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColDef {
    pub min: u32,
    pub max: u32,
    attrs: Vec<(String, String)>,
}

impl ColDef {
    pub fn new(min: u32, max: u32) -> Self {
        Self {
            min,
            max,
            attrs: Vec::new(),
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value,
            None => self.attrs.push((key.to_string(), value)),
        }
    }

    pub fn remove_attr(&mut self, key: &str) {
        self.attrs.retain(|(k, _)| k != key);
    }

    pub fn is_hidden(&self) -> bool {
        self.attr("hidden").is_some_and(parse_xml_bool)
    }

    pub fn width(&self) -> Option<f64> {
        self.attr("width").and_then(|w| w.trim().parse().ok())
    }

    /// `0` when absent; an unparsable or out-of-range level is an error.
    pub fn outline_level(&self) -> Result<u8, XlsxError> {
        match self.attr("outlineLevel") {
            None => Ok(0),
            Some(raw) => raw
                .trim()
                .parse::<u8>()
                .ok()
                .filter(|level| *level <= MAX_OUTLINE_LEVEL)
                .ok_or_else(|| {
                    XlsxError::Invalid(format!(
                        "column {}..{} has invalid outlineLevel {raw:?}",
                        self.min, self.max
                    ))
                }),
        }
    }
}

fn parse_xml_bool(val: &str) -> bool {
    let trimmed = val.trim();
    trimmed == "1" || trimmed.eq_ignore_ascii_case("true")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cols {
    defs: Vec<ColDef>,
}

impl Cols {
    pub fn from_worksheet_xml(xml: &str) -> Result<Self, XlsxError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut defs = Vec::new();
        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"col" => {
                    defs.push(parse_col(&e)?);
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        defs.sort_by_key(|def| def.min);
        Ok(Self { defs })
    }

    pub fn defs(&self) -> &[ColDef] {
        &self.defs
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn get(&self, col: u32) -> Option<&ColDef> {
        self.defs.iter().find(|def| def.min <= col && col <= def.max)
    }

    /// Give `col` a `<col>` entry of its own, splitting a covering range or creating an empty
    /// entry as needed.
    pub fn isolate(&mut self, col: u32) -> &mut ColDef {
        match self.defs.iter().position(|d| d.min <= col && col <= d.max) {
            Some(i) => {
                let def = self.defs.remove(i);
                let mut pieces = Vec::with_capacity(3);
                if def.min < col {
                    pieces.push(ColDef {
                        min: def.min,
                        max: col - 1,
                        attrs: def.attrs.clone(),
                    });
                }
                let target = i + pieces.len();
                pieces.push(ColDef {
                    min: col,
                    max: col,
                    attrs: def.attrs.clone(),
                });
                if col < def.max {
                    pieces.push(ColDef {
                        min: col + 1,
                        max: def.max,
                        attrs: def.attrs,
                    });
                }
                self.defs.splice(i..i, pieces);
                &mut self.defs[target]
            }
            None => {
                let i = self
                    .defs
                    .iter()
                    .position(|d| d.min > col)
                    .unwrap_or(self.defs.len());
                self.defs.insert(i, ColDef::new(col, col));
                &mut self.defs[i]
            }
        }
    }

    /// Highest parsable column outline level.
    pub fn max_outline_level(&self) -> u8 {
        self.defs
            .iter()
            .filter_map(|def| def.outline_level().ok())
            .max()
            .unwrap_or(0)
    }
}

fn parse_col(e: &BytesStart<'_>) -> Result<ColDef, XlsxError> {
    let mut min = None;
    let mut max = None;
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?.into_owned();
        match attr.key.as_ref() {
            b"min" => min = Some(parse_u32(&value, "min")?),
            b"max" => max = Some(parse_u32(&value, "max")?),
            key => attrs.push((String::from_utf8_lossy(key).into_owned(), value)),
        }
    }
    match (min, max) {
        (Some(min), Some(max)) if min >= 1 && min <= max => Ok(ColDef { min, max, attrs }),
        _ => Err(XlsxError::Invalid(format!(
            "<col> with invalid span min={min:?} max={max:?}"
        ))),
    }
}

fn parse_u32(value: &str, name: &str) -> Result<u32, XlsxError> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|_| XlsxError::Invalid(format!("invalid {name} {value:?} on <col>")))
}

/// Write `cols` into the worksheet, replacing any existing `<cols>` section.
///
/// A missing section is inserted right before `<sheetData>`. With `outline_level_col`, the
/// `<sheetFormatPr outlineLevelCol>` is raised to at least that level, creating the element if
/// the sheet has none. An empty model leaves the worksheet untouched.
pub fn write_cols_to_worksheet_xml(
    original_xml: &str,
    cols: &Cols,
    outline_level_col: Option<u8>,
) -> Result<String, XlsxError> {
    if cols.is_empty() {
        return Ok(original_xml.to_string());
    }

    let mut reader = Reader::from_str(original_xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Cursor::new(Vec::with_capacity(original_xml.len() + 256)));

    let mut buf = Vec::new();
    let mut skipping_cols_depth: Option<usize> = None;
    let mut cols_written = false;
    let mut format_written = outline_level_col.is_none();

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Eof => break,
            Event::Start(e) => match skipping_cols_depth {
                Some(depth) => skipping_cols_depth = Some(depth + 1),
                None => match e.local_name().as_ref() {
                    b"cols" => {
                        let name = e.name();
                        if !format_written {
                            write_sheet_format(&mut writer, name.as_ref(), outline_level_col)?;
                            format_written = true;
                        }
                        write_cols(&mut writer, cols, name.as_ref())?;
                        cols_written = true;
                        skipping_cols_depth = Some(1);
                    }
                    b"sheetFormatPr" if !format_written => {
                        writer.write_event(Event::Start(raise_outline_level(
                            &e,
                            outline_level_col,
                        )?))?;
                        format_written = true;
                    }
                    b"sheetData" => {
                        ensure_before_sheet_data(
                            &mut writer,
                            &e,
                            cols,
                            outline_level_col,
                            &mut format_written,
                            &mut cols_written,
                        )?;
                        writer.write_event(Event::Start(e))?;
                    }
                    _ => writer.write_event(Event::Start(e))?,
                },
            },
            Event::Empty(e) => match skipping_cols_depth {
                Some(_) => {}
                None => match e.local_name().as_ref() {
                    b"cols" => {
                        let name = e.name();
                        if !format_written {
                            write_sheet_format(&mut writer, name.as_ref(), outline_level_col)?;
                            format_written = true;
                        }
                        write_cols(&mut writer, cols, name.as_ref())?;
                        cols_written = true;
                    }
                    b"sheetFormatPr" if !format_written => {
                        writer.write_event(Event::Empty(raise_outline_level(
                            &e,
                            outline_level_col,
                        )?))?;
                        format_written = true;
                    }
                    b"sheetData" => {
                        ensure_before_sheet_data(
                            &mut writer,
                            &e,
                            cols,
                            outline_level_col,
                            &mut format_written,
                            &mut cols_written,
                        )?;
                        writer.write_event(Event::Empty(e))?;
                    }
                    _ => writer.write_event(Event::Empty(e))?,
                },
            },
            Event::End(e) => match skipping_cols_depth {
                Some(1) => skipping_cols_depth = None,
                Some(depth) => skipping_cols_depth = Some(depth - 1),
                None => writer.write_event(Event::End(e))?,
            },
            other => {
                if skipping_cols_depth.is_none() {
                    writer.write_event(other)?;
                }
            }
        }
        buf.clear();
    }

    if !cols_written {
        return Err(XlsxError::Invalid(
            "worksheet has no <sheetData> to anchor <cols>".to_string(),
        ));
    }

    Ok(String::from_utf8(writer.into_inner().into_inner())?)
}

fn ensure_before_sheet_data<W: std::io::Write>(
    writer: &mut Writer<W>,
    sheet_data: &BytesStart<'_>,
    cols: &Cols,
    outline_level_col: Option<u8>,
    format_written: &mut bool,
    cols_written: &mut bool,
) -> Result<(), XlsxError> {
    let name = sheet_data.name();
    if !*format_written {
        write_sheet_format(writer, name.as_ref(), outline_level_col)?;
        *format_written = true;
    }
    if !*cols_written {
        write_cols(writer, cols, name.as_ref())?;
        *cols_written = true;
    }
    Ok(())
}

fn raise_outline_level(
    e: &BytesStart<'_>,
    outline_level_col: Option<u8>,
) -> Result<BytesStart<'static>, XlsxError> {
    let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut out = BytesStart::new(tag);
    let mut existing = 0u8;
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"outlineLevelCol" {
            existing = attr.unescape_value()?.trim().parse().unwrap_or(0);
            continue;
        }
        out.push_attribute((attr.key.as_ref(), attr.value.as_ref()));
    }
    let level = outline_level_col.unwrap_or(0).max(existing);
    if level > 0 {
        out.push_attribute(("outlineLevelCol", level.to_string().as_str()));
    }
    Ok(out)
}

fn write_sheet_format<W: std::io::Write>(
    writer: &mut Writer<W>,
    sibling_name: &[u8],
    outline_level_col: Option<u8>,
) -> Result<(), XlsxError> {
    let Some(level) = outline_level_col.filter(|level| *level > 0) else {
        return Ok(());
    };
    let mut e = BytesStart::new(prefixed_tag(sibling_name, "sheetFormatPr"));
    e.push_attribute(("defaultRowHeight", DEFAULT_ROW_HEIGHT));
    e.push_attribute(("outlineLevelCol", level.to_string().as_str()));
    writer.write_event(Event::Empty(e))?;
    Ok(())
}

fn write_cols<W: std::io::Write>(
    writer: &mut Writer<W>,
    cols: &Cols,
    sibling_name: &[u8],
) -> Result<(), XlsxError> {
    let cols_tag = prefixed_tag(sibling_name, "cols");
    let col_tag = prefixed_tag(sibling_name, "col");

    writer.write_event(Event::Start(BytesStart::new(cols_tag.as_str())))?;
    for def in cols.defs() {
        let mut e = BytesStart::new(col_tag.as_str());
        e.push_attribute(("min", def.min.to_string().as_str()));
        e.push_attribute(("max", def.max.to_string().as_str()));
        for (key, value) in &def.attrs {
            e.push_attribute((key.as_str(), value.as_str()));
        }
        writer.write_event(Event::Empty(e))?;
    }
    writer.write_event(Event::End(BytesEnd::new(cols_tag.as_str())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    const NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";

    fn col_spans(xml: &str) -> Vec<(String, String, Option<String>)> {
        let doc = roxmltree::Document::parse(xml).unwrap();
        doc.descendants()
            .filter(|n| n.has_tag_name((NS, "col")))
            .map(|n| {
                (
                    n.attribute("min").unwrap().to_string(),
                    n.attribute("max").unwrap().to_string(),
                    n.attribute("hidden").map(str::to_string),
                )
            })
            .collect()
    }

    #[test]
    fn isolate_splits_a_covering_range() {
        let xml = format!(
            r#"<worksheet xmlns="{NS}"><cols><col min="20" max="30" width="12" customWidth="1"/></cols><sheetData/></worksheet>"#
        );
        let mut cols = Cols::from_worksheet_xml(&xml).unwrap();
        cols.isolate(27).set_attr("hidden", "1");

        let spans: Vec<_> = cols.defs().iter().map(|d| (d.min, d.max)).collect();
        assert_eq!(spans, vec![(20, 26), (27, 27), (28, 30)]);
        assert_eq!(cols.defs()[1].attr("width"), Some("12"));
        assert!(cols.defs()[1].is_hidden());
        assert!(!cols.defs()[0].is_hidden());
    }

    #[test]
    fn rewrite_replaces_existing_cols() {
        let xml = format!(
            r#"<worksheet xmlns="{NS}"><cols><col min="1" max="3" width="9"/></cols><sheetData><row r="1"/></sheetData></worksheet>"#
        );
        let mut cols = Cols::from_worksheet_xml(&xml).unwrap();
        cols.isolate(2).set_attr("hidden", "1");
        let out = write_cols_to_worksheet_xml(&xml, &cols, None).unwrap();

        assert_eq!(
            col_spans(&out),
            vec![
                ("1".to_string(), "1".to_string(), None),
                ("2".to_string(), "2".to_string(), Some("1".to_string())),
                ("3".to_string(), "3".to_string(), None),
            ]
        );
        assert!(out.contains(r#"<row r="1"/>"#));
    }

    #[test]
    fn rewrite_inserts_cols_and_sheet_format_before_sheet_data() {
        let xml = format!(
            r#"<x:worksheet xmlns:x="{NS}"><x:sheetViews/><x:sheetData/></x:worksheet>"#
        );
        let mut cols = Cols::from_worksheet_xml(&xml).unwrap();
        cols.isolate(27).set_attr("outlineLevel", "1");
        let out = write_cols_to_worksheet_xml(&xml, &cols, Some(1)).unwrap();

        let doc = roxmltree::Document::parse(&out).unwrap();
        let names: Vec<_> = doc
            .root_element()
            .children()
            .filter(|n| n.is_element())
            .map(|n| n.tag_name().name().to_string())
            .collect();
        assert_eq!(names, vec!["sheetViews", "sheetFormatPr", "cols", "sheetData"]);
        let format = doc
            .descendants()
            .find(|n| n.has_tag_name((NS, "sheetFormatPr")))
            .unwrap();
        assert_eq!(format.attribute("outlineLevelCol"), Some("1"));
    }

    #[test]
    fn existing_outline_level_is_never_lowered() {
        let xml = format!(
            r#"<worksheet xmlns="{NS}"><sheetFormatPr defaultRowHeight="15" outlineLevelCol="3"/><sheetData/></worksheet>"#
        );
        let mut cols = Cols::default();
        cols.isolate(1).set_attr("outlineLevel", "1");
        let out = write_cols_to_worksheet_xml(&xml, &cols, Some(1)).unwrap();
        assert!(out.contains(r#"outlineLevelCol="3""#));
        assert_eq!(out.matches("sheetFormatPr").count(), 1);
    }

    #[test]
    fn invalid_outline_level_is_reported() {
        let mut def = ColDef::new(1, 1);
        def.set_attr("outlineLevel", "x");
        assert!(def.outline_level().is_err());
        def.set_attr("outlineLevel", "9");
        assert!(def.outline_level().is_err());
        def.remove_attr("outlineLevel");
        assert_eq!(def.outline_level().unwrap(), 0);
    }
}

use std::io::{Cursor, Write};
use std::sync::Arc;

use fieldgate::{
    Context, FieldCatalog, OutputStore, Pipeline, PipelineConfig, PipelineError, XlsxError,
    XlsxPackage,
};
use fieldgate_rules::{Gs1Mode, ProductType, TemplateChoice};
use pretty_assertions::assert_eq;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

const CATALOG: &str = r#"{
    "Artikelnummer": {"col": "B", "visible": "always", "mandatory": "always"},
    "Artikelomschrijving Taal Code": {"col": "E", "visible_only": ["gs1"]},
    "Staffel Vanaf": {"col": "AA", "visible_only": ["staffel"], "mandatory_only": ["staffel"]},
    "Staffel Prijs": {"col": "AB", "visible_only": ["staffel"], "mandatory_only": ["staffel"]},
    "CE Certificaat nummer": {"col": "AW", "visible_only": ["medisch"]},
    "CAS nummer": {"col": "BC", "visible_only": ["chemicals"]}
}"#;

fn template(extra_body: &str, table_ref: Option<&str>) -> Vec<u8> {
    let mut parts = vec![
        (
            "_rels/.rels".to_string(),
            format!(
                r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="{REL_NS}/officeDocument" Target="xl/workbook.xml"/></Relationships>"#
            ),
        ),
        (
            "xl/workbook.xml".to_string(),
            format!(
                r#"<workbook xmlns="{NS}" xmlns:r="{REL_NS}"><sheets><sheet name="Template" sheetId="1" r:id="rId1"/></sheets></workbook>"#
            ),
        ),
        (
            "xl/_rels/workbook.xml.rels".to_string(),
            format!(
                r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="{REL_NS}/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#
            ),
        ),
        (
            "xl/worksheets/sheet1.xml".to_string(),
            format!(
                r#"<worksheet xmlns="{NS}" xmlns:r="{REL_NS}"><cols><col min="1" max="60" width="18" customWidth="1"/></cols><sheetData><row r="1"><c r="B1" t="inlineStr"><is><t>Artikelnummer</t></is></c></row></sheetData>{extra_body}</worksheet>"#
            ),
        ),
    ];
    if let Some(reference) = table_ref {
        parts.push((
            "xl/worksheets/_rels/sheet1.xml.rels".to_string(),
            format!(
                r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId2" Type="{REL_NS}/table" Target="../tables/table1.xml"/></Relationships>"#
            ),
        ));
        parts.push((
            "xl/tables/table1.xml".to_string(),
            format!(r#"<table xmlns="{NS}" id="1" name="Prices" displayName="Prices" ref="{reference}"/>"#),
        ));
    }

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::<()>::default().compression_method(CompressionMethod::Deflated);
    for (name, xml) in parts {
        zip.start_file(name, options).unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

fn lab_with_chemicals() -> Context {
    Context {
        template_choice: TemplateChoice::Custom,
        gs1_mode: Gs1Mode::None,
        all_orderable: true,
        product_type: ProductType::Lab,
        has_chemicals: true,
        is_staffel_file: false,
        institutions: Vec::new(),
        version: "v1.0.0".to_string(),
    }
}

fn pipeline(config: PipelineConfig) -> Pipeline {
    Pipeline::new(
        Arc::new(FieldCatalog::from_json_str(CATALOG).unwrap()),
        config,
    )
}

fn hidden_columns(pkg: &XlsxPackage) -> Vec<u32> {
    let xml = pkg.part_str("xl/worksheets/sheet1.xml").unwrap();
    let doc = roxmltree::Document::parse(xml).unwrap();
    let mut hidden = Vec::new();
    for col in doc.descendants().filter(|n| n.has_tag_name((NS, "col"))) {
        if col.attribute("hidden") != Some("1") {
            continue;
        }
        let min: u32 = col.attribute("min").unwrap().parse().unwrap();
        let max: u32 = col.attribute("max").unwrap().parse().unwrap();
        hidden.extend(min..=max);
    }
    hidden
}

#[test]
fn lab_chemicals_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("template_besteleenheid.xlsx");
    let output = dir.path().join("out.xlsx");
    std::fs::write(&input, template("", None))?;

    let outcome = pipeline(PipelineConfig::default()).run(&input, &output, &lab_with_chemicals())?;

    let cas = outcome.resolution.decision("CAS nummer").unwrap();
    assert!(cas.visible());
    let staffel = outcome.resolution.decision("Staffel Vanaf").unwrap();
    assert!(!staffel.visible());
    assert!(!staffel.mandatory());

    assert_eq!(outcome.applied.hidden, vec!["E", "AA", "AB", "AW"]);
    assert!(outcome.hide.fully_applied());
    assert_eq!(outcome.audits.len(), 1);
    assert!(outcome.audits[0].is_clean());
    assert_eq!(
        outcome.download_name(),
        "template_besteleenheid_LAB-COMM-ORDER-CHEM.xlsx"
    );

    let saved = XlsxPackage::open(&output, Default::default())?;
    // E, AA, AB, AW
    assert_eq!(hidden_columns(&saved), vec![5, 27, 28, 49]);
    Ok(())
}

#[test]
fn template_hidden_column_is_shown_again_when_visible() -> Result<(), Box<dyn std::error::Error>> {
    let bytes = template("", None);
    let mut pkg = XlsxPackage::from_bytes(&bytes)?;
    let xml = pkg
        .part_str("xl/worksheets/sheet1.xml")?
        .replace(
            r#"<col min="1" max="60" width="18" customWidth="1"/>"#,
            r#"<col min="1" max="54" width="18" customWidth="1"/><col min="55" max="55" width="18" customWidth="1" hidden="1"/>"#,
        );
    pkg.set_part("xl/worksheets/sheet1.xml", xml.into_bytes());

    let outcome = pipeline(PipelineConfig::default()).process(&mut pkg, &lab_with_chemicals())?;
    assert_eq!(outcome.applied.shown, vec!["BC"]);
    assert!(!hidden_columns(&pkg).contains(&55));
    Ok(())
}

#[test]
fn table_spanning_forced_columns_is_flagged() -> Result<(), Box<dyn std::error::Error>> {
    let mut pkg = XlsxPackage::from_bytes(&template(
        r#"<tableParts count="1"><tablePart r:id="rId2"/></tableParts>"#,
        Some("Z1:AB10"),
    ))?;
    let outcome = pipeline(PipelineConfig::default()).process(&mut pkg, &lab_with_chemicals())?;

    assert!(outcome.hide.fully_applied());
    assert!(outcome.has_high_conflicts());
    assert_eq!(outcome.audits[0].recommendations().len(), 1);
    Ok(())
}

#[test]
fn generated_documents_are_tracked_by_ticket() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("template.xlsx");
    std::fs::write(&input, template("", None))?;

    let mut store = OutputStore::new()?;
    let (ticket, outcome) =
        pipeline(PipelineConfig::default()).generate(&input, &lab_with_chemicals(), &mut store)?;
    assert_eq!(store.file_name(&ticket), Some(outcome.download_name().as_str()));

    let reopened = XlsxPackage::from_bytes(&store.fetch(&ticket)?)?;
    assert!(hidden_columns(&reopened).contains(&27));
    store.dispose(ticket)?;
    assert!(store.is_empty());
    Ok(())
}

#[test]
fn invalid_context_is_refused_before_touching_the_document() {
    let mut pkg = XlsxPackage::from_bytes(&template("", None)).unwrap();
    let before = pkg.part("xl/worksheets/sheet1.xml").map(<[u8]>::to_vec);
    let context = Context {
        gs1_mode: Gs1Mode::Gs1Only,
        all_orderable: false,
        ..lab_with_chemicals()
    };

    let err = pipeline(PipelineConfig::default())
        .process(&mut pkg, &context)
        .unwrap_err();
    assert!(matches!(err, PipelineError::Context(_)));
    assert_eq!(pkg.part("xl/worksheets/sheet1.xml").map(<[u8]>::to_vec), before);
}

#[test]
fn configured_sheet_must_exist() {
    let mut pkg = XlsxPackage::from_bytes(&template("", None)).unwrap();
    let config = PipelineConfig {
        sheet: Some("Prijzen".to_string()),
        ..PipelineConfig::default()
    };
    let err = pipeline(config)
        .process(&mut pkg, &lab_with_chemicals())
        .unwrap_err();
    assert!(matches!(err, PipelineError::Xlsx(XlsxError::MissingSheet(_))));
}

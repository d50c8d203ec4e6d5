//! MARCXML output for MARC records.
//!
//! Records are written in the Library of Congress slim schema
//! (<https://www.loc.gov/standards/marcxml/>): `tag`, `ind1`, `ind2` and
//! `code` are attributes, and a stream of records is wrapped in a single
//! `<collection xmlns="http://www.loc.gov/MARC21/slim">` element.
//!
//! # Examples
//!
//! ```
//! use marcsift::{Field, Leader, Record};
//! use marcsift::marcxml::{marcxml_to_records, MarcXmlWriter};
//! use marcsift::formats::FormatWriter;
//!
//! let mut record = Record::new(Leader::default());
//! let mut field = Field::new("245".to_string(), '1', '0');
//! field.add_subfield('a', "Title".to_string());
//! record.add_field(field);
//!
//! let mut writer = MarcXmlWriter::new(Vec::new());
//! writer.write_record(&record)?;
//! writer.finish()?;
//!
//! let xml = String::from_utf8(writer.into_inner()).unwrap();
//! assert!(xml.contains(r#"<datafield tag="245" ind1="1" ind2="0">"#));
//! assert_eq!(marcxml_to_records(&xml)?, vec![record]);
//! # Ok::<(), marcsift::MarcError>(())
//! ```

use crate::error::{MarcError, Result};
use crate::leader::Leader;
use crate::record::{Field, Record};
use crate::writer::{RecordEncoder, RecordWriter};
use quick_xml::de::from_str as xml_from_str;
use quick_xml::se::to_string as xml_to_string;
use serde::{Deserialize, Serialize};

/// The MARCXML namespace URI.
const MARCXML_NS: &str = "http://www.loc.gov/MARC21/slim";

const MARCXML: &str = "MARCXML";

/// MARCXML record representation for serialization.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "record")]
struct MarcxmlRecord {
    leader: String,
    #[serde(default)]
    controlfield: Vec<MarcxmlControlField>,
    #[serde(default)]
    datafield: Vec<MarcxmlDataField>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MarcxmlControlField {
    #[serde(rename = "@tag")]
    tag: String,
    #[serde(rename = "$value", default)]
    value: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct MarcxmlDataField {
    #[serde(rename = "@tag")]
    tag: String,
    #[serde(rename = "@ind1")]
    ind1: String,
    #[serde(rename = "@ind2")]
    ind2: String,
    #[serde(default)]
    subfield: Vec<MarcxmlSubfield>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MarcxmlSubfield {
    #[serde(rename = "@code")]
    code: String,
    #[serde(rename = "$value", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename = "collection")]
struct MarcxmlCollection {
    #[serde(default, rename = "record")]
    records: Vec<MarcxmlRecord>,
}

/// Encoder for MARCXML `<record>` elements inside a `<collection>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarcXmlEncoder;

/// Writer for MARCXML collections.
pub type MarcXmlWriter<W> = RecordWriter<MarcXmlEncoder, W>;

impl RecordEncoder for MarcXmlEncoder {
    fn name(&self) -> &'static str {
        MARCXML
    }

    fn encode_into(&self, record: &Record, out: &mut Vec<u8>) -> Result<()> {
        let body = record_to_marcxml(record)?;
        out.extend_from_slice(body.as_bytes());
        Ok(())
    }

    fn header(&self) -> Vec<u8> {
        format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<collection xmlns=\"{MARCXML_NS}\">\n")
            .into_bytes()
    }

    fn separator(&self) -> Vec<u8> {
        b"\n".to_vec()
    }

    fn footer(&self) -> Vec<u8> {
        b"\n</collection>\n".to_vec()
    }
}

/// Serialize one record as a bare `<record>` element.
///
/// The namespace is declared on the enclosing `<collection>`, so the element
/// carries none.
///
/// # Errors
///
/// Returns [`MarcError::Encode`] if any character of the record is not
/// allowed in XML 1.0 or serialization fails.
pub fn record_to_marcxml(record: &Record) -> Result<String> {
    let leader: String = record
        .leader
        .as_bytes()
        .map_err(|e| MarcError::encode(MARCXML, e.to_string()))?
        .iter()
        .map(|&b| b as char)
        .collect();
    check_xml_text("leader", &leader)?;

    let mut controlfield = Vec::with_capacity(record.control_fields.len());
    for cf in &record.control_fields {
        check_xml_text(&cf.tag, &cf.tag)?;
        check_xml_text(&cf.tag, &cf.value)?;
        controlfield.push(MarcxmlControlField {
            tag: cf.tag.clone(),
            value: cf.value.clone(),
        });
    }

    let mut datafield = Vec::with_capacity(record.fields.len());
    for field in &record.fields {
        check_xml_text(&field.tag, &field.tag)?;
        let ind1 = field.indicator1.to_string();
        let ind2 = field.indicator2.to_string();
        check_xml_text(&field.tag, &ind1)?;
        check_xml_text(&field.tag, &ind2)?;

        let mut subfield = Vec::with_capacity(field.subfields.len());
        for sf in &field.subfields {
            let code = sf.code.to_string();
            check_xml_text(&field.tag, &code)?;
            check_xml_text(&field.tag, &sf.value)?;
            subfield.push(MarcxmlSubfield {
                code,
                value: sf.value.clone(),
            });
        }
        datafield.push(MarcxmlDataField {
            tag: field.tag.clone(),
            ind1,
            ind2,
            subfield,
        });
    }

    xml_to_string(&MarcxmlRecord {
        leader,
        controlfield,
        datafield,
    })
    .map_err(|e| MarcError::encode(MARCXML, e.to_string()))
}

/// Parse a MARCXML `<collection>` produced by [`MarcXmlWriter`] back into records.
///
/// Both the default-namespace form and the bare form are accepted.
///
/// # Errors
///
/// Returns [`MarcError::InvalidRecord`] if the XML cannot be parsed, or a
/// leader or field error if a record's content is malformed.
pub fn marcxml_to_records(xml: &str) -> Result<Vec<Record>> {
    let cleaned = xml.replace(&format!(" xmlns=\"{MARCXML_NS}\""), "");
    let collection: MarcxmlCollection = xml_from_str(&cleaned)
        .map_err(|e| MarcError::InvalidRecord(format!("Failed to parse MARCXML collection: {e}")))?;

    collection
        .records
        .into_iter()
        .map(marcxml_record_to_record)
        .collect()
}

fn marcxml_record_to_record(xml_record: MarcxmlRecord) -> Result<Record> {
    let mut record = Record::new(xml_record.leader.parse::<Leader>()?);

    for cf in xml_record.controlfield {
        record.add_control_field(cf.tag, cf.value);
    }

    for df in xml_record.datafield {
        let ind1 = df.ind1.chars().next().unwrap_or(' ');
        let ind2 = df.ind2.chars().next().unwrap_or(' ');
        let mut field = Field::new(df.tag, ind1, ind2);
        for sf in df.subfield {
            let code = sf
                .code
                .chars()
                .next()
                .ok_or_else(|| MarcError::InvalidField("Missing subfield code".to_string()))?;
            field.add_subfield(code, sf.value);
        }
        record.add_field(field);
    }

    Ok(record)
}

fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}')
}

fn check_xml_text(tag: &str, text: &str) -> Result<()> {
    match text.chars().find(|&c| !is_xml_char(c)) {
        None => Ok(()),
        Some(c) => Err(MarcError::encode(
            MARCXML,
            format!("field {tag} holds U+{:04X}, which XML 1.0 does not allow", u32::from(c)),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::FormatWriter;

    fn make_record() -> Record {
        Record::builder(Leader::from_bytes(b"00000nam a2200000 i 4500").unwrap())
            .control_field_str("001", "12345")
            .field(
                Field::builder("245".to_string(), '1', '0')
                    .subfield_str('a', "Fish & chips <2nd ed.>")
                    .subfield_str('c', "Someone")
                    .build(),
            )
            .field(
                Field::builder("650".to_string(), ' ', '0')
                    .subfield_str('a', "Cooking")
                    .build(),
            )
            .field(
                Field::builder("650".to_string(), ' ', '0')
                    .subfield_str('a', "Fish")
                    .build(),
            )
            .build()
    }

    #[test]
    fn test_record_element_shape() {
        let xml = record_to_marcxml(&make_record()).unwrap();
        assert!(xml.starts_with("<record><leader>00000nam a2200000 i 4500</leader>"));
        assert!(xml.contains(r#"<controlfield tag="001">12345</controlfield>"#));
        assert!(xml.contains(r#"<subfield code="a">Fish &amp; chips &lt;2nd ed.&gt;</subfield>"#));
    }

    #[test]
    fn test_collection_roundtrip() {
        let mut writer = MarcXmlWriter::new(Vec::new());
        writer.write_record(&make_record()).unwrap();
        writer.write_record(&make_record()).unwrap();
        writer.finish().unwrap();

        let xml = String::from_utf8(writer.into_inner()).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<collection xmlns="));
        assert!(xml.ends_with("</collection>\n"));

        let records = marcxml_to_records(&xml).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fields, make_record().fields);
        assert_eq!(records[0].control_fields, make_record().control_fields);
    }

    #[test]
    fn test_empty_collection_is_well_formed() {
        let mut writer = MarcXmlWriter::new(Vec::new());
        writer.finish().unwrap();
        let xml = String::from_utf8(writer.into_inner()).unwrap();
        assert!(marcxml_to_records(&xml).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_forbidden_characters() {
        let mut record = make_record();
        record.fields[0].subfields[0].value = "bell\u{7}".to_string();
        let err = record_to_marcxml(&record).unwrap_err();
        assert!(matches!(err, MarcError::Encode { format: "MARCXML", .. }));

        let mut writer = MarcXmlWriter::new(Vec::new());
        assert!(writer.write_record(&record).is_err());
        assert!(writer.get_ref().is_empty());
    }
}

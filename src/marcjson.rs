//! MARC-in-JSON serialization and deserialization of MARC records.
//!
//! Each record is one JSON object:
//!
//! - `"leader"`: the 24-character leader string
//! - `"fields"`: an array with one single-key object per field, in record order
//!   - control fields (001-009): `{"001": "value"}`
//!   - data fields: `{"245": {"ind1": "1", "ind2": "0", "subfields": [{"a": "..."}]}}`
//!
//! [`MarcJsonEncoder`] writes records either as one JSON array (compact or
//! pretty printed) or as JSON Lines. [`MarcJsonReader`] reads both forms back,
//! as well as any sequence of concatenated objects.

use crate::error::{MarcError, Result};
use crate::formats::FormatReader;
use crate::leader::Leader;
use crate::record::{is_control_tag, Field, Record};
use crate::writer::{RecordEncoder, RecordWriter};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::io::{BufRead, BufReader, Read};

const MARC_JSON: &str = "MARC-in-JSON";

/// Convert a MARC record to a MARC-in-JSON object.
///
/// # Examples
///
/// ```
/// use marcsift::{Field, Leader, Record, marcjson};
///
/// let mut record = Record::new(Leader::default());
/// record.add_control_field("001", "123");
/// let mut field = Field::new("245".to_string(), '1', '0');
/// field.add_subfield('a', "Title".to_string());
/// record.add_field(field);
///
/// let json = marcjson::record_to_marcjson(&record)?;
/// assert_eq!(json["fields"][0]["001"], "123");
/// assert_eq!(json["fields"][1]["245"]["subfields"][0]["a"], "Title");
/// # Ok::<(), marcsift::MarcError>(())
/// ```
///
/// # Errors
///
/// Returns an error if the leader cannot be rendered as 24 characters.
pub fn record_to_marcjson(record: &Record) -> Result<Value> {
    let leader: String = record
        .leader
        .as_bytes()
        .map_err(|e| MarcError::encode(MARC_JSON, e.to_string()))?
        .iter()
        .map(|&b| b as char)
        .collect();

    let mut fields = Vec::with_capacity(record.field_count());
    for cf in &record.control_fields {
        let mut field = Map::new();
        field.insert(cf.tag.clone(), Value::String(cf.value.clone()));
        fields.push(Value::Object(field));
    }

    for field in &record.fields {
        let subfields: Vec<Value> = field
            .subfields
            .iter()
            .map(|sf| {
                let mut obj = Map::new();
                obj.insert(sf.code.to_string(), Value::String(sf.value.clone()));
                Value::Object(obj)
            })
            .collect();

        let mut field_obj = Map::new();
        field_obj.insert(
            field.tag.clone(),
            json!({
                "ind1": field.indicator1.to_string(),
                "ind2": field.indicator2.to_string(),
                "subfields": subfields,
            }),
        );
        fields.push(Value::Object(field_obj));
    }

    Ok(json!({
        "leader": leader,
        "fields": fields,
    }))
}

/// Convert a MARC-in-JSON object to a MARC record.
///
/// # Errors
///
/// Returns an error if the object has no leader, the leader is malformed,
/// or a field does not have the expected shape.
pub fn marcjson_to_record(json: &Value) -> Result<Record> {
    let obj = json
        .as_object()
        .ok_or_else(|| MarcError::InvalidRecord("Expected a JSON object".to_string()))?;

    let leader = obj
        .get("leader")
        .and_then(Value::as_str)
        .ok_or_else(|| MarcError::InvalidRecord("Missing leader".to_string()))?
        .parse::<Leader>()?;
    let mut record = Record::new(leader);

    let Some(fields) = obj.get("fields") else {
        return Ok(record);
    };
    let fields = fields
        .as_array()
        .ok_or_else(|| MarcError::InvalidRecord("\"fields\" must be an array".to_string()))?;

    for item in fields {
        let entry = item
            .as_object()
            .ok_or_else(|| MarcError::InvalidField("Field must be an object".to_string()))?;

        for (tag, value) in entry {
            if is_control_tag(tag) {
                let text = value.as_str().ok_or_else(|| {
                    MarcError::InvalidField(format!("Control field {tag} must be a string"))
                })?;
                record.add_control_field(tag.clone(), text.to_string());
            } else {
                record.add_field(data_field_from_json(tag, value)?);
            }
        }
    }

    Ok(record)
}

fn data_field_from_json(tag: &str, value: &Value) -> Result<Field> {
    let field_obj = value
        .as_object()
        .ok_or_else(|| MarcError::InvalidField(format!("Field {tag} must be an object")))?;

    let indicator = |key: &str| {
        field_obj
            .get(key)
            .and_then(Value::as_str)
            .and_then(|s| s.chars().next())
            .unwrap_or(' ')
    };
    let mut field = Field::new(tag.to_string(), indicator("ind1"), indicator("ind2"));

    if let Some(subfields) = field_obj.get("subfields").and_then(Value::as_array) {
        for sf in subfields {
            let sf_obj = sf.as_object().ok_or_else(|| {
                MarcError::InvalidField(format!("Subfield of {tag} must be an object"))
            })?;
            for (code, value) in sf_obj {
                let code = code.chars().next().ok_or_else(|| {
                    MarcError::InvalidField(format!("Subfield of {tag} has an empty code"))
                })?;
                let text = value.as_str().ok_or_else(|| {
                    MarcError::InvalidField(format!("Subfield {tag}${code} must be a string"))
                })?;
                field.add_subfield(code, text.to_string());
            }
        }
    }
    Ok(field)
}

/// How a stream of MARC-in-JSON records is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonFraming {
    /// One JSON array holding every record.
    #[default]
    Array,
    /// One compact object per line.
    Lines,
}

/// Encoder for MARC-in-JSON output.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarcJsonEncoder {
    framing: JsonFraming,
    pretty: bool,
}

/// Writer for MARC-in-JSON output.
pub type MarcJsonWriter<W> = RecordWriter<MarcJsonEncoder, W>;

impl MarcJsonEncoder {
    /// Create an encoder with the given framing.
    #[must_use]
    pub fn new(framing: JsonFraming) -> Self {
        MarcJsonEncoder {
            framing,
            pretty: false,
        }
    }

    /// Indent array output. Ignored for JSON Lines.
    #[must_use]
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    fn is_pretty(&self) -> bool {
        self.pretty && self.framing == JsonFraming::Array
    }
}

impl RecordEncoder for MarcJsonEncoder {
    fn name(&self) -> &'static str {
        MARC_JSON
    }

    fn encode_into(&self, record: &Record, out: &mut Vec<u8>) -> Result<()> {
        let value = record_to_marcjson(record)?;
        let written = if self.is_pretty() {
            serde_json::to_writer_pretty(&mut *out, &value)
        } else {
            serde_json::to_writer(&mut *out, &value)
        };
        written.map_err(|e| MarcError::encode(MARC_JSON, e.to_string()))?;
        if self.framing == JsonFraming::Lines {
            out.push(b'\n');
        }
        Ok(())
    }

    fn header(&self) -> Vec<u8> {
        match (self.framing, self.is_pretty()) {
            (JsonFraming::Lines, _) => Vec::new(),
            (JsonFraming::Array, true) => b"[\n".to_vec(),
            (JsonFraming::Array, false) => b"[".to_vec(),
        }
    }

    fn separator(&self) -> Vec<u8> {
        match (self.framing, self.is_pretty()) {
            (JsonFraming::Lines, _) => Vec::new(),
            (JsonFraming::Array, true) => b",\n".to_vec(),
            (JsonFraming::Array, false) => b",".to_vec(),
        }
    }

    fn footer(&self) -> Vec<u8> {
        match (self.framing, self.is_pretty()) {
            (JsonFraming::Lines, _) => Vec::new(),
            (JsonFraming::Array, true) => b"\n]\n".to_vec(),
            (JsonFraming::Array, false) => b"]\n".to_vec(),
        }
    }
}

/// Reader for MARC-in-JSON input.
///
/// Accepts record objects separated by whitespace (JSON Lines included) and
/// top-level arrays of record objects, in any mix. The reader finds each
/// object's extent itself and parses one object at a time, so only one
/// record is held in memory whichever framing the input uses.
pub struct MarcJsonReader<R: Read> {
    source: BufReader<R>,
    framing: Framing,
    object: Vec<u8>,
    byte_offset: u64,
    records_read: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    TopLevel,
    /// Inside a top-level array. `after_element` is set once an element has
    /// been started, so the next one must follow a comma.
    Array { after_element: bool },
    Done,
}

impl<R: Read> MarcJsonReader<R> {
    /// Create a new reader over `reader`.
    pub fn new(reader: R) -> Self {
        MarcJsonReader {
            source: BufReader::new(reader),
            framing: Framing::TopLevel,
            object: Vec::new(),
            byte_offset: 0,
            records_read: 0,
        }
    }

    /// Read the next record.
    ///
    /// # Errors
    ///
    /// An object that is not valid JSON, or valid JSON but not a valid
    /// record, is a record-scoped error and reading may continue with the
    /// next object. Input whose framing cannot be followed (stray text
    /// between objects, an unterminated object or array) ends the stream
    /// with [`MarcError::Desynchronized`].
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        loop {
            match self.framing {
                Framing::Done => return Ok(None),
                Framing::TopLevel => match self.skip_whitespace()? {
                    None => {
                        self.framing = Framing::Done;
                        return Ok(None);
                    },
                    Some(b'[') => {
                        self.bump();
                        self.framing = Framing::Array {
                            after_element: false,
                        };
                    },
                    Some(b'{') => return self.next_object().map(Some),
                    Some(other) => return Err(self.unexpected(Some(other), "'{' or '['")),
                },
                Framing::Array { after_element } => match self.skip_whitespace()? {
                    Some(b']') => {
                        self.bump();
                        self.framing = Framing::TopLevel;
                    },
                    Some(b'{') if !after_element => {
                        self.framing = Framing::Array {
                            after_element: true,
                        };
                        return self.next_object().map(Some);
                    },
                    Some(b',') if after_element => {
                        self.bump();
                        return match self.skip_whitespace()? {
                            Some(b'{') => self.next_object().map(Some),
                            other => Err(self.unexpected(other, "a record object after ','")),
                        };
                    },
                    other => return Err(self.unexpected(other, "',' or ']'")),
                },
            }
        }
    }

    /// Copy the object starting at the next byte into `self.object` and
    /// decode it.
    fn next_object(&mut self) -> Result<Record> {
        self.object.clear();
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        loop {
            let Some(b) = self.next_byte()? else {
                return Err(self.desynchronized("input ends inside a record object".to_string()));
            };
            self.object.push(b);
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {},
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' | b'[' => depth += 1,
                b'}' | b']' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                },
                _ => {},
            }
        }

        let value: Value = serde_json::from_slice(&self.object)
            .map_err(|e| MarcError::InvalidRecord(format!("malformed JSON: {e}")))?;
        let record = marcjson_to_record(&value)?;
        self.records_read += 1;
        Ok(record)
    }

    fn skip_whitespace(&mut self) -> Result<Option<u8>> {
        loop {
            let Some(&b) = self.source.fill_buf()?.first() else {
                return Ok(None);
            };
            if !b.is_ascii_whitespace() {
                return Ok(Some(b));
            }
            self.bump();
        }
    }

    fn next_byte(&mut self) -> Result<Option<u8>> {
        let Some(&b) = self.source.fill_buf()?.first() else {
            return Ok(None);
        };
        self.bump();
        Ok(Some(b))
    }

    fn bump(&mut self) {
        self.source.consume(1);
        self.byte_offset += 1;
    }

    fn unexpected(&mut self, found: Option<u8>, expected: &str) -> MarcError {
        let found = match found {
            Some(b) => format!("{:?}", char::from(b)),
            None => "end of input".to_string(),
        };
        self.desynchronized(format!(
            "expected {expected} at byte {}, found {found}",
            self.byte_offset
        ))
    }

    fn desynchronized(&mut self, message: String) -> MarcError {
        self.framing = Framing::Done;
        MarcError::Desynchronized(message)
    }
}

impl<R: Read> std::fmt::Debug for MarcJsonReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarcJsonReader")
            .field("framing", &self.framing)
            .field("byte_offset", &self.byte_offset)
            .field("records_read", &self.records_read)
            .finish_non_exhaustive()
    }
}

impl<R: Read> FormatReader for MarcJsonReader<R> {
    fn read_record(&mut self) -> Result<Option<Record>> {
        MarcJsonReader::read_record(self)
    }

    fn records_read(&self) -> Option<usize> {
        Some(self.records_read)
    }

    fn byte_offset(&self) -> Option<u64> {
        Some(self.byte_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{FormatReaderExt, FormatWriter};
    use std::io::Cursor;

    fn make_record(id: &str) -> Record {
        Record::builder(Leader::from_bytes(b"00000nam a2200000 i 4500").unwrap())
            .control_field_str("001", id)
            .field(
                Field::builder("245".to_string(), '1', '0')
                    .subfield_str('a', "Title")
                    .subfield_str('a', "Second a")
                    .build(),
            )
            .field(
                Field::builder("650".to_string(), ' ', ' ')
                    .subfield_str('a', "Subject")
                    .build(),
            )
            .build()
    }

    fn write_all(encoder: MarcJsonEncoder, records: &[Record]) -> Vec<u8> {
        let mut writer = MarcJsonWriter::with_encoder(encoder, Vec::new());
        writer.write_batch(records).unwrap();
        writer.finish().unwrap();
        writer.into_inner()
    }

    #[test]
    fn test_record_to_marcjson_shape() {
        let json = record_to_marcjson(&make_record("1")).unwrap();
        assert_eq!(json["leader"], "00000nam a2200000 i 4500");
        assert_eq!(json["fields"][0]["001"], "1");
        assert_eq!(json["fields"][1]["245"]["ind1"], "1");
        assert_eq!(json["fields"][1]["245"]["subfields"][1]["a"], "Second a");
        assert_eq!(json["fields"][2]["650"]["ind2"], " ");
    }

    #[test]
    fn test_array_framing_reads_back() {
        let records = vec![make_record("1"), make_record("2")];
        let bytes = write_all(MarcJsonEncoder::default(), &records);
        assert_eq!(bytes.first(), Some(&b'['));

        let mut reader = MarcJsonReader::new(Cursor::new(bytes));
        let read: Vec<Record> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(read, records);
        assert_eq!(reader.records_read(), Some(2));
    }

    #[test]
    fn test_pretty_and_empty_arrays_are_valid_json() {
        let bytes = write_all(
            MarcJsonEncoder::new(JsonFraming::Array).with_pretty(true),
            &[make_record("1"), make_record("2")],
        );
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.as_array().map(Vec::len), Some(2));

        let empty = write_all(MarcJsonEncoder::default(), &[]);
        assert_eq!(empty, b"[]\n");
    }

    #[test]
    fn test_json_lines() {
        let bytes = write_all(
            MarcJsonEncoder::new(JsonFraming::Lines),
            &[make_record("1"), make_record("2")],
        );
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert_eq!(text.lines().count(), 2);

        let mut reader = MarcJsonReader::new(Cursor::new(bytes));
        assert_eq!(reader.read_all().unwrap().len(), 2);
    }

    #[test]
    fn test_bad_record_is_record_scoped() {
        let input = br#"{"fields": []}
{"leader": "00000nam a2200000 i 4500", "fields": [{"001": "ok"}]}"#;
        let mut reader = MarcJsonReader::new(Cursor::new(input.to_vec()));
        let err = reader.read_record().unwrap_err();
        assert!(err.is_record_scoped());
        let record = reader.read_record().unwrap().unwrap();
        assert_eq!(record.control_number(), Some("ok"));
    }

    #[test]
    fn test_malformed_json_desynchronizes() {
        let mut reader = MarcJsonReader::new(Cursor::new(b"{\"leader\": ".to_vec()));
        assert!(matches!(
            reader.read_record().unwrap_err(),
            MarcError::Desynchronized(_)
        ));
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_array_elements_stream_one_at_a_time() {
        let bytes = write_all(
            MarcJsonEncoder::new(JsonFraming::Array),
            &[make_record("a1"), make_record("a2"), make_record("a3")],
        );
        let total = bytes.len() as u64;
        let mut reader = MarcJsonReader::new(Cursor::new(bytes));

        let first = reader.read_record().unwrap().unwrap();
        assert_eq!(first.control_number(), Some("a1"));
        let after_first = FormatReader::byte_offset(&reader).unwrap();
        assert!(after_first > 1 && after_first < total / 2, "offset {after_first} of {total}");

        assert_eq!(reader.read_all().unwrap().len(), 2);
        assert_eq!(FormatReader::byte_offset(&reader), Some(total));
    }

    #[test]
    fn test_truncated_array_yields_leading_records() {
        let mut bytes = write_all(
            MarcJsonEncoder::new(JsonFraming::Array),
            &[make_record("t1"), make_record("t2")],
        );
        bytes.truncate(bytes.len() - 10);
        let mut reader = MarcJsonReader::new(Cursor::new(bytes));

        assert_eq!(reader.read_record().unwrap().unwrap().control_number(), Some("t1"));
        assert!(matches!(
            reader.read_record().unwrap_err(),
            MarcError::Desynchronized(_)
        ));
        assert!(reader.read_record().unwrap().is_none());
        assert_eq!(FormatReader::records_read(&reader), Some(1));
    }

    #[test]
    fn test_bad_array_element_is_record_scoped() {
        let input = br#"[{"fields": []}, {"leader": "00000nam a2200000 i 4500", "fields": [{"001": "ok"}]}]"#;
        let mut reader = MarcJsonReader::new(Cursor::new(input.to_vec()));
        let err = reader.read_record().unwrap_err();
        assert!(!matches!(err, MarcError::Desynchronized(_)), "got: {err}");
        assert_eq!(reader.read_record().unwrap().unwrap().control_number(), Some("ok"));
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_array_then_object_and_strings_with_braces() {
        let input = concat!(
            r#"[{"leader": "00000nam a2200000 i 4500", "fields": [{"001": "in \"}{ array"}]}]"#,
            "\n",
            r#"{"leader": "00000nam a2200000 i 4500", "fields": [{"001": "after ]"}]}"#,
        );
        let mut reader = MarcJsonReader::new(Cursor::new(input.as_bytes().to_vec()));
        let ids: Vec<String> = reader
            .records()
            .map(|r| r.unwrap().control_number().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["in \"}{ array", "after ]"]);
    }

    #[test]
    fn test_stray_comma_desynchronizes() {
        let input = br#"[, {"leader": "00000nam a2200000 i 4500", "fields": []}]"#;
        let mut reader = MarcJsonReader::new(Cursor::new(input.to_vec()));
        assert!(matches!(
            reader.read_record().unwrap_err(),
            MarcError::Desynchronized(_)
        ));
        assert!(reader.read_record().unwrap().is_none());
    }
}

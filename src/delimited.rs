//! Flat delimited (CSV/TSV) output of MARC records.
//!
//! Every record becomes a run of rows with the columns
//! `id,tag,ind1,ind2,code,value`:
//!
//! - one `LDR` row holding the leader string,
//! - one row per control field,
//! - one row per subfield of each data field (a data field without
//!   subfields still gets one row, with empty `code` and `value`).
//!
//! `id` is the record's 001 value (empty if absent), so rows can be grouped
//! back into records. The header row is written once per output.
//!
//! # Examples
//!
//! ```
//! use marcsift::{Field, Leader, Record};
//! use marcsift::delimited::DelimitedWriter;
//! use marcsift::formats::FormatWriter;
//!
//! let record = Record::builder(Leader::default())
//!     .control_field_str("001", "r1")
//!     .field(Field::builder("245".to_string(), '1', '0').subfield_str('a', "Title, with comma").build())
//!     .build();
//!
//! let mut writer = DelimitedWriter::new(Vec::new());
//! writer.write_record(&record)?;
//! writer.finish()?;
//!
//! let text = String::from_utf8(writer.into_inner()).unwrap();
//! let lines: Vec<&str> = text.lines().collect();
//! assert_eq!(lines[0], "id,tag,ind1,ind2,code,value");
//! assert_eq!(lines[3], "r1,245,1,0,a,\"Title, with comma\"");
//! # Ok::<(), marcsift::MarcError>(())
//! ```

use crate::error::{MarcError, Result};
use crate::record::Record;
use crate::writer::{RecordEncoder, RecordWriter};

const COLUMNS: [&str; 6] = ["id", "tag", "ind1", "ind2", "code", "value"];

/// Encoder for one-row-per-value delimited output.
#[derive(Debug, Clone, Copy)]
pub struct DelimitedEncoder {
    delimiter: u8,
    header: bool,
}

/// Writer for delimited output.
pub type DelimitedWriter<W> = RecordWriter<DelimitedEncoder, W>;

impl Default for DelimitedEncoder {
    fn default() -> Self {
        Self::csv()
    }
}

impl DelimitedEncoder {
    /// Comma-separated values with RFC 4180 quoting.
    #[must_use]
    pub fn csv() -> Self {
        DelimitedEncoder {
            delimiter: b',',
            header: true,
        }
    }

    /// Tab-separated values.
    #[must_use]
    pub fn tsv() -> Self {
        DelimitedEncoder {
            delimiter: b'\t',
            header: true,
        }
    }

    /// Whether to write the column header row.
    #[must_use]
    pub fn with_header(mut self, header: bool) -> Self {
        self.header = header;
        self
    }

    fn name_for(delimiter: u8) -> &'static str {
        if delimiter == b'\t' {
            "TSV"
        } else {
            "CSV"
        }
    }

    fn rows_into<'a, I>(&self, rows: I, out: &mut Vec<u8>) -> Result<()>
    where
        I: IntoIterator<Item = [&'a str; 6]>,
    {
        let name = Self::name_for(self.delimiter);
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .from_writer(out);
        for row in rows {
            writer
                .write_record(row)
                .map_err(|e| MarcError::encode(name, e.to_string()))?;
        }
        writer
            .flush()
            .map_err(|e| MarcError::encode(name, e.to_string()))
    }
}

impl RecordEncoder for DelimitedEncoder {
    fn name(&self) -> &'static str {
        Self::name_for(self.delimiter)
    }

    fn encode_into(&self, record: &Record, out: &mut Vec<u8>) -> Result<()> {
        let id = record.control_number().unwrap_or("");
        let leader: String = record
            .leader
            .as_bytes()
            .map_err(|e| MarcError::encode(self.name(), e.to_string()))?
            .iter()
            .map(|&b| b as char)
            .collect();

        let indicators: Vec<(String, String)> = record
            .fields
            .iter()
            .map(|f| (f.indicator1.to_string(), f.indicator2.to_string()))
            .collect();
        let codes: Vec<Vec<String>> = record
            .fields
            .iter()
            .map(|f| f.subfields.iter().map(|sf| sf.code.to_string()).collect())
            .collect();

        let mut rows: Vec<[&str; 6]> = Vec::with_capacity(1 + record.field_count());
        rows.push([id, "LDR", "", "", "", &leader]);
        for cf in &record.control_fields {
            rows.push([id, &cf.tag, "", "", "", &cf.value]);
        }
        for ((field, (ind1, ind2)), codes) in record.fields.iter().zip(&indicators).zip(&codes) {
            if field.subfields.is_empty() {
                rows.push([id, &field.tag, ind1, ind2, "", ""]);
            }
            for (sf, code) in field.subfields.iter().zip(codes) {
                rows.push([id, &field.tag, ind1, ind2, code, &sf.value]);
            }
        }

        self.rows_into(rows, out)
    }

    fn header(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if self.header && self.rows_into([COLUMNS], &mut out).is_err() {
            out.clear();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::FormatWriter;
    use crate::leader::Leader;
    use crate::record::Field;

    fn make_record() -> Record {
        Record::builder(Leader::from_bytes(b"00000nam a2200000 i 4500").unwrap())
            .control_field_str("001", "rec1")
            .control_field_str("008", "900101s1990")
            .field(
                Field::builder("245".to_string(), '1', '0')
                    .subfield_str('a', "Quoted \"title\"")
                    .subfield_str('c', "Author")
                    .build(),
            )
            .field(Field::new("500".to_string(), ' ', ' '))
            .build()
    }

    fn parse(bytes: &[u8], delimiter: u8) -> Vec<Vec<String>> {
        csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .from_reader(bytes)
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn test_rows_per_record() {
        let bytes = DelimitedEncoder::csv().encode(&make_record()).unwrap();
        let rows = parse(&bytes, b',');
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0], vec!["rec1", "LDR", "", "", "", "00000nam a2200000 i 4500"]);
        assert_eq!(rows[1], vec!["rec1", "001", "", "", "", "rec1"]);
        assert_eq!(rows[3], vec!["rec1", "245", "1", "0", "a", "Quoted \"title\""]);
        assert_eq!(rows[4][4], "c");
        assert_eq!(rows[5], vec!["rec1", "500", " ", " ", "", ""]);
    }

    #[test]
    fn test_header_written_once() {
        let mut writer = DelimitedWriter::new(Vec::new());
        writer.write_record(&make_record()).unwrap();
        writer.write_record(&make_record()).unwrap();
        writer.finish().unwrap();

        let rows = parse(writer.get_ref(), b',');
        let headers = rows.iter().filter(|r| r[0] == "id").count();
        assert_eq!(headers, 1);
        assert_eq!(rows.len(), 1 + 2 * 6);
    }

    #[test]
    fn test_tsv_without_header() {
        let encoder = DelimitedEncoder::tsv().with_header(false);
        assert_eq!(encoder.name(), "TSV");
        assert!(encoder.header().is_empty());

        let bytes = encoder.encode(&make_record()).unwrap();
        let rows = parse(&bytes, b'\t');
        assert_eq!(rows[2], vec!["rec1", "008", "", "", "", "900101s1990"]);
    }

    #[test]
    fn test_missing_control_number_gives_empty_id() {
        let mut record = make_record();
        record.control_fields.remove(0);
        let rows = parse(&DelimitedEncoder::csv().encode(&record).unwrap(), b',');
        assert!(rows.iter().all(|r| r[0].is_empty()));
    }
}

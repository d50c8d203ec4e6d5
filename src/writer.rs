//! Writing MARC records.
//!
//! Output is split in two layers. A [`RecordEncoder`] turns one record into
//! bytes and knows the framing of its representation (a header before the
//! first record, separators between records, a footer at the end). A
//! [`RecordWriter`] owns the sink and applies that framing. Because a record
//! is encoded in full before any byte reaches the sink, a record that cannot
//! be represented leaves the output untouched.
//!
//! [`Iso2709Encoder`] is the binary encoder; [`MarcWriter`] is the writer for
//! it.
//!
//! # Examples
//!
//! ```
//! use marcsift::{Field, Leader, MarcWriter, Record};
//! use marcsift::formats::FormatWriter;
//!
//! let mut record = Record::new(Leader::default());
//! let mut field = Field::new("245".to_string(), '1', '0');
//! field.add_subfield('a', "Title".to_string());
//! record.add_field(field);
//!
//! let mut writer = MarcWriter::new(Vec::new());
//! writer.write_record(&record)?;
//! writer.finish()?;
//! assert_eq!(writer.get_ref().last(), Some(&0x1D));
//! # Ok::<(), marcsift::MarcError>(())
//! ```

use crate::error::{MarcError, Result};
use crate::formats::FormatWriter;
use crate::leader::{Leader, LEADER_LEN, MAX_RECORD_LEN};
use crate::reader::{FIELD_TERMINATOR, RECORD_TERMINATOR, SUBFIELD_DELIMITER};
use crate::record::Record;
use std::io::Write;

const MAX_FIELD_LEN: usize = 9_999;

/// Serializes single records in one output representation.
pub trait RecordEncoder: std::fmt::Debug {
    /// Human-readable name of the representation, used in errors and logs.
    fn name(&self) -> &'static str;

    /// Append the encoding of `record` to `out`.
    ///
    /// On error `out` may hold a partial encoding; callers discard it.
    ///
    /// # Errors
    ///
    /// Returns [`MarcError::Encode`] if the record cannot be represented.
    fn encode_into(&self, record: &Record, out: &mut Vec<u8>) -> Result<()>;

    /// Encode `record` into a fresh buffer.
    ///
    /// # Errors
    ///
    /// Returns [`MarcError::Encode`] if the record cannot be represented.
    fn encode(&self, record: &Record) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.encode_into(record, &mut out)?;
        Ok(out)
    }

    /// Bytes written once before the first record (or at finish if there
    /// were no records).
    fn header(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Bytes written between two consecutive records.
    fn separator(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Bytes written once at finish.
    fn footer(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// A [`FormatWriter`] that frames the output of any [`RecordEncoder`].
#[derive(Debug)]
pub struct RecordWriter<E: RecordEncoder, W: Write> {
    encoder: E,
    writer: W,
    scratch: Vec<u8>,
    records_written: usize,
    started: bool,
    finished: bool,
}

/// Writer for ISO 2709 binary MARC format.
pub type MarcWriter<W> = RecordWriter<Iso2709Encoder, W>;

impl<E: RecordEncoder + Default, W: Write> RecordWriter<E, W> {
    /// Create a writer using the encoder's default settings.
    pub fn new(writer: W) -> Self {
        Self::with_encoder(E::default(), writer)
    }
}

impl<E: RecordEncoder, W: Write> RecordWriter<E, W> {
    /// Create a writer with a configured encoder.
    pub fn with_encoder(encoder: E, writer: W) -> Self {
        RecordWriter {
            encoder,
            writer,
            scratch: Vec::new(),
            records_written: 0,
            started: false,
            finished: false,
        }
    }

    /// The encoder in use.
    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Borrow the underlying sink.
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Consume the writer and return the underlying sink.
    ///
    /// Call [`finish`](FormatWriter::finish) first or the footer is missing.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn start(&mut self) -> Result<()> {
        if !self.started {
            self.writer.write_all(&self.encoder.header())?;
            self.started = true;
        }
        Ok(())
    }
}

impl<E: RecordEncoder, W: Write + std::fmt::Debug> FormatWriter for RecordWriter<E, W> {
    fn write_record(&mut self, record: &Record) -> Result<()> {
        if self.finished {
            return Err(MarcError::InvalidRecord(
                "Cannot write to a finished writer".to_string(),
            ));
        }

        self.scratch.clear();
        self.encoder.encode_into(record, &mut self.scratch)?;

        if self.started {
            self.writer.write_all(&self.encoder.separator())?;
        } else {
            self.start()?;
        }
        self.writer.write_all(&self.scratch)?;
        self.records_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.start()?;
        self.writer.write_all(&self.encoder.footer())?;
        self.writer.flush()?;
        self.finished = true;
        Ok(())
    }

    fn records_written(&self) -> Option<usize> {
        Some(self.records_written)
    }
}

/// Encoder for ISO 2709 binary records.
///
/// The directory, base address and record length are always recomputed from
/// the field content; the corresponding leader values of the input record
/// are ignored. Control fields are written before data fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct Iso2709Encoder;

const ISO2709: &str = "ISO 2709";

impl RecordEncoder for Iso2709Encoder {
    fn name(&self) -> &'static str {
        ISO2709
    }

    fn encode_into(&self, record: &Record, out: &mut Vec<u8>) -> Result<()> {
        let mut directory = Vec::with_capacity(12 * record.field_count() + 1);
        let mut data = Vec::new();

        for cf in &record.control_fields {
            check_tag(&cf.tag)?;
            let start = data.len();
            push_value(&mut data, &cf.tag, &cf.value)?;
            data.push(FIELD_TERMINATOR);
            push_entry(&mut directory, &cf.tag, data.len() - start, start)?;
        }

        for field in &record.fields {
            check_tag(&field.tag)?;
            let start = data.len();
            data.push(structural_byte(field.indicator1, &field.tag, "indicator")?);
            data.push(structural_byte(field.indicator2, &field.tag, "indicator")?);
            for subfield in &field.subfields {
                data.push(SUBFIELD_DELIMITER);
                data.push(structural_byte(subfield.code, &field.tag, "subfield code")?);
                push_value(&mut data, &field.tag, &subfield.value)?;
            }
            data.push(FIELD_TERMINATOR);
            push_entry(&mut directory, &field.tag, data.len() - start, start)?;
        }
        directory.push(FIELD_TERMINATOR);

        let base_address = LEADER_LEN + directory.len();
        let record_length = base_address + data.len() + 1;
        if record_length > MAX_RECORD_LEN {
            return Err(MarcError::encode(
                ISO2709,
                format!("record would be {record_length} bytes, over the {MAX_RECORD_LEN}-byte limit"),
            ));
        }

        let leader = Leader {
            record_length: u32::try_from(record_length)
                .map_err(|_| MarcError::encode(ISO2709, "record length overflow"))?,
            data_base_address: u32::try_from(base_address)
                .map_err(|_| MarcError::encode(ISO2709, "base address overflow"))?,
            ..record.leader.clone()
        };
        let leader_bytes = leader
            .as_bytes()
            .map_err(|e| MarcError::encode(ISO2709, e.to_string()))?;

        out.reserve(record_length);
        out.extend_from_slice(&leader_bytes);
        out.extend_from_slice(&directory);
        out.extend_from_slice(&data);
        out.push(RECORD_TERMINATOR);
        Ok(())
    }
}

/// Encode one record to ISO 2709 bytes.
///
/// # Errors
///
/// Returns [`MarcError::Encode`] if the record exceeds the format's limits.
pub fn encode_record(record: &Record) -> Result<Vec<u8>> {
    Iso2709Encoder.encode(record)
}

fn is_structural(byte: u8) -> bool {
    matches!(byte, RECORD_TERMINATOR | FIELD_TERMINATOR | SUBFIELD_DELIMITER)
}

fn check_tag(tag: &str) -> Result<()> {
    if tag.len() != 3 || tag.bytes().any(is_structural) {
        return Err(MarcError::encode(
            ISO2709,
            format!("tag {tag:?} is not 3 bytes of tag characters"),
        ));
    }
    Ok(())
}

fn structural_byte(c: char, tag: &str, what: &str) -> Result<u8> {
    match u8::try_from(u32::from(c)) {
        Ok(byte) if !is_structural(byte) => Ok(byte),
        _ => Err(MarcError::encode(
            ISO2709,
            format!("{what} {c:?} in field {tag} is not a single non-delimiter byte"),
        )),
    }
}

fn push_value(data: &mut Vec<u8>, tag: &str, value: &str) -> Result<()> {
    if value.bytes().any(is_structural) {
        return Err(MarcError::encode(
            ISO2709,
            format!("a value in field {tag} contains a structural delimiter"),
        ));
    }
    data.extend_from_slice(value.as_bytes());
    Ok(())
}

fn push_entry(directory: &mut Vec<u8>, tag: &str, length: usize, start: usize) -> Result<()> {
    if length > MAX_FIELD_LEN {
        return Err(MarcError::encode(
            ISO2709,
            format!("field {tag} is {length} bytes, over the {MAX_FIELD_LEN}-byte limit"),
        ));
    }
    if start > MAX_RECORD_LEN {
        return Err(MarcError::encode(
            ISO2709,
            format!("field {tag} starts at offset {start}, past the 5-digit limit"),
        ));
    }
    directory.extend_from_slice(tag.as_bytes());
    directory.extend_from_slice(format!("{length:04}{start:05}").as_bytes());
    Ok(())
}

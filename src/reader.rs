//! Reading MARC records from binary streams.
//!
//! This module provides [`MarcReader`] for reading ISO 2709 formatted MARC records
//! from any source that implements [`std::io::Read`].
//!
//! The reader consumes exactly one record's declared span per call. Once the
//! span has been read, any problem inside it is reported for that record alone
//! and the next call starts cleanly at the following record. If the leader's
//! length cannot be parsed the next record's start is unknown; the reader then
//! either reports [`MarcError::Desynchronized`] and stops, or, with
//! [`MarcReader::with_resync`], skips forward to the next record terminator.
//!
//! # Examples
//!
//! Reading records from a file:
//!
//! ```no_run
//! use marcsift::MarcReader;
//! use std::fs::File;
//!
//! let file = File::open("records.mrc")?;
//! let mut reader = MarcReader::new(file);
//!
//! while let Some(record) = reader.read_record()? {
//!     println!("Record type: {}", record.leader.record_type);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::error::{MarcError, Result};
use crate::formats::FormatReader;
use crate::leader::{Leader, LEADER_LEN};
use crate::record::{is_control_tag, Field, Record};
use crate::recovery::{RecoveryContext, RecoveryMode};
use std::io::{ErrorKind, Read};

/// Terminates the directory and every field.
pub const FIELD_TERMINATOR: u8 = 0x1E;
/// Introduces each subfield inside a data field.
pub const SUBFIELD_DELIMITER: u8 = 0x1F;
/// Terminates every record.
pub const RECORD_TERMINATOR: u8 = 0x1D;

const DIRECTORY_ENTRY_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Ready,
    Exhausted,
    Desynchronized,
}

/// Reader for ISO 2709 binary MARC format.
///
/// `MarcReader` reads one MARC record at a time from any source implementing
/// [`std::io::Read`], reusing one buffer for every record.
///
/// # Examples
///
/// ```
/// use marcsift::MarcReader;
/// use std::io::Cursor;
///
/// let mut reader = MarcReader::new(Cursor::new(Vec::new()));
/// assert!(reader.read_record().unwrap().is_none());
/// ```
#[derive(Debug)]
pub struct MarcReader<R: Read> {
    reader: R,
    recovery_mode: RecoveryMode,
    resync: bool,
    state: ReaderState,
    records_read: usize,
    fields_skipped: usize,
    bytes_consumed: u64,
    buffer: Vec<u8>,
    pushback: Vec<u8>,
}

impl<R: Read> MarcReader<R> {
    /// Create a new MARC reader.
    pub fn new(reader: R) -> Self {
        MarcReader {
            reader,
            recovery_mode: RecoveryMode::Strict,
            resync: false,
            state: ReaderState::Ready,
            records_read: 0,
            fields_skipped: 0,
            bytes_consumed: 0,
            buffer: Vec::new(),
            pushback: Vec::new(),
        }
    }

    /// Set the recovery mode for malformed fields.
    ///
    /// # Examples
    ///
    /// ```
    /// use marcsift::{MarcReader, RecoveryMode};
    /// use std::io::Cursor;
    ///
    /// let reader = MarcReader::new(Cursor::new(Vec::new()))
    ///     .with_recovery_mode(RecoveryMode::Lenient);
    /// ```
    #[must_use]
    pub fn with_recovery_mode(mut self, mode: RecoveryMode) -> Self {
        self.recovery_mode = mode;
        self
    }

    /// Skip to the next record terminator when a leader's length is unreadable.
    ///
    /// Without this the reader reports [`MarcError::Desynchronized`] and ends
    /// the stream. With it, the damaged bytes are discarded and reported as a
    /// single [`MarcError::InvalidLeader`].
    #[must_use]
    pub fn with_resync(mut self, resync: bool) -> Self {
        self.resync = resync;
        self
    }

    /// Number of records decoded successfully so far.
    #[must_use]
    pub fn records_read(&self) -> usize {
        self.records_read
    }

    /// Number of malformed fields skipped in lenient mode.
    #[must_use]
    pub fn fields_skipped(&self) -> usize {
        self.fields_skipped
    }

    /// Bytes consumed from the source so far. Between calls this is the
    /// offset at which the next record starts.
    #[must_use]
    pub fn byte_offset(&self) -> u64 {
        self.bytes_consumed
    }

    /// Consume the reader and return the underlying source.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Read a single MARC record.
    ///
    /// Returns `Ok(Some(record))` if a record was read, `Ok(None)` at the end of
    /// the stream, or `Err` if this record could not be decoded. After a
    /// record-scoped error the next call continues with the following record;
    /// after a stream-scoped error every later call returns `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is malformed, the stream ends inside a
    /// record, record boundaries are lost, or an I/O error occurs.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        if self.state != ReaderState::Ready {
            return Ok(None);
        }

        let mut leader_bytes = [0u8; LEADER_LEN];
        let got = self.fill(&mut leader_bytes)?;
        if got == 0 {
            self.state = ReaderState::Exhausted;
            return Ok(None);
        }
        if got < LEADER_LEN {
            self.state = ReaderState::Exhausted;
            return Err(MarcError::TruncatedRecord(format!(
                "stream ended {got} bytes into a leader"
            )));
        }

        let record_length = match Leader::peek_record_length(&leader_bytes) {
            Ok(len) if len > LEADER_LEN => len,
            Ok(len) => {
                return self.lost_boundary(
                    format!("declared record length {len} cannot hold a leader"),
                    &leader_bytes,
                )
            },
            Err(e) => return self.lost_boundary(e.to_string(), &leader_bytes),
        };

        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.clear();
        buffer.extend_from_slice(&leader_bytes);
        buffer.resize(record_length, 0);
        let body = self.fill(&mut buffer[LEADER_LEN..]);
        let result = match body {
            Ok(got) if got < record_length - LEADER_LEN => {
                self.state = ReaderState::Exhausted;
                Err(MarcError::TruncatedRecord(format!(
                    "leader declares {record_length} bytes but the stream ended after {}",
                    LEADER_LEN + got
                )))
            },
            Ok(_) => {
                let mut ctx = RecoveryContext::new(self.recovery_mode);
                let decoded = decode_record_with(&buffer, &mut ctx);
                self.fields_skipped += ctx.recovery_messages.len();
                for message in &ctx.recovery_messages {
                    tracing::debug!(record = self.records_read, %message, "skipped malformed field");
                }
                decoded.map(|record| {
                    self.records_read += 1;
                    Some(record)
                })
            },
            Err(e) => Err(e),
        };
        self.buffer = buffer;
        result
    }

    /// Handle a leader whose record length is unusable.
    fn lost_boundary(&mut self, reason: String, leader_bytes: &[u8]) -> Result<Option<Record>> {
        if !self.resync {
            self.state = ReaderState::Desynchronized;
            return Err(MarcError::Desynchronized(reason));
        }

        if let Some(pos) = memchr::memchr(RECORD_TERMINATOR, leader_bytes) {
            let rest = &leader_bytes[pos + 1..];
            self.pushback.extend(rest.iter().rev());
            self.bytes_consumed -= rest.len() as u64;
        } else {
            let mut byte = [0u8; 1];
            loop {
                if self.fill(&mut byte)? == 0 {
                    self.state = ReaderState::Exhausted;
                    break;
                }
                if byte[0] == RECORD_TERMINATOR {
                    break;
                }
            }
        }
        tracing::debug!(offset = self.bytes_consumed, "resynchronized after unreadable leader");
        Err(MarcError::InvalidLeader(format!(
            "{reason}; skipped to the next record terminator"
        )))
    }

    /// Fill `buf` from pushed-back bytes first, then the source. Returns the
    /// number of bytes placed, which is short only at end of stream.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            if let Some(byte) = self.pushback.pop() {
                buf[filled] = byte;
                filled += 1;
                continue;
            }
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => {
                    self.state = ReaderState::Exhausted;
                    return Err(MarcError::IoError(e));
                },
            }
        }
        self.bytes_consumed += filled as u64;
        Ok(filled)
    }
}

impl<R: Read + std::fmt::Debug> FormatReader for MarcReader<R> {
    fn read_record(&mut self) -> Result<Option<Record>> {
        MarcReader::read_record(self)
    }

    fn records_read(&self) -> Option<usize> {
        Some(self.records_read)
    }

    fn byte_offset(&self) -> Option<u64> {
        Some(self.bytes_consumed)
    }
}

/// Decode one complete ISO 2709 record from `bytes`.
///
/// `bytes` must be exactly the record's declared span, leader through record
/// terminator.
///
/// # Errors
///
/// Returns an error if the leader, directory or any field is malformed.
/// Malformed fields are skipped instead when `mode` is lenient.
pub fn decode_record(bytes: &[u8], mode: RecoveryMode) -> Result<Record> {
    decode_record_with(bytes, &mut RecoveryContext::new(mode))
}

fn decode_record_with(bytes: &[u8], ctx: &mut RecoveryContext) -> Result<Record> {
    let leader = Leader::from_bytes(bytes)?;
    leader.validate_for_reading()?;

    let declared = leader.record_length as usize;
    if declared != bytes.len() {
        return Err(MarcError::LengthMismatch {
            declared,
            detail: format!("got {} bytes", bytes.len()),
        });
    }
    if bytes[declared - 1] != RECORD_TERMINATOR {
        return Err(MarcError::LengthMismatch {
            declared,
            detail: "the last declared byte is not a record terminator".to_string(),
        });
    }

    let base = leader.data_base_address as usize;
    if bytes[base - 1] != FIELD_TERMINATOR {
        return Err(MarcError::InvalidRecord(format!(
            "directory is not terminated at base address {base}"
        )));
    }
    let directory = &bytes[LEADER_LEN..base - 1];
    if directory.len() % DIRECTORY_ENTRY_LEN != 0 {
        ctx.recover(MarcError::InvalidRecord(format!(
            "directory length {} is not a multiple of {DIRECTORY_ENTRY_LEN}",
            directory.len()
        )))?;
    }
    let data = &bytes[base..declared - 1];

    let mut record = Record::new(leader);
    let mut furthest_end = 0;

    for entry in directory.chunks_exact(DIRECTORY_ENTRY_LEN) {
        let tag = String::from_utf8_lossy(&entry[0..3]).into_owned();
        let (Some(length), Some(start)) = (parse_number(&entry[3..7]), parse_number(&entry[7..12]))
        else {
            ctx.recover(MarcError::InvalidRecord(format!(
                "directory entry for {tag} has a non-numeric length or start"
            )))?;
            continue;
        };

        let end = start + length;
        if end > data.len() {
            ctx.recover(MarcError::InvalidField(format!(
                "field {tag} spans bytes {start}..{end} of a {}-byte data area",
                data.len()
            )))?;
            continue;
        }
        furthest_end = furthest_end.max(end);

        let Some((&FIELD_TERMINATOR, body)) = data[start..end].split_last() else {
            ctx.recover(MarcError::InvalidField(format!(
                "field {tag} at offset {start} is not terminated"
            )))?;
            continue;
        };

        if is_control_tag(&tag) {
            record.add_control_field(tag, String::from_utf8_lossy(body).into_owned());
        } else {
            match parse_data_field(tag, body) {
                Ok(field) => record.add_field(field),
                Err(e) => ctx.recover(e)?,
            }
        }
    }

    if furthest_end != data.len() {
        ctx.recover(MarcError::LengthMismatch {
            declared,
            detail: format!(
                "fields account for {furthest_end} of {} data bytes",
                data.len()
            ),
        })?;
    }

    Ok(record)
}

/// Parse the body of a data field (terminator already removed).
fn parse_data_field(tag: String, body: &[u8]) -> Result<Field> {
    if body.len() < 2 {
        return Err(MarcError::InvalidField(format!(
            "field {tag} is too short to hold two indicators"
        )));
    }
    let mut field = Field::new(tag, body[0] as char, body[1] as char);

    let mut chunks = body[2..].split(|&b| b == SUBFIELD_DELIMITER);
    if let Some(leading) = chunks.next() {
        if !leading.is_empty() {
            return Err(MarcError::InvalidField(format!(
                "field {} has data before its first subfield delimiter",
                field.tag
            )));
        }
    }
    for chunk in chunks {
        let Some((&code, value)) = chunk.split_first() else {
            return Err(MarcError::InvalidField(format!(
                "field {} has a subfield delimiter with no code",
                field.tag
            )));
        };
        field.add_subfield(code as char, String::from_utf8_lossy(value).into_owned());
    }
    Ok(field)
}

fn parse_number(digits: &[u8]) -> Option<usize> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    Some(
        digits
            .iter()
            .fold(0usize, |acc, &b| acc * 10 + usize::from(b - b'0')),
    )
}

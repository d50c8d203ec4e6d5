//! The 24-byte record leader.
//!
//! Two leader slots describe the binary layout of an ISO 2709 record:
//! the record length (0-4) and the base address of data (12-16). Both are
//! five ASCII digits. Writers recompute them, so after decoding they describe
//! the input and after building a record they are usually zero.
//!
//! The other slots are single characters copied through unchanged. Filters
//! look at them with the `LDR` pseudo-tag and a position range, for example
//! position 7 for bibliographic level or 9 for character coding.

use crate::error::{MarcError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of the leader in bytes.
pub const LEADER_LEN: usize = 24;

/// Largest value a 5-digit length or address can hold.
pub const MAX_RECORD_LEN: usize = 99_999;

const RECORD_LENGTH: std::ops::Range<usize> = 0..5;
const BASE_ADDRESS: std::ops::Range<usize> = 12..17;
const ENTRY_MAP: std::ops::Range<usize> = 20..24;

/// A decoded leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leader {
    /// Positions 0-4.
    pub record_length: u32,
    /// Position 5 (`n` new, `c` corrected, `d` deleted, ...).
    pub record_status: char,
    /// Position 6 (`a` language material, `c` notated music, ...).
    pub record_type: char,
    /// Position 7 (`m` monograph, `s` serial, ...).
    pub bibliographic_level: char,
    /// Position 8.
    pub control_record_type: char,
    /// Position 9: blank for MARC-8, `a` for UTF-8.
    pub character_coding: char,
    /// Position 10, a digit.
    pub indicator_count: u8,
    /// Position 11, a digit.
    pub subfield_code_count: u8,
    /// Positions 12-16: offset of the first field's data.
    pub data_base_address: u32,
    /// Position 17.
    pub encoding_level: char,
    /// Position 18.
    pub cataloging_form: char,
    /// Position 19.
    pub multipart_level: char,
    /// Positions 20-23, normally `4500`.
    pub entry_map: String,
}

impl Default for Leader {
    /// A new UTF-8 monograph with zeroed layout slots.
    fn default() -> Self {
        Leader {
            record_length: 0,
            record_status: 'n',
            record_type: 'a',
            bibliographic_level: 'm',
            control_record_type: ' ',
            character_coding: 'a',
            indicator_count: 2,
            subfield_code_count: 2,
            data_base_address: 0,
            encoding_level: ' ',
            cataloging_form: ' ',
            multipart_level: ' ',
            entry_map: "4500".to_string(),
        }
    }
}

impl Leader {
    /// Decode the first 24 bytes of `bytes`.
    ///
    /// # Errors
    ///
    /// Fails on short input, non-digit layout slots or non-digit counts.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let Some(b) = bytes.get(..LEADER_LEN) else {
            return Err(MarcError::InvalidLeader(format!(
                "need {LEADER_LEN} bytes, found {}",
                bytes.len()
            )));
        };
        let ch = |i: usize| char::from(b[i]);

        Ok(Leader {
            record_length: five_digits(&b[RECORD_LENGTH])?,
            record_status: ch(5),
            record_type: ch(6),
            bibliographic_level: ch(7),
            control_record_type: ch(8),
            character_coding: ch(9),
            indicator_count: one_digit(b, 10)?,
            subfield_code_count: one_digit(b, 11)?,
            data_base_address: five_digits(&b[BASE_ADDRESS])?,
            encoding_level: ch(17),
            cataloging_form: ch(18),
            multipart_level: ch(19),
            entry_map: b[ENTRY_MAP].iter().copied().map(char::from).collect(),
        })
    }

    /// The record length from positions 0-4 of raw bytes, without decoding
    /// anything else.
    ///
    /// # Errors
    ///
    /// Fails when fewer than five bytes are given or they are not all digits.
    pub fn peek_record_length(bytes: &[u8]) -> Result<usize> {
        let digits = bytes.get(RECORD_LENGTH).ok_or_else(|| {
            MarcError::InvalidLeader("too short to hold a record length".to_string())
        })?;
        Ok(five_digits(digits)? as usize)
    }

    /// Check that the layout slots can describe a real record: room for the
    /// leader and both terminators, and a base address inside the record.
    ///
    /// # Errors
    ///
    /// Returns [`MarcError::InvalidLeader`] naming the offending slot.
    pub fn validate_for_reading(&self) -> Result<()> {
        let length = self.record_length as usize;
        let base = self.data_base_address as usize;
        if length < LEADER_LEN + 2 {
            return Err(MarcError::InvalidLeader(format!(
                "record length {length} is below the minimum of {}",
                LEADER_LEN + 2
            )));
        }
        if base <= LEADER_LEN {
            return Err(MarcError::InvalidLeader(format!(
                "base address {base} does not leave room for a directory terminator"
            )));
        }
        if base >= length {
            return Err(MarcError::InvalidLeader(format!(
                "base address {base} lies outside the {length}-byte record"
            )));
        }
        Ok(())
    }

    /// Encode to 24 bytes.
    ///
    /// # Errors
    ///
    /// Fails when a layout slot exceeds five digits, a count exceeds one
    /// digit, or a character slot does not fit in one byte.
    pub fn as_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(LEADER_LEN);
        push_five_digits(&mut out, self.record_length, "record length")?;
        for c in [
            self.record_status,
            self.record_type,
            self.bibliographic_level,
            self.control_record_type,
            self.character_coding,
        ] {
            push_char(&mut out, c)?;
        }
        for (count, what) in [
            (self.indicator_count, "indicator count"),
            (self.subfield_code_count, "subfield code count"),
        ] {
            if count > 9 {
                return Err(MarcError::InvalidLeader(format!("{what} {count} is not one digit")));
            }
            out.push(b'0' + count);
        }
        push_five_digits(&mut out, self.data_base_address, "base address")?;
        for c in [self.encoding_level, self.cataloging_form, self.multipart_level] {
            push_char(&mut out, c)?;
        }

        if self.entry_map.chars().count() != ENTRY_MAP.len() {
            return Err(MarcError::InvalidLeader(format!(
                "entry map {:?} is not 4 characters",
                self.entry_map
            )));
        }
        for c in self.entry_map.chars() {
            push_char(&mut out, c)?;
        }
        Ok(out)
    }
}

impl fmt::Display for Leader {
    /// The 24-character text form. A leader that cannot be encoded prints
    /// its debug form instead.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_bytes() {
            Ok(bytes) => f.write_str(&bytes.iter().copied().map(char::from).collect::<String>()),
            Err(_) => write!(f, "{self:?}"),
        }
    }
}

impl FromStr for Leader {
    type Err = MarcError;

    /// Parse the text form used by MARCXML and MARC-in-JSON.
    fn from_str(text: &str) -> Result<Self> {
        let mut bytes = Vec::with_capacity(LEADER_LEN);
        for c in text.chars() {
            push_char(&mut bytes, c)?;
        }
        Leader::from_bytes(&bytes)
    }
}

fn push_char(out: &mut Vec<u8>, c: char) -> Result<()> {
    let byte = u8::try_from(c).map_err(|_| {
        MarcError::InvalidLeader(format!(
            "position {} holds {c:?}, which is not a single byte",
            out.len()
        ))
    })?;
    out.push(byte);
    Ok(())
}

fn push_five_digits(out: &mut Vec<u8>, value: u32, what: &str) -> Result<()> {
    if value as usize > MAX_RECORD_LEN {
        return Err(MarcError::InvalidLeader(format!(
            "{what} {value} does not fit in 5 digits"
        )));
    }
    out.extend_from_slice(format!("{value:05}").as_bytes());
    Ok(())
}

fn one_digit(leader: &[u8], position: usize) -> Result<u8> {
    match leader[position] {
        b @ b'0'..=b'9' => Ok(b - b'0'),
        b => Err(MarcError::InvalidLeader(format!(
            "position {position} should be a digit, found {:?}",
            char::from(b)
        ))),
    }
}

fn five_digits(bytes: &[u8]) -> Result<u32> {
    if bytes.len() != 5 || !bytes.iter().all(u8::is_ascii_digit) {
        return Err(MarcError::InvalidLeader(format!(
            "expected five digits, found {:?}",
            String::from_utf8_lossy(bytes)
        )));
    }
    Ok(bytes
        .iter()
        .fold(0, |n, &b| n * 10 + u32::from(b - b'0')))
}

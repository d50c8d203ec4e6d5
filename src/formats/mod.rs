//! Multi-format support for MARC records.
//!
//! Every input representation implements [`FormatReader`] and every output
//! representation implements [`FormatWriter`], so the pipeline and the job
//! runner never depend on a concrete format.
//!
//! # Supported Formats
//!
//! | Format | Read | Write | Module |
//! |--------|------|-------|--------|
//! | ISO 2709 | yes | yes | [`reader`](crate::reader), [`writer`](crate::writer) |
//! | MARC-in-JSON (array or concatenated objects) | yes | yes | [`marcjson`](crate::marcjson) |
//! | MARC-in-JSON Lines | yes | yes | [`marcjson`](crate::marcjson) |
//! | MARCXML | no | yes | [`marcxml`](crate::marcxml) |
//! | CSV / TSV | no | yes | [`delimited`](crate::delimited) |
//!
//! # Format-Agnostic Processing
//!
//! ```
//! use marcsift::formats::{Format, FormatReader, FormatWriter};
//! use marcsift::{Field, Leader, MarcWriter, Record};
//!
//! fn convert(reader: &mut dyn FormatReader, writer: &mut dyn FormatWriter) -> marcsift::Result<usize> {
//!     let mut count = 0;
//!     while let Some(record) = reader.read_record()? {
//!         writer.write_record(&record)?;
//!         count += 1;
//!     }
//!     writer.finish()?;
//!     Ok(count)
//! }
//!
//! let record = Record::builder(Leader::default())
//!     .field(Field::builder("245".to_string(), '1', '0').subfield_str('a', "Title").build())
//!     .build();
//! let mut binary = MarcWriter::new(Vec::new());
//! binary.write_record(&record)?;
//! binary.finish()?;
//! let input = binary.into_inner();
//!
//! let mut reader = Format::Iso2709.reader(input.as_slice()).expect("readable");
//! let mut output = Vec::new();
//! let mut writer = Format::MarcXml.writer(&mut output);
//! assert_eq!(convert(&mut reader, &mut writer)?, 1);
//! drop(writer);
//! assert!(String::from_utf8(output).unwrap().contains("<subfield code=\"a\">Title</subfield>"));
//! # Ok::<(), marcsift::MarcError>(())
//! ```

mod traits;

pub use traits::{FormatReader, FormatReaderExt, FormatWriter, RecordIterator};

use crate::delimited::{DelimitedEncoder, DelimitedWriter};
use crate::marcjson::{JsonFraming, MarcJsonEncoder, MarcJsonReader, MarcJsonWriter};
use crate::marcxml::MarcXmlWriter;
use crate::reader::MarcReader;
use crate::writer::{MarcWriter, RecordWriter};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::io::{BufRead, Read, Write};

/// Supported record representations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Format {
    /// ISO 2709 binary MARC (`.mrc`, `.marc`).
    Iso2709,
    /// MARCXML collection (`.xml`).
    MarcXml,
    /// MARC-in-JSON array (`.json`).
    MarcJson,
    /// MARC-in-JSON, one object per line (`.jsonl`, `.ndjson`).
    JsonLines,
    /// Comma-separated rows (`.csv`).
    Csv,
    /// Tab-separated rows (`.tsv`).
    Tsv,
}

impl Format {
    /// Every format.
    pub const ALL: [Format; 6] = [
        Format::Iso2709,
        Format::MarcXml,
        Format::MarcJson,
        Format::JsonLines,
        Format::Csv,
        Format::Tsv,
    ];

    /// Detect format from file extension.
    ///
    /// Returns `None` if the extension is not recognized.
    ///
    /// # Example
    ///
    /// ```
    /// use marcsift::formats::Format;
    ///
    /// assert_eq!(Format::from_extension("mrc"), Some(Format::Iso2709));
    /// assert_eq!(Format::from_extension("NDJSON"), Some(Format::JsonLines));
    /// assert_eq!(Format::from_extension("unknown"), None);
    /// ```
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mrc" | "marc" => Some(Self::Iso2709),
            "xml" => Some(Self::MarcXml),
            "json" => Some(Self::MarcJson),
            "jsonl" | "ndjson" => Some(Self::JsonLines),
            "csv" => Some(Self::Csv),
            "tsv" => Some(Self::Tsv),
            _ => None,
        }
    }

    /// Get the canonical file extension for this format.
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Iso2709 => "mrc",
            Self::MarcXml => "xml",
            Self::MarcJson => "json",
            Self::JsonLines => "jsonl",
            Self::Csv => "csv",
            Self::Tsv => "tsv",
        }
    }

    /// Get the human-readable name for this format.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Iso2709 => "ISO 2709",
            Self::MarcXml => "MARCXML",
            Self::MarcJson => "MARC-in-JSON",
            Self::JsonLines => "MARC-in-JSON Lines",
            Self::Csv => "CSV",
            Self::Tsv => "TSV",
        }
    }

    /// True if [`Format::reader`] supports this format.
    #[must_use]
    pub const fn is_readable(&self) -> bool {
        matches!(self, Self::Iso2709 | Self::MarcJson | Self::JsonLines)
    }

    /// Guess the input format from the first bytes of `input` without
    /// consuming them.
    ///
    /// Leading whitespace is skipped. `{` or `[` means MARC-in-JSON, `<`
    /// means MARCXML and an ASCII digit means ISO 2709 (every leader starts
    /// with its 5-digit length). Returns `None` for empty or unrecognized
    /// input.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from filling the buffer.
    ///
    /// # Example
    ///
    /// ```
    /// use marcsift::formats::Format;
    /// use std::io::BufReader;
    ///
    /// let mut input = BufReader::new(&b"  {\"leader\": \"...\"}"[..]);
    /// assert_eq!(Format::detect(&mut input)?, Some(Format::MarcJson));
    /// # Ok::<(), std::io::Error>(())
    /// ```
    pub fn detect<R: BufRead + ?Sized>(input: &mut R) -> std::io::Result<Option<Self>> {
        let buffer = input.fill_buf()?;
        let first = buffer.iter().copied().find(|b| !b.is_ascii_whitespace());
        Ok(match first {
            Some(b'{' | b'[') => Some(Self::MarcJson),
            Some(b'<') => Some(Self::MarcXml),
            Some(b) if b.is_ascii_digit() => Some(Self::Iso2709),
            _ => None,
        })
    }

    /// Build a writer for this format over `sink`.
    ///
    /// The returned writer applies the format's framing; call
    /// [`FormatWriter::finish`] when done.
    #[must_use]
    pub fn writer<'a, W>(self, sink: W) -> Box<dyn FormatWriter + 'a>
    where
        W: Write + Debug + 'a,
    {
        match self {
            Self::Iso2709 => Box::new(MarcWriter::new(sink)),
            Self::MarcXml => Box::new(MarcXmlWriter::new(sink)),
            Self::MarcJson => Box::new(MarcJsonWriter::new(sink)),
            Self::JsonLines => Box::new(RecordWriter::with_encoder(
                MarcJsonEncoder::new(JsonFraming::Lines),
                sink,
            )),
            Self::Csv => Box::new(DelimitedWriter::new(sink)),
            Self::Tsv => Box::new(RecordWriter::with_encoder(DelimitedEncoder::tsv(), sink)),
        }
    }

    /// Build a reader for this format over `source`, or `None` if the
    /// format is output-only.
    ///
    /// ISO 2709 input gets a reader with default options; build a
    /// [`MarcReader`] directly for lenient decoding or resynchronisation.
    #[must_use]
    pub fn reader<'a, R>(self, source: R) -> Option<Box<dyn FormatReader + 'a>>
    where
        R: Read + Debug + 'a,
    {
        match self {
            Self::Iso2709 => Some(Box::new(MarcReader::new(source))),
            Self::MarcJson | Self::JsonLines => Some(Box::new(MarcJsonReader::new(source))),
            Self::MarcXml | Self::Csv | Self::Tsv => None,
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

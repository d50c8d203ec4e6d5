//! The two seams every representation plugs into.
//!
//! Decoders implement [`FormatReader`] and encoders, through
//! [`RecordWriter`](crate::writer::RecordWriter), implement [`FormatWriter`].
//! A [`Pipeline`](crate::pipeline::Pipeline) or [`Job`](crate::job::Job)
//! only sees these traits. Both are object safe, and `Box<dyn _>` and
//! `&mut _` forward to the inner value so callers can keep ownership of a
//! writer they want to inspect afterwards.
//!
//! ```
//! use marcsift::formats::{FormatReader, FormatWriter};
//!
//! fn copy_all(reader: &mut dyn FormatReader, writer: &mut dyn FormatWriter) -> marcsift::Result<usize> {
//!     let mut copied = 0;
//!     while let Some(record) = reader.read_record()? {
//!         writer.write_record(&record)?;
//!         copied += 1;
//!     }
//!     writer.finish()?;
//!     Ok(copied)
//! }
//! ```

use crate::error::Result;
use crate::record::Record;

/// A source of decoded records.
///
/// After the source runs out `read_record` keeps returning `Ok(None)`. After a
/// record-scoped error the reader is positioned at the following record.
pub trait FormatReader: std::fmt::Debug {
    /// Decode the next record.
    ///
    /// # Errors
    ///
    /// Decoding and I/O failures. [`MarcError::scope`](crate::MarcError::scope)
    /// tells whether another call can succeed.
    fn read_record(&mut self) -> Result<Option<Record>>;

    /// Collect everything that is left.
    ///
    /// # Errors
    ///
    /// Stops at the first failure.
    fn read_all(&mut self) -> Result<Vec<Record>> {
        std::iter::from_fn(|| self.read_record().transpose()).collect()
    }

    /// Records decoded successfully so far, when the reader counts them.
    /// Reads that returned an error are not included.
    fn records_read(&self) -> Option<usize> {
        None
    }

    /// Bytes consumed from the source. Between calls this is the offset of
    /// the next record.
    fn byte_offset(&self) -> Option<u64> {
        None
    }
}

/// A sink for records in some representation.
///
/// Call [`finish`](Self::finish) when done: it writes any closing footer
/// (`]`, `</collection>`) and flushes. A writer dropped without it may leave
/// incomplete output.
pub trait FormatWriter: std::fmt::Debug {
    /// Encode and write one record.
    ///
    /// # Errors
    ///
    /// A record-scoped [`Encode`](crate::MarcError::Encode) error when the
    /// record cannot be represented, in which case the sink is untouched, or
    /// an I/O error from the sink.
    fn write_record(&mut self, record: &Record) -> Result<()>;

    /// Write `records` in order.
    ///
    /// # Errors
    ///
    /// Stops at the first failure.
    fn write_batch(&mut self, records: &[Record]) -> Result<()> {
        records.iter().try_for_each(|record| self.write_record(record))
    }

    /// Write the footer and flush. Calling it again does nothing.
    ///
    /// # Errors
    ///
    /// I/O failures of the sink.
    fn finish(&mut self) -> Result<()>;

    /// Records written so far, when the writer counts them.
    fn records_written(&self) -> Option<usize> {
        None
    }
}

macro_rules! forward_reader {
    ($($ty:ty),*) => {$(
        impl<R: FormatReader + ?Sized> FormatReader for $ty {
            fn read_record(&mut self) -> Result<Option<Record>> {
                (**self).read_record()
            }

            fn records_read(&self) -> Option<usize> {
                (**self).records_read()
            }

            fn byte_offset(&self) -> Option<u64> {
                (**self).byte_offset()
            }
        }
    )*};
}

macro_rules! forward_writer {
    ($($ty:ty),*) => {$(
        impl<W: FormatWriter + ?Sized> FormatWriter for $ty {
            fn write_record(&mut self, record: &Record) -> Result<()> {
                (**self).write_record(record)
            }

            fn finish(&mut self) -> Result<()> {
                (**self).finish()
            }

            fn records_written(&self) -> Option<usize> {
                (**self).records_written()
            }
        }
    )*};
}

forward_reader!(Box<R>, &mut R);
forward_writer!(Box<W>, &mut W);

/// Iterator access for any [`FormatReader`].
pub trait FormatReaderExt: FormatReader {
    /// Iterate over the remaining records. A record-scoped error is yielded
    /// as one item and iteration continues with the next record.
    fn records(&mut self) -> RecordIterator<'_, Self>
    where
        Self: Sized,
    {
        RecordIterator { reader: self }
    }
}

impl<T: FormatReader> FormatReaderExt for T {}

/// Returned by [`FormatReaderExt::records`].
#[derive(Debug)]
pub struct RecordIterator<'a, R: FormatReader> {
    reader: &'a mut R,
}

impl<R: FormatReader> Iterator for RecordIterator<'_, R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.read_record().transpose()
    }
}

#![warn(missing_docs)]

//! # marcsift: streaming MARC filtering
//!
//! Reads large collections of MARC bibliographic records, keeps the records
//! that match a content filter, optionally reduces them to selected fields,
//! and writes them out as ISO 2709, MARCXML, MARC-in-JSON or CSV/TSV. Records
//! are processed one at a time, so memory use does not depend on the size of
//! the input.
//!
//! ## Quick Start
//!
//! ```
//! use marcsift::formats::{Format, FormatWriter};
//! use marcsift::{FilterSpec, Field, Leader, MarcReader, MarcWriter, Pipeline, Record, SelectionSpec};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Some input: two records in ISO 2709.
//! let mut input = MarcWriter::new(Vec::new());
//! for (id, subject) in [("1", "Biology"), ("2", "Computer science")] {
//!     let record = Record::builder(Leader::default())
//!         .control_field_str("001", id)
//!         .field(Field::builder("245".to_string(), '1', '0')
//!             .subfield_str('a', "A title")
//!             .subfield_str('c', "An author")
//!             .build())
//!         .field(Field::builder("650".to_string(), ' ', '0').subfield_str('a', subject).build())
//!         .build();
//!     input.write_record(&record)?;
//! }
//! input.finish()?;
//! let input = input.into_inner();
//!
//! // Filter and selection usually come from JSON.
//! let filter: FilterSpec = serde_json::from_str(
//!     r#"{"tag": "650", "subfield": "a", "operator": "starts_with", "operand": "Computer"}"#,
//! )?;
//! let selection: SelectionSpec = serde_json::from_str(r#"[{"tag": "245", "subfields": "a"}]"#)?;
//!
//! let pipeline = Pipeline::builder().filter(filter).selection(selection).build()?;
//! let mut csv = Vec::new();
//! let report = pipeline.run(MarcReader::new(input.as_slice()), Format::Csv.writer(&mut csv))?;
//!
//! assert_eq!(report.records_written, 1);
//! let csv = String::from_utf8(csv)?;
//! assert!(csv.contains("2,245,1,0,a,A title"));
//! assert!(!csv.contains("An author"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`record`], [`leader`]: the record model
//! - [`reader`]: ISO 2709 decoding, with [`recovery`] modes
//! - [`field_index`]: per-record lookup by tag
//! - [`filter`], [`pattern`]: filter specs and compiled predicates
//! - [`projection`]: field selection
//! - [`writer`], [`marcxml`], [`marcjson`], [`delimited`], [`formats`]: output
//!   representations
//! - [`pipeline`]: the streaming driver
//! - [`job`]: several outputs from one pass
//! - [`boundary_scanner`], [`sharding`]: parallel runs over in-memory input
//! - [`error`]: error types

pub mod boundary_scanner;
pub mod delimited;
pub mod error;
pub mod field_index;
pub mod filter;
/// Multi-format support with unified Reader/Writer traits.
///
/// See the [`formats`] module documentation for the supported formats.
pub mod formats;
pub mod job;
pub mod leader;
pub mod marcjson;
pub mod marcxml;
pub mod pattern;
pub mod pipeline;
pub mod projection;
pub mod reader;
/// Core MARC record structures (`Record`, `Field`, `Subfield`)
pub mod record;
pub mod recovery;
pub mod sharding;
pub mod writer;

pub use error::{ErrorScope, MarcError, Result, SpecError, SpecProblem};
pub use field_index::FieldIndex;
pub use filter::{Clause, ClauseSpec, FilterSpec, GroupSpec, Operand, Operator, Predicate};
pub use formats::{Format, FormatReader, FormatWriter};
pub use job::{Job, JobConfig, JobError, JobReport, Output};
pub use leader::Leader;
pub use pattern::GlobPattern;
pub use pipeline::{
    CancellationToken, ErrorPolicy, Pipeline, PipelineBuilder, PipelineConfig, PipelineError,
    PipelineRun, RecordFailure, RunReport, Stage, Step, StopReason,
};
pub use projection::{project, Selection, SelectionEntry, SelectionSpec};
pub use reader::{decode_record, MarcReader};
pub use record::{ControlField, Field, FieldBuilder, Record, RecordBuilder, Subfield};
pub use recovery::{RecoveryContext, RecoveryMode};
pub use sharding::{run_sharded, ShardConfig};
pub use writer::{encode_record, MarcWriter, RecordEncoder, RecordWriter};

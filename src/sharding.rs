//! Parallel filtering of an in-memory ISO 2709 buffer.
//!
//! [`run_sharded`] cuts the buffer into contiguous shards on record
//! terminators, filters and encodes every shard on the `rayon` pool, then
//! replays the shard results in input order. The replay applies the limit,
//! the error policy and the output framing exactly as a serial run would, so
//! the bytes written and the returned [`RunReport`] match
//! [`Pipeline::run`] over the same input.
//!
//! Encoded matches of a shard are held in memory until the merge.
//!
//! ```
//! use marcsift::sharding::{run_sharded, ShardConfig};
//! use marcsift::writer::Iso2709Encoder;
//! use marcsift::{FilterSpec, Field, Leader, MarcReader, MarcWriter, Pipeline, Record};
//! use marcsift::formats::FormatWriter;
//!
//! let mut input = MarcWriter::new(Vec::new());
//! for i in 0..50 {
//!     let subject = if i % 5 == 0 { "Biology" } else { "Physics" };
//!     let record = Record::builder(Leader::default())
//!         .control_field_str("001", &i.to_string())
//!         .field(Field::builder("650".to_string(), ' ', '0').subfield_str('a', subject).build())
//!         .build();
//!     input.write_record(&record)?;
//! }
//! input.finish()?;
//! let input = input.into_inner();
//!
//! let pipeline = Pipeline::builder()
//!     .filter(FilterSpec::equals("650", Some("a"), "Biology"))
//!     .build()?;
//!
//! let mut parallel = Vec::new();
//! let report = run_sharded(&pipeline, &input, &ShardConfig::default().with_shards(4), Iso2709Encoder, &mut parallel)?;
//!
//! let mut serial = MarcWriter::new(Vec::new());
//! let serial_report = pipeline.run(MarcReader::new(input.as_slice()), &mut serial)?;
//!
//! assert_eq!(report, serial_report);
//! assert_eq!(&parallel, serial.get_ref());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::boundary_scanner::RecordBoundaryScanner;
use crate::error::MarcError;
use crate::pipeline::{ErrorPolicy, Pipeline, PipelineError, RecordFailure, RunReport, Stage, StopReason};
use crate::projection::project;
use crate::reader::MarcReader;
use crate::recovery::RecoveryMode;
use crate::writer::RecordEncoder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::ops::Range;
use tracing::{debug, info, warn};

/// Options for [`run_sharded`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardConfig {
    /// Number of shards; defaults to the size of the rayon pool.
    pub shards: usize,
    /// Decoding mode of every shard's reader.
    pub recovery_mode: RecoveryMode,
}

impl Default for ShardConfig {
    fn default() -> Self {
        ShardConfig {
            shards: rayon::current_num_threads(),
            recovery_mode: RecoveryMode::Strict,
        }
    }
}

impl ShardConfig {
    /// Set the number of shards.
    #[must_use]
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Set the decoding mode.
    #[must_use]
    pub fn with_recovery_mode(mut self, mode: RecoveryMode) -> Self {
        self.recovery_mode = mode;
        self
    }
}

/// What happened to one record of a shard.
#[derive(Debug)]
enum Event {
    Dropped,
    Kept {
        bytes: Vec<u8>,
        byte_offset: u64,
    },
    Failed {
        stage: Stage,
        byte_offset: u64,
        error: MarcError,
    },
}

fn process_shard<E: RecordEncoder>(
    pipeline: &Pipeline,
    shard: &[u8],
    mode: RecoveryMode,
    encoder: &E,
) -> Vec<Event> {
    let limit = pipeline.config().max_matches;
    let mut reader = MarcReader::new(shard).with_recovery_mode(mode);
    let mut events = Vec::new();
    let mut kept = 0;

    loop {
        if limit.is_some_and(|limit| kept >= limit) {
            break;
        }
        let byte_offset = reader.byte_offset();
        let record = match reader.read_record() {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(error) => {
                let fatal = !error.is_record_scoped();
                events.push(Event::Failed {
                    stage: Stage::Decode,
                    byte_offset,
                    error,
                });
                if fatal {
                    break;
                }
                continue;
            },
        };

        if !pipeline.predicate().matches(&record) {
            events.push(Event::Dropped);
            continue;
        }
        match encoder.encode(&project(&record, pipeline.selection())) {
            Ok(bytes) => {
                kept += 1;
                events.push(Event::Kept { bytes, byte_offset });
            },
            Err(error) => events.push(Event::Failed {
                stage: Stage::Encode,
                byte_offset,
                error,
            }),
        }
    }
    events
}

/// Writes pre-encoded records with the encoder's framing.
struct Merger<'e, E: RecordEncoder, W: Write> {
    encoder: &'e E,
    sink: W,
    started: bool,
    finished: bool,
    report: RunReport,
    max_failure_details: usize,
}

impl<E: RecordEncoder, W: Write> Merger<'_, E, W> {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        if self.started {
            self.sink.write_all(&self.encoder.separator())?;
        } else {
            self.sink.write_all(&self.encoder.header())?;
            self.started = true;
        }
        self.sink.write_all(bytes)
    }

    fn finish(&mut self) -> std::io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if !self.started {
            self.sink.write_all(&self.encoder.header())?;
            self.started = true;
        }
        self.sink.write_all(&self.encoder.footer())?;
        self.sink.flush()
    }

    fn record_failure(&mut self, record_index: usize, byte_offset: u64, stage: Stage, error: &MarcError) {
        self.report.records_errored += 1;
        if self.report.failures.len() < self.max_failure_details {
            self.report.failures.push(RecordFailure {
                record_index,
                byte_offset: Some(byte_offset),
                stage,
                reason: error.to_string(),
            });
        }
    }

    fn abort(&mut self, error: MarcError) -> PipelineError {
        if let Err(e) = self.finish() {
            warn!(error = %e, "could not finish output after abort");
        }
        self.report.stop_reason = Some(StopReason::Aborted);
        warn!(records_read = self.report.records_read, error = %error, "run aborted");
        PipelineError::Aborted {
            source: error,
            report: Box::new(self.report.clone()),
        }
    }
}

/// Run `pipeline` over an in-memory ISO 2709 buffer using the rayon pool.
///
/// Output is encoded with `encoder` and written to `sink`, header and footer
/// included. The result equals a serial [`Pipeline::run`] with a
/// [`MarcReader`] over `input` and a writer with the same encoder, provided
/// every record's declared length ends at its record terminator.
///
/// # Errors
///
/// As for [`Pipeline::run`].
pub fn run_sharded<E, W>(
    pipeline: &Pipeline,
    input: &[u8],
    config: &ShardConfig,
    encoder: E,
    sink: W,
) -> Result<RunReport, PipelineError>
where
    E: RecordEncoder + Sync,
    W: Write,
{
    let ranges: Vec<Range<usize>> = RecordBoundaryScanner::shard_ranges(input, config.shards);
    debug!(shards = ranges.len(), bytes = input.len(), "sharded run starting");

    let shard_events: Vec<Vec<Event>> = ranges
        .par_iter()
        .map(|range| process_shard(pipeline, &input[range.clone()], config.recovery_mode, &encoder))
        .collect();

    let skip = pipeline.config().error_policy == ErrorPolicy::Skip;
    let limit = pipeline.config().max_matches;
    let mut merger = Merger {
        encoder: &encoder,
        sink,
        started: false,
        finished: false,
        report: RunReport::default(),
        max_failure_details: pipeline.config().max_failure_details,
    };

    'shards: for (range, events) in ranges.iter().zip(shard_events) {
        for event in events {
            if limit.is_some_and(|limit| merger.report.records_written >= limit) {
                break 'shards;
            }
            let record_index = merger.report.records_read;
            merger.report.records_read += 1;

            match event {
                Event::Dropped => {},
                Event::Kept { bytes, byte_offset } => {
                    merger.report.records_matched += 1;
                    if let Err(e) = merger.write(&bytes) {
                        let error = MarcError::from(e);
                        let byte_offset = range.start as u64 + byte_offset;
                        merger.record_failure(record_index, byte_offset, Stage::Encode, &error);
                        return Err(merger.abort(error));
                    }
                    merger.report.records_written += 1;
                },
                Event::Failed {
                    stage,
                    byte_offset,
                    error,
                } => {
                    if stage == Stage::Encode {
                        merger.report.records_matched += 1;
                    }
                    let byte_offset = range.start as u64 + byte_offset;
                    merger.record_failure(record_index, byte_offset, stage, &error);
                    if !(skip && error.is_record_scoped()) {
                        return Err(merger.abort(error));
                    }
                    warn!(record_index, byte_offset, %stage, error = %error, "skipping record");
                },
            }
        }
    }

    let stop_reason = if limit.is_some_and(|limit| merger.report.records_written >= limit) {
        StopReason::LimitReached
    } else {
        StopReason::Exhausted
    };
    merger.report.stop_reason = Some(stop_reason);
    if let Err(e) = merger.finish() {
        return Err(merger.abort(MarcError::from(e)));
    }

    let report = merger.report;
    info!(
        records_read = report.records_read,
        records_matched = report.records_matched,
        records_written = report.records_written,
        records_errored = report.records_errored,
        stop_reason = ?report.stop_reason,
        "sharded run complete"
    );
    Ok(report)
}

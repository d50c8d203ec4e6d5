//! Multi-output jobs: one pass over the input, several filtered outputs.
//!
//! Each [`Output`] pairs a [`Pipeline`] with its own writer. The job reads
//! every record once and offers it to every output that is still active.
//! An output whose pipeline has `max_matches` set retires once it has written
//! that many records; when every output has retired the job stops reading.
//! [`JobConfig::default_max_matches`] supplies the limit for outputs whose
//! pipeline sets none.
//!
//! An output built with [`Output::chunked`] splits its records across a
//! numbered series of sinks, opening the next one once the current one holds
//! `max_per_sink` records. Each sink is a complete document with its own
//! header and footer.
//!
//! ```
//! use marcsift::job::{Job, Output};
//! use marcsift::{FilterSpec, Field, Leader, MarcReader, MarcWriter, Pipeline, PipelineConfig, Record};
//! use marcsift::formats::{Format, FormatWriter};
//!
//! let mut input = MarcWriter::new(Vec::new());
//! for subject in ["Biology", "Computer science", "Biology"] {
//!     let record = Record::builder(Leader::default())
//!         .field(Field::builder("650".to_string(), ' ', '0').subfield_str('a', subject).build())
//!         .build();
//!     input.write_record(&record)?;
//! }
//! input.finish()?;
//! let input = input.into_inner();
//!
//! let mut biology = Vec::new();
//! let mut everything = Vec::new();
//! let report = Job::new()
//!     .output(Output::new(
//!         "biology",
//!         Pipeline::builder()
//!             .filter(FilterSpec::equals("650", Some("a"), "Biology"))
//!             .config(PipelineConfig::default().with_max_matches(1))
//!             .build()?,
//!         Format::Iso2709.writer(&mut biology),
//!     ))
//!     .output(Output::new("all", Pipeline::builder().build()?, Format::JsonLines.writer(&mut everything)))
//!     .run(MarcReader::new(input.as_slice()))?;
//!
//! assert_eq!(report.records_read, 3);
//! assert_eq!(report.outputs["biology"].records_written, 1);
//! assert_eq!(report.outputs["all"].records_written, 3);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::error::{MarcError, SpecError};
use crate::field_index::FieldIndex;
use crate::formats::{FormatReader, FormatWriter};
use crate::pipeline::{
    CancellationToken, ErrorPolicy, Pipeline, RecordFailure, RunReport, Stage, StopReason,
    DEFAULT_MAX_FAILURE_DETAILS,
};
use crate::projection::project;
use crate::record::Record;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Job-wide options. Per-output options live in each output's pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Reaction to records that fail to decode.
    pub error_policy: ErrorPolicy,
    /// Log progress every this many records read.
    pub progress_interval: Option<usize>,
    /// How many decode failures to keep in the report.
    pub max_failure_details: usize,
    /// Limit for outputs whose pipeline has no `max_matches` of its own.
    pub default_max_matches: Option<usize>,
}

impl Default for JobConfig {
    fn default() -> Self {
        JobConfig {
            error_policy: ErrorPolicy::Skip,
            progress_interval: None,
            max_failure_details: DEFAULT_MAX_FAILURE_DETAILS,
            default_max_matches: None,
        }
    }
}

/// Result of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    /// Records pulled from the input, including those that failed to decode.
    pub records_read: usize,
    /// Records that failed to decode.
    pub records_errored: usize,
    /// The first decode failures.
    pub failures: Vec<RecordFailure>,
    /// Per-output counters, in the order outputs were added. Each output's
    /// `records_read` counts the records offered to it.
    pub outputs: IndexMap<String, RunReport>,
    /// Why the job stopped.
    pub stop_reason: Option<StopReason>,
}

/// Errors that end a job.
#[derive(Debug, Error)]
pub enum JobError {
    /// The job is misconfigured.
    #[error(transparent)]
    Spec(#[from] SpecError),

    /// The job stopped on an error. Output written before it stays written.
    #[error("job aborted after {} records: {source}", .report.records_read)]
    Aborted {
        /// The error that ended the job.
        source: MarcError,
        /// Counters up to the failure.
        report: Box<JobReport>,
    },
}

/// Opens the `n`th sink of a chunked output, counting from 1.
pub type SinkFactory<'a> =
    Box<dyn FnMut(usize) -> Result<Box<dyn FormatWriter + 'a>, MarcError> + 'a>;

enum Sink<'a> {
    Single(Box<dyn FormatWriter + 'a>),
    Chunked {
        open: SinkFactory<'a>,
        max_per_sink: usize,
        active: Option<Box<dyn FormatWriter + 'a>>,
        in_active: usize,
        opened: usize,
    },
}

impl Sink<'_> {
    fn write_record(&mut self, record: &Record) -> Result<(), MarcError> {
        match self {
            Sink::Single(writer) => writer.write_record(record),
            Sink::Chunked {
                open,
                max_per_sink,
                active,
                in_active,
                opened,
            } => {
                let writer = match active.take() {
                    Some(writer) => writer,
                    None => {
                        *opened += 1;
                        *in_active = 0;
                        debug!(sink = *opened, "opening sink");
                        open(*opened)?
                    },
                };
                let writer = active.insert(writer);
                writer.write_record(record)?;
                *in_active += 1;
                if *in_active >= *max_per_sink {
                    if let Some(mut full) = active.take() {
                        full.finish()?;
                    }
                }
                Ok(())
            },
        }
    }

    fn finish(&mut self) -> Result<(), MarcError> {
        match self {
            Sink::Single(writer) => writer.finish(),
            Sink::Chunked { active, .. } => match active.take() {
                Some(mut writer) => writer.finish(),
                None => Ok(()),
            },
        }
    }
}

/// A named pipeline with its own sink.
pub struct Output<'a> {
    name: String,
    pipeline: Pipeline,
    sink: Sink<'a>,
    limit: Option<usize>,
    report: RunReport,
    finished: bool,
}

impl<'a> Output<'a> {
    /// Create an output. Its pipeline's `max_matches` is the output's limit.
    pub fn new(name: impl Into<String>, pipeline: Pipeline, writer: impl FormatWriter + 'a) -> Self {
        Self::with_sink(name.into(), pipeline, Sink::Single(Box::new(writer)))
    }

    /// Create an output that writes at most `max_per_sink` records to each
    /// sink. `open` is called with 1, 2, ... when a record needs a sink and
    /// none is open, so an output that matches nothing opens no sink at all.
    ///
    /// ```
    /// use marcsift::job::{Job, Output};
    /// use marcsift::formats::{Format, FormatWriter};
    /// use marcsift::{Leader, MarcReader, MarcWriter, Pipeline, Record};
    /// use std::cell::RefCell;
    ///
    /// let mut input = MarcWriter::new(Vec::new());
    /// for id in ["1", "2", "3"] {
    ///     input.write_record(&Record::builder(Leader::default()).control_field_str("001", id).build())?;
    /// }
    /// input.finish()?;
    /// let input = input.into_inner();
    ///
    /// let chunks = RefCell::new(Vec::new());
    /// Job::new()
    ///     .output(Output::chunked("all", Pipeline::builder().build()?, 2, |n| {
    ///         chunks.borrow_mut().push(n);
    ///         Ok(Format::JsonLines.writer(Vec::new()))
    ///     }))
    ///     .run(MarcReader::new(input.as_slice()))?;
    /// assert_eq!(*chunks.borrow(), [1, 2]);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn chunked<F, W>(
        name: impl Into<String>,
        pipeline: Pipeline,
        max_per_sink: usize,
        mut open: F,
    ) -> Self
    where
        F: FnMut(usize) -> Result<W, MarcError> + 'a,
        W: FormatWriter + 'a,
    {
        let open: SinkFactory<'a> =
            Box::new(move |n| Ok(Box::new(open(n)?) as Box<dyn FormatWriter + 'a>));
        Self::with_sink(
            name.into(),
            pipeline,
            Sink::Chunked {
                open,
                max_per_sink,
                active: None,
                in_active: 0,
                opened: 0,
            },
        )
    }

    fn with_sink(name: String, pipeline: Pipeline, sink: Sink<'a>) -> Self {
        let limit = pipeline.config().max_matches;
        Output {
            name,
            pipeline,
            sink,
            limit,
            report: RunReport::default(),
            finished: false,
        }
    }

    /// The output's name, used as its key in [`JobReport::outputs`].
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn is_active(&self) -> bool {
        self.report.stop_reason.is_none()
    }

    fn retire_if_full(&mut self) {
        if self.is_active() && self.limit.is_some_and(|limit| self.report.records_written >= limit) {
            debug!(output = %self.name, records_written = self.report.records_written, "output limit reached");
            self.report.stop_reason = Some(StopReason::LimitReached);
        }
    }

    /// Offer one record. Returns an error only when the job must abort.
    fn offer(
        &mut self,
        record: &Record,
        index: &FieldIndex<'_>,
        record_index: usize,
        byte_offset: Option<u64>,
    ) -> Result<(), MarcError> {
        self.report.records_read += 1;
        let predicate = self.pipeline.predicate();
        if !(predicate.is_always() || predicate.evaluate(index)) {
            return Ok(());
        }
        self.report.records_matched += 1;

        let projected = project(record, self.pipeline.selection());
        match self.sink.write_record(&projected) {
            Ok(()) => {
                self.report.records_written += 1;
                self.retire_if_full();
                Ok(())
            },
            Err(e) => {
                self.report.records_errored += 1;
                if self.report.failures.len() < self.pipeline.config().max_failure_details {
                    self.report.failures.push(RecordFailure {
                        record_index,
                        byte_offset,
                        stage: Stage::Encode,
                        reason: e.to_string(),
                    });
                }
                if e.is_record_scoped() && self.pipeline.config().error_policy == ErrorPolicy::Skip {
                    warn!(output = %self.name, record_index, byte_offset, error = %e, "skipping record");
                    Ok(())
                } else {
                    Err(e)
                }
            },
        }
    }

    fn finish(&mut self) -> Result<(), MarcError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.sink.finish()
    }
}

impl std::fmt::Debug for Output<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("Output");
        out.field("name", &self.name).field("pipeline", &self.pipeline);
        match &self.sink {
            Sink::Single(writer) => out.field("writer", writer),
            Sink::Chunked {
                max_per_sink,
                active,
                opened,
                ..
            } => out
                .field("max_per_sink", max_per_sink)
                .field("active", active)
                .field("opened", opened),
        };
        out.field("limit", &self.limit)
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

/// A set of outputs fed from one input.
#[derive(Debug, Default)]
pub struct Job<'a> {
    outputs: Vec<Output<'a>>,
    config: JobConfig,
}

impl<'a> Job<'a> {
    /// An empty job.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an output.
    #[must_use]
    pub fn output(mut self, output: Output<'a>) -> Self {
        self.outputs.push(output);
        self
    }

    /// Set job-wide options.
    #[must_use]
    pub fn with_config(mut self, config: JobConfig) -> Self {
        self.config = config;
        self
    }

    /// Run over the whole input.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Spec`] if the job has no outputs or two outputs
    /// share a name, and [`JobError::Aborted`] on a stream error or on a
    /// record failure under [`ErrorPolicy::Abort`].
    pub fn run<R: FormatReader>(self, reader: R) -> Result<JobReport, JobError> {
        self.execute(reader, None)
    }

    /// Like [`run`](Self::run), checking `token` before every record.
    ///
    /// # Errors
    ///
    /// As for [`run`](Self::run).
    pub fn run_until<R: FormatReader>(
        self,
        reader: R,
        token: &CancellationToken,
    ) -> Result<JobReport, JobError> {
        self.execute(reader, Some(token))
    }

    fn validate(&self) -> Result<(), SpecError> {
        let mut errors = SpecError::default();
        if self.outputs.is_empty() {
            errors.push("outputs", "job has no outputs");
        }
        let mut seen = HashSet::new();
        for (i, output) in self.outputs.iter().enumerate() {
            if !seen.insert(output.name.as_str()) {
                errors.push(
                    &format!("outputs[{i}].name"),
                    format!("duplicate output name '{}'", output.name),
                );
            }
            if let Sink::Chunked { max_per_sink: 0, .. } = output.sink {
                errors.push(&format!("outputs[{i}].max_per_sink"), "must be at least 1");
            }
        }
        errors.into_result(())
    }

    fn execute<R: FormatReader>(
        mut self,
        mut reader: R,
        token: Option<&CancellationToken>,
    ) -> Result<JobReport, JobError> {
        self.validate()?;
        let mut report = JobReport::default();
        for output in &mut self.outputs {
            output.limit = output.pipeline.config().max_matches.or(self.config.default_max_matches);
            output.retire_if_full();
        }

        let stop_reason = loop {
            if self.outputs.iter().all(|o| !o.is_active()) {
                debug!(records_read = report.records_read, "every output reached its limit");
                break StopReason::LimitReached;
            }
            if token.is_some_and(CancellationToken::is_cancelled) {
                debug!(records_read = report.records_read, "job cancelled");
                break StopReason::Cancelled;
            }

            let record_index = report.records_read;
            let byte_offset = reader.byte_offset();
            let result = reader.read_record();
            match result {
                Ok(None) => break StopReason::Exhausted,
                Ok(Some(record)) => {
                    report.records_read += 1;
                    self.log_progress(&report);
                    let index = FieldIndex::new(&record);
                    let offered = self
                        .outputs
                        .iter_mut()
                        .filter(|o| o.is_active())
                        .try_for_each(|o| o.offer(&record, &index, record_index, byte_offset));
                    if let Err(e) = offered {
                        return Err(self.abort(report, e));
                    }
                },
                Err(e) => {
                    report.records_read += 1;
                    report.records_errored += 1;
                    self.log_progress(&report);
                    if report.failures.len() < self.config.max_failure_details {
                        report.failures.push(RecordFailure {
                            record_index,
                            byte_offset,
                            stage: Stage::Decode,
                            reason: e.to_string(),
                        });
                    }
                    if !(e.is_record_scoped() && self.config.error_policy == ErrorPolicy::Skip) {
                        return Err(self.abort(report, e));
                    }
                    warn!(record_index, byte_offset, error = %e, "skipping record");
                },
            }
        };

        report.stop_reason = Some(stop_reason);
        if let Err(e) = self.outputs.iter_mut().try_for_each(Output::finish) {
            return Err(self.abort(report, e));
        }
        let report = self.collect(report, stop_reason);
        info!(
            records_read = report.records_read,
            records_errored = report.records_errored,
            outputs = report.outputs.len(),
            stop_reason = ?report.stop_reason,
            "job complete"
        );
        Ok(report)
    }

    fn log_progress(&self, report: &JobReport) {
        if let Some(every) = self.config.progress_interval {
            if every > 0 && report.records_read % every == 0 {
                info!(
                    records_read = report.records_read,
                    records_errored = report.records_errored,
                    "progress"
                );
            }
        }
    }

    fn collect(&mut self, mut report: JobReport, stop_reason: StopReason) -> JobReport {
        for output in self.outputs.drain(..) {
            let mut counters = output.report;
            counters.stop_reason.get_or_insert(stop_reason);
            report.outputs.insert(output.name, counters);
        }
        report
    }

    fn abort(&mut self, mut report: JobReport, error: MarcError) -> JobError {
        for output in &mut self.outputs {
            if let Err(e) = output.finish() {
                warn!(output = %output.name, error = %e, "could not finish output after abort");
            }
        }
        report.stop_reason = Some(StopReason::Aborted);
        warn!(records_read = report.records_read, error = %error, "job aborted");
        JobError::Aborted {
            source: error,
            report: Box::new(self.collect(report, StopReason::Aborted)),
        }
    }
}

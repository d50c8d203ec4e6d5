//! The streaming filter pipeline.
//!
//! A [`Pipeline`] is built once from a filter spec, an optional selection
//! spec and a [`PipelineConfig`]. Running it pulls records from a
//! [`FormatReader`] one at a time, keeps those the predicate accepts,
//! projects them and hands them to a [`FormatWriter`]. At most one record is
//! held at any point, so memory use does not grow with the input.
//!
//! Runs can be driven in one call ([`Pipeline::run`],
//! [`Pipeline::run_until`]) or stepped record by record through a
//! [`PipelineRun`].
//!
//! # Examples
//!
//! ```
//! use marcsift::{FilterSpec, Field, Leader, MarcReader, MarcWriter, Pipeline, Record, StopReason};
//! use marcsift::formats::FormatWriter;
//!
//! let mut input = MarcWriter::new(Vec::new());
//! for subject in ["Biology", "Computer science"] {
//!     let record = Record::builder(Leader::default())
//!         .field(Field::builder("650".to_string(), ' ', '0').subfield_str('a', subject).build())
//!         .build();
//!     input.write_record(&record)?;
//! }
//! input.finish()?;
//! let input = input.into_inner();
//!
//! let pipeline = Pipeline::builder()
//!     .filter(FilterSpec::equals("650", Some("a"), "Computer science"))
//!     .build()?;
//! let mut output = MarcWriter::new(Vec::new());
//! let report = pipeline.run(MarcReader::new(input.as_slice()), &mut output)?;
//!
//! assert_eq!(report.records_read, 2);
//! assert_eq!(report.records_written, 1);
//! assert_eq!(report.stop_reason, Some(StopReason::Exhausted));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::error::{MarcError, SpecError};
use crate::filter::{FilterSpec, Predicate};
use crate::formats::{FormatReader, FormatWriter};
use crate::projection::{project, Selection, SelectionSpec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default cap on the failures kept in a [`RunReport`].
pub const DEFAULT_MAX_FAILURE_DETAILS: usize = 1000;

/// What to do when a single record fails to decode or encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Count the failure, log it and carry on with the next record.
    #[default]
    Skip,
    /// End the run with [`PipelineError::Aborted`].
    Abort,
}

/// Run options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Reaction to record-scoped failures.
    pub error_policy: ErrorPolicy,
    /// Stop once this many records have been written.
    pub max_matches: Option<usize>,
    /// Log progress every this many records read.
    pub progress_interval: Option<usize>,
    /// How many failures to keep in the report; the counter stays exact.
    pub max_failure_details: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            error_policy: ErrorPolicy::Skip,
            max_matches: None,
            progress_interval: None,
            max_failure_details: DEFAULT_MAX_FAILURE_DETAILS,
        }
    }
}

impl PipelineConfig {
    /// Set the error policy.
    #[must_use]
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Stop after `n` written records.
    #[must_use]
    pub fn with_max_matches(mut self, n: usize) -> Self {
        self.max_matches = Some(n);
        self
    }

    /// Log progress every `n` records.
    #[must_use]
    pub fn with_progress_interval(mut self, n: usize) -> Self {
        self.progress_interval = Some(n);
        self
    }

    /// Keep at most `n` failures in the report.
    #[must_use]
    pub fn with_max_failure_details(mut self, n: usize) -> Self {
        self.max_failure_details = n;
        self
    }
}

/// Where in the pipeline a record failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Reading the record from the input.
    Decode,
    /// Writing the record to the output.
    Encode,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Decode => "decode",
            Stage::Encode => "encode",
        })
    }
}

/// One failed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    /// Zero-based position of the record in the input.
    pub record_index: usize,
    /// Input offset where the record started, if the reader tracks it.
    pub byte_offset: Option<u64>,
    /// Stage that failed.
    pub stage: Stage,
    /// The error message.
    pub reason: String,
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The input ran out.
    Exhausted,
    /// `max_matches` records were written.
    LimitReached,
    /// The cancellation token was set.
    Cancelled,
    /// An error ended the run.
    Aborted,
}

/// Counters and failures of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Records pulled from the input, including those that failed to decode.
    pub records_read: usize,
    /// Records accepted by the filter.
    pub records_matched: usize,
    /// Records written to the output.
    pub records_written: usize,
    /// Records that failed to decode or encode.
    pub records_errored: usize,
    /// The first `max_failure_details` failures.
    pub failures: Vec<RecordFailure>,
    /// Set once the run has stopped; `None` if the caller finished early.
    pub stop_reason: Option<StopReason>,
}

/// Errors that end a pipeline before or during a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The filter or selection spec did not compile.
    #[error(transparent)]
    Spec(#[from] SpecError),

    /// The run stopped on an error. Output written before it stays written.
    #[error("run aborted after {} records: {source}", .report.records_read)]
    Aborted {
        /// The error that ended the run.
        source: MarcError,
        /// Counters up to the failure.
        report: Box<RunReport>,
    },
}

/// Cooperative cancellation flag, checked between records.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A fresh, unset token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every run holding a clone of this token to stop.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// True once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcome of one [`PipelineRun::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A record matched and was written.
    Kept,
    /// A record did not match.
    Dropped,
    /// A record failed to decode and was skipped.
    DecodeFailed,
    /// A record matched but could not be encoded and was skipped.
    EncodeFailed,
    /// The run has stopped; further steps return the same value.
    Finished(StopReason),
}

/// Builder for [`Pipeline`].
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    filter: Option<FilterSpec>,
    selection: Option<SelectionSpec>,
    config: PipelineConfig,
}

impl PipelineBuilder {
    /// Keep only records matching `spec`. Without a filter every record is kept.
    #[must_use]
    pub fn filter(mut self, spec: FilterSpec) -> Self {
        self.filter = Some(spec);
        self
    }

    /// Reduce kept records to the fields in `spec`.
    #[must_use]
    pub fn selection(mut self, spec: SelectionSpec) -> Self {
        self.selection = Some(spec);
        self
    }

    /// Set run options.
    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Compile both specs.
    ///
    /// # Errors
    ///
    /// Returns one [`SpecError`] holding the problems of both specs, with
    /// paths prefixed by `filter` and `selection`.
    pub fn build(self) -> Result<Pipeline, SpecError> {
        let mut errors = SpecError::default();

        let predicate = match self.filter.as_ref().map(Predicate::compile) {
            None => Predicate::always(),
            Some(Ok(predicate)) => predicate,
            Some(Err(e)) => {
                errors.merge("filter", e);
                Predicate::always()
            },
        };
        let selection = match self.selection.as_ref().map(Selection::compile) {
            None => None,
            Some(Ok(selection)) => Some(selection),
            Some(Err(e)) => {
                errors.merge("selection", e);
                None
            },
        };

        errors.into_result(Pipeline {
            predicate,
            selection,
            config: self.config,
        })
    }
}

/// A compiled filter, selection and configuration.
///
/// A pipeline is immutable and can drive any number of runs.
#[derive(Debug, Clone)]
pub struct Pipeline {
    predicate: Predicate,
    selection: Option<Selection>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Start building a pipeline.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// The compiled predicate.
    #[must_use]
    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// The compiled selection, if any.
    #[must_use]
    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    /// The run options.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Begin a run that is advanced with [`PipelineRun::step`].
    pub fn start<R, W>(&self, source: R, sink: W) -> PipelineRun<'_, R, W>
    where
        R: FormatReader,
        W: FormatWriter,
    {
        PipelineRun {
            pipeline: self,
            reader: source,
            writer: sink,
            cancel: None,
            report: RunReport::default(),
            sink_finished: false,
        }
    }

    /// Run over the whole input.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Aborted`] on a stream error, or on a record
    /// failure under [`ErrorPolicy::Abort`].
    pub fn run<R, W>(&self, source: R, sink: W) -> Result<RunReport, PipelineError>
    where
        R: FormatReader,
        W: FormatWriter,
    {
        self.start(source, sink).run_to_end()
    }

    /// Run until the input ends, the limit is reached or `token` is
    /// cancelled, whichever comes first.
    ///
    /// # Errors
    ///
    /// As for [`Pipeline::run`].
    pub fn run_until<R, W>(
        &self,
        source: R,
        sink: W,
        token: &CancellationToken,
    ) -> Result<RunReport, PipelineError>
    where
        R: FormatReader,
        W: FormatWriter,
    {
        self.start(source, sink)
            .with_cancellation(token.clone())
            .run_to_end()
    }
}

/// One run of a [`Pipeline`] over a reader and a writer.
#[derive(Debug)]
pub struct PipelineRun<'p, R: FormatReader, W: FormatWriter> {
    pipeline: &'p Pipeline,
    reader: R,
    writer: W,
    cancel: Option<CancellationToken>,
    report: RunReport,
    sink_finished: bool,
}

impl<R: FormatReader, W: FormatWriter> PipelineRun<'_, R, W> {
    /// Check `token` before every record.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Counters so far.
    #[must_use]
    pub fn report(&self) -> &RunReport {
        &self.report
    }

    /// Process the next record.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Aborted`] when the run ends on an error. The
    /// sink has been finished by then and later steps return
    /// `Finished(StopReason::Aborted)`.
    pub fn step(&mut self) -> Result<Step, PipelineError> {
        if let Some(reason) = self.report.stop_reason {
            return Ok(Step::Finished(reason));
        }

        let config = &self.pipeline.config;
        if config
            .max_matches
            .is_some_and(|limit| self.report.records_written >= limit)
        {
            debug!(records_written = self.report.records_written, "match limit reached");
            return Ok(self.stop(StopReason::LimitReached));
        }
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            debug!(records_read = self.report.records_read, "run cancelled");
            return Ok(self.stop(StopReason::Cancelled));
        }

        let record_index = self.report.records_read;
        let byte_offset = self.reader.byte_offset();
        let record = match self.reader.read_record() {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(self.stop(StopReason::Exhausted)),
            Err(e) => {
                self.report.records_read += 1;
                self.log_progress();
                return self.fail(record_index, byte_offset, Stage::Decode, e);
            },
        };
        self.report.records_read += 1;
        self.log_progress();

        if !self.pipeline.predicate.matches(&record) {
            return Ok(Step::Dropped);
        }
        self.report.records_matched += 1;

        let projected = project(&record, self.pipeline.selection.as_ref());
        match self.writer.write_record(&projected) {
            Ok(()) => {
                self.report.records_written += 1;
                Ok(Step::Kept)
            },
            Err(e) => self.fail(record_index, byte_offset, Stage::Encode, e),
        }
    }

    /// Step until the run stops, then finish it.
    ///
    /// # Errors
    ///
    /// As for [`step`](Self::step) and [`finish`](Self::finish).
    pub fn run_to_end(mut self) -> Result<RunReport, PipelineError> {
        while !matches!(self.step()?, Step::Finished(_)) {}
        self.finish()
    }

    /// Finish the sink and return the report.
    ///
    /// May be called before the input is exhausted; the report's
    /// `stop_reason` is then `None`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Aborted`] if the sink cannot be finished.
    pub fn finish(mut self) -> Result<RunReport, PipelineError> {
        if !self.sink_finished {
            self.sink_finished = true;
            if let Err(e) = self.writer.finish() {
                return Err(self.abort(e));
            }
        }
        let report = self.report;
        info!(
            records_read = report.records_read,
            records_matched = report.records_matched,
            records_written = report.records_written,
            records_errored = report.records_errored,
            stop_reason = ?report.stop_reason,
            "run complete"
        );
        Ok(report)
    }

    fn stop(&mut self, reason: StopReason) -> Step {
        self.report.stop_reason = Some(reason);
        Step::Finished(reason)
    }

    fn log_progress(&self) {
        if let Some(every) = self.pipeline.config.progress_interval {
            if every > 0 && self.report.records_read % every == 0 {
                info!(
                    records_read = self.report.records_read,
                    records_matched = self.report.records_matched,
                    records_written = self.report.records_written,
                    records_errored = self.report.records_errored,
                    "progress"
                );
            }
        }
    }

    fn fail(
        &mut self,
        record_index: usize,
        byte_offset: Option<u64>,
        stage: Stage,
        error: MarcError,
    ) -> Result<Step, PipelineError> {
        self.report.records_errored += 1;
        if self.report.failures.len() < self.pipeline.config.max_failure_details {
            self.report.failures.push(RecordFailure {
                record_index,
                byte_offset,
                stage,
                reason: error.to_string(),
            });
        }

        if error.is_record_scoped() && self.pipeline.config.error_policy == ErrorPolicy::Skip {
            warn!(record_index, byte_offset, %stage, error = %error, "skipping record");
            return Ok(match stage {
                Stage::Decode => Step::DecodeFailed,
                Stage::Encode => Step::EncodeFailed,
            });
        }

        if !self.sink_finished {
            self.sink_finished = true;
            if let Err(e) = self.writer.finish() {
                warn!(error = %e, "could not finish output after abort");
            }
        }
        Err(self.abort(error))
    }

    fn abort(&mut self, error: MarcError) -> PipelineError {
        self.report.stop_reason = Some(StopReason::Aborted);
        warn!(
            records_read = self.report.records_read,
            error = %error,
            "run aborted"
        );
        PipelineError::Aborted {
            source: error,
            report: Box::new(self.report.clone()),
        }
    }
}

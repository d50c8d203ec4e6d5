//! Error types for MARC operations.
//!
//! This module provides the [`MarcError`] type for decoding, encoding and I/O
//! failures, the [`SpecError`] type for filter and selection specs that fail
//! to compile, and the [`Result`] convenience type.
//!
//! Every [`MarcError`] belongs to an [`ErrorScope`]. Record-scoped errors
//! affect a single record and a pipeline can carry on past them; spec- and
//! stream-scoped errors end the run.

use std::fmt;
use thiserror::Error;

/// Error type for all MARC library operations.
#[derive(Error, Debug)]
pub enum MarcError {
    /// Error indicating an invalid or malformed MARC record.
    #[error("Invalid MARC record: {0}")]
    InvalidRecord(String),

    /// Error indicating an invalid leader (24-byte header).
    #[error("Invalid leader: {0}")]
    InvalidLeader(String),

    /// Error indicating an invalid field structure.
    #[error("Invalid field: {0}")]
    InvalidField(String),

    /// The leader's declared record length disagrees with the record content.
    #[error("Record length mismatch: leader declares {declared} bytes, {detail}")]
    LengthMismatch {
        /// Length from leader positions 0-4.
        declared: usize,
        /// What the content actually showed.
        detail: String,
    },

    /// Error indicating a truncated or incomplete record.
    #[error("Truncated record: {0}")]
    TruncatedRecord(String),

    /// A record could not be represented in an output format.
    #[error("Cannot encode record as {format}: {reason}")]
    Encode {
        /// Name of the target representation.
        format: &'static str,
        /// Why encoding failed.
        reason: String,
    },

    /// The decoder lost track of record boundaries and cannot continue.
    #[error("Stream desynchronized: {0}")]
    Desynchronized(String),

    /// A filter or selection spec failed to compile.
    #[error(transparent)]
    Spec(#[from] SpecError),

    /// IO error from the underlying source/destination.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// How far the effects of an error reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorScope {
    /// Only the current record is affected; the stream position is intact.
    Record,
    /// The filter or selection spec is unusable; nothing can be filtered.
    Spec,
    /// The input or output stream is unusable.
    Stream,
}

impl MarcError {
    /// Classify this error by how far its effects reach.
    #[must_use]
    pub fn scope(&self) -> ErrorScope {
        match self {
            MarcError::InvalidRecord(_)
            | MarcError::InvalidLeader(_)
            | MarcError::InvalidField(_)
            | MarcError::LengthMismatch { .. }
            | MarcError::TruncatedRecord(_)
            | MarcError::Encode { .. } => ErrorScope::Record,
            MarcError::Spec(_) => ErrorScope::Spec,
            MarcError::Desynchronized(_) | MarcError::IoError(_) => ErrorScope::Stream,
        }
    }

    /// True when a pipeline may skip the affected record and keep going.
    #[must_use]
    pub fn is_record_scoped(&self) -> bool {
        self.scope() == ErrorScope::Record
    }

    pub(crate) fn encode(format: &'static str, reason: impl Into<String>) -> Self {
        MarcError::Encode {
            format,
            reason: reason.into(),
        }
    }
}

/// One problem found while compiling a spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecProblem {
    /// Location inside the filter spec, e.g. `children[1].operator`.
    pub path: String,
    /// Human-readable description.
    pub message: String,
}

/// Every problem found while compiling a filter or selection spec.
///
/// Compilation never stops at the first problem, so a caller sees the whole
/// list at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
pub struct SpecError {
    /// Problems in the order they were found.
    pub problems: Vec<SpecProblem>,
}

impl SpecError {
    pub(crate) fn push(&mut self, path: &str, message: impl Into<String>) {
        self.problems.push(SpecProblem {
            path: if path.is_empty() {
                "<root>".to_string()
            } else {
                path.to_string()
            },
            message: message.into(),
        });
    }

    /// Append `other`'s problems with their paths placed under `section`.
    pub(crate) fn merge(&mut self, section: &str, other: SpecError) {
        self.problems
            .extend(other.problems.into_iter().map(|p| SpecProblem {
                path: if p.path == "<root>" {
                    section.to_string()
                } else if p.path.starts_with('[') {
                    format!("{section}{}", p.path)
                } else {
                    format!("{section}.{}", p.path)
                },
                message: p.message,
            }));
    }

    pub(crate) fn into_result<T>(self, value: T) -> std::result::Result<T, SpecError> {
        if self.problems.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }

    /// Number of problems found.
    #[must_use]
    pub fn len(&self) -> usize {
        self.problems.len()
    }

    /// True when no problems were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }
}

impl fmt::Display for SpecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid spec ({} problem", self.problems.len())?;
        if self.problems.len() != 1 {
            write!(f, "s")?;
        }
        write!(f, ")")?;
        for problem in &self.problems {
            write!(f, "; {}: {}", problem.path, problem.message)?;
        }
        Ok(())
    }
}

/// Convenience type alias for [`std::result::Result`] with [`MarcError`].
pub type Result<T> = std::result::Result<T, MarcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes() {
        assert_eq!(
            MarcError::InvalidField("x".to_string()).scope(),
            ErrorScope::Record
        );
        assert_eq!(MarcError::encode("ISO 2709", "too long").scope(), ErrorScope::Record);
        assert_eq!(
            MarcError::Desynchronized("x".to_string()).scope(),
            ErrorScope::Stream
        );
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert_eq!(MarcError::from(io).scope(), ErrorScope::Stream);
        assert_eq!(MarcError::from(SpecError::default()).scope(), ErrorScope::Spec);
    }

    #[test]
    fn test_spec_error_display_lists_every_problem() {
        let mut err = SpecError::default();
        err.push("children[0].operator", "unknown operator 'eq'");
        err.push("", "empty group");
        let text = err.to_string();
        assert!(text.starts_with("Invalid spec (2 problems)"), "got: {text}");
        assert!(text.contains("children[0].operator: unknown operator 'eq'"));
        assert!(text.contains("<root>: empty group"));
    }

    #[test]
    fn test_into_result() {
        assert_eq!(SpecError::default().into_result(5), Ok(5));
        let mut err = SpecError::default();
        err.push("tag", "missing");
        assert!(err.into_result(()).is_err());
    }

    #[test]
    fn test_merge_places_paths_under_section() {
        let mut inner = SpecError::default();
        inner.push("", "empty group");
        inner.push("children[0].tag", "missing tag");
        let mut entries = SpecError::default();
        entries.push("[2].ind1", "not a single character");

        let mut all = SpecError::default();
        all.merge("filter", inner);
        all.merge("selection", entries);
        let paths: Vec<&str> = all.problems.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, vec!["filter", "filter.children[0].tag", "selection[2].ind1"]);
    }
}

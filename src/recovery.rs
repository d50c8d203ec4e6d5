//! Recovery strategies for malformed MARC records.
//!
//! Decoding problems come in two sizes. Problems with a single field (a bad
//! directory entry, a missing field terminator, a field without indicators)
//! leave the rest of the record readable; [`RecoveryMode`] decides whether they
//! fail the whole record or are skipped. Problems with the leader or the
//! record terminator always fail the record, because nothing inside it can be
//! trusted.

use crate::error::{MarcError, Result};
use serde::{Deserialize, Serialize};

/// Strategy for handling malformed fields inside an otherwise readable record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    /// Strict mode: any malformed field fails the record (default)
    #[default]
    Strict,
    /// Lenient mode: skip malformed fields and keep the rest of the record
    Lenient,
}

/// Collects the field-level problems skipped while decoding one record.
#[derive(Debug, Default)]
pub struct RecoveryContext {
    /// Current recovery mode
    pub mode: RecoveryMode,
    /// Problems that were skipped, in the order they were found
    pub recovery_messages: Vec<String>,
}

impl RecoveryContext {
    /// Create a new recovery context with the given mode
    #[must_use]
    pub fn new(mode: RecoveryMode) -> Self {
        RecoveryContext {
            mode,
            recovery_messages: Vec::new(),
        }
    }

    /// Either fail with `error` or note it and carry on, depending on the mode.
    ///
    /// # Errors
    ///
    /// Returns `error` unchanged in strict mode.
    pub fn recover(&mut self, error: MarcError) -> Result<()> {
        match self.mode {
            RecoveryMode::Strict => Err(error),
            RecoveryMode::Lenient => {
                self.recovery_messages.push(error.to_string());
                Ok(())
            },
        }
    }

    /// True if any problem was skipped.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.recovery_messages.is_empty()
    }
}

//! Per-record lookup by tag.
//!
//! [`FieldIndex`] is a read-only view over one [`Record`]: it groups the
//! record's fields by tag so a predicate can find every occurrence of a tag
//! without rescanning the record. It borrows the record and is dropped with
//! it; the record itself keeps its fields in plain record order.

use crate::record::{Field, Record};
use indexmap::IndexMap;
use std::cell::OnceCell;

/// Pseudo-tag that addresses the leader.
pub const LEADER_TAG: &str = "LDR";

/// Tag-keyed view of a single record.
///
/// # Examples
///
/// ```
/// use marcsift::{Field, FieldIndex, Leader, Record};
///
/// let record = Record::builder(Leader::default())
///     .field(Field::builder("650".to_string(), ' ', '0').subfield_str('a', "Cats").build())
///     .field(Field::builder("650".to_string(), ' ', '0').subfield_str('a', "Dogs").build())
///     .build();
/// let index = FieldIndex::new(&record);
///
/// assert_eq!(index.occurrences("650").len(), 2);
/// assert!(index.occurrences("100").is_empty());
/// assert!(index.any_value("650", &['a'], |v| v == "Dogs"));
/// ```
#[derive(Debug)]
pub struct FieldIndex<'r> {
    record: &'r Record,
    data: IndexMap<&'r str, Vec<&'r Field>>,
    control: IndexMap<&'r str, Vec<&'r str>>,
    leader: OnceCell<String>,
}

impl<'r> FieldIndex<'r> {
    /// Build the index in one pass over the record's fields.
    #[must_use]
    pub fn new(record: &'r Record) -> Self {
        let mut data: IndexMap<&str, Vec<&Field>> = IndexMap::new();
        for field in &record.fields {
            data.entry(field.tag.as_str()).or_default().push(field);
        }
        let mut control: IndexMap<&str, Vec<&str>> = IndexMap::new();
        for cf in &record.control_fields {
            control
                .entry(cf.tag.as_str())
                .or_default()
                .push(cf.value.as_str());
        }
        FieldIndex {
            record,
            data,
            control,
            leader: OnceCell::new(),
        }
    }

    /// The indexed record.
    #[must_use]
    pub fn record(&self) -> &'r Record {
        self.record
    }

    /// Every data field with `tag`, in record order. Empty when absent.
    #[must_use]
    pub fn occurrences(&self, tag: &str) -> &[&'r Field] {
        self.data.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every control field value with `tag`, in record order. Empty when absent.
    #[must_use]
    pub fn control_values(&self, tag: &str) -> &[&'r str] {
        self.control.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Values of the subfields of `field` with `code`, in field order.
    pub fn subfields(field: &'r Field, code: char) -> impl Iterator<Item = &'r str> {
        field.subfield_values(code)
    }

    /// Visit the values gathered for `tag` and `codes`, stopping at the first
    /// one for which `f` returns true. Returns whether such a value was found.
    ///
    /// Gathered values are, in order:
    /// - for [`LEADER_TAG`], the 24-character leader string;
    /// - for control fields, the raw value (only when `codes` is empty);
    /// - for data fields, every subfield value whose code is in `codes`, or
    ///   when `codes` is empty, one value per occurrence: all subfield values
    ///   joined with single spaces.
    pub fn any_value<F>(&self, tag: &str, codes: &[char], mut f: F) -> bool
    where
        F: FnMut(&str) -> bool,
    {
        if tag == LEADER_TAG {
            let leader = self.leader.get_or_init(|| self.record.leader.to_string());
            return codes.is_empty() && f(leader);
        }

        if codes.is_empty() && self.control_values(tag).iter().any(|&v| f(v)) {
            return true;
        }

        for field in self.occurrences(tag) {
            if codes.is_empty() {
                if f(&field.joined_values()) {
                    return true;
                }
            } else if field
                .subfields
                .iter()
                .filter(|sf| codes.contains(&sf.code))
                .any(|sf| f(&sf.value))
            {
                return true;
            }
        }
        false
    }
}

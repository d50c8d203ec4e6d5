//! In-memory shape of a bibliographic record.
//!
//! A [`Record`] is a leader plus two ordered lists: control fields
//! ([`ControlField`], tags 001-009, one opaque value each) and data fields
//! ([`Field`], two indicators and a list of [`Subfield`]s).
//!
//! Tags repeat and their relative positions survive a round trip, so fields
//! are stored as plain vectors. Keyed lookups go through
//! [`FieldIndex`](crate::field_index::FieldIndex), which is built on top.
//!
//! ```
//! use marcsift::{Field, Leader, Record};
//!
//! let record = Record::builder(Leader::default())
//!     .control_field_str("001", "ocm0001")
//!     .field(
//!         Field::builder("650", ' ', '0')
//!             .subfield_str('a', "Pond ecology")
//!             .subfield_str('x', "Juvenile literature")
//!             .build(),
//!     )
//!     .build();
//!
//! assert_eq!(record.control_number(), Some("ocm0001"));
//! let subject = record.first_field("650").map(Field::joined_values);
//! assert_eq!(subject.as_deref(), Some("Pond ecology Juvenile literature"));
//! ```

use crate::leader::Leader;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// The 24-character leader.
    pub leader: Leader,
    /// Fields 001-009, in input order.
    pub control_fields: Vec<ControlField>,
    /// Fields 010 and up, in input order.
    pub fields: Vec<Field>,
}

/// Tag and raw value of a control field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlField {
    /// Three-character tag, `001` to `009`.
    pub tag: String,
    /// Everything between the directory-addressed start and the field terminator.
    pub value: String,
}

/// A data field.
///
/// Most fields carry a handful of subfields, which fit inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Three-character tag.
    pub tag: String,
    #[allow(missing_docs)]
    pub indicator1: char,
    #[allow(missing_docs)]
    pub indicator2: char,
    /// Subfields in input order; codes may repeat.
    pub subfields: SmallVec<[Subfield; 4]>,
}

/// A coded value inside a data field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subfield {
    /// The character following the subfield delimiter.
    pub code: char,
    #[allow(missing_docs)]
    pub value: String,
}

/// True for tags that hold control fields (001-009).
#[must_use]
pub fn is_control_tag(tag: &str) -> bool {
    tag.len() == 3 && tag.starts_with("00") && tag.bytes().all(|b| b.is_ascii_digit())
}

impl Record {
    /// An empty record with the given leader.
    #[must_use]
    pub fn new(leader: Leader) -> Self {
        Record {
            leader,
            control_fields: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Start building a record.
    #[must_use]
    pub fn builder(leader: Leader) -> RecordBuilder {
        RecordBuilder(Record::new(leader))
    }

    /// Append a control field after the existing ones.
    pub fn add_control_field(&mut self, tag: impl Into<String>, value: impl Into<String>) {
        self.control_fields.push(ControlField {
            tag: tag.into(),
            value: value.into(),
        });
    }

    /// Append a data field after the existing ones.
    pub fn add_field(&mut self, field: Field) {
        self.fields.push(field);
    }

    /// Value of the first control field tagged `tag`.
    #[must_use]
    pub fn control_field(&self, tag: &str) -> Option<&str> {
        self.control_fields
            .iter()
            .find_map(|cf| (cf.tag == tag).then_some(cf.value.as_str()))
    }

    /// First data field tagged `tag`.
    #[must_use]
    pub fn first_field(&self, tag: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.tag == tag)
    }

    /// The 001 value, used as the record's identifier in flat output.
    #[must_use]
    pub fn control_number(&self) -> Option<&str> {
        self.control_field("001")
    }

    /// 245 $a.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.first_field("245")?.first_subfield('a')
    }

    /// Control and data fields together.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.control_fields.len() + self.fields.len()
    }
}

impl Field {
    /// A data field with no subfields yet.
    #[must_use]
    pub fn new(tag: impl Into<String>, indicator1: char, indicator2: char) -> Self {
        Field {
            tag: tag.into(),
            indicator1,
            indicator2,
            subfields: SmallVec::new(),
        }
    }

    /// Start building a data field.
    #[must_use]
    pub fn builder(tag: impl Into<String>, indicator1: char, indicator2: char) -> FieldBuilder {
        FieldBuilder(Field::new(tag, indicator1, indicator2))
    }

    /// Append a subfield.
    pub fn add_subfield(&mut self, code: char, value: impl Into<String>) {
        self.subfields.push(Subfield {
            code,
            value: value.into(),
        });
    }

    /// Value of the first subfield with `code`.
    #[must_use]
    pub fn first_subfield(&self, code: char) -> Option<&str> {
        self.subfield_values(code).next()
    }

    /// Values of every subfield with `code`, in order.
    pub fn subfield_values(&self, code: char) -> impl Iterator<Item = &str> {
        self.subfields
            .iter()
            .filter(move |sf| sf.code == code)
            .map(|sf| sf.value.as_str())
    }

    /// All subfield values joined by single spaces.
    #[must_use]
    pub fn joined_values(&self) -> String {
        let mut joined = String::new();
        for (i, sf) in self.subfields.iter().enumerate() {
            if i > 0 {
                joined.push(' ');
            }
            joined.push_str(&sf.value);
        }
        joined
    }
}

/// Builder returned by [`Record::builder`].
#[derive(Debug)]
pub struct RecordBuilder(Record);

impl RecordBuilder {
    /// Append a control field.
    #[must_use]
    pub fn control_field(mut self, tag: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.add_control_field(tag, value);
        self
    }

    /// Append a control field from borrowed text.
    #[must_use]
    pub fn control_field_str(self, tag: &str, value: &str) -> Self {
        self.control_field(tag, value)
    }

    /// Append a data field.
    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.0.add_field(field);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn build(self) -> Record {
        self.0
    }
}

/// Builder returned by [`Field::builder`].
#[derive(Debug)]
pub struct FieldBuilder(Field);

impl FieldBuilder {
    /// Append a subfield.
    #[must_use]
    pub fn subfield(mut self, code: char, value: impl Into<String>) -> Self {
        self.0.add_subfield(code, value);
        self
    }

    /// Append a subfield from borrowed text.
    #[must_use]
    pub fn subfield_str(self, code: char, value: &str) -> Self {
        self.subfield(code, value)
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn build(self) -> Field {
        self.0
    }
}

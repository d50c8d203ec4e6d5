//! Field projection: reduce a kept record to selected fields and subfields.
//!
//! A [`SelectionSpec`] lists the data fields to keep. Each entry names a tag
//! and may restrict the match to particular indicators and the output to
//! particular subfield codes:
//!
//! ```json
//! [
//!   {"tag": "245", "subfields": "ab"},
//!   {"tag": "650", "ind2": "0"},
//!   {"tag": "100"}
//! ]
//! ```
//!
//! The leader and all control fields are always kept. A data field is kept
//! when at least one entry names its tag and matches its indicators; it keeps
//! the union of the codes of the matching entries, or every subfield if any
//! matching entry lists no codes. A selected field whose subfields all fall
//! outside the code list is still kept, with its tag and indicators and no
//! subfields. Field order and subfield order are never changed.

use crate::error::SpecError;
use crate::record::{Field, Record};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::borrow::Cow;

/// One selection entry. Keys other than the four below are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectionEntry {
    /// Tag to keep.
    pub tag: String,
    /// Subfield codes to keep; every subfield when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subfields: Option<String>,
    /// Required first indicator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ind1: Option<String>,
    /// Required second indicator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ind2: Option<String>,
}

impl SelectionEntry {
    /// Keep every occurrence of `tag` whole.
    #[must_use]
    pub fn tag(tag: &str) -> Self {
        SelectionEntry {
            tag: tag.to_string(),
            ..SelectionEntry::default()
        }
    }

    /// Keep only these subfield codes.
    #[must_use]
    pub fn subfields(mut self, codes: &str) -> Self {
        self.subfields = Some(codes.to_string());
        self
    }

    /// Only match fields with these indicators; `None` matches any.
    #[must_use]
    pub fn indicators(mut self, ind1: Option<char>, ind2: Option<char>) -> Self {
        self.ind1 = ind1.map(String::from);
        self.ind2 = ind2.map(String::from);
        self
    }
}

/// A list of selection entries, serialized as a plain JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectionSpec {
    /// The entries, in any order.
    pub entries: Vec<SelectionEntry>,
}

impl From<Vec<SelectionEntry>> for SelectionSpec {
    fn from(entries: Vec<SelectionEntry>) -> Self {
        SelectionSpec { entries }
    }
}

#[derive(Debug, Clone)]
struct Rule {
    ind1: Option<char>,
    ind2: Option<char>,
    codes: Option<SmallVec<[char; 4]>>,
}

impl Rule {
    fn applies_to(&self, field: &Field) -> bool {
        self.ind1.map_or(true, |c| c == field.indicator1)
            && self.ind2.map_or(true, |c| c == field.indicator2)
    }
}

enum Keep {
    Whole,
    Codes(SmallVec<[char; 8]>),
    Nothing,
}

/// A compiled selection.
#[derive(Debug, Clone)]
pub struct Selection {
    rules: IndexMap<String, Vec<Rule>>,
}

impl Selection {
    /// Validate `spec` and compile it.
    ///
    /// # Errors
    ///
    /// Returns every malformed entry at once: tags that are not 3
    /// characters, empty code lists and indicators that are not exactly one
    /// character.
    pub fn compile(spec: &SelectionSpec) -> Result<Selection, SpecError> {
        let mut errors = SpecError::default();
        let mut rules: IndexMap<String, Vec<Rule>> = IndexMap::new();

        for (i, entry) in spec.entries.iter().enumerate() {
            let before = errors.len();
            if entry.tag.chars().count() != 3 {
                errors.push(
                    &format!("[{i}].tag"),
                    format!("tag {:?} is not 3 characters", entry.tag),
                );
            }
            let codes = match entry.subfields.as_deref() {
                None => None,
                Some("") => {
                    errors.push(&format!("[{i}].subfields"), "empty subfield code list");
                    None
                },
                Some(codes) => Some(codes.chars().collect()),
            };
            let ind1 = indicator(entry.ind1.as_deref(), &format!("[{i}].ind1"), &mut errors);
            let ind2 = indicator(entry.ind2.as_deref(), &format!("[{i}].ind2"), &mut errors);

            if errors.len() == before {
                rules
                    .entry(entry.tag.clone())
                    .or_default()
                    .push(Rule { ind1, ind2, codes });
            }
        }

        errors.into_result(Selection { rules })
    }

    /// Whether some entry names `field`'s tag and matches its indicators.
    /// Selected fields always appear in the projection.
    #[must_use]
    pub fn selects(&self, field: &Field) -> bool {
        !matches!(self.decide(field), Keep::Nothing)
    }

    fn decide(&self, field: &Field) -> Keep {
        let mut union: SmallVec<[char; 8]> = SmallVec::new();
        let mut matched = false;
        for rule in self
            .rules
            .get(field.tag.as_str())
            .into_iter()
            .flatten()
            .filter(|rule| rule.applies_to(field))
        {
            matched = true;
            match &rule.codes {
                None => return Keep::Whole,
                Some(codes) => {
                    for &code in codes {
                        if !union.contains(&code) {
                            union.push(code);
                        }
                    }
                },
            }
        }
        if matched {
            Keep::Codes(union)
        } else {
            Keep::Nothing
        }
    }
}

fn indicator(value: Option<&str>, path: &str, errors: &mut SpecError) -> Option<char> {
    let value = value?;
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => {
            errors.push(path, format!("indicator {value:?} is not a single character"));
            None
        },
    }
}

/// Apply `selection` to `record`.
///
/// Without a selection, or when the selection keeps every field whole, the
/// record is returned borrowed and nothing is copied.
///
/// # Examples
///
/// ```
/// use marcsift::{project, Field, Leader, Record, Selection, SelectionEntry, SelectionSpec};
///
/// let record = Record::builder(Leader::default())
///     .control_field_str("001", "r1")
///     .field(Field::builder("245".to_string(), '1', '0')
///         .subfield_str('a', "Title")
///         .subfield_str('c', "Author")
///         .build())
///     .field(Field::builder("500".to_string(), ' ', ' ').subfield_str('a', "Note").build())
///     .build();
///
/// let spec = SelectionSpec::from(vec![SelectionEntry::tag("245").subfields("a")]);
/// let selection = Selection::compile(&spec).unwrap();
/// let projected = project(&record, Some(&selection));
///
/// assert_eq!(projected.control_number(), Some("r1"));
/// assert_eq!(projected.fields.len(), 1);
/// assert_eq!(projected.fields[0].subfields.len(), 1);
/// ```
#[must_use]
pub fn project<'r>(record: &'r Record, selection: Option<&Selection>) -> Cow<'r, Record> {
    let Some(selection) = selection else {
        return Cow::Borrowed(record);
    };

    let decisions: Vec<Keep> = record.fields.iter().map(|f| selection.decide(f)).collect();
    if decisions.iter().all(|d| matches!(d, Keep::Whole)) {
        return Cow::Borrowed(record);
    }

    let fields = record
        .fields
        .iter()
        .zip(decisions)
        .filter_map(|(field, keep)| match keep {
            Keep::Whole => Some(field.clone()),
            Keep::Nothing => None,
            Keep::Codes(codes) => {
                let subfields: SmallVec<_> = field
                    .subfields
                    .iter()
                    .filter(|sf| codes.contains(&sf.code))
                    .cloned()
                    .collect();
                Some(Field {
                    subfields,
                    ..Field::new(field.tag.clone(), field.indicator1, field.indicator2)
                })
            },
        })
        .collect();

    Cow::Owned(Record {
        leader: record.leader.clone(),
        control_fields: record.control_fields.clone(),
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leader::Leader;

    fn make_record() -> Record {
        Record::builder(Leader::default())
            .control_field_str("001", "r1")
            .control_field_str("008", "900101s1990")
            .field(
                Field::builder("245".to_string(), '1', '0')
                    .subfield_str('a', "Title")
                    .subfield_str('b', "Subtitle")
                    .subfield_str('c', "Author")
                    .build(),
            )
            .field(
                Field::builder("650".to_string(), ' ', '0')
                    .subfield_str('a', "Biology")
                    .build(),
            )
            .field(
                Field::builder("500".to_string(), ' ', ' ')
                    .subfield_str('a', "Note")
                    .build(),
            )
            .field(
                Field::builder("650".to_string(), ' ', '7')
                    .subfield_str('a', "Chemistry")
                    .subfield_str('2', "fast")
                    .build(),
            )
            .build()
    }

    fn compile(entries: Vec<SelectionEntry>) -> Selection {
        Selection::compile(&SelectionSpec::from(entries)).unwrap()
    }

    fn tags(record: &Record) -> Vec<&str> {
        record.fields.iter().map(|f| f.tag.as_str()).collect()
    }

    #[test]
    fn test_no_selection_borrows() {
        let record = make_record();
        assert!(matches!(project(&record, None), Cow::Borrowed(_)));
    }

    #[test]
    fn test_selection_keeping_everything_borrows() {
        let record = make_record();
        let selection = compile(vec![
            SelectionEntry::tag("245"),
            SelectionEntry::tag("650"),
            SelectionEntry::tag("500"),
        ]);
        assert!(matches!(project(&record, Some(&selection)), Cow::Borrowed(_)));
    }

    #[test]
    fn test_keeps_control_fields_and_order() {
        let record = make_record();
        let selection = compile(vec![SelectionEntry::tag("650"), SelectionEntry::tag("245")]);
        let projected = project(&record, Some(&selection));
        assert_eq!(tags(&projected), vec!["245", "650", "650"]);
        assert_eq!(projected.control_fields, record.control_fields);
        assert_eq!(projected.leader, record.leader);
    }

    #[test]
    fn test_subfield_restriction() {
        let record = make_record();
        let selection = compile(vec![SelectionEntry::tag("245").subfields("ca")]);
        let projected = project(&record, Some(&selection));
        let codes: Vec<char> = projected.fields[0].subfields.iter().map(|s| s.code).collect();
        assert_eq!(codes, vec!['a', 'c']);
    }

    #[test]
    fn test_indicator_match_and_code_union() {
        let record = make_record();
        let selection = compile(vec![
            SelectionEntry::tag("650").indicators(None, Some('7')).subfields("a"),
            SelectionEntry::tag("650").indicators(None, Some('7')).subfields("2"),
        ]);
        let projected = project(&record, Some(&selection));
        assert_eq!(projected.fields.len(), 1);
        assert_eq!(projected.fields[0].indicator2, '7');
        assert_eq!(projected.fields[0].subfields.len(), 2);
    }

    #[test]
    fn test_whole_field_wins_over_codes() {
        let record = make_record();
        let selection = compile(vec![
            SelectionEntry::tag("245").subfields("a"),
            SelectionEntry::tag("245"),
        ]);
        let projected = project(&record, Some(&selection));
        assert_eq!(projected.fields[0].subfields.len(), 3);
    }

    #[test]
    fn test_selected_field_without_matching_codes_is_kept_empty() {
        let record = make_record();
        let selection = compile(vec![
            SelectionEntry::tag("245"),
            SelectionEntry::tag("650").subfields("z"),
        ]);
        let projected = project(&record, Some(&selection));
        assert_eq!(tags(&projected), vec!["245", "650", "650"]);
        assert_eq!(projected.fields[1].indicator2, '0');
        assert_eq!(projected.fields[2].indicator2, '7');
        assert!(projected.fields[1].subfields.is_empty());
        assert!(projected.fields[2].subfields.is_empty());
        assert_eq!(projected.control_fields.len(), 2);
    }

    #[test]
    fn test_compile_errors() {
        let spec = SelectionSpec::from(vec![
            SelectionEntry::tag("24"),
            SelectionEntry::tag("245").subfields(""),
            SelectionEntry {
                ind1: Some("10".to_string()),
                ..SelectionEntry::tag("650")
            },
        ]);
        let err = Selection::compile(&spec).unwrap_err();
        let paths: Vec<&str> = err.problems.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, vec!["[0].tag", "[1].subfields", "[2].ind1"]);
    }

    #[test]
    fn test_unknown_entry_keys_are_rejected() {
        let err = serde_json::from_str::<SelectionSpec>(r#"[{"tag": "245", "subfield": "a"}]"#)
            .unwrap_err();
        assert!(err.to_string().contains("unknown field"), "{err}");
    }

    #[test]
    fn test_deserialize_from_json() {
        let spec: SelectionSpec =
            serde_json::from_str(r#"[{"tag": "245", "subfields": "ab"}, {"tag": "650", "ind2": "0"}]"#)
                .unwrap();
        assert_eq!(spec.entries.len(), 2);
        let projected = project(&make_record(), Some(&Selection::compile(&spec).unwrap())).into_owned();
        assert_eq!(tags(&projected), vec!["245", "650"]);
        assert_eq!(projected.fields[0].subfields.len(), 2);
    }
}

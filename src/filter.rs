//! Record filtering: filter specs and the predicates compiled from them.
//!
//! A [`FilterSpec`] is plain data, usually deserialized from JSON or built
//! with the constructors below. [`Predicate::compile`] validates the whole
//! tree at once and turns it into a [`Predicate`], which is then evaluated
//! against a [`FieldIndex`] for every record.
//!
//! # Clause semantics
//!
//! A clause names one or more tags (comma separated), optionally one or more
//! subfield codes, an operator and an operand. It gathers every value of
//! those tags and codes from the record (see [`FieldIndex::any_value`]) and
//! is true if **at least one** gathered value satisfies the operator. A tag
//! or code that is absent gathers nothing, so every operator is simply false.
//!
//! | Operator | True for a value that |
//! |----------|------------------------|
//! | `equals` | equals the operand |
//! | `contains` | contains the operand |
//! | `starts_with` | starts with the operand |
//! | `matches_pattern` | matches the glob operand as a whole (see [`GlobPattern`]) |
//! | `exists` | exists at all (the operand is ignored) |
//! | `greater_than`, `greater_or_equal`, `less_than`, `less_or_equal` | orders after/before the operand |
//!
//! An integer operand compares numerically: the value is trimmed and parsed
//! as an integer, and values that do not parse fail. Text operands compare as
//! strings. `case_insensitive` lowercases both sides, and `positions`
//! (`[start, end]`, inclusive, zero-based, in characters) compares only that
//! slice of each value.
//!
//! # Example
//!
//! ```
//! use marcsift::{ClauseSpec, FieldIndex, FilterSpec, Field, Leader, Operand, Predicate, Record};
//!
//! let spec = FilterSpec::and(vec![
//!     FilterSpec::equals("650", Some("a"), "Computer science"),
//!     ClauseSpec::new("008", "greater_than")
//!         .operand(Operand::Integer(1990))
//!         .positions(7, 10)
//!         .into(),
//! ]);
//! let predicate = Predicate::compile(&spec).unwrap();
//!
//! let record = Record::builder(Leader::default())
//!     .control_field_str("008", "950101s1995    nyu")
//!     .field(Field::builder("650".to_string(), ' ', '0').subfield_str('a', "Computer science").build())
//!     .build();
//! assert!(predicate.evaluate(&FieldIndex::new(&record)));
//! ```

use crate::error::SpecError;
use crate::field_index::FieldIndex;
use crate::pattern::GlobPattern;
use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

/// A filter specification tree.
///
/// Unknown keys are rejected, so a misspelled `subfield` or `operand` fails
/// to parse instead of silently widening the clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    untagged,
    expecting = "a clause with keys tag, subfield, operator, operand, case_insensitive and \
                 positions, or a group with keys combinator and children"
)]
pub enum FilterSpec {
    /// A boolean combination of child specs.
    Group(GroupSpec),
    /// A single field-match clause.
    Clause(ClauseSpec),
}

/// `{"combinator": "and" | "or" | "not", "children": [...]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSpec {
    /// `and`, `or` or `not`.
    pub combinator: String,
    /// Child specs, evaluated in order.
    #[serde(default)]
    pub children: Vec<FilterSpec>,
}

/// An operand: text, or an integer for numeric comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    /// Compare as an integer.
    Integer(i64),
    /// Compare as text.
    Text(String),
}

impl From<&str> for Operand {
    fn from(text: &str) -> Self {
        Operand::Text(text.to_string())
    }
}

impl From<i64> for Operand {
    fn from(n: i64) -> Self {
        Operand::Integer(n)
    }
}

/// A single field-match clause, as supplied by the caller.
///
/// Every member is optional at this level so that compilation can report
/// all missing pieces at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClauseSpec {
    /// One tag, or several separated by commas. `LDR` addresses the leader.
    pub tag: Option<String>,
    /// Subfield codes to gather; each character is one code.
    pub subfield: Option<String>,
    /// Operator name.
    pub operator: Option<String>,
    /// Operand; required by every operator except `exists`.
    pub operand: Option<Operand>,
    /// Compare lowercased values.
    pub case_insensitive: bool,
    /// `[start, end]` character positions to compare, inclusive.
    pub positions: Option<Vec<usize>>,
}

impl ClauseSpec {
    /// Start a clause with a tag and an operator name.
    #[must_use]
    pub fn new(tag: &str, operator: &str) -> Self {
        ClauseSpec {
            tag: Some(tag.to_string()),
            operator: Some(operator.to_string()),
            ..ClauseSpec::default()
        }
    }

    /// Restrict the clause to these subfield codes.
    #[must_use]
    pub fn subfield(mut self, codes: &str) -> Self {
        self.subfield = Some(codes.to_string());
        self
    }

    /// Set the operand.
    #[must_use]
    pub fn operand(mut self, operand: impl Into<Operand>) -> Self {
        self.operand = Some(operand.into());
        self
    }

    /// Compare case-insensitively.
    #[must_use]
    pub fn case_insensitive(mut self, yes: bool) -> Self {
        self.case_insensitive = yes;
        self
    }

    /// Compare only characters `start..=end` of each value.
    #[must_use]
    pub fn positions(mut self, start: usize, end: usize) -> Self {
        self.positions = Some(vec![start, end]);
        self
    }
}

impl From<ClauseSpec> for FilterSpec {
    fn from(clause: ClauseSpec) -> Self {
        FilterSpec::Clause(clause)
    }
}

impl FilterSpec {
    fn leaf(tag: &str, subfield: Option<&str>, operator: &str, operand: Option<&str>) -> Self {
        let mut clause = ClauseSpec::new(tag, operator);
        clause.subfield = subfield.map(str::to_string);
        clause.operand = operand.map(Operand::from);
        FilterSpec::Clause(clause)
    }

    /// `equals` clause with a text operand.
    #[must_use]
    pub fn equals(tag: &str, subfield: Option<&str>, operand: &str) -> Self {
        Self::leaf(tag, subfield, "equals", Some(operand))
    }

    /// `contains` clause.
    #[must_use]
    pub fn contains(tag: &str, subfield: Option<&str>, operand: &str) -> Self {
        Self::leaf(tag, subfield, "contains", Some(operand))
    }

    /// `starts_with` clause.
    #[must_use]
    pub fn starts_with(tag: &str, subfield: Option<&str>, operand: &str) -> Self {
        Self::leaf(tag, subfield, "starts_with", Some(operand))
    }

    /// `matches_pattern` clause.
    #[must_use]
    pub fn matches_pattern(tag: &str, subfield: Option<&str>, pattern: &str) -> Self {
        Self::leaf(tag, subfield, "matches_pattern", Some(pattern))
    }

    /// `exists` clause.
    #[must_use]
    pub fn exists(tag: &str, subfield: Option<&str>) -> Self {
        Self::leaf(tag, subfield, "exists", None)
    }

    fn group(combinator: &str, children: Vec<FilterSpec>) -> Self {
        FilterSpec::Group(GroupSpec {
            combinator: combinator.to_string(),
            children,
        })
    }

    /// True when every child is true.
    #[must_use]
    pub fn and(children: Vec<FilterSpec>) -> Self {
        Self::group("and", children)
    }

    /// True when any child is true.
    #[must_use]
    pub fn or(children: Vec<FilterSpec>) -> Self {
        Self::group("or", children)
    }

    /// Negation of `child`.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(child: FilterSpec) -> Self {
        Self::group("not", vec![child])
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Value equals the operand.
    Equals,
    /// Value contains the operand.
    Contains,
    /// Value starts with the operand.
    StartsWith,
    /// Whole value matches a glob pattern.
    MatchesPattern,
    /// Some value exists.
    Exists,
    /// Value orders after the operand.
    GreaterThan,
    /// Value orders after or equal to the operand.
    GreaterOrEqual,
    /// Value orders before the operand.
    LessThan,
    /// Value orders before or equal to the operand.
    LessOrEqual,
}

impl Operator {
    /// Every operator, in documentation order.
    pub const ALL: [Operator; 9] = [
        Operator::Equals,
        Operator::Contains,
        Operator::StartsWith,
        Operator::MatchesPattern,
        Operator::Exists,
        Operator::GreaterThan,
        Operator::GreaterOrEqual,
        Operator::LessThan,
        Operator::LessOrEqual,
    ];

    /// Look an operator up by its JSON name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    /// The operator's JSON name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::Contains => "contains",
            Operator::StartsWith => "starts_with",
            Operator::MatchesPattern => "matches_pattern",
            Operator::Exists => "exists",
            Operator::GreaterThan => "greater_than",
            Operator::GreaterOrEqual => "greater_or_equal",
            Operator::LessThan => "less_than",
            Operator::LessOrEqual => "less_or_equal",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Operator::GreaterThan => ordering == Ordering::Greater,
            Operator::GreaterOrEqual => ordering != Ordering::Less,
            Operator::LessThan => ordering == Ordering::Less,
            Operator::LessOrEqual => ordering != Ordering::Greater,
            _ => ordering == Ordering::Equal,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
enum Comparand {
    Nothing,
    Text(String),
    Integer(i64),
    Pattern(GlobPattern),
}

/// A compiled, validated clause.
#[derive(Debug, Clone)]
pub struct Clause {
    tags: Vec<String>,
    codes: Vec<char>,
    operator: Operator,
    comparand: Comparand,
    case_insensitive: bool,
    positions: Option<(usize, usize)>,
}

impl Clause {
    /// Tags this clause gathers from.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// The clause's operator.
    #[must_use]
    pub fn operator(&self) -> Operator {
        self.operator
    }

    fn evaluate(&self, index: &FieldIndex<'_>) -> bool {
        self.tags
            .iter()
            .any(|tag| index.any_value(tag, &self.codes, |value| self.test(value)))
    }

    fn test(&self, value: &str) -> bool {
        if self.operator == Operator::Exists {
            return true;
        }

        let mut value = Cow::Borrowed(value);
        if let Some((start, end)) = self.positions {
            value = Cow::Owned(value.chars().skip(start).take((end - start).saturating_add(1)).collect());
        }
        if self.case_insensitive && !matches!(self.comparand, Comparand::Pattern(_)) {
            value = Cow::Owned(value.to_lowercase());
        }

        match (&self.comparand, self.operator) {
            (Comparand::Pattern(pattern), _) => pattern.is_match(&value),
            (Comparand::Integer(n), op) => value
                .trim()
                .parse::<i64>()
                .is_ok_and(|v| op.accepts(v.cmp(n))),
            (Comparand::Text(t), Operator::Contains) => value.contains(t.as_str()),
            (Comparand::Text(t), Operator::StartsWith) => value.starts_with(t.as_str()),
            (Comparand::Text(t), op) => op.accepts(value.as_ref().cmp(t.as_str())),
            (Comparand::Nothing, _) => false,
        }
    }
}

/// An executable predicate tree.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Passes every record; used when no filter is configured.
    Always,
    /// A single clause.
    Leaf(Clause),
    /// True when every child is true; stops at the first false child.
    And(Vec<Predicate>),
    /// True when any child is true; stops at the first true child.
    Or(Vec<Predicate>),
    /// Negation.
    Not(Box<Predicate>),
    /// Panics when evaluated; proves that short-circuiting skips a branch.
    #[cfg(test)]
    Tripwire,
}

impl Predicate {
    /// A predicate that keeps every record.
    #[must_use]
    pub fn always() -> Self {
        Predicate::Always
    }

    /// True for [`Predicate::Always`], which needs no field index.
    #[must_use]
    pub fn is_always(&self) -> bool {
        matches!(self, Predicate::Always)
    }

    /// Validate `spec` and compile it.
    ///
    /// # Errors
    ///
    /// Returns every problem in the tree at once, each with its location
    /// (for example `children[1].operator`).
    pub fn compile(spec: &FilterSpec) -> Result<Predicate, SpecError> {
        let mut errors = SpecError::default();
        let predicate = compile_node(spec, "", &mut errors);
        errors.into_result(predicate)
    }

    /// Evaluate against one record's index.
    #[must_use]
    pub fn evaluate(&self, index: &FieldIndex<'_>) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Leaf(clause) => clause.evaluate(index),
            Predicate::And(children) => children.iter().all(|p| p.evaluate(index)),
            Predicate::Or(children) => children.iter().any(|p| p.evaluate(index)),
            Predicate::Not(child) => !child.evaluate(index),
            #[cfg(test)]
            Predicate::Tripwire => panic!("short-circuit evaluation reached a skipped branch"),
        }
    }

    /// Build an index for `record` and evaluate against it.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        self.is_always() || self.evaluate(&FieldIndex::new(record))
    }
}

fn child_path(path: &str, member: &str) -> String {
    if path.is_empty() {
        member.to_string()
    } else {
        format!("{path}.{member}")
    }
}

fn compile_node(spec: &FilterSpec, path: &str, errors: &mut SpecError) -> Predicate {
    match spec {
        FilterSpec::Clause(clause) => {
            compile_clause(clause, path, errors).map_or(Predicate::Always, Predicate::Leaf)
        },
        FilterSpec::Group(group) => {
            let children: Vec<Predicate> = group
                .children
                .iter()
                .enumerate()
                .map(|(i, child)| compile_node(child, &child_path(path, &format!("children[{i}]")), errors))
                .collect();

            match group.combinator.to_ascii_lowercase().as_str() {
                "and" | "or" if children.is_empty() => {
                    errors.push(path, format!("'{}' group has no children", group.combinator));
                    Predicate::Always
                },
                "and" => Predicate::And(children),
                "or" => Predicate::Or(children),
                "not" => {
                    if children.len() == 1 {
                        let child = children.into_iter().next().unwrap_or(Predicate::Always);
                        Predicate::Not(Box::new(child))
                    } else {
                        errors.push(
                            path,
                            format!("'not' takes exactly one child, got {}", children.len()),
                        );
                        Predicate::Always
                    }
                },
                other => {
                    errors.push(
                        &child_path(path, "combinator"),
                        format!("unknown combinator '{other}' (expected and, or, not)"),
                    );
                    Predicate::Always
                },
            }
        },
    }
}

fn compile_clause(spec: &ClauseSpec, path: &str, errors: &mut SpecError) -> Option<Clause> {
    let before = errors.len();

    let mut tags = Vec::new();
    match spec.tag.as_deref().map(str::trim) {
        None | Some("") => errors.push(&child_path(path, "tag"), "missing tag"),
        Some(list) => {
            for tag in list.split(',').map(str::trim) {
                if tag.chars().count() == 3 {
                    tags.push(tag.to_string());
                } else {
                    errors.push(
                        &child_path(path, "tag"),
                        format!("tag {tag:?} is not 3 characters"),
                    );
                }
            }
        },
    }

    let codes: Vec<char> = match spec.subfield.as_deref() {
        None => Vec::new(),
        Some("") => {
            errors.push(&child_path(path, "subfield"), "empty subfield code list");
            Vec::new()
        },
        Some(codes) => codes.chars().collect(),
    };

    let operator = match spec.operator.as_deref() {
        None => {
            errors.push(&child_path(path, "operator"), "missing operator");
            None
        },
        Some(name) => {
            let op = Operator::from_name(name);
            if op.is_none() {
                let known: Vec<&str> = Operator::ALL.iter().map(|op| op.name()).collect();
                errors.push(
                    &child_path(path, "operator"),
                    format!("unknown operator '{name}' (expected one of {})", known.join(", ")),
                );
            }
            op
        },
    };

    let positions = match spec.positions.as_deref() {
        None => None,
        Some(&[start, end]) if start <= end => Some((start, end)),
        Some(other) => {
            errors.push(
                &child_path(path, "positions"),
                format!("expected [start, end] with start <= end, got {other:?}"),
            );
            None
        },
    };

    let comparand = operator.and_then(|op| compile_operand(spec, op, path, errors));

    if errors.len() > before {
        return None;
    }
    Some(Clause {
        tags,
        codes,
        operator: operator?,
        comparand: comparand?,
        case_insensitive: spec.case_insensitive,
        positions,
    })
}

fn compile_operand(
    spec: &ClauseSpec,
    operator: Operator,
    path: &str,
    errors: &mut SpecError,
) -> Option<Comparand> {
    let operand_path = child_path(path, "operand");
    let fold = |text: &str| {
        if spec.case_insensitive {
            text.to_lowercase()
        } else {
            text.to_string()
        }
    };

    match (operator, &spec.operand) {
        (Operator::Exists, _) => Some(Comparand::Nothing),
        (_, None) => {
            errors.push(&operand_path, format!("'{operator}' requires an operand"));
            None
        },
        (Operator::MatchesPattern, Some(operand)) => {
            let text = match operand {
                Operand::Text(text) => Cow::Borrowed(text.as_str()),
                Operand::Integer(n) => Cow::Owned(n.to_string()),
            };
            match GlobPattern::new(&text, spec.case_insensitive) {
                Ok(pattern) => Some(Comparand::Pattern(pattern)),
                Err(message) => {
                    errors.push(&operand_path, message);
                    None
                },
            }
        },
        (Operator::Contains | Operator::StartsWith, Some(Operand::Integer(n))) => {
            Some(Comparand::Text(n.to_string()))
        },
        (_, Some(Operand::Integer(n))) => Some(Comparand::Integer(*n)),
        (_, Some(Operand::Text(text))) => Some(Comparand::Text(fold(text))),
    }
}

//! Filter specs compiled from JSON and evaluated against decoded records.

mod common;

use common::{book, catalog, ids, iso2709};
use marcsift::formats::FormatReaderExt;
use marcsift::{Field, FilterSpec, Leader, MarcReader, Predicate, Record};

fn compile(json: &str) -> Predicate {
    let spec: FilterSpec = serde_json::from_str(json).expect("valid json");
    Predicate::compile(&spec).expect("valid spec")
}

fn matching(predicate: &Predicate, records: &[Record]) -> Vec<String> {
    let kept: Vec<Record> = records
        .iter()
        .filter(|r| predicate.matches(r))
        .cloned()
        .collect();
    ids(&kept)
}

#[test]
fn test_predicates_agree_on_built_and_decoded_records() {
    let built = catalog();
    let decoded: Vec<Record> = MarcReader::new(iso2709(&built).as_slice())
        .records()
        .collect::<Result<_, _>>()
        .unwrap();

    let predicate = compile(
        r#"{"combinator": "or", "children": [
            {"tag": "245", "subfield": "a", "operator": "starts_with", "operand": "The "},
            {"tag": "650", "subfield": "a", "operator": "equals", "operand": "Birds"}
        ]}"#,
    );
    assert_eq!(matching(&predicate, &built), matching(&predicate, &decoded));
    assert_eq!(matching(&predicate, &built), ["r01", "r08", "r09"]);
}

#[test]
fn test_glob_patterns() {
    let records = catalog();

    let predicate = compile(
        r#"{"tag": "245", "subfield": "a", "operator": "matches_pattern", "operand": "*history*"}"#,
    );
    assert_eq!(matching(&predicate, &records), ["r01", "r03", "r07"]);

    let predicate = compile(
        r#"{"tag": "245", "subfield": "a", "operator": "matches_pattern",
            "operand": "*history*", "case_insensitive": true}"#,
    );
    assert_eq!(matching(&predicate, &records), ["r01", "r03", "r07", "r10"]);

    let predicate = compile(
        r#"{"tag": "001", "operator": "matches_pattern", "operand": "r0[1-3]"}"#,
    );
    assert_eq!(matching(&predicate, &records), ["r01", "r02", "r03"]);

    let predicate = compile(r#"{"tag": "001", "operator": "matches_pattern", "operand": "r?0"}"#);
    assert_eq!(matching(&predicate, &records), ["r10"]);
}

#[test]
fn test_pattern_metacharacters_are_literal() {
    let record = Record::builder(Leader::default())
        .control_field_str("001", "a.b")
        .field(
            Field::builder("500".to_string(), ' ', ' ')
                .subfield_str('a', "Cost: $5 (approx.)")
                .build(),
        )
        .build();

    assert!(compile(r#"{"tag": "001", "operator": "matches_pattern", "operand": "a.b"}"#)
        .matches(&record));
    assert!(!compile(r#"{"tag": "001", "operator": "matches_pattern", "operand": "a.c"}"#)
        .matches(&record));
    assert!(compile(
        r#"{"tag": "500", "subfield": "a", "operator": "matches_pattern", "operand": "*$5 (*"}"#
    )
    .matches(&record));
}

#[test]
fn test_any_occurrence_satisfies_clause() {
    let record = book("m1", "Mixed", 2000, &["Alpha", "Beta", "Gamma"]);
    let compiled = |spec: FilterSpec| Predicate::compile(&spec).unwrap();

    assert!(compiled(FilterSpec::equals("650", Some("a"), "Gamma")).matches(&record));
    assert!(!compiled(FilterSpec::equals("650", Some("a"), "Delta")).matches(&record));

    // `not` negates the whole quantified clause.
    let predicate = compiled(FilterSpec::not(FilterSpec::equals("650", Some("a"), "Beta")));
    assert!(!predicate.matches(&record));
}

#[test]
fn test_leader_positions() {
    let mut serial = Leader::default();
    serial.bibliographic_level = 's';
    let serial = Record::builder(serial).control_field_str("001", "s1").build();
    let monograph = book("m1", "Book", 2000, &[]);

    let predicate = compile(r#"{"tag": "LDR", "operator": "equals", "operand": "s", "positions": [7, 7]}"#);
    assert!(predicate.matches(&serial));
    assert!(!predicate.matches(&monograph));
}

#[test]
fn test_spec_errors_name_every_problem() {
    let spec: FilterSpec = serde_json::from_str(
        r#"{"combinator": "and", "children": [
            {"tag": "24", "operator": "equals", "operand": "x"},
            {"tag": "650", "operator": "resembles", "operand": "x"},
            {"combinator": "xor", "children": []},
            {"tag": "008", "operator": "less_than"}
        ]}"#,
    )
    .unwrap();

    let err = Predicate::compile(&spec).unwrap_err();
    let paths: Vec<&str> = err.problems.iter().map(|p| p.path.as_str()).collect();
    assert_eq!(
        paths,
        [
            "children[0].tag",
            "children[1].operator",
            "children[2].combinator",
            "children[3].operand",
        ]
    );
    let message = err.to_string();
    assert!(message.starts_with("Invalid spec (4 problems)"));
    assert!(message.contains("resembles"));
}

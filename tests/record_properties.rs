//! Property-based tests for decoding, encoding and filtering.
//!
//! These tests use proptest to check that records survive every readable
//! representation and that a pipeline behaves like a plain `filter` over the
//! decoded records.

#![allow(clippy::unwrap_used)]

use marcsift::formats::{Format, FormatReaderExt};
use marcsift::marcjson::MarcJsonReader;
use marcsift::writer::Iso2709Encoder;
use marcsift::{
    run_sharded, ClauseSpec, Field, FilterSpec, FormatWriter, Leader, MarcReader, Pipeline,
    Predicate, Record, ShardConfig,
};
use proptest::prelude::*;

fn arb_value() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 .,:éü-]{0,24}"
}

fn arb_field() -> impl Strategy<Value = Field> {
    (
        "[1-9][0-9]{2}",
        prop::sample::select(vec![' ', '0', '1', '4']),
        prop::sample::select(vec![' ', '0', '2']),
        prop::collection::vec(
            (prop::sample::select(vec!['a', 'b', 'c', 'x', 'z', '6']), arb_value()),
            0..5,
        ),
    )
        .prop_map(|(tag, ind1, ind2, subfields)| {
            let mut field = Field::new(tag, ind1, ind2);
            for (code, value) in subfields {
                field.add_subfield(code, value);
            }
            field
        })
}

/// Generates a record with a few control fields and up to eight data fields.
fn arb_record() -> impl Strategy<Value = Record> {
    (
        prop::collection::vec(("00[1-9]", arb_value()), 0..4),
        prop::collection::vec(arb_field(), 0..8),
    )
        .prop_map(|(controls, fields)| {
            let mut record = Record::new(Leader::default());
            for (tag, value) in controls {
                record.add_control_field(tag, value);
            }
            for field in fields {
                record.add_field(field);
            }
            record
        })
}

/// Clauses that hit a useful share of generated records.
fn arb_clause() -> impl Strategy<Value = FilterSpec> {
    prop_oneof![
        Just(FilterSpec::exists("001", None)),
        Just(FilterSpec::exists("245", Some("a"))),
        Just(FilterSpec::contains("650", Some("a"), "e")),
        Just(FilterSpec::starts_with("100", None, "A")),
        Just(FilterSpec::matches_pattern("500", Some("ab"), "*[0-9]*")),
        Just(FilterSpec::from(
            ClauseSpec::new("LDR", "equals").operand("nam a").positions(5, 9)
        )),
    ]
}

fn arb_filter() -> impl Strategy<Value = FilterSpec> {
    arb_clause().prop_recursive(3, 16, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..3).prop_map(FilterSpec::and),
            prop::collection::vec(inner.clone(), 1..3).prop_map(FilterSpec::or),
            inner.prop_map(FilterSpec::not),
        ]
    })
}

/// The record as a decoder would return it: the leader's layout fields are
/// recomputed on write, so compare without them.
fn content(record: &Record) -> Record {
    let mut record = record.clone();
    record.leader.record_length = 0;
    record.leader.data_base_address = 0;
    record
}

fn encode(records: &[Record], format: Format) -> Vec<u8> {
    let mut out = Vec::new();
    let mut writer = format.writer(&mut out);
    for record in records {
        writer.write_record(record).unwrap();
    }
    writer.finish().unwrap();
    drop(writer);
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_iso2709_preserves_content(records in prop::collection::vec(arb_record(), 0..6)) {
        let bytes = encode(&records, Format::Iso2709);
        let decoded: Vec<Record> = MarcReader::new(bytes.as_slice())
            .records()
            .collect::<Result<_, _>>()
            .unwrap();
        let expected: Vec<Record> = records.iter().map(content).collect();
        let actual: Vec<Record> = decoded.iter().map(content).collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn prop_json_framings_preserve_content(records in prop::collection::vec(arb_record(), 0..6)) {
        for format in [Format::MarcJson, Format::JsonLines] {
            let bytes = encode(&records, format);
            let decoded: Vec<Record> = MarcJsonReader::new(bytes.as_slice())
                .records()
                .collect::<Result<_, _>>()
                .unwrap();
            prop_assert_eq!(decoded.len(), records.len());
            for (got, want) in decoded.iter().zip(&records) {
                prop_assert_eq!(content(got), content(want));
            }
        }
    }

    #[test]
    fn prop_pass_through_is_byte_identical(records in prop::collection::vec(arb_record(), 0..6)) {
        let input = encode(&records, Format::Iso2709);
        let mut out = Vec::new();
        let report = Pipeline::builder()
            .build()
            .unwrap()
            .run(MarcReader::new(input.as_slice()), Format::Iso2709.writer(&mut out))
            .unwrap();
        prop_assert_eq!(report.records_written, records.len());
        prop_assert_eq!(out, input);
    }

    #[test]
    fn prop_pipeline_is_an_ordered_filter(
        records in prop::collection::vec(arb_record(), 0..10),
        filter in arb_filter(),
    ) {
        let predicate = Predicate::compile(&filter).unwrap();
        let expected: Vec<Record> = records
            .iter()
            .filter(|r| predicate.matches(r))
            .cloned()
            .collect();

        let input = encode(&records, Format::Iso2709);
        let pipeline = Pipeline::builder().filter(filter).build().unwrap();
        let mut out = Vec::new();
        let report = pipeline
            .run(MarcReader::new(input.as_slice()), Format::Iso2709.writer(&mut out))
            .unwrap();

        prop_assert_eq!(report.records_read, records.len());
        prop_assert_eq!(report.records_matched, expected.len());
        prop_assert_eq!(out, encode(&expected, Format::Iso2709));
    }

    #[test]
    fn prop_combinators_follow_boolean_logic(
        record in arb_record(),
        left in arb_clause(),
        right in arb_clause(),
    ) {
        let eval = |spec: FilterSpec| Predicate::compile(&spec).unwrap().matches(&record);
        let l = eval(left.clone());
        let r = eval(right.clone());

        prop_assert_eq!(eval(FilterSpec::and(vec![left.clone(), right.clone()])), l && r);
        prop_assert_eq!(eval(FilterSpec::or(vec![left.clone(), right.clone()])), l || r);
        prop_assert_eq!(eval(FilterSpec::not(left.clone())), !l);
        prop_assert_eq!(eval(FilterSpec::not(FilterSpec::not(left))), l);
    }

    #[test]
    fn prop_sharded_run_matches_serial(
        records in prop::collection::vec(arb_record(), 0..12),
        filter in arb_filter(),
        shards in 1usize..9,
    ) {
        let input = encode(&records, Format::Iso2709);
        let pipeline = Pipeline::builder().filter(filter).build().unwrap();

        let mut serial = Vec::new();
        let serial_report = pipeline
            .run(MarcReader::new(input.as_slice()), Format::Iso2709.writer(&mut serial))
            .unwrap();

        let mut sharded = Vec::new();
        let sharded_report = run_sharded(
            &pipeline,
            &input,
            &ShardConfig::default().with_shards(shards),
            Iso2709Encoder,
            &mut sharded,
        )
        .unwrap();

        prop_assert_eq!(sharded_report, serial_report);
        prop_assert_eq!(sharded, serial);
    }
}

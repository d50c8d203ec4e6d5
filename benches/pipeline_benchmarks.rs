#![allow(missing_docs)]
//! Benchmarks for decoding, filtering and sharded runs.
//!
//! Input is generated in memory, so the numbers measure the library rather
//! than the disk.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use marcsift::formats::{Format, FormatWriter};
use marcsift::writer::Iso2709Encoder;
use marcsift::{
    run_sharded, Field, FilterSpec, Leader, MarcReader, MarcWriter, Pipeline, Record,
    SelectionEntry, SelectionSpec, ShardConfig,
};
use std::io;

/// Encode `count` book-like records with a handful of fields each.
fn generate(count: usize) -> Vec<u8> {
    let subjects = ["Biology", "Computer science", "History", "Mathematics", "Poetry"];
    let mut writer = MarcWriter::new(Vec::new());
    for i in 0..count {
        let record = Record::builder(Leader::default())
            .control_field_str("001", &format!("b{i:08}"))
            .control_field_str("008", &format!("950101s{}    nyu           000 0 eng d", 1900 + i % 120))
            .field(
                Field::builder("100".to_string(), '1', ' ')
                    .subfield_str('a', "Author, Some")
                    .subfield_str('d', "1900-1980")
                    .build(),
            )
            .field(
                Field::builder("245".to_string(), '1', '0')
                    .subfield_str('a', &format!("Collected works, volume {i}"))
                    .subfield_str('c', "edited by Someone Else")
                    .build(),
            )
            .field(
                Field::builder("650".to_string(), ' ', '0')
                    .subfield_str('a', subjects[i % subjects.len()])
                    .subfield_str('x', "Study and teaching")
                    .build(),
            )
            .build();
        writer.write_record(&record).expect("encodable");
    }
    writer.finish().expect("finish");
    writer.into_inner()
}

fn selective_filter() -> FilterSpec {
    serde_json::from_str(
        r#"{"combinator": "and", "children": [
            {"tag": "650", "subfield": "a", "operator": "contains", "operand": "science",
             "case_insensitive": true},
            {"tag": "008", "operator": "greater_or_equal", "operand": 1990, "positions": [7, 10]}
        ]}"#,
    )
    .expect("valid filter")
}

/// Decoding alone, for a baseline.
fn benchmark_decode(c: &mut Criterion) {
    let input = generate(10_000);
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(input.len() as u64));
    group.bench_function("read_10k_records", |b| {
        b.iter(|| {
            let mut reader = MarcReader::new(black_box(input.as_slice()));
            let mut count = 0;
            while let Ok(Some(_record)) = reader.read_record() {
                count += 1;
            }
            count
        });
    });
    group.finish();
}

/// Full pipeline runs into a discarding sink, one per output format.
fn benchmark_pipeline(c: &mut Criterion) {
    let input = generate(10_000);
    let pass_all = Pipeline::builder().build().expect("pipeline");
    let filtered = Pipeline::builder()
        .filter(selective_filter())
        .build()
        .expect("pipeline");
    let projected = Pipeline::builder()
        .filter(selective_filter())
        .selection(SelectionSpec::from(vec![SelectionEntry::tag("245").subfields("a")]))
        .build()
        .expect("pipeline");

    let mut group = c.benchmark_group("pipeline");
    group.throughput(Throughput::Bytes(input.len() as u64));
    for (name, pipeline) in [("pass_all", &pass_all), ("filtered", &filtered), ("projected", &projected)] {
        group.bench_function(name, |b| {
            b.iter(|| {
                pipeline
                    .run(MarcReader::new(black_box(input.as_slice())), Format::Iso2709.writer(io::sink()))
                    .expect("run")
            });
        });
    }
    for format in [Format::MarcXml, Format::JsonLines, Format::Csv] {
        group.bench_with_input(BenchmarkId::new("pass_all_to", format), &format, |b, &format| {
            b.iter(|| {
                pass_all
                    .run(MarcReader::new(black_box(input.as_slice())), format.writer(io::sink()))
                    .expect("run")
            });
        });
    }
    group.finish();
}

/// Sharded runs over the same input at several shard counts.
fn benchmark_sharded(c: &mut Criterion) {
    let input = generate(50_000);
    let pipeline = Pipeline::builder()
        .filter(selective_filter())
        .build()
        .expect("pipeline");

    let mut group = c.benchmark_group("sharded");
    group.throughput(Throughput::Bytes(input.len() as u64));
    group.sample_size(20);
    group.bench_function("serial", |b| {
        b.iter(|| {
            pipeline
                .run(MarcReader::new(black_box(input.as_slice())), Format::Iso2709.writer(io::sink()))
                .expect("run")
        });
    });
    for shards in [2, 4, 8] {
        group.bench_with_input(BenchmarkId::new("shards", shards), &shards, |b, &shards| {
            let config = ShardConfig::default().with_shards(shards);
            b.iter(|| {
                run_sharded(&pipeline, black_box(&input), &config, Iso2709Encoder, io::sink())
                    .expect("run")
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_decode, benchmark_pipeline, benchmark_sharded);
criterion_main!(benches);

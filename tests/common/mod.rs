//! Common test helpers shared across the integration tests.
#![allow(dead_code)]

use marcsift::{Field, FormatWriter, Leader, MarcWriter, Record};

/// Builds a small book record.
///
/// `008` carries `year` at positions 7-10; `650 $a` repeats once per subject.
pub fn book(id: &str, title: &str, year: u16, subjects: &[&str]) -> Record {
    let mut builder = Record::builder(Leader::default())
        .control_field_str("001", id)
        .control_field_str("008", &format!("950101s{year}    nyu           000 0 eng d"))
        .field(
            Field::builder("245".to_string(), '1', '0')
                .subfield_str('a', title)
                .subfield_str('c', "by Someone")
                .build(),
        );
    for subject in subjects {
        builder = builder.field(
            Field::builder("650".to_string(), ' ', '0')
                .subfield_str('a', subject)
                .build(),
        );
    }
    builder.build()
}

/// A ten-record catalog with varied years and subjects.
pub fn catalog() -> Vec<Record> {
    vec![
        book("r01", "The history of Rome", 1988, &["Rome -- History", "Classics"]),
        book("r02", "Introduction to algorithms", 1990, &["Computer algorithms"]),
        book("r03", "A history of computing", 2003, &["Computers -- History"]),
        book("r04", "Pond life", 1975, &["Freshwater biology"]),
        book("r05", "Compilers", 1986, &["Compilers (Computer programs)"]),
        book("r06", "Untitled", 2011, &[]),
        book("r07", "Medieval history", 1995, &["Middle Ages -- History", "Europe"]),
        book("r08", "The art of computer programming", 1968, &["Computer programming"]),
        book("r09", "Birds of North America", 2001, &["Birds"]),
        book("r10", "History of science", 2019, &["Science -- History"]),
    ]
}

/// Encodes `records` as one ISO 2709 stream.
pub fn iso2709(records: &[Record]) -> Vec<u8> {
    let mut writer = MarcWriter::new(Vec::new());
    for record in records {
        writer.write_record(record).expect("encodable record");
    }
    writer.finish().expect("finish");
    writer.into_inner()
}

/// A record with a well-formed length but an unusable directory.
///
/// 30 bytes: a leader declaring 30 bytes, five filler bytes and a terminator.
pub const BAD_RECORD: &[u8] = b"00030nam a2200025 i 4500XXXXX\x1d";

/// Control numbers of `records`, in order.
pub fn ids(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|r| r.control_number().unwrap_or_default().to_string())
        .collect()
}

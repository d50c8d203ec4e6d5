//! Filter a MARC file and write the matches in another format.
//!
//! ```text
//! cargo run --example filter_catalog -- INPUT FILTER.json [OUTPUT] [SELECTION.json]
//! ```
//!
//! The input may be ISO 2709 or MARC-in-JSON; its format is detected from the
//! first bytes. The output format follows the output file's extension
//! (`.mrc`, `.xml`, `.json`, `.jsonl`, `.csv`, `.tsv`). Without an output
//! file, matches go to stdout as JSON Lines. Set `RUST_LOG=marcsift=debug`
//! to see per-record decisions.

use anyhow::{bail, Context, Result};
use marcsift::formats::{Format, FormatReader};
use marcsift::{FilterSpec, MarcReader, Pipeline, PipelineConfig, SelectionSpec};
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr).with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("marcsift=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (input, filter, output, selection) = match args.as_slice() {
        [input, filter] => (input, filter, None, None),
        [input, filter, output] => (input, filter, Some(output), None),
        [input, filter, output, selection] => (input, filter, Some(output), Some(selection)),
        _ => bail!("usage: filter_catalog INPUT FILTER.json [OUTPUT] [SELECTION.json]"),
    };

    let filter: FilterSpec = read_json(filter)?;
    let mut builder = Pipeline::builder()
        .filter(filter)
        .config(PipelineConfig::default().with_progress_interval(100_000));
    if let Some(path) = selection {
        builder = builder.selection(read_json::<SelectionSpec>(path)?);
    }
    let pipeline = builder.build().context("invalid filter or selection")?;

    let mut source = BufReader::new(File::open(input).with_context(|| format!("opening {input}"))?);
    let format = Format::detect(&mut source)?
        .with_context(|| format!("cannot tell the format of {input}"))?;
    let reader: Box<dyn FormatReader> = match format {
        Format::Iso2709 => Box::new(MarcReader::new(source).with_resync(true)),
        other => other
            .reader(source)
            .with_context(|| format!("{other} cannot be read"))?,
    };

    let writer = match output {
        Some(path) => {
            let format = Path::new(path)
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(Format::from_extension)
                .with_context(|| format!("unknown output extension: {path}"))?;
            let file = File::create(path).with_context(|| format!("creating {path}"))?;
            format.writer(BufWriter::new(file))
        },
        None => Format::JsonLines.writer(io::stdout().lock()),
    };

    let report = pipeline.run(reader, writer)?;
    eprintln!(
        "read {}, matched {}, written {}, failed {}",
        report.records_read, report.records_matched, report.records_written, report.records_errored
    );
    for failure in report.failures.iter().take(10) {
        eprintln!(
            "  record {} ({} at byte {:?}): {}",
            failure.record_index, failure.stage, failure.byte_offset, failure.reason
        );
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<T> {
    let file = File::open(path).with_context(|| format!("opening {path}"))?;
    serde_json::from_reader(BufReader::new(file)).with_context(|| format!("parsing {path}"))
}

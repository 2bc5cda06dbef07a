use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use super::event::{TraceEvent, TraceFile};
use super::reader::TraceReader;

/// Output encoding of a converted trace.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    /// One pretty-printed `{"events": [...]}` document
    Json,
    /// A stream of CBOR-encoded events
    Cbor,
}

impl TraceFormat {
    /// The requested format, or the one named by the extension of `output`.
    pub fn resolve(output: &Path, requested: Option<TraceFormat>) -> Result<Self> {
        if let Some(format) = requested {
            return Ok(format);
        }
        let Some(ext) = output.extension() else {
            bail!(
                "{} has no extension, pass --format json or --format cbor",
                output.display()
            );
        };
        match ext.to_str().map(str::to_ascii_lowercase).as_deref() {
            Some("json") => Ok(TraceFormat::Json),
            Some("cbor") => Ok(TraceFormat::Cbor),
            _ => bail!(
                "cannot infer an output format from {}, pass --format",
                output.display()
            ),
        }
    }
}

/// Decode every record of a binary trace file.
pub fn read_trace(input: &Path) -> Result<Vec<TraceEvent>> {
    let input_file = File::open(input)
        .with_context(|| format!("failed to open trace file at {}", input.display()))?;
    TraceReader::new(BufReader::new(input_file))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to decode trace file at {}", input.display()))
}

/// Convert a binary trace into JSON or a CBOR event stream.
pub fn convert(input: &Path, output: &Path, output_format: TraceFormat) -> Result<()> {
    let events = read_trace(input)?;

    let output_file = File::create(output)
        .with_context(|| format!("failed to create output trace file at {}", output.display()))?;

    match output_format {
        TraceFormat::Json => {
            let trace = TraceFile { events };
            serde_json::to_writer_pretty(output_file, &trace).with_context(|| {
                format!("failed to write JSON trace file at {}", output.display())
            })?;
        }
        TraceFormat::Cbor => {
            let mut writer = BufWriter::new(output_file);
            for event in events {
                ciborium::into_writer(&event, &mut writer).with_context(|| {
                    format!("failed to write CBOR trace file at {}", output.display())
                })?;
            }
            writer.flush().with_context(|| {
                format!("failed to flush CBOR trace file at {}", output.display())
            })?;
        }
    }

    Ok(())
}

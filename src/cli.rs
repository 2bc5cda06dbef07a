use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::trace::TraceFormat;

/// Record and inspect binary traces of file operations
#[derive(Parser, Debug)]
#[command(author, version, about, propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Copy a file through a traced mount, recording its operations
    Copy {
        /// Directory the traced layer is mounted over
        #[arg(short = 'l', long = "lower", value_name = "DIR")]
        lower: PathBuf,
        /// Mount options, of the form tfile=<path>
        #[arg(short = 'o', long = "options", value_name = "OPTIONS")]
        options: String,
        /// Trace mask installed before copying (hex with 0x prefix, or decimal)
        #[arg(short = 'm', long = "mask", value_name = "MASK", value_parser = parse_mask)]
        mask: Option<u32>,
        /// Size of each read and write
        #[arg(short = 'c', long = "chunk", value_name = "BYTES", default_value_t = 1024)]
        chunk: usize,
        /// Source file, relative to the lower directory
        src: PathBuf,
        /// Destination file, relative to the lower directory
        dst: PathBuf,
    },
    /// Print every record of a trace file
    Dump {
        /// Binary trace file
        trace: PathBuf,
        /// Number of payload bytes shown per record
        #[arg(long = "preview", value_name = "BYTES", default_value_t = 16)]
        preview: usize,
    },
    /// Convert a binary trace to JSON or CBOR
    Convert {
        /// Binary trace file
        input: PathBuf,
        /// Output file (extension determines format: .json or .cbor)
        output: PathBuf,
        /// Output format. If not specified, inferred from the output extension
        #[arg(short = 'f', long = "format", value_name = "FORMAT", value_enum)]
        format: Option<TraceFormat>,
    },
    /// Check record ordering and open/close correlation in a trace file
    Verify {
        /// Binary trace file
        trace: PathBuf,
    },
}

/// Parse a mask given as `0x`-prefixed hex or decimal.
pub fn parse_mask(raw: &str) -> Result<u32, String> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|err| format!("invalid mask {raw:?}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_parse_as_hex_or_decimal() {
        assert_eq!(parse_mask("0x17"), Ok(0x17));
        assert_eq!(parse_mask("0XfF"), Ok(0xff));
        assert_eq!(parse_mask("16"), Ok(16));
        assert!(parse_mask("0xzz").is_err());
        assert!(parse_mask("-1").is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

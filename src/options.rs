use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

pub const TRACE_FILE_KEY: &str = "tfile";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
    #[error("mount options are empty, expected tfile=<path>")]
    Missing,
    #[error("mount option {0:?} is not of the form tfile=<path>")]
    Malformed(String),
    #[error("unknown mount option {0:?}, expected tfile")]
    UnknownKey(String),
    #[error("tfile option names no path")]
    EmptyPath,
}

/// Parsed form of the `tfile=<path>` mount parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    pub trace_file: PathBuf,
}

impl FromStr for MountOptions {
    type Err = OptionsError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.is_empty() {
            return Err(OptionsError::Missing);
        }
        let (key, value) = raw
            .split_once('=')
            .ok_or_else(|| OptionsError::Malformed(raw.to_string()))?;
        if key != TRACE_FILE_KEY {
            return Err(OptionsError::UnknownKey(key.to_string()));
        }
        if value.is_empty() {
            return Err(OptionsError::EmptyPath);
        }
        Ok(MountOptions {
            trace_file: PathBuf::from(value),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trace_file() {
        let options: MountOptions = "tfile=/tmp/trace.bin".parse().unwrap();
        assert_eq!(options.trace_file, PathBuf::from("/tmp/trace.bin"));
    }

    #[test]
    fn keeps_everything_after_first_separator() {
        let options: MountOptions = "tfile=/tmp/a=b".parse().unwrap();
        assert_eq!(options.trace_file, PathBuf::from("/tmp/a=b"));
    }

    #[test]
    fn rejects_malformed_options() {
        assert_eq!("".parse::<MountOptions>(), Err(OptionsError::Missing));
        assert_eq!(
            "/tmp/trace.bin".parse::<MountOptions>(),
            Err(OptionsError::Malformed("/tmp/trace.bin".into()))
        );
        assert_eq!(
            "trace=/tmp/x".parse::<MountOptions>(),
            Err(OptionsError::UnknownKey("trace".into()))
        );
        assert_eq!("tfile=".parse::<MountOptions>(), Err(OptionsError::EmptyPath));
    }
}

//! trfs: a pass-through filesystem layer that records a binary trace
//!
//! Every open, read, write and close performed through a [`TracedFs`] is
//! delegated to the storage underneath it and, when its category is enabled,
//! described by one binary record in the mount's trace file. A replay tool can
//! group records by the open that produced their handle.

pub mod buffer;
pub mod cli;
pub mod config;
pub mod control;
pub mod fs;
pub mod lower;
pub mod options;
pub mod record;
pub mod sink;
pub mod trace;
pub mod tracer;

pub use config::{TraceConfig, TraceMask};
pub use control::{ControlCommand, ControlError};
pub use fs::{MountError, TracedFile, TracedFs};
pub use lower::{DirLower, LowerStorage};
pub use options::MountOptions;
pub use record::{OpKind, Record, RecordId};
pub use sink::TraceSink;
pub use tracer::Tracer;

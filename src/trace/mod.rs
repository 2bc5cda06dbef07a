//! Decoding side of the trace format, for tools that consume a trace file.

mod convert;
mod event;
mod reader;
mod verify;

pub use convert::{convert, read_trace, TraceFormat};
pub use event::{TraceEvent, TraceFile};
pub use reader::{decode, DecodeError, TraceReader};
pub use verify::{verify, Violation};

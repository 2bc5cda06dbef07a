//! Per-mount trace context and the flush protocol.
//!
//! Every traced operation enters one critical section that sizes its record,
//! assigns it the next id, builds it in the shared buffer, writes it to the
//! sink and clears the buffer again. The sink write happens with the lock
//! held, so at most one record is ever in flight on a mount and the order of
//! records in the sink is the order in which operations took the lock.

use std::sync::{Mutex, MutexGuard};

use tracing::{debug, error, warn};

use crate::buffer::TraceBuffer;
use crate::config::{TraceConfig, TraceMask};
use crate::control::{self, ControlCommand, ControlError};
use crate::record::{OpKind, Record, RecordId, MAX_RECORD_ID};
use crate::sink::TraceSink;

/// Hands out record ids, starting at 0 for every mount.
///
/// Ids are never reused: once [`MAX_RECORD_ID`] has been handed out the
/// allocator is exhausted and every later record is dropped.
#[derive(Debug, Default)]
pub struct RecordIdAllocator {
    next: RecordId,
    exhausted: bool,
}

impl RecordIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn starting_at(next: RecordId) -> Self {
        Self {
            next,
            exhausted: next > MAX_RECORD_ID,
        }
    }

    /// The id the next record will receive, `None` once exhausted.
    pub fn peek(&self) -> Option<RecordId> {
        (!self.exhausted).then_some(self.next)
    }

    pub fn allocate(&mut self) -> Option<RecordId> {
        if self.exhausted {
            return None;
        }
        let id = self.next;
        if id >= MAX_RECORD_ID {
            self.exhausted = true;
        } else {
            self.next += 1;
        }
        Some(id)
    }
}

#[derive(Debug)]
struct TraceState {
    buffer: TraceBuffer,
    ids: RecordIdAllocator,
    sink: TraceSink,
}

#[derive(Debug)]
pub struct Tracer {
    config: TraceConfig,
    state: Mutex<TraceState>,
}

impl Tracer {
    pub fn new(sink: TraceSink) -> Self {
        Self::with_mask(sink, TraceMask::default())
    }

    pub fn with_mask(sink: TraceSink, mask: TraceMask) -> Self {
        Self {
            config: TraceConfig::new(mask),
            state: Mutex::new(TraceState {
                buffer: TraceBuffer::new(),
                ids: RecordIdAllocator::new(),
                sink,
            }),
        }
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    pub fn enabled(&self, kind: OpKind) -> bool {
        self.config.is_enabled(kind)
    }

    pub fn control(&self, command: ControlCommand) -> TraceMask {
        control::apply(&self.config, command)
    }

    pub fn ioctl(&self, cmd: u32, arg: Option<&mut [u8]>) -> Result<(), ControlError> {
        control::ioctl(&self.config, cmd, arg)
    }

    /// The id the next flushed record will carry, `None` once the id space
    /// is used up.
    pub fn next_record_id(&self) -> Option<RecordId> {
        self.lock().ids.peek()
    }

    /// Record one operation if its category is enabled.
    ///
    /// Returns the id given to the record, or `None` when nothing was
    /// written: category disabled, record not strictly between 0 and the
    /// buffer capacity, ids exhausted, or the encoder failed. Sink write errors are logged
    /// and the id is still returned, since it has been consumed.
    pub fn emit(&self, record: &Record<'_>) -> Option<RecordId> {
        let kind = record.kind();
        if !self.enabled(kind) {
            return None;
        }

        let mut guard = self.lock();
        let state = &mut *guard;

        let size = record.encoded_len();
        if !TraceBuffer::admits(size) {
            debug!(?kind, size, "record does not fit the trace buffer, dropped");
            return None;
        }

        let Some(id) = state.ids.allocate() else {
            warn!(?kind, "record ids exhausted, record dropped");
            return None;
        };
        if let Err(err) = record.encode_into(id, &mut state.buffer) {
            error!(?kind, id, size, %err, "failed to encode trace record");
            state.buffer.reset();
            return None;
        }
        if state.buffer.len() != size {
            error!(
                ?kind,
                id,
                size,
                encoded = state.buffer.len(),
                "encoded record does not match its computed size"
            );
            debug_assert_eq!(state.buffer.len(), size);
        }

        if let Err(err) = state.sink.write_record(state.buffer.filled()) {
            warn!(?kind, id, %err, "failed to write trace record to sink");
        }
        state.buffer.reset();
        Some(id)
    }

    fn lock(&self) -> MutexGuard<'_, TraceState> {
        // A panic inside the critical section leaves at worst a partially
        // built record behind; clear it and carry on.
        self.state.lock().unwrap_or_else(|poisoned| {
            let mut guard = poisoned.into_inner();
            guard.buffer.reset();
            guard
        })
    }
}

use serde::{Deserialize, Serialize};

use crate::record::{OpKind, RecordId};

/// A single decoded trace record
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TraceEvent {
    Open {
        record_id: RecordId,
        flags: i32,
        mode: u16,
        path: String,
        result: i32,
    },
    Read {
        record_id: RecordId,
        open_record_id: i32,
        count: u64,
        result: i64,
        data: Vec<u8>,
    },
    Write {
        record_id: RecordId,
        open_record_id: i32,
        count: u64,
        data: Vec<u8>,
        result: i64,
    },
    Close {
        record_id: RecordId,
        open_record_id: i32,
    },
}

impl TraceEvent {
    pub fn record_id(&self) -> RecordId {
        match self {
            TraceEvent::Open { record_id, .. }
            | TraceEvent::Read { record_id, .. }
            | TraceEvent::Write { record_id, .. }
            | TraceEvent::Close { record_id, .. } => *record_id,
        }
    }

    pub fn kind(&self) -> OpKind {
        match self {
            TraceEvent::Open { .. } => OpKind::Open,
            TraceEvent::Read { .. } => OpKind::Read,
            TraceEvent::Write { .. } => OpKind::Write,
            TraceEvent::Close { .. } => OpKind::Close,
        }
    }

    /// Correlation id of a read, write or close; `None` for opens and for
    /// handles whose open was not traced (wire value `-1`).
    pub fn open_record_id(&self) -> Option<RecordId> {
        match self {
            TraceEvent::Open { .. } => None,
            TraceEvent::Read { open_record_id, .. }
            | TraceEvent::Write { open_record_id, .. }
            | TraceEvent::Close { open_record_id, .. } => {
                RecordId::try_from(*open_record_id).ok()
            }
        }
    }
}

/// A decoded trace as written by `convert` in JSON form.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TraceFile {
    pub events: Vec<TraceEvent>,
}

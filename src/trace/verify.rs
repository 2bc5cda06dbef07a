use std::collections::HashSet;

use thiserror::Error;

use super::event::TraceEvent;
use crate::record::{OpKind, RecordId};

/// A broken ordering or correlation rule in a decoded trace.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("record {record_id} follows record {previous}; ids must strictly increase")]
    OutOfOrder {
        previous: RecordId,
        record_id: RecordId,
    },
    #[error("record {record_id} refers to open record {open_record_id}, which does not precede it")]
    DanglingCorrelation {
        record_id: RecordId,
        open_record_id: RecordId,
    },
    #[error("close record {record_id} belongs to a handle whose open was not traced")]
    UntracedClose { record_id: RecordId },
}

/// Check the ordering and correlation rules a replay tool relies on.
///
/// Ids must strictly increase in sink order, every correlation id must name
/// an open record seen earlier, and close records must never be
/// uncorrelated.
pub fn verify(events: &[TraceEvent]) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut opens = HashSet::new();
    let mut previous: Option<RecordId> = None;

    for event in events {
        let record_id = event.record_id();
        if let Some(previous) = previous {
            if record_id <= previous {
                violations.push(Violation::OutOfOrder {
                    previous,
                    record_id,
                });
            }
        }
        previous = Some(record_id);

        match (event.kind(), event.open_record_id()) {
            (OpKind::Open, _) => {
                opens.insert(record_id);
            }
            (OpKind::Close, None) => violations.push(Violation::UntracedClose { record_id }),
            (_, Some(open_record_id)) if !opens.contains(&open_record_id) => {
                violations.push(Violation::DanglingCorrelation {
                    record_id,
                    open_record_id,
                });
            }
            _ => {}
        }
    }
    violations
}

use std::io::{self, ErrorKind, Read};

use thiserror::Error;

use super::event::TraceEvent;
use crate::record::{OpKind, RecordId, HEADER_LEN, SIZE_FIELD_LEN};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to read trace")]
    Io(#[from] io::Error),
    #[error("record at offset {offset} is truncated: expected {expected} bytes, found {found}")]
    Truncated {
        offset: u64,
        expected: usize,
        found: usize,
    },
    #[error("record at offset {offset} declares {size} bytes, less than a record header")]
    Undersized { offset: u64, size: usize },
    #[error("record {record_id} at offset {offset} has unknown op type {tag:#04x}")]
    UnknownOp {
        offset: u64,
        record_id: RecordId,
        tag: u8,
    },
    #[error("record {record_id} at offset {offset} declares {size} bytes but its fields need {needed}")]
    SizeMismatch {
        offset: u64,
        record_id: RecordId,
        size: usize,
        needed: usize,
    },
    #[error("open record {record_id} at offset {offset} has no NUL-terminated path")]
    BadPath { offset: u64, record_id: RecordId },
}

/// Streams [`TraceEvent`]s out of a binary trace.
///
/// Each record is read by its `total_size` prefix and must be consumed
/// exactly by its fields. Iteration stops at the first error.
pub struct TraceReader<R> {
    inner: R,
    offset: u64,
    failed: bool,
}

impl<R: Read> TraceReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            failed: false,
        }
    }

    /// Byte offset of the next record.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Decode the next record, `Ok(None)` at a clean end of trace.
    pub fn next_event(&mut self) -> Result<Option<TraceEvent>, DecodeError> {
        let offset = self.offset;
        let mut size_field = [0u8; SIZE_FIELD_LEN];
        let found = read_full(&mut self.inner, &mut size_field)?;
        if found == 0 {
            return Ok(None);
        }
        if found < SIZE_FIELD_LEN {
            return Err(DecodeError::Truncated {
                offset,
                expected: SIZE_FIELD_LEN,
                found,
            });
        }

        let size = u16::from_ne_bytes(size_field) as usize;
        if size < HEADER_LEN {
            return Err(DecodeError::Undersized { offset, size });
        }

        let mut record = vec![0u8; size];
        record[..SIZE_FIELD_LEN].copy_from_slice(&size_field);
        let found = SIZE_FIELD_LEN + read_full(&mut self.inner, &mut record[SIZE_FIELD_LEN..])?;
        if found < size {
            return Err(DecodeError::Truncated {
                offset,
                expected: size,
                found,
            });
        }

        let event = decode_record(&record, offset)?;
        self.offset += size as u64;
        Ok(Some(event))
    }
}

impl<R: Read> Iterator for TraceReader<R> {
    type Item = Result<TraceEvent, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_event() {
            Ok(event) => event.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// Decode a whole in-memory trace.
pub fn decode(bytes: &[u8]) -> Result<Vec<TraceEvent>, DecodeError> {
    TraceReader::new(bytes).collect()
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Field cursor over one complete record.
struct Fields<'a> {
    bytes: &'a [u8],
    pos: usize,
    needed: usize,
}

impl<'a> Fields<'a> {
    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        self.needed = self.pos.saturating_add(len);
        let field = self.bytes.get(self.pos..self.needed)?;
        self.pos = self.needed;
        Some(field)
    }

    fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take(N).and_then(|bytes| bytes.try_into().ok())
    }

    fn u8(&mut self) -> Option<u8> {
        self.array::<1>().map(|[b]| b)
    }

    fn u16(&mut self) -> Option<u16> {
        self.array().map(u16::from_ne_bytes)
    }

    fn i32(&mut self) -> Option<i32> {
        self.array().map(i32::from_ne_bytes)
    }

    fn u32(&mut self) -> Option<u32> {
        self.array().map(u32::from_ne_bytes)
    }

    fn usize(&mut self) -> Option<usize> {
        self.array().map(usize::from_ne_bytes)
    }

    fn isize(&mut self) -> Option<isize> {
        self.array().map(isize::from_ne_bytes)
    }
}

fn decode_record(bytes: &[u8], offset: u64) -> Result<TraceEvent, DecodeError> {
    let size = bytes.len();
    let mut fields = Fields {
        bytes,
        pos: SIZE_FIELD_LEN,
        needed: SIZE_FIELD_LEN,
    };
    // The header always fits: the caller rejected anything shorter.
    let record_id = fields.u32().unwrap_or_default();
    let tag = fields.u8().unwrap_or_default();
    let kind = OpKind::from_tag(tag).ok_or(DecodeError::UnknownOp {
        offset,
        record_id,
        tag,
    })?;

    let event = match kind {
        OpKind::Open => decode_open(&mut fields, record_id).map(|open| {
            open.ok_or(DecodeError::BadPath { offset, record_id })
        }),
        OpKind::Read => decode_read(&mut fields, record_id).map(Ok),
        OpKind::Write => decode_write(&mut fields, record_id).map(Ok),
        OpKind::Close => fields.i32().map(|open_record_id| {
            Ok(TraceEvent::Close {
                record_id,
                open_record_id,
            })
        }),
    };

    match event {
        Some(event) if fields.pos == size => event,
        Some(_) => Err(DecodeError::SizeMismatch {
            offset,
            record_id,
            size,
            needed: fields.pos,
        }),
        None => Err(DecodeError::SizeMismatch {
            offset,
            record_id,
            size,
            needed: fields.needed,
        }),
    }
}

/// `None` when fields run out, `Some(None)` when the path is malformed.
fn decode_open(fields: &mut Fields<'_>, record_id: RecordId) -> Option<Option<TraceEvent>> {
    let flags = fields.i32()?;
    let mode = fields.u16()?;
    let path_len = fields.u16()? as usize;
    let raw_path = fields.take(path_len)?;
    let result = fields.i32()?;

    let path = match raw_path.split_last() {
        Some((&0, path)) => String::from_utf8_lossy(path).into_owned(),
        _ => return Some(None),
    };
    Some(Some(TraceEvent::Open {
        record_id,
        flags,
        mode,
        path,
        result,
    }))
}

fn decode_read(fields: &mut Fields<'_>, record_id: RecordId) -> Option<TraceEvent> {
    let open_record_id = fields.i32()?;
    let count = fields.usize()?;
    let result = fields.isize()?;
    let data = if result > 0 {
        fields.take(result as usize)?.to_vec()
    } else {
        Vec::new()
    };
    Some(TraceEvent::Read {
        record_id,
        open_record_id,
        count: count as u64,
        result: result as i64,
        data,
    })
}

fn decode_write(fields: &mut Fields<'_>, record_id: RecordId) -> Option<TraceEvent> {
    let open_record_id = fields.i32()?;
    let count = fields.usize()?;
    let data = fields.take(count)?.to_vec();
    let result = fields.isize()?;
    Some(TraceEvent::Write {
        record_id,
        open_record_id,
        count: count as u64,
        data,
        result: result as i64,
    })
}

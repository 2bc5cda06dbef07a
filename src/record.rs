//! Binary layout of a single trace record.
//!
//! Every record starts with the same header:
//!
//! | field        | width |
//! |--------------|-------|
//! | total_size   | u16   |
//! | record_id    | u32   |
//! | op_type      | u8    |
//!
//! followed by fields that depend on the operation. All integers are written
//! in host byte order with no padding. `total_size` counts itself.

use std::mem::size_of;

use crate::buffer::{BufferError, FieldWriter};
use crate::config::TraceMask;

/// Identifier assigned to a record when it is flushed.
pub type RecordId = u32;

/// Wire value standing in for "the handle's open was not traced".
pub const UNTRACED_OPEN_ID: i32 = -1;

/// Highest id a mount hands out. Correlation fields are `i32` on the wire,
/// so every id must stay representable there and distinct from
/// [`UNTRACED_OPEN_ID`].
pub const MAX_RECORD_ID: RecordId = i32::MAX as RecordId;

pub const SIZE_FIELD_LEN: usize = size_of::<u16>();
pub const HEADER_LEN: usize = SIZE_FIELD_LEN + size_of::<RecordId>() + size_of::<u8>();

const WORD_LEN: usize = size_of::<usize>();

/// Operation category of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Open,
    Read,
    Write,
    Close,
}

impl OpKind {
    /// ASCII tag stored in the `op_type` field.
    pub const fn tag(self) -> u8 {
        match self {
            OpKind::Open => b'o',
            OpKind::Read => b'r',
            OpKind::Write => b'w',
            OpKind::Close => b'c',
        }
    }

    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'o' => Some(OpKind::Open),
            b'r' => Some(OpKind::Read),
            b'w' => Some(OpKind::Write),
            b'c' => Some(OpKind::Close),
            _ => None,
        }
    }

    /// The mask bit that enables this category.
    pub const fn mask(self) -> TraceMask {
        match self {
            OpKind::Open => TraceMask::OPEN,
            OpKind::Read => TraceMask::READ,
            OpKind::Write => TraceMask::WRITE,
            OpKind::Close => TraceMask::CLOSE,
        }
    }
}

/// Convert an optional correlation id into its `i32` wire form.
pub fn wire_open_id(open_record_id: Option<RecordId>) -> i32 {
    open_record_id
        .and_then(|id| i32::try_from(id).ok())
        .unwrap_or(UNTRACED_OPEN_ID)
}

/// One traced operation, borrowed from the call that produced it.
///
/// The record id is not part of the value: it is assigned only once the record
/// has been admitted into the trace buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record<'a> {
    Open {
        flags: i32,
        mode: u16,
        /// Path relative to the mount root, without the trailing NUL.
        path: &'a [u8],
        result: i32,
    },
    Read {
        open_record_id: Option<RecordId>,
        requested: usize,
        result: isize,
        /// Bytes delivered to the caller. Only the first `result` bytes are
        /// recorded, and only when `result` is positive.
        payload: &'a [u8],
    },
    Write {
        open_record_id: Option<RecordId>,
        requested: usize,
        /// Bytes handed in by the caller; `requested` bytes are recorded.
        payload: &'a [u8],
        result: isize,
    },
    Close {
        open_record_id: RecordId,
    },
}

impl Record<'_> {
    pub fn kind(&self) -> OpKind {
        match self {
            Record::Open { .. } => OpKind::Open,
            Record::Read { .. } => OpKind::Read,
            Record::Write { .. } => OpKind::Write,
            Record::Close { .. } => OpKind::Close,
        }
    }

    /// Exact number of bytes [`Record::encode_into`] will produce, header included.
    pub fn encoded_len(&self) -> usize {
        let body = match self {
            Record::Open { path, .. } => {
                size_of::<i32>()
                    + size_of::<u16>()
                    + size_of::<u16>()
                    + path.len()
                    + 1
                    + size_of::<i32>()
            }
            Record::Read { result, .. } => {
                size_of::<i32>() + WORD_LEN + WORD_LEN + read_payload_len(*result)
            }
            Record::Write { requested, .. } => {
                size_of::<i32>() + WORD_LEN + *requested + WORD_LEN
            }
            Record::Close { .. } => size_of::<i32>(),
        };
        HEADER_LEN + body
    }

    /// Serialize the record under `record_id`.
    ///
    /// Payload bytes missing from the borrowed slices (a short staging copy)
    /// are written as zeros so the record still matches [`Record::encoded_len`].
    pub fn encode_into<W: FieldWriter + ?Sized>(
        &self,
        record_id: RecordId,
        out: &mut W,
    ) -> Result<(), BufferError> {
        let total = self.encoded_len();
        let total_size = u16::try_from(total).map_err(|_| BufferError::Oversize(total))?;

        out.put(&total_size.to_ne_bytes())?;
        out.put(&record_id.to_ne_bytes())?;
        out.put(&[self.kind().tag()])?;

        match *self {
            Record::Open {
                flags,
                mode,
                path,
                result,
            } => {
                let path_len =
                    u16::try_from(path.len() + 1).map_err(|_| BufferError::Oversize(total))?;
                out.put(&flags.to_ne_bytes())?;
                out.put(&mode.to_ne_bytes())?;
                out.put(&path_len.to_ne_bytes())?;
                out.put(path)?;
                out.put(&[0])?;
                out.put(&result.to_ne_bytes())?;
            }
            Record::Read {
                open_record_id,
                requested,
                result,
                payload,
            } => {
                out.put(&wire_open_id(open_record_id).to_ne_bytes())?;
                out.put(&requested.to_ne_bytes())?;
                out.put(&result.to_ne_bytes())?;
                put_padded(out, payload, read_payload_len(result))?;
            }
            Record::Write {
                open_record_id,
                requested,
                payload,
                result,
            } => {
                out.put(&wire_open_id(open_record_id).to_ne_bytes())?;
                out.put(&requested.to_ne_bytes())?;
                put_padded(out, payload, requested)?;
                out.put(&result.to_ne_bytes())?;
            }
            Record::Close { open_record_id } => {
                out.put(&wire_open_id(Some(open_record_id)).to_ne_bytes())?;
            }
        }
        Ok(())
    }

    /// Encode into a freshly allocated vector.
    pub fn to_bytes(&self, record_id: RecordId) -> Result<Vec<u8>, BufferError> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        self.encode_into(record_id, &mut bytes)?;
        Ok(bytes)
    }
}

fn read_payload_len(result: isize) -> usize {
    if result > 0 {
        result as usize
    } else {
        0
    }
}

fn put_padded<W: FieldWriter + ?Sized>(
    out: &mut W,
    payload: &[u8],
    len: usize,
) -> Result<(), BufferError> {
    let available = payload.len().min(len);
    out.put(&payload[..available])?;
    out.put_zeros(len - available)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_record_layout() {
        let record = Record::Open {
            flags: libc::O_RDONLY,
            mode: 0o100644,
            path: b"dir/file.txt",
            result: 0,
        };
        let bytes = record.to_bytes(7).unwrap();

        assert_eq!(bytes.len(), record.encoded_len());
        assert_eq!(bytes.len(), 7 + 4 + 2 + 2 + 13 + 4);
        assert_eq!(u16::from_ne_bytes([bytes[0], bytes[1]]) as usize, bytes.len());
        assert_eq!(u32::from_ne_bytes(bytes[2..6].try_into().unwrap()), 7);
        assert_eq!(bytes[6], b'o');
        assert_eq!(u16::from_ne_bytes([bytes[13], bytes[14]]), 13);
        assert_eq!(&bytes[15..28], b"dir/file.txt\0");
    }

    #[test]
    fn read_payload_follows_result() {
        let record = Record::Read {
            open_record_id: Some(3),
            requested: 10,
            result: 4,
            payload: b"abcd",
        };
        let bytes = record.to_bytes(9).unwrap();
        let result_at = HEADER_LEN + 4 + WORD_LEN;

        assert_eq!(bytes.len(), HEADER_LEN + 4 + 2 * WORD_LEN + 4);
        assert_eq!(
            isize::from_ne_bytes(bytes[result_at..result_at + WORD_LEN].try_into().unwrap()),
            4
        );
        assert_eq!(&bytes[result_at + WORD_LEN..], b"abcd");
    }

    #[test]
    fn failed_read_has_no_payload() {
        let record = Record::Read {
            open_record_id: None,
            requested: 64,
            result: -(libc::EBADF as isize),
            payload: &[],
        };
        assert_eq!(record.encoded_len(), HEADER_LEN + 4 + 2 * WORD_LEN);
        let bytes = record.to_bytes(0).unwrap();
        assert_eq!(
            i32::from_ne_bytes(bytes[HEADER_LEN..HEADER_LEN + 4].try_into().unwrap()),
            UNTRACED_OPEN_ID
        );
    }

    #[test]
    fn write_payload_precedes_result() {
        let record = Record::Write {
            open_record_id: Some(1),
            requested: 3,
            payload: b"xyz",
            result: 3,
        };
        let bytes = record.to_bytes(2).unwrap();
        let payload_at = HEADER_LEN + 4 + WORD_LEN;

        assert_eq!(&bytes[payload_at..payload_at + 3], b"xyz");
        assert_eq!(
            isize::from_ne_bytes(bytes[payload_at + 3..].try_into().unwrap()),
            3
        );
    }

    #[test]
    fn short_write_payload_is_zero_filled() {
        let record = Record::Write {
            open_record_id: Some(1),
            requested: 4,
            payload: b"ab",
            result: 4,
        };
        let bytes = record.to_bytes(0).unwrap();
        let payload_at = HEADER_LEN + 4 + WORD_LEN;
        assert_eq!(bytes.len(), record.encoded_len());
        assert_eq!(&bytes[payload_at..payload_at + 4], b"ab\0\0");
    }

    #[test]
    fn close_record_is_eleven_bytes() {
        let record = Record::Close { open_record_id: 5 };
        let bytes = record.to_bytes(6).unwrap();
        assert_eq!(bytes.len(), 11);
        assert_eq!(bytes[6], b'c');
        assert_eq!(i32::from_ne_bytes(bytes[7..11].try_into().unwrap()), 5);
    }

    #[test]
    fn tags_round_trip() {
        for kind in [OpKind::Open, OpKind::Read, OpKind::Write, OpKind::Close] {
            assert_eq!(OpKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(OpKind::from_tag(b'x'), None);
    }

    #[test]
    fn correlation_ids_never_collide_with_untraced() {
        assert_eq!(wire_open_id(None), UNTRACED_OPEN_ID);
        assert_eq!(wire_open_id(Some(0)), 0);
        assert_eq!(wire_open_id(Some(MAX_RECORD_ID)), i32::MAX);
        assert_eq!(wire_open_id(Some(u32::MAX)), UNTRACED_OPEN_ID);
    }
}

//! Fixed-capacity scratch region shared by all traced operations of a mount.

use thiserror::Error;

/// Size of the per-mount trace buffer. Records must be strictly smaller.
pub const TRACE_BUFFER_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("write of {needed} bytes exceeds the {available} bytes left in the trace buffer")]
    Overflow { needed: usize, available: usize },
    #[error("record of {0} bytes cannot be encoded")]
    Oversize(usize),
}

/// Destination for encoded record fields.
pub trait FieldWriter {
    fn put(&mut self, bytes: &[u8]) -> Result<(), BufferError>;

    fn put_zeros(&mut self, len: usize) -> Result<(), BufferError> {
        const ZEROS: [u8; 64] = [0; 64];
        let mut left = len;
        while left > 0 {
            let chunk = left.min(ZEROS.len());
            self.put(&ZEROS[..chunk])?;
            left -= chunk;
        }
        Ok(())
    }
}

impl FieldWriter for Vec<u8> {
    fn put(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.extend_from_slice(bytes);
        Ok(())
    }
}

/// A write cursor over a fixed [`TRACE_BUFFER_CAPACITY`]-byte array.
///
/// Between flushes the cursor sits at offset 0 and the array is all zeros.
pub struct TraceBuffer {
    bytes: Box<[u8; TRACE_BUFFER_CAPACITY]>,
    cursor: usize,
}

impl TraceBuffer {
    pub fn new() -> Self {
        Self {
            bytes: Box::new([0; TRACE_BUFFER_CAPACITY]),
            cursor: 0,
        }
    }

    /// Whether a record of `size` bytes may enter the buffer.
    pub fn admits(size: usize) -> bool {
        size > 0 && size < TRACE_BUFFER_CAPACITY
    }

    pub fn len(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    pub fn remaining(&self) -> usize {
        TRACE_BUFFER_CAPACITY - self.cursor
    }

    /// Bytes written since the last reset.
    pub fn filled(&self) -> &[u8] {
        &self.bytes[..self.cursor]
    }

    /// Rewind to the start and zero the whole region.
    pub fn reset(&mut self) {
        self.bytes.fill(0);
        self.cursor = 0;
    }
}

impl Default for TraceBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldWriter for TraceBuffer {
    fn put(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        let available = self.remaining();
        if bytes.len() > available {
            return Err(BufferError::Overflow {
                needed: bytes.len(),
                available,
            });
        }
        let end = self.cursor + bytes.len();
        self.bytes[self.cursor..end].copy_from_slice(bytes);
        self.cursor = end;
        Ok(())
    }
}

impl std::fmt::Debug for TraceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceBuffer")
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_only_sizes_below_capacity() {
        assert!(!TraceBuffer::admits(0));
        assert!(TraceBuffer::admits(1));
        assert!(TraceBuffer::admits(TRACE_BUFFER_CAPACITY - 1));
        assert!(!TraceBuffer::admits(TRACE_BUFFER_CAPACITY));
        assert!(!TraceBuffer::admits(TRACE_BUFFER_CAPACITY + 1));
    }

    #[test]
    fn rejects_writes_past_capacity() {
        let mut buffer = TraceBuffer::new();
        buffer.put(&[1; TRACE_BUFFER_CAPACITY - 2]).unwrap();
        assert_eq!(
            buffer.put(&[2; 3]),
            Err(BufferError::Overflow {
                needed: 3,
                available: 2
            })
        );
        assert_eq!(buffer.len(), TRACE_BUFFER_CAPACITY - 2);
        buffer.put(&[3; 2]).unwrap();
        assert_eq!(buffer.remaining(), 0);
    }

    #[test]
    fn reset_clears_contents() {
        let mut buffer = TraceBuffer::new();
        buffer.put(b"stale").unwrap();
        buffer.put_zeros(100).unwrap();
        assert_eq!(buffer.len(), 105);

        buffer.reset();
        assert!(buffer.is_empty());
        buffer.put(b"ab").unwrap();
        assert_eq!(buffer.filled(), b"ab");
        assert!(buffer.bytes[2..].iter().all(|&b| b == 0));
    }
}

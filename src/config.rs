//! Per-mount selection of traced operation categories.

use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

use crate::record::OpKind;

bitflags! {
    /// Bitmask of traced operation categories.
    ///
    /// Bits outside the named categories are kept as installed so the control
    /// channel reports back exactly what it was given.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TraceMask: u32 {
        const OPEN = 0x01;
        const READ = 0x02;
        const WRITE = 0x04;
        const CLOSE = 0x10;
    }
}

impl TraceMask {
    /// Every bit set, the mask a fresh mount starts with.
    pub const EVERYTHING: TraceMask = TraceMask::from_bits_retain(u32::MAX);

    pub fn traces(self, kind: OpKind) -> bool {
        self.contains(kind.mask())
    }
}

impl Default for TraceMask {
    fn default() -> Self {
        TraceMask::EVERYTHING
    }
}

/// The live mask of a mount.
///
/// Stored in a single atomic word: readers on the operation path observe
/// either the previous or the newly installed mask, never a mix.
#[derive(Debug)]
pub struct TraceConfig {
    bits: AtomicU32,
}

impl TraceConfig {
    pub fn new(mask: TraceMask) -> Self {
        Self {
            bits: AtomicU32::new(mask.bits()),
        }
    }

    pub fn mask(&self) -> TraceMask {
        TraceMask::from_bits_retain(self.bits.load(Ordering::Acquire))
    }

    pub fn is_enabled(&self, kind: OpKind) -> bool {
        self.mask().traces(kind)
    }

    /// Replace the mask, returning the previous one.
    pub fn install(&self, mask: TraceMask) -> TraceMask {
        TraceMask::from_bits_retain(self.bits.swap(mask.bits(), Ordering::AcqRel))
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self::new(TraceMask::default())
    }
}

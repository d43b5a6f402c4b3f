/// Conditions with no safe continuation.
///
/// Library code never terminates the process itself. A `FatalError` travels
/// up the call stack like any other error and is turned into process
/// termination at one boundary (see `scriptipc-peer`'s `Terminator`), using
/// [`FatalError::exit_code`] as the status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FatalError {
    /// Both allocator slots were occupied when a payload needed storage.
    #[error("payload allocation of {requested} bytes failed (allocator exhausted)")]
    AllocationFailed { requested: usize },

    /// Requested block is larger than one allocator slot.
    #[error("allocation of {requested} bytes exceeds slot size {slot_size}")]
    AllocationTooLarge { requested: usize, slot_size: usize },

    /// A block was released while its slot was already free.
    #[error("double free of block at offset {offset}")]
    DoubleFree { offset: usize },

    /// A block was released that does not belong to any slot.
    #[error("free of unknown block at offset {offset}")]
    FreeWrongPointer { offset: usize },

    /// Fixed allocator region is empty or cannot be split into two equal slots.
    #[error("fixed region length {len} cannot be split into two slots")]
    RegionNotAligned { len: usize },

    /// I/O buffer region is below the minimum size.
    #[error("io buffer too small ({len} bytes, min {min})")]
    IoBufferTooSmall { len: usize, min: usize },

    /// I/O buffer region cannot be split into two equal halves.
    #[error("io buffer length {len} is not even")]
    IoBufferNotAligned { len: usize },

    /// Buffered endpoint bookkeeping is corrupt.
    #[error("buffer invariant violated (pos {pos}, filled {filled}, capacity {capacity})")]
    BufferInvariant {
        pos: usize,
        filled: usize,
        capacity: usize,
    },

    /// A varint needed bit positions beyond 64.
    #[error("varint shift overflow")]
    VarintOverflow,
}

impl FatalError {
    /// Process exit status used when this error reaches the fatal boundary.
    pub fn exit_code(&self) -> i32 {
        match self {
            FatalError::AllocationFailed { .. } => 40,
            FatalError::AllocationTooLarge { .. } => 41,
            FatalError::DoubleFree { .. } => 42,
            FatalError::FreeWrongPointer { .. } => 43,
            FatalError::RegionNotAligned { .. } => 44,
            FatalError::IoBufferTooSmall { .. } => 45,
            FatalError::IoBufferNotAligned { .. } => 46,
            FatalError::BufferInvariant { .. } => 47,
            FatalError::VarintOverflow => 48,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let all = [
            FatalError::AllocationFailed { requested: 1 },
            FatalError::AllocationTooLarge {
                requested: 2,
                slot_size: 1,
            },
            FatalError::DoubleFree { offset: 0 },
            FatalError::FreeWrongPointer { offset: 3 },
            FatalError::RegionNotAligned { len: 7 },
            FatalError::IoBufferTooSmall { len: 8, min: 1024 },
            FatalError::IoBufferNotAligned { len: 1025 },
            FatalError::BufferInvariant {
                pos: 2,
                filled: 1,
                capacity: 4,
            },
            FatalError::VarintOverflow,
        ];
        let mut codes: Vec<i32> = all.iter().map(FatalError::exit_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
        assert!(codes.iter().all(|code| *code != 0));
    }
}

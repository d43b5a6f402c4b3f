//! Payload allocators.
//!
//! Received payloads live in storage owned by an [`Allocator`] and are
//! referred to by [`Block`] handles. A block is released exactly once by
//! consuming it; handles that crossed an untyped boundary (see
//! [`Block::into_raw`]) are still checked at release time.

use scriptipc_transport::FatalError;

/// A live allocation.
///
/// Not `Clone`: releasing a block consumes the only handle.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a block must be released back to its allocator"]
pub struct Block {
    offset: usize,
    len: usize,
}

/// Untyped form of a [`Block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawBlock {
    pub offset: usize,
    pub len: usize,
}

impl Block {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocator-specific position of the block.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn into_raw(self) -> RawBlock {
        RawBlock {
            offset: self.offset,
            len: self.len,
        }
    }

    /// Rebuild a handle. Releasing a handle that is not live is detected by
    /// the allocator and reported as a [`FatalError`].
    pub fn from_raw(raw: RawBlock) -> Self {
        Self {
            offset: raw.offset,
            len: raw.len,
        }
    }
}

/// Storage strategy for payload blocks.
pub trait Allocator {
    /// Allocate `len` bytes. `Ok(None)` means no storage is left.
    fn allocate(&mut self, len: usize) -> Result<Option<Block>, FatalError>;

    /// Return `block` to the allocator.
    fn release(&mut self, block: Block) -> Result<(), FatalError>;

    /// Contents of `block`. A handle that is not live yields an empty slice.
    fn bytes(&self, block: &Block) -> &[u8];

    /// Mutable contents of `block`. A handle that is not live yields an
    /// empty slice.
    fn bytes_mut(&mut self, block: &Block) -> &mut [u8];

    /// Release `block` if present.
    fn release_opt(&mut self, block: Option<Block>) -> Result<(), FatalError> {
        match block {
            Some(block) => self.release(block),
            None => Ok(()),
        }
    }
}

impl<A: Allocator + ?Sized> Allocator for &mut A {
    fn allocate(&mut self, len: usize) -> Result<Option<Block>, FatalError> {
        A::allocate(self, len)
    }

    fn release(&mut self, block: Block) -> Result<(), FatalError> {
        A::release(self, block)
    }

    fn bytes(&self, block: &Block) -> &[u8] {
        A::bytes(self, block)
    }

    fn bytes_mut(&mut self, block: &Block) -> &mut [u8] {
        A::bytes_mut(self, block)
    }
}

/// Two equal slots carved out of a caller-supplied region.
///
/// At most two blocks are live at once, which is exactly what one
/// request/response exchange needs.
pub struct FixedRegionAllocator<'r> {
    region: &'r mut [u8],
    occupied: [bool; 2],
}

impl<'r> FixedRegionAllocator<'r> {
    /// Take over `region`. Its length must be even and non-zero.
    pub fn new(region: &'r mut [u8]) -> Result<Self, FatalError> {
        if region.is_empty() || region.len() % 2 != 0 {
            return Err(FatalError::RegionNotAligned { len: region.len() });
        }
        Ok(Self {
            region,
            occupied: [false; 2],
        })
    }

    /// Largest block either slot can hold.
    pub fn slot_size(&self) -> usize {
        self.region.len() / 2
    }

    /// Number of slots currently holding a block.
    pub fn live(&self) -> usize {
        self.occupied.iter().filter(|slot| **slot).count()
    }

    fn slot_offset(&self, slot: usize) -> usize {
        slot * self.slot_size()
    }

    fn range(&self, block: &Block) -> Option<std::ops::Range<usize>> {
        let slot = (0..2).find(|slot| self.slot_offset(*slot) == block.offset)?;
        if !self.occupied[slot] || block.len > self.slot_size() {
            return None;
        }
        Some(block.offset..block.offset + block.len)
    }
}

impl Allocator for FixedRegionAllocator<'_> {
    fn allocate(&mut self, len: usize) -> Result<Option<Block>, FatalError> {
        let Some(slot) = (0..2).find(|slot| !self.occupied[*slot]) else {
            return Ok(None);
        };
        if len > self.slot_size() {
            return Err(FatalError::AllocationTooLarge {
                requested: len,
                slot_size: self.slot_size(),
            });
        }
        self.occupied[slot] = true;
        Ok(Some(Block {
            offset: self.slot_offset(slot),
            len,
        }))
    }

    fn release(&mut self, block: Block) -> Result<(), FatalError> {
        let offset = block.offset;
        let slot = (0..2)
            .find(|slot| self.slot_offset(*slot) == offset)
            .ok_or(FatalError::FreeWrongPointer { offset })?;
        if !self.occupied[slot] {
            return Err(FatalError::DoubleFree { offset });
        }
        self.occupied[slot] = false;
        Ok(())
    }

    fn bytes(&self, block: &Block) -> &[u8] {
        match self.range(block) {
            Some(range) => &self.region[range],
            None => &[],
        }
    }

    fn bytes_mut(&mut self, block: &Block) -> &mut [u8] {
        match self.range(block) {
            Some(range) => &mut self.region[range],
            None => &mut [],
        }
    }
}

impl std::fmt::Debug for FixedRegionAllocator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedRegionAllocator")
            .field("slot_size", &self.slot_size())
            .field("occupied", &self.occupied)
            .finish()
    }
}

/// Largest single block a [`HeapAllocator`] hands out unless configured
/// otherwise.
pub const DEFAULT_HEAP_BLOCK_LIMIT: usize = 64 * 1024 * 1024;

/// General-purpose strategy backed by the global heap.
///
/// Block offsets are slab indices; freed indices are reused. Lengths come
/// straight off the wire, so requests above `block_limit` or ones the heap
/// cannot satisfy report `Ok(None)` instead of aborting.
#[derive(Debug)]
pub struct HeapAllocator {
    slots: Vec<Option<Box<[u8]>>>,
    vacant: Vec<usize>,
    block_limit: usize,
}

impl Default for HeapAllocator {
    fn default() -> Self {
        Self::with_limit(DEFAULT_HEAP_BLOCK_LIMIT)
    }
}

impl HeapAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Heap allocator refusing blocks longer than `block_limit` bytes.
    pub fn with_limit(block_limit: usize) -> Self {
        Self {
            slots: Vec::new(),
            vacant: Vec::new(),
            block_limit,
        }
    }

    pub fn block_limit(&self) -> usize {
        self.block_limit
    }

    /// Number of live blocks.
    pub fn live(&self) -> usize {
        self.slots.len() - self.vacant.len()
    }
}

impl Allocator for HeapAllocator {
    fn allocate(&mut self, len: usize) -> Result<Option<Block>, FatalError> {
        if len > self.block_limit {
            return Ok(None);
        }
        let mut storage = Vec::new();
        if storage.try_reserve_exact(len).is_err() {
            return Ok(None);
        }
        storage.resize(len, 0u8);
        let storage = storage.into_boxed_slice();
        let offset = match self.vacant.pop() {
            Some(index) => {
                self.slots[index] = Some(storage);
                index
            }
            None => {
                self.slots.push(Some(storage));
                self.slots.len() - 1
            }
        };
        Ok(Some(Block { offset, len }))
    }

    fn release(&mut self, block: Block) -> Result<(), FatalError> {
        let offset = block.offset;
        let slot = self
            .slots
            .get_mut(offset)
            .ok_or(FatalError::FreeWrongPointer { offset })?;
        if slot.take().is_none() {
            return Err(FatalError::DoubleFree { offset });
        }
        self.vacant.push(offset);
        Ok(())
    }

    fn bytes(&self, block: &Block) -> &[u8] {
        match self.slots.get(block.offset) {
            Some(Some(storage)) => storage.get(..block.len).unwrap_or_default(),
            _ => &[],
        }
    }

    fn bytes_mut(&mut self, block: &Block) -> &mut [u8] {
        match self.slots.get_mut(block.offset) {
            Some(Some(storage)) => storage.get_mut(..block.len).unwrap_or_default(),
            _ => &mut [],
        }
    }
}

/// The allocator picked once at startup.
#[derive(Debug)]
pub enum PayloadAllocator<'r> {
    Fixed(FixedRegionAllocator<'r>),
    Heap(HeapAllocator),
}

impl<'r> PayloadAllocator<'r> {
    /// Two-slot allocation inside `region`.
    pub fn fixed(region: &'r mut [u8]) -> Result<Self, FatalError> {
        FixedRegionAllocator::new(region).map(PayloadAllocator::Fixed)
    }

    pub fn heap() -> Self {
        PayloadAllocator::Heap(HeapAllocator::new())
    }

    /// Number of live blocks.
    pub fn live(&self) -> usize {
        match self {
            PayloadAllocator::Fixed(alloc) => alloc.live(),
            PayloadAllocator::Heap(alloc) => alloc.live(),
        }
    }
}

impl Default for PayloadAllocator<'_> {
    fn default() -> Self {
        Self::heap()
    }
}

impl Allocator for PayloadAllocator<'_> {
    fn allocate(&mut self, len: usize) -> Result<Option<Block>, FatalError> {
        match self {
            PayloadAllocator::Fixed(alloc) => alloc.allocate(len),
            PayloadAllocator::Heap(alloc) => alloc.allocate(len),
        }
    }

    fn release(&mut self, block: Block) -> Result<(), FatalError> {
        match self {
            PayloadAllocator::Fixed(alloc) => alloc.release(block),
            PayloadAllocator::Heap(alloc) => alloc.release(block),
        }
    }

    fn bytes(&self, block: &Block) -> &[u8] {
        match self {
            PayloadAllocator::Fixed(alloc) => alloc.bytes(block),
            PayloadAllocator::Heap(alloc) => alloc.bytes(block),
        }
    }

    fn bytes_mut(&mut self, block: &Block) -> &mut [u8] {
        match self {
            PayloadAllocator::Fixed(alloc) => alloc.bytes_mut(block),
            PayloadAllocator::Heap(alloc) => alloc.bytes_mut(block),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grab<A: Allocator>(alloc: &mut A, len: usize) -> Block {
        alloc
            .allocate(len)
            .expect("allocation should succeed")
            .expect("a slot should be free")
    }

    #[test]
    fn region_must_be_even() {
        let mut region = [0u8; 101];
        assert_eq!(
            FixedRegionAllocator::new(&mut region).expect_err("odd region should be rejected"),
            FatalError::RegionNotAligned { len: 101 }
        );
    }

    #[test]
    fn empty_region_is_rejected() {
        let mut region: [u8; 0] = [];
        assert_eq!(
            FixedRegionAllocator::new(&mut region).expect_err("empty region should be rejected"),
            FatalError::RegionNotAligned { len: 0 }
        );
        assert!(PayloadAllocator::fixed(&mut []).is_err());
    }

    #[test]
    fn two_slots_then_exhaustion() {
        let mut region = [0u8; 200];
        let mut alloc = FixedRegionAllocator::new(&mut region).expect("region should split");

        let a = grab(&mut alloc, 100);
        let b = grab(&mut alloc, 10);
        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 100);
        assert!(alloc.allocate(1).expect("allocation should succeed").is_none());

        alloc.release(a).expect("release should succeed");
        let c = grab(&mut alloc, 1);
        assert_eq!(c.offset(), 0);
        alloc.release(b).expect("release should succeed");
        alloc.release(c).expect("release should succeed");
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn oversized_request_is_fatal() {
        let mut region = [0u8; 200];
        let mut alloc = FixedRegionAllocator::new(&mut region).expect("region should split");
        assert_eq!(
            alloc.allocate(101).expect_err("allocate should fail"),
            FatalError::AllocationTooLarge {
                requested: 101,
                slot_size: 100
            }
        );
    }

    #[test]
    fn blocks_do_not_overlap() {
        let mut region = [0u8; 16];
        let mut alloc = FixedRegionAllocator::new(&mut region).expect("region should split");
        let a = grab(&mut alloc, 8);
        let b = grab(&mut alloc, 8);
        alloc.bytes_mut(&a).fill(0xaa);
        alloc.bytes_mut(&b).fill(0xbb);
        assert!(alloc.bytes(&a).iter().all(|byte| *byte == 0xaa));
        assert!(alloc.bytes(&b).iter().all(|byte| *byte == 0xbb));
        alloc.release(a).expect("release should succeed");
        alloc.release(b).expect("release should succeed");
    }

    #[test]
    fn misuse_through_raw_handles_is_detected() {
        let mut region = [0u8; 64];
        let mut alloc = FixedRegionAllocator::new(&mut region).expect("region should split");

        let raw = grab(&mut alloc, 4).into_raw();
        alloc.release(Block::from_raw(raw)).expect("release should succeed");
        assert_eq!(
            alloc.release(Block::from_raw(raw)).expect_err("release should fail"),
            FatalError::DoubleFree { offset: 0 }
        );
        assert!(alloc.bytes(&Block::from_raw(raw)).is_empty());

        let stray = RawBlock { offset: 5, len: 1 };
        assert_eq!(
            alloc.release(Block::from_raw(stray)).expect_err("release should fail"),
            FatalError::FreeWrongPointer { offset: 5 }
        );
    }

    #[test]
    fn releasing_nothing_is_a_no_op() {
        let mut region = [0u8; 8];
        let mut alloc = FixedRegionAllocator::new(&mut region).expect("region should split");
        alloc.release_opt(None).expect("release should succeed");
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn heap_reuses_vacant_slots() {
        let mut alloc = HeapAllocator::new();
        let a = grab(&mut alloc, 3);
        let b = grab(&mut alloc, 5);
        alloc.bytes_mut(&b).copy_from_slice(b"hello");
        assert_eq!(alloc.live(), 2);

        let raw = a.into_raw();
        alloc.release(Block::from_raw(raw)).expect("release should succeed");
        assert_eq!(
            alloc.release(Block::from_raw(raw)).expect_err("release should fail"),
            FatalError::DoubleFree { offset: raw.offset }
        );

        let c = grab(&mut alloc, 1);
        assert_eq!(c.offset(), raw.offset);
        assert_eq!(alloc.bytes(&b), b"hello");
        assert_eq!(
            alloc
                .release(Block::from_raw(RawBlock { offset: 99, len: 0 }))
                .expect_err("release should fail"),
            FatalError::FreeWrongPointer { offset: 99 }
        );
        alloc.release(b).expect("release should succeed");
        alloc.release(c).expect("release should succeed");
        assert_eq!(alloc.live(), 0);
    }

    #[test]
    fn heap_refuses_blocks_it_cannot_hold() {
        let mut alloc = HeapAllocator::with_limit(16);
        assert!(alloc
            .allocate(17)
            .expect("allocation should not be fatal")
            .is_none());
        let block = grab(&mut alloc, 16);
        alloc.release(block).expect("release should succeed");

        let mut unbounded = HeapAllocator::with_limit(usize::MAX);
        assert!(unbounded
            .allocate(usize::MAX)
            .expect("allocation should not be fatal")
            .is_none());
        assert_eq!(unbounded.live(), 0);
        assert_eq!(HeapAllocator::new().block_limit(), DEFAULT_HEAP_BLOCK_LIMIT);
    }

    #[test]
    fn payload_allocator_delegates() {
        let mut region = [0u8; 32];
        let mut fixed = PayloadAllocator::fixed(&mut region).expect("region should split");
        let a = grab(&mut fixed, 16);
        let b = grab(&mut fixed, 16);
        assert!(fixed.allocate(1).expect("allocation should succeed").is_none());
        assert_eq!(fixed.live(), 2);
        fixed.release(a).expect("release should succeed");
        fixed.release(b).expect("release should succeed");

        let mut heap = PayloadAllocator::default();
        let block = grab(&mut heap, 1 << 20);
        assert_eq!(heap.bytes(&block).len(), 1 << 20);
        heap.release(block).expect("release should succeed");
    }
}

//! DMA linked-list descriptors.
//!
//! A buffer handed to the DMA engine is described by a chain of
//! descriptors, each covering at most [`DESCRIPTOR_MAX_BYTES`]. The engine
//! walks the chain without CPU involvement until it reaches a descriptor
//! with the EOF bit set.

use core::ptr;

use crate::error::Exhausted;

/// Largest chunk one descriptor can carry (12-bit size field, word aligned).
pub const DESCRIPTOR_MAX_BYTES: usize = 4092;

const SIZE_MASK: u32 = 0xfff;
const LENGTH_SHIFT: u32 = 12;
const EOF: u32 = 1 << 30;
const OWNER_DMA: u32 = 1 << 31;

/// One hardware descriptor, laid out as the DMA engine reads it.
#[repr(C)]
#[derive(Debug)]
pub struct DmaDescriptor {
    flags: u32,
    buffer: *mut u8,
    next: *mut DmaDescriptor,
}

// SAFETY: a descriptor only holds addresses for the DMA engine. The engine
// that owns the descriptor storage is the only code that writes them, and
// it never dereferences the stored pointers itself.
unsafe impl Send for DmaDescriptor {}

impl DmaDescriptor {
    pub const EMPTY: Self = Self {
        flags: 0,
        buffer: ptr::null_mut(),
        next: ptr::null_mut(),
    };

    /// Capacity of the buffer chunk, in bytes.
    pub fn size(&self) -> usize {
        (self.flags & SIZE_MASK) as usize
    }

    /// Valid bytes in the chunk.
    pub fn length(&self) -> usize {
        ((self.flags >> LENGTH_SHIFT) & SIZE_MASK) as usize
    }

    pub fn is_eof(&self) -> bool {
        self.flags & EOF != 0
    }

    pub fn owned_by_dma(&self) -> bool {
        self.flags & OWNER_DMA != 0
    }

    pub fn buffer(&self) -> *const u8 {
        self.buffer
    }

    pub fn next(&self) -> *const DmaDescriptor {
        self.next
    }

    fn set(&mut self, size: usize, length: usize, buffer: *mut u8) {
        self.flags = OWNER_DMA
            | ((length as u32 & SIZE_MASK) << LENGTH_SHIFT)
            | (size as u32 & SIZE_MASK);
        self.buffer = buffer;
    }
}

impl Default for DmaDescriptor {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Descriptors needed to move `bytes` in one transfer.
pub const fn descriptors_for(bytes: usize) -> usize {
    if bytes == 0 {
        1
    } else {
        bytes.div_ceil(DESCRIPTOR_MAX_BYTES)
    }
}

/// Descriptor storage of one session: a transmit and a receive chain.
///
/// The storage must stay put while a transfer is armed, hence `'static`.
pub struct DescriptorStorage {
    pub tx: &'static mut [DmaDescriptor],
    pub rx: &'static mut [DmaDescriptor],
}

impl DescriptorStorage {
    pub fn new(
        tx: &'static mut [DmaDescriptor],
        rx: &'static mut [DmaDescriptor],
    ) -> Self {
        Self { tx, rx }
    }

    /// Bytes a transfer may span with the descriptors on hand.
    pub fn capacity_bytes(&self) -> usize {
        self.tx.len().min(self.rx.len()) * DESCRIPTOR_MAX_BYTES
    }

    /// Make sure both chains can cover `bytes`.
    pub fn reserve(&self, bytes: usize) -> Result<(), Exhausted> {
        let needed = descriptors_for(bytes);
        let available = self.tx.len().min(self.rx.len());
        if needed > available {
            return Err(Exhausted::Descriptors { needed, available });
        }
        Ok(())
    }
}

impl core::fmt::Debug for DescriptorStorage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DescriptorStorage")
            .field("tx", &self.tx.len())
            .field("rx", &self.rx.len())
            .finish()
    }
}

/// Describe `len` bytes at `buffer` with the front of `chain`.
///
/// Receive chunks are sized up to a whole word since the receive engine
/// writes words. Returns the number of descriptors used; the last one
/// carries EOF and a null link.
pub fn link(
    chain: &mut [DmaDescriptor],
    buffer: *mut u8,
    len: usize,
    rx: bool,
) -> Result<usize, Exhausted> {
    if len == 0 {
        return Ok(0);
    }
    let needed = descriptors_for(len);
    if needed > chain.len() {
        return Err(Exhausted::Descriptors { needed, available: chain.len() });
    }

    let base = chain.as_mut_ptr();
    let mut offset = 0;
    for (n, desc) in chain[..needed].iter_mut().enumerate() {
        let chunk = (len - offset).min(DESCRIPTOR_MAX_BYTES);
        let size = if rx { (chunk + 3) & !3 } else { chunk };
        desc.set(size, chunk, buffer.wrapping_add(offset));
        desc.next = if n + 1 == needed {
            desc.flags |= EOF;
            ptr::null_mut()
        } else {
            base.wrapping_add(n + 1)
        };
        offset += chunk;
    }

    Ok(needed)
}

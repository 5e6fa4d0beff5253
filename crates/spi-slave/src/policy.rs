//! Buffer rules a transaction must pass before it is queued.

use crate::error::InvalidArgument;
use crate::transaction::{bytes_for, Transaction};

/// Largest transfer the CPU-copy path can move: the peripheral's 16-word
/// register file.
pub const REGISTER_FILE_BYTES: usize = 64;

/// Default transfer size with DMA: what one descriptor can carry.
pub const DEFAULT_DMA_TRANSFER_BYTES: usize = crate::dma::DESCRIPTOR_MAX_BYTES;

/// Predicate telling whether `len` bytes at `ptr` are reachable by DMA.
pub type DmaCapable = fn(*const u8, usize) -> bool;

/// What the open session can do, as negotiated at open.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub dma_enabled: bool,
    pub max_transfer_bits: usize,
    pub dma_capable: DmaCapable,
}

#[cfg(feature = "defmt")]
impl defmt::Format for Capabilities {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(
            f,
            "Capabilities {{ dma_enabled: {}, max_transfer_bits: {} }}",
            self.dma_enabled,
            self.max_transfer_bits
        )
    }
}

impl Capabilities {
    /// CPU-copy session limited to `bytes` (at most the register file).
    pub const fn register_file(bytes: usize) -> Self {
        Self {
            dma_enabled: false,
            max_transfer_bits: bytes * 8,
            dma_capable: any_memory,
        }
    }

    /// DMA session able to move `bytes` through its descriptor chain.
    pub const fn dma(bytes: usize, dma_capable: DmaCapable) -> Self {
        Self {
            dma_enabled: true,
            max_transfer_bits: bytes * 8,
            dma_capable,
        }
    }
}

/// Accepts every address. For targets where all RAM is DMA reachable.
pub fn any_memory(_ptr: *const u8, _len: usize) -> bool {
    true
}

/// Check `transaction` against the session capabilities.
///
/// Pure: touches neither the buffers' contents nor any state.
pub fn validate(
    transaction: &Transaction,
    caps: &Capabilities,
) -> Result<(), InvalidArgument> {
    let bits = transaction.bits;
    if bits > caps.max_transfer_bits {
        return Err(InvalidArgument::TooLong {
            bits,
            max_bits: caps.max_transfer_bits,
        });
    }

    let needed = bytes_for(bits);
    if let Some(tx) = transaction.tx {
        if tx.len() < needed {
            return Err(InvalidArgument::TxBufferTooShort {
                len: tx.len(),
                needed,
            });
        }
    }
    if let Some(rx) = transaction.rx.as_deref() {
        if rx.len() < needed {
            return Err(InvalidArgument::RxBufferTooShort {
                len: rx.len(),
                needed,
            });
        }
    }

    if !caps.dma_enabled {
        return Ok(());
    }

    if let Some(tx) = transaction.tx {
        if !(caps.dma_capable)(tx.as_ptr(), tx.len()) {
            return Err(InvalidArgument::TxNotDmaCapable);
        }
    }
    if let Some(rx) = transaction.rx.as_deref() {
        if !(caps.dma_capable)(rx.as_ptr(), rx.len()) {
            return Err(InvalidArgument::RxNotDmaCapable);
        }
        if (rx.as_ptr() as usize) % 4 != 0 {
            return Err(InvalidArgument::RxUnaligned);
        }
        if bits % 32 != 0 {
            return Err(InvalidArgument::RxLengthNotWordMultiple(bits));
        }
    }

    Ok(())
}

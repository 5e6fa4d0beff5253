use derive_more::From;

use crate::transaction::Transaction;

/// Errors reported by the slave engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, From)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Bad configuration or a buffer that is illegal for the session.
    InvalidArgument(InvalidArgument),
    /// A blocking call ran out of time before it could complete.
    #[from(ignore)]
    Timeout,
    /// The operation is not possible in the current state.
    InvalidState(StateError),
    /// Queue or descriptor storage could not cover the request.
    NoMemory(Exhausted),
}

/// Why a configuration or transaction was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InvalidArgument {
    /// Host id is outside the arena.
    InvalidHost(u8),
    /// The submit queue must hold at least one transaction.
    ZeroQueueDepth,
    /// DMA needs a select line the engine can freeze.
    MissingSelectLine,
    /// Maximum transfer size is zero or exceeds what the mode can move.
    MaxTransferSize(usize),
    /// Transaction is longer than the session can clock.
    TooLong { bits: usize, max_bits: usize },
    /// Transmit buffer holds fewer bytes than the bit length needs.
    TxBufferTooShort { len: usize, needed: usize },
    /// Receive buffer holds fewer bytes than the bit length needs.
    RxBufferTooShort { len: usize, needed: usize },
    /// Transmit buffer is outside DMA-capable memory.
    TxNotDmaCapable,
    /// Receive buffer is outside DMA-capable memory.
    RxNotDmaCapable,
    /// Receive buffer is not word aligned.
    RxUnaligned,
    /// Receive DMA writes whole words: bit length must be a multiple of 32.
    RxLengthNotWordMultiple(usize),
    /// The pin arbiter could not route the requested signals.
    PinRouting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StateError {
    /// The peripheral is already claimed.
    HostInUse,
    /// The requested DMA channel is already claimed.
    DmaChannelInUse,
    /// Queued or unretrieved transactions still exist.
    PendingTransactions,
    /// A deferred DMA reset still holds a waker into the session.
    ResetPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Exhausted {
    /// Not enough descriptors to cover the maximum transfer size.
    Descriptors { needed: usize, available: usize },
    /// The power management lock could not be taken.
    PowerLock,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::InvalidArgument(reason) => {
                write!(f, "invalid argument: {}", reason)
            }
            Error::Timeout => write!(f, "timed out"),
            Error::InvalidState(reason) => {
                write!(f, "invalid state: {}", reason)
            }
            Error::NoMemory(reason) => write!(f, "out of memory: {}", reason),
        }
    }
}

impl core::fmt::Display for InvalidArgument {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            InvalidArgument::InvalidHost(id) => {
                write!(f, "no slave host with id {}", id)
            }
            InvalidArgument::ZeroQueueDepth => {
                write!(f, "queue depth must be positive")
            }
            InvalidArgument::MissingSelectLine => {
                write!(f, "DMA requires a select line")
            }
            InvalidArgument::MaxTransferSize(bytes) => {
                write!(f, "unsupported max transfer size: {} bytes", bytes)
            }
            InvalidArgument::TooLong { bits, max_bits } => {
                write!(f, "{} bits > host maximum of {}", bits, max_bits)
            }
            InvalidArgument::TxBufferTooShort { len, needed } => {
                write!(f, "tx buffer holds {} bytes, needs {}", len, needed)
            }
            InvalidArgument::RxBufferTooShort { len, needed } => {
                write!(f, "rx buffer holds {} bytes, needs {}", len, needed)
            }
            InvalidArgument::TxNotDmaCapable => {
                write!(f, "txdata not in DMA-capable memory")
            }
            InvalidArgument::RxNotDmaCapable => {
                write!(f, "rxdata not in DMA-capable memory")
            }
            InvalidArgument::RxUnaligned => {
                write!(f, "rxdata not word aligned")
            }
            InvalidArgument::RxLengthNotWordMultiple(bits) => {
                write!(f, "rx length of {} bits is not a multiple of 32", bits)
            }
            InvalidArgument::PinRouting => {
                write!(f, "pins could not be routed")
            }
        }
    }
}

impl core::fmt::Display for StateError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StateError::HostInUse => write!(f, "host already in use"),
            StateError::DmaChannelInUse => {
                write!(f, "DMA channel already in use")
            }
            StateError::PendingTransactions => {
                write!(f, "transactions still pending")
            }
            StateError::ResetPending => write!(f, "DMA reset pending"),
        }
    }
}

impl core::fmt::Display for Exhausted {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Exhausted::Descriptors { needed, available } => write!(
                f,
                "{} DMA descriptors needed, {} available",
                needed, available
            ),
            Exhausted::PowerLock => write!(f, "power lock unavailable"),
        }
    }
}

/// An operation the engine refused, with ownership of what was handed in
/// given back.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Refused<T> {
    pub error: Error,
    pub value: T,
}

impl<T> Refused<T> {
    pub(crate) fn new(error: impl Into<Error>, value: T) -> Self {
        Self { error: error.into(), value }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

/// A submission the engine did not accept. The transaction is handed back
/// untouched so its buffers are never lost.
pub type Rejected = Refused<Transaction>;

/// Failure of [`SpiSlave::transfer`](crate::SpiSlave::transfer).
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferError {
    /// The transaction was never queued; it is handed back.
    Refused(Rejected),
    /// The transaction was queued but did not complete in time. It is
    /// still owned by the engine and will be returned by a later
    /// [`wait_result`](crate::SpiSlave::wait_result).
    Timeout,
}

impl From<Rejected> for TransferError {
    fn from(rejected: Rejected) -> Self {
        TransferError::Refused(rejected)
    }
}

use bitflags::bitflags;
use embassy_time::{Duration, Instant};

use crate::transaction::Transaction;

/// Index of a peripheral instance in a [`SlaveHosts`](crate::SlaveHosts)
/// arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HostId(pub u8);

/// A DMA channel as numbered by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmaChannel(pub u8);

/// Clock polarity and phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// CPOL = 0, CPHA = 0.
    #[default]
    Mode0,
    /// CPOL = 0, CPHA = 1.
    Mode1,
    /// CPOL = 1, CPHA = 0.
    Mode2,
    /// CPOL = 1, CPHA = 1.
    Mode3,
}

impl Mode {
    /// Modes 0 and 2 sample on the first edge, so the master has to toggle
    /// the select line between transactions.
    pub const fn samples_on_first_edge(self) -> bool {
        matches!(self, Mode::Mode0 | Mode::Mode2)
    }
}

bitflags! {
    /// Wire bit order, per direction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SlaveFlags: u32 {
        /// Transmit LSB first instead of MSB first.
        const TXBIT_LSBFIRST = 1 << 0;
        /// Receive LSB first instead of MSB first.
        const RXBIT_LSBFIRST = 1 << 1;
        /// Both directions LSB first.
        const BIT_LSBFIRST = Self::TXBIT_LSBFIRST.bits() | Self::RXBIT_LSBFIRST.bits();
    }
}

bitflags! {
    /// Bus capabilities, as requested from and granted by the pin arbiter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BusFlags: u32 {
        /// Bus operates in slave mode.
        const SLAVE = 1 << 0;
        /// All pins are routed through the fast IO-MUX path.
        const IOMUX_PINS = 1 << 1;
        const SCLK = 1 << 2;
        const MISO = 1 << 3;
        const MOSI = 1 << 4;
        /// A DMA channel is attached to the bus.
        const DMA = 1 << 5;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for SlaveFlags {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "SlaveFlags({=u32:#x})", self.bits())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for BusFlags {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "BusFlags({=u32:#x})", self.bits())
    }
}

/// Pin numbers for the bus signals. `None` leaves a signal unconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinConfig {
    pub sclk: Option<u8>,
    pub mosi: Option<u8>,
    pub miso: Option<u8>,
}

/// Which DMA channel the session should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmaSelect {
    /// CPU copies through the peripheral register file.
    #[default]
    Disabled,
    /// Use exactly this channel.
    Channel(DmaChannel),
    /// Use the first free channel.
    Auto,
}

/// Hook invoked from interrupt context.
///
/// Only plain function pointers are accepted: the hook runs with the
/// peripheral interrupt masked and must not block or allocate.
#[derive(Clone, Copy)]
pub struct IsrHook(fn(&Transaction));

impl IsrHook {
    pub const fn new(hook: fn(&Transaction)) -> Self {
        Self(hook)
    }

    pub(crate) fn call(&self, transaction: &Transaction) {
        (self.0)(transaction)
    }
}

impl core::fmt::Debug for IsrHook {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("IsrHook")
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for IsrHook {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "IsrHook")
    }
}

/// Session configuration, fixed once the session is open.
///
/// The submit queue depth is the `DEPTH` parameter of the
/// [`SlaveHosts`](crate::SlaveHosts) arena the session is opened from.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlaveConfig {
    pub mode: Mode,
    pub flags: SlaveFlags,
    /// GPIO carrying the select line.
    pub select_line: Option<u8>,
    pub pins: PinConfig,
    /// Capabilities to ask the pin arbiter for, on top of `SLAVE`.
    pub bus_flags: BusFlags,
    pub dma: DmaSelect,
    /// Largest transfer in bytes. `None` picks the mode default.
    pub max_transfer_bytes: Option<usize>,
    /// Runs right after a transaction is armed.
    pub post_setup: Option<IsrHook>,
    /// Runs right after a transaction completed, before it is published.
    pub post_trans: Option<IsrHook>,
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Mode0,
            flags: SlaveFlags::empty(),
            select_line: None,
            pins: PinConfig::default(),
            bus_flags: BusFlags::empty(),
            dma: DmaSelect::Disabled,
            max_transfer_bytes: None,
            post_setup: None,
            post_trans: None,
        }
    }
}

impl SlaveConfig {
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_flags(mut self, flags: SlaveFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_select_line(mut self, pin: u8) -> Self {
        self.select_line = Some(pin);
        self
    }

    pub fn with_pins(mut self, pins: PinConfig) -> Self {
        self.pins = pins;
        self
    }

    pub fn with_dma(mut self, dma: DmaSelect) -> Self {
        self.dma = dma;
        self
    }

    pub fn with_max_transfer_bytes(mut self, bytes: usize) -> Self {
        self.max_transfer_bytes = Some(bytes);
        self
    }

    pub fn with_post_setup(mut self, hook: IsrHook) -> Self {
        self.post_setup = Some(hook);
        self
    }

    pub fn with_post_trans(mut self, hook: IsrHook) -> Self {
        self.post_trans = Some(hook);
        self
    }
}

/// How long a queue operation may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Wait {
    /// Never wait; fail immediately if the queue is not ready.
    Poll,
    /// Wait at most this long.
    For(Duration),
    /// Wait until the queue is ready.
    Forever,
}

impl Wait {
    pub(crate) fn deadline(self) -> Deadline {
        match self {
            Wait::Poll => Deadline::Now,
            // Too far out to represent is as good as forever.
            Wait::For(timeout) => Instant::now()
                .checked_add(timeout)
                .map_or(Deadline::Never, Deadline::At),
            Wait::Forever => Deadline::Never,
        }
    }
}

/// A [`Wait`] pinned to a point in time, so several waits can share one
/// budget.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Deadline {
    Now,
    At(Instant),
    Never,
}

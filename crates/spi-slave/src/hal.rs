//! Contracts between the engine and the platform.
//!
//! The engine never touches registers. A platform crate implements these
//! traits for its peripheral, DMA controller and interrupt controller.

use crate::config::{BusFlags, DmaChannel, HostId, Mode, PinConfig, SlaveFlags};
use crate::dma::{DescriptorStorage, DmaDescriptor};
use crate::error::Error;

/// Arbiter for the physical resources a session needs. Only used at open
/// and close.
pub trait BusResources {
    /// Number of DMA channels tried by [`DmaSelect::Auto`](crate::DmaSelect).
    const DMA_CHANNELS: u8;

    /// Claim the peripheral instance. `false` if someone else holds it.
    fn claim_peripheral(&mut self, host: HostId) -> bool;

    fn release_peripheral(&mut self, host: HostId);

    /// Claim a DMA channel. `false` if it is taken.
    fn claim_dma_channel(&mut self, channel: DmaChannel) -> bool;

    fn release_dma_channel(&mut self, channel: DmaChannel);

    /// Route the bus signals and the select line.
    ///
    /// Returns the capabilities actually achieved, which can differ from
    /// `requested`: a pin that cannot use the IO-MUX falls back to the
    /// slower GPIO matrix and the result lacks
    /// [`BusFlags::IOMUX_PINS`].
    fn configure_pins(
        &mut self,
        host: HostId,
        pins: &PinConfig,
        select_line: Option<u8>,
        requested: BusFlags,
    ) -> Result<BusFlags, Error>;

    /// Undo [`configure_pins`](Self::configure_pins).
    fn release_pins(&mut self, host: HostId);

    /// Keep the bus clock at full speed while the session is open.
    fn acquire_power_lock(&mut self) -> bool;

    fn release_power_lock(&mut self);

    /// Whether `len` bytes at `ptr` can be reached by the DMA engine.
    fn is_dma_capable(ptr: *const u8, len: usize) -> bool;
}

/// Static hardware setup applied once at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HwSetup {
    pub host: HostId,
    pub mode: Mode,
    pub flags: SlaveFlags,
    pub bus_flags: BusFlags,
    pub dma: Option<DmaChannel>,
}

/// Heads of the descriptor chains for one DMA transfer.
#[derive(Debug, Clone, Copy)]
pub struct DmaLinks<'t> {
    pub tx: Option<&'t DmaDescriptor>,
    pub rx: Option<&'t DmaDescriptor>,
}

/// A transfer being loaded into the peripheral.
///
/// The buffers behind `tx` and the chains in `dma` stay valid and
/// untouched by the engine until the transfer completes.
#[derive(Debug, Clone, Copy)]
pub struct Load<'t> {
    pub bits: usize,
    /// Data for the CPU-copy path. DMA transfers carry it in `dma.tx`.
    pub tx: Option<&'t [u8]>,
    pub dma: Option<DmaLinks<'t>>,
}

/// Register-level transfer control for one peripheral. Owned by the
/// interrupt context once the session is open.
pub trait TransferPrimitive {
    /// Apply mode, bit order and DMA routing. Leaves the peripheral idle
    /// with its completion flag set.
    fn setup(&mut self, setup: &HwSetup);

    /// Load the next transfer. Nothing moves until
    /// [`arm_and_start`](Self::arm_and_start).
    fn load(&mut self, load: Load<'_>);

    /// Clear the completion flag and wait for the master.
    fn arm_and_start(&mut self);

    fn is_completion_flag_set(&self) -> bool;

    /// CPU-copy path: copy received data out of the register file.
    fn store_result(&mut self, rx: &mut [u8]);

    /// Bits the master clocked during the last transfer.
    fn transferred_bit_count(&self) -> usize;

    /// The receive DMA was disturbed and the DMA module needs a reset.
    fn dma_reset_required(&self) -> bool;

    /// Force the select input inactive so stray bus activity is ignored.
    fn freeze_select(&mut self);

    /// Reconnect the select input to its pin.
    fn restore_select(&mut self);

    /// Return the peripheral to its reset state at close.
    fn release(&mut self);
}

/// The peripheral's interrupt enable.
///
/// Called from tasks and from the interrupt handler itself. Enabling while
/// the completion flag is set must make the interrupt fire.
pub trait InterruptLine: Sync {
    fn enable(&self);
    fn disable(&self);
}

/// Shared DMA reset coordination.
///
/// On some parts all DMA channels share one reset line, so a channel that
/// needs a reset has to wait until the other channels are idle.
pub trait DmaWorkaround: Sync {
    fn mark_transfer_active(&self, channel: DmaChannel);

    /// The channel finished. Performs a deferred reset if this was the
    /// last busy channel.
    fn mark_idle(&self, channel: DmaChannel);

    /// Reset the DMA module on behalf of `channel`.
    ///
    /// Returns `true` if the reset happened right away, in which case
    /// `on_done` is dropped. Otherwise the reset is deferred and `on_done`
    /// is woken once it has been performed.
    fn request_reset(&self, channel: DmaChannel, on_done: ResetWaker) -> bool;

    fn reset_in_progress(&self) -> bool;
}

pub(crate) trait Resume: Sync {
    fn resume(&self);
}

/// Wakes a session that stopped arming until a deferred DMA reset is done.
pub struct ResetWaker {
    target: &'static dyn Resume,
}

impl ResetWaker {
    pub(crate) fn new(target: &'static dyn Resume) -> Self {
        Self { target }
    }

    /// Signal that the reset is done. Re-enables the session's interrupt.
    pub fn wake(self) {
        self.target.resume();
    }
}

impl core::fmt::Debug for ResetWaker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("ResetWaker")
    }
}

/// For parts without the shared reset erratum: resets are never needed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWorkaround;

impl DmaWorkaround for NoWorkaround {
    fn mark_transfer_active(&self, _channel: DmaChannel) {}

    fn mark_idle(&self, _channel: DmaChannel) {}

    fn request_reset(&self, _channel: DmaChannel, _on_done: ResetWaker) -> bool {
        true
    }

    fn reset_in_progress(&self) -> bool {
        false
    }
}

/// Hardware handed to [`SlaveHosts::open`](crate::SlaveHosts::open) and
/// returned by [`SlaveHosts::close`](crate::SlaveHosts::close).
pub struct SlaveResources<P, I, W: 'static> {
    pub primitive: P,
    pub irq: I,
    pub workaround: &'static W,
    /// Descriptor storage, required when DMA is selected.
    pub descriptors: Option<DescriptorStorage>,
}

impl<P, I> SlaveResources<P, I, NoWorkaround> {
    /// Resources for a CPU-copy session.
    pub fn without_dma(primitive: P, irq: I) -> Self {
        static NO_WORKAROUND: NoWorkaround = NoWorkaround;
        Self { primitive, irq, workaround: &NO_WORKAROUND, descriptors: None }
    }
}

impl<P, I, W> SlaveResources<P, I, W> {
    pub fn new(
        primitive: P,
        irq: I,
        workaround: &'static W,
        descriptors: DescriptorStorage,
    ) -> Self {
        Self { primitive, irq, workaround, descriptors: Some(descriptors) }
    }
}

impl<P, I, W> core::fmt::Debug for SlaveResources<P, I, W> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SlaveResources")
            .field("descriptors", &self.descriptors)
            .finish_non_exhaustive()
    }
}

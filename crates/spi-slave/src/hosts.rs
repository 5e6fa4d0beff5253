use embassy_sync::blocking_mutex::raw::RawMutex;
use grounded::uninit::GroundedCell;
use portable_atomic::{AtomicBool, Ordering};

use crate::config::{BusFlags, DmaChannel, DmaSelect, HostId, SlaveConfig};
use crate::dma::{descriptors_for, DescriptorStorage, DESCRIPTOR_MAX_BYTES};
use crate::engine::{ArmGate, Shared, SlaveIsr};
use crate::error::{Error, Exhausted, InvalidArgument, Refused, StateError};
use crate::hal::{
    BusResources, DmaWorkaround, HwSetup, InterruptLine, SlaveResources,
    TransferPrimitive,
};
use crate::policy::{
    Capabilities, DmaCapable, DEFAULT_DMA_TRANSFER_BYTES, REGISTER_FILE_BYTES,
};
use crate::session::SpiSlave;
use crate::transaction::Transaction;

/// Session state of one peripheral instance.
struct HostSlot<M: RawMutex, I, const DEPTH: usize> {
    cell: GroundedCell<Shared<M, I, DEPTH>>,
    in_use: AtomicBool,
}

impl<M: RawMutex, I, const DEPTH: usize> HostSlot<M, I, DEPTH> {
    const fn new() -> Self {
        Self { cell: GroundedCell::uninit(), in_use: AtomicBool::new(false) }
    }
}

/// Storage for up to `HOSTS` slave sessions, indexed by [`HostId`].
///
/// Meant to live in a `static`; sessions borrow their queues from it for
/// as long as they are open.
///
/// ```ignore
/// static HOSTS: SlaveHosts<CriticalSectionRawMutex, Irq, 4, 2> =
///     SlaveHosts::new();
/// ```
pub struct SlaveHosts<M: RawMutex, I, const DEPTH: usize, const HOSTS: usize>
{
    slots: [HostSlot<M, I, DEPTH>; HOSTS],
}

impl<M, I, const DEPTH: usize, const HOSTS: usize> Default
    for SlaveHosts<M, I, DEPTH, HOSTS>
where
    M: RawMutex,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Hardware claims made while opening, released in reverse on failure.
struct Claims {
    host: HostId,
    peripheral: bool,
    dma: Option<DmaChannel>,
    pins: bool,
    power_lock: bool,
}

impl Claims {
    fn new(host: HostId) -> Self {
        Self {
            host,
            peripheral: false,
            dma: None,
            pins: false,
            power_lock: false,
        }
    }

    fn release<B: BusResources>(self, bus: &mut B) {
        if self.power_lock {
            bus.release_power_lock();
        }
        if self.pins {
            bus.release_pins(self.host);
        }
        if let Some(channel) = self.dma {
            bus.release_dma_channel(channel);
        }
        if self.peripheral {
            bus.release_peripheral(self.host);
        }
    }
}

impl<M: RawMutex, I, const DEPTH: usize, const HOSTS: usize>
    SlaveHosts<M, I, DEPTH, HOSTS>
{
    pub const fn new() -> Self {
        Self { slots: [const { HostSlot::new() }; HOSTS] }
    }

    /// Whether a session is open on `host`.
    pub fn is_open(&self, host: HostId) -> bool {
        self.slots
            .get(host.0 as usize)
            .is_some_and(|slot| slot.in_use.load(Ordering::Acquire))
    }
}

impl<M, I, const DEPTH: usize, const HOSTS: usize> SlaveHosts<M, I, DEPTH, HOSTS>
where
    M: RawMutex + Sync + 'static,
    I: InterruptLine + 'static,
{
    /// Open a slave session on `host`.
    ///
    /// Claims the peripheral, a DMA channel if requested, the pins and the
    /// power lock from `bus`, then sets up the primitive. The returned
    /// [`SpiSlave`] is for tasks; the [`SlaveIsr`] belongs in the
    /// peripheral's interrupt handler.
    ///
    /// On failure every claim made so far is released and `resources` is
    /// handed back.
    #[allow(clippy::type_complexity)]
    pub fn open<B, P, W>(
        &'static self,
        host: HostId,
        bus: &mut B,
        resources: SlaveResources<P, I, W>,
        config: SlaveConfig,
    ) -> Result<
        (SpiSlave<M, I, DEPTH>, SlaveIsr<M, P, I, W, DEPTH>),
        Refused<SlaveResources<P, I, W>>,
    >
    where
        B: BusResources,
        P: TransferPrimitive,
        W: DmaWorkaround + 'static,
    {
        let Some(slot) = self.slots.get(host.0 as usize) else {
            return Err(Refused::new(
                InvalidArgument::InvalidHost(host.0),
                resources,
            ));
        };

        let max_bytes =
            match check_config::<DEPTH>(&config, resources.descriptors.as_ref())
            {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("slave {}: bad configuration: {}", host.0, e);
                    return Err(Refused::new(e, resources));
                }
            };

        if slot
            .in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Refused::new(StateError::HostInUse, resources));
        }

        let mut claims = Claims::new(host);
        let bus_flags = match claim(bus, &config, &mut claims) {
            Ok(flags) => flags,
            Err(e) => {
                warn!("slave {}: open failed: {}", host.0, e);
                claims.release(bus);
                slot.in_use.store(false, Ordering::Release);
                return Err(Refused::new(e, resources));
            }
        };
        let dma = claims.dma;

        if dma.is_some() && config.mode.samples_on_first_edge() {
            warn!(
                "slave {}: DMA in mode 0/2 needs the select line toggled \
                 between transactions",
                host.0
            );
        }

        let SlaveResources { mut primitive, irq, workaround, descriptors } =
            resources;

        let caps = match dma {
            Some(_) => {
                let dma_capable: DmaCapable = B::is_dma_capable;
                Capabilities::dma(max_bytes, dma_capable)
            }
            None => Capabilities::register_file(max_bytes),
        };

        irq.disable();
        primitive.setup(&HwSetup {
            host,
            mode: config.mode,
            flags: config.flags,
            bus_flags,
            dma,
        });
        if dma.is_some() {
            primitive.freeze_select();
        }

        // SAFETY: `in_use` was false and we just set it, so no session
        // references the cell and nobody else will write it until close.
        let shared: &'static Shared<M, I, DEPTH> = unsafe {
            slot.cell.get().write(Shared::new(irq, caps));
            &*slot.cell.get()
        };

        info!(
            "slave {}: open, {} byte transfers, dma: {}",
            host.0,
            max_bytes,
            dma.is_some()
        );

        let slave = SpiSlave { host, shared, dma, bus_flags };
        let isr = SlaveIsr::new(
            host,
            shared,
            primitive,
            workaround,
            dma,
            descriptors,
            config.post_setup,
            config.post_trans,
        );
        Ok((slave, isr))
    }

    /// Close a session and give back its hardware.
    ///
    /// Refused while transactions are queued or not yet retrieved, and
    /// while a deferred DMA reset is outstanding. Both halves are handed
    /// back in that case.
    ///
    /// A transaction still armed is disarmed with the primitive and
    /// returned alongside the resources. Its transferred-bit count stays
    /// unset.
    #[allow(clippy::type_complexity)]
    pub fn close<B, P, W>(
        &'static self,
        slave: SpiSlave<M, I, DEPTH>,
        isr: SlaveIsr<M, P, I, W, DEPTH>,
        bus: &mut B,
    ) -> Result<
        (SlaveResources<P, I, W>, Option<Transaction>),
        Refused<(SpiSlave<M, I, DEPTH>, SlaveIsr<M, P, I, W, DEPTH>)>,
    >
    where
        B: BusResources,
        P: TransferPrimitive,
        W: DmaWorkaround + 'static,
    {
        let host = slave.host;
        let slot = match self.slots.get(host.0 as usize) {
            Some(slot)
                if isr.host == host
                    && core::ptr::eq(slave.shared, isr.shared)
                    && core::ptr::eq(slave.shared, slot.cell.get()) =>
            {
                slot
            }
            _ => {
                return Err(Refused::new(
                    InvalidArgument::InvalidHost(host.0),
                    (slave, isr),
                ))
            }
        };

        if isr.gate() == ArmGate::AwaitingExternalReset {
            return Err(Refused::new(StateError::ResetPending, (slave, isr)));
        }
        if !slave.shared.is_drained() {
            return Err(Refused::new(
                StateError::PendingTransactions,
                (slave, isr),
            ));
        }

        slave.shared.irq.disable();
        let dma = isr.dma;
        let workaround = isr.workaround;
        let (mut primitive, descriptors, armed) = isr.into_parts();
        // Disarms the hardware, so the buffers of `armed` are ours again.
        primitive.release();
        if let Some(channel) = dma.filter(|_| armed.is_some()) {
            workaround.mark_idle(channel);
        }
        if armed.is_some() {
            warn!("slave {}: closed with a transaction armed", host.0);
        }

        bus.release_power_lock();
        bus.release_pins(host);
        if let Some(channel) = dma {
            bus.release_dma_channel(channel);
        }
        bus.release_peripheral(host);

        drop(slave);
        // SAFETY: both halves were consumed above and no reset waker is
        // outstanding, so nothing references the cell any more. It was
        // written at open.
        let shared = unsafe { slot.cell.get().read() };
        slot.in_use.store(false, Ordering::Release);
        info!("slave {}: closed", host.0);

        let resources = SlaveResources {
            primitive,
            irq: shared.into_irq(),
            workaround,
            descriptors,
        };
        Ok((resources, armed))
    }
}

/// Checks that need no hardware. Returns the usable transfer size in bytes.
fn check_config<const DEPTH: usize>(
    config: &SlaveConfig,
    descriptors: Option<&DescriptorStorage>,
) -> Result<usize, Error> {
    if DEPTH == 0 {
        return Err(InvalidArgument::ZeroQueueDepth.into());
    }

    if config.dma == DmaSelect::Disabled {
        let bytes = config.max_transfer_bytes.unwrap_or(REGISTER_FILE_BYTES);
        if bytes == 0 || bytes > REGISTER_FILE_BYTES {
            return Err(InvalidArgument::MaxTransferSize(bytes).into());
        }
        return Ok(bytes);
    }

    if config.select_line.is_none() {
        return Err(InvalidArgument::MissingSelectLine.into());
    }
    let bytes = config.max_transfer_bytes.unwrap_or(DEFAULT_DMA_TRANSFER_BYTES);
    if bytes == 0 {
        return Err(InvalidArgument::MaxTransferSize(bytes).into());
    }
    let storage = descriptors.ok_or(Exhausted::Descriptors {
        needed: descriptors_for(bytes),
        available: 0,
    })?;
    storage.reserve(bytes)?;
    // Whole descriptors are reserved, so the last one's slack is usable.
    Ok(descriptors_for(bytes) * DESCRIPTOR_MAX_BYTES)
}

/// Claim hardware in order, recording each success in `claims`. Returns the
/// bus capabilities granted by the pin arbiter.
fn claim<B: BusResources>(
    bus: &mut B,
    config: &SlaveConfig,
    claims: &mut Claims,
) -> Result<BusFlags, Error> {
    let host = claims.host;
    if !bus.claim_peripheral(host) {
        return Err(StateError::HostInUse.into());
    }
    claims.peripheral = true;

    claims.dma = match config.dma {
        DmaSelect::Disabled => None,
        DmaSelect::Channel(channel) => {
            if !bus.claim_dma_channel(channel) {
                return Err(StateError::DmaChannelInUse.into());
            }
            Some(channel)
        }
        DmaSelect::Auto => {
            let channel = (0..B::DMA_CHANNELS)
                .map(DmaChannel)
                .find(|&channel| bus.claim_dma_channel(channel))
                .ok_or(StateError::DmaChannelInUse)?;
            debug!("slave {}: using DMA channel {}", host.0, channel.0);
            Some(channel)
        }
    };

    let mut requested = config.bus_flags | BusFlags::SLAVE;
    if claims.dma.is_some() {
        requested |= BusFlags::DMA;
    }
    let granted =
        bus.configure_pins(host, &config.pins, config.select_line, requested)?;
    claims.pins = true;
    if requested.contains(BusFlags::IOMUX_PINS)
        && !granted.contains(BusFlags::IOMUX_PINS)
    {
        warn!("slave {}: pins routed through the GPIO matrix", host.0);
    }

    if !bus.acquire_power_lock() {
        return Err(Exhausted::PowerLock.into());
    }
    claims.power_lock = true;

    Ok(granted)
}

//! Interrupt-driven completion engine.
//!
//! Tasks and the interrupt handler only meet at the two bounded channels in
//! [`Shared`] and a few atomic flags. Everything that describes what the
//! hardware is doing right now (the armed transaction, the descriptor
//! chains, the select-line routing, DMA tracking) is owned by [`SlaveIsr`],
//! which only the interrupt handler holds.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use portable_atomic::{AtomicBool, Ordering};

use crate::config::{DmaChannel, HostId, IsrHook};
use crate::dma::{self, DescriptorStorage, DmaDescriptor};
use crate::hal::{
    DmaLinks, DmaWorkaround, InterruptLine, Load, ResetWaker, Resume,
    TransferPrimitive,
};
use crate::policy::Capabilities;
use crate::transaction::{bytes_for, Transaction};

/// State both execution contexts can reach.
pub(crate) struct Shared<M: RawMutex, I, const DEPTH: usize> {
    pub(crate) submit: Channel<M, Transaction, DEPTH>,
    pub(crate) done: Channel<M, Transaction, DEPTH>,
    pub(crate) irq: I,
    pub(crate) caps: Capabilities,
    enabled: AtomicBool,
    reset_done: AtomicBool,
}

impl<M: RawMutex, I: InterruptLine, const DEPTH: usize> Shared<M, I, DEPTH> {
    pub(crate) fn new(irq: I, caps: Capabilities) -> Self {
        Self {
            submit: Channel::new(),
            done: Channel::new(),
            irq,
            caps,
            enabled: AtomicBool::new(true),
            reset_done: AtomicBool::new(false),
        }
    }

    /// Let the interrupt look for work, unless the session is disabled.
    pub(crate) fn kick(&self) {
        if self.is_enabled() {
            self.irq.enable();
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Nothing queued or waiting to be retrieved.
    pub(crate) fn is_drained(&self) -> bool {
        self.submit.is_empty() && self.done.is_empty()
    }

    pub(crate) fn into_irq(self) -> I {
        self.irq
    }
}

impl<M, I, const DEPTH: usize> Resume for Shared<M, I, DEPTH>
where
    M: RawMutex + Sync,
    I: InterruptLine,
{
    fn resume(&self) {
        self.reset_done.store(true, Ordering::Release);
        self.irq.enable();
    }
}

/// Whether the interrupt handler may arm the next transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ArmGate {
    ReadyToArm,
    /// A deferred DMA reset must finish first. Left through the
    /// [`ResetWaker`] handed to the workaround.
    AwaitingExternalReset,
}

/// Interrupt-context half of a session.
///
/// Only [`SlaveHosts::open`](crate::SlaveHosts::open) creates one. Call
/// [`on_interrupt`](Self::on_interrupt) from the peripheral's interrupt
/// handler and nowhere else.
pub struct SlaveIsr<M, P, I, W, const DEPTH: usize>
where
    M: RawMutex + 'static,
    I: 'static,
    W: 'static,
{
    pub(crate) host: HostId,
    pub(crate) shared: &'static Shared<M, I, DEPTH>,
    pub(crate) primitive: P,
    pub(crate) workaround: &'static W,
    pub(crate) dma: Option<DmaChannel>,
    pub(crate) descriptors: Option<DescriptorStorage>,
    pub(crate) post_setup: Option<IsrHook>,
    pub(crate) post_trans: Option<IsrHook>,
    armed: Option<Transaction>,
    gate: ArmGate,
}

impl<M, P, I, W, const DEPTH: usize> SlaveIsr<M, P, I, W, DEPTH>
where
    M: RawMutex + Sync + 'static,
    P: TransferPrimitive,
    I: InterruptLine + 'static,
    W: DmaWorkaround + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        host: HostId,
        shared: &'static Shared<M, I, DEPTH>,
        primitive: P,
        workaround: &'static W,
        dma: Option<DmaChannel>,
        descriptors: Option<DescriptorStorage>,
        post_setup: Option<IsrHook>,
        post_trans: Option<IsrHook>,
    ) -> Self {
        Self {
            host,
            shared,
            primitive,
            workaround,
            dma,
            descriptors,
            post_setup,
            post_trans,
            armed: None,
            gate: ArmGate::ReadyToArm,
        }
    }

    pub fn host(&self) -> HostId {
        self.host
    }

    pub fn gate(&self) -> ArmGate {
        self.gate
    }

    /// The transaction currently loaded into the hardware.
    pub fn armed(&self) -> Option<&Transaction> {
        self.armed.as_ref()
    }

    /// Handle a peripheral interrupt.
    ///
    /// Finalizes the armed transaction, publishes it, and arms the next
    /// queued one. Never blocks.
    pub fn on_interrupt(&mut self) {
        debug_assert!(
            self.primitive.is_completion_flag_set(),
            "slave interrupt without completion"
        );

        self.check_reset();

        if let Some(transaction) = self.armed.take() {
            self.finish(transaction);
        }

        if let Some(channel) = self.dma {
            self.workaround.mark_idle(channel);
            // Going idle may have performed our own deferred reset.
            self.check_reset();
            if self.gate == ArmGate::AwaitingExternalReset {
                // The reset waker enables the interrupt again.
                self.shared.irq.disable();
                if self.shared.reset_done.load(Ordering::Acquire) {
                    // Woken between the check and the disable.
                    self.shared.irq.enable();
                }
                return;
            }
        }

        self.shared.irq.disable();
        if !self.shared.is_enabled() {
            return;
        }
        // Every armed transaction needs a slot in the completion queue.
        if self.shared.done.is_full() {
            trace!("slave {}: completion queue full", self.host.0);
            return;
        }
        let Ok(next) = self.shared.submit.try_receive() else {
            return;
        };
        self.shared.irq.enable();
        self.arm(next);
    }

    fn check_reset(&mut self) {
        if self.gate == ArmGate::AwaitingExternalReset
            && (self.shared.reset_done.swap(false, Ordering::AcqRel)
                || !self.workaround.reset_in_progress())
        {
            debug!("slave {}: DMA reset done, resuming", self.host.0);
            self.gate = ArmGate::ReadyToArm;
        }
    }

    fn finish(&mut self, mut transaction: Transaction) {
        if self.dma.is_some() {
            self.primitive.freeze_select();
        } else if let Some(rx) = transaction.rx.as_deref_mut() {
            self.primitive.store_result(rx);
        }
        transaction.complete(self.primitive.transferred_bit_count());

        if let Some(channel) = self.dma {
            if self.primitive.dma_reset_required() {
                self.shared.reset_done.store(false, Ordering::Release);
                let waker = ResetWaker::new(self.shared);
                if !self.workaround.request_reset(channel, waker) {
                    debug!(
                        "slave {}: DMA reset deferred, holding off",
                        self.host.0
                    );
                    self.gate = ArmGate::AwaitingExternalReset;
                }
            }
        }

        if let Some(hook) = &self.post_trans {
            hook.call(&transaction);
        }

        if self.shared.done.try_send(transaction).is_err() {
            // Unreachable: room is checked before arming.
            error!("slave {}: completion queue overflow", self.host.0);
        }
    }

    fn arm(&mut self, mut transaction: Transaction) {
        let bits = transaction.bits;
        let bytes = bytes_for(bits);
        let tx = transaction.tx;
        let rx = transaction.rx.as_deref_mut().map(|rx| rx.as_mut_ptr());

        let dma = match (self.dma, self.descriptors.as_mut()) {
            (Some(_), Some(storage)) => {
                let tx_head = match tx {
                    Some(tx) => {
                        let buffer = tx.as_ptr() as *mut u8;
                        chain(&mut *storage.tx, buffer, bytes, false)
                    }
                    None => None,
                };
                let rx_head = match rx {
                    Some(rx) => chain(&mut *storage.rx, rx, bytes, true),
                    None => None,
                };
                Some(DmaLinks { tx: tx_head, rx: rx_head })
            }
            _ => None,
        };
        let cpu_tx = if dma.is_some() { None } else { tx };
        self.primitive.load(Load { bits, tx: cpu_tx, dma });

        self.armed = Some(transaction);

        if let Some(channel) = self.dma {
            self.workaround.mark_transfer_active(channel);
            self.primitive.restore_select();
        }
        self.primitive.arm_and_start();
        trace!("slave {}: armed {} bits", self.host.0, bits);

        if let (Some(hook), Some(armed)) = (&self.post_setup, &self.armed) {
            hook.call(armed);
        }
    }

    pub(crate) fn into_parts(
        self,
    ) -> (P, Option<DescriptorStorage>, Option<Transaction>) {
        (self.primitive, self.descriptors, self.armed)
    }
}

/// Link `len` bytes at `buffer` into `storage`, returning the chain head.
fn chain(
    storage: &mut [DmaDescriptor],
    buffer: *mut u8,
    len: usize,
    rx: bool,
) -> Option<&DmaDescriptor> {
    match dma::link(storage, buffer, len, rx) {
        Ok(0) => None,
        Ok(_) => storage.first(),
        Err(e) => {
            // Unreachable: transfer size is bounded by the storage at open.
            error!("descriptor chain too short: {}", e);
            None
        }
    }
}

impl<M, P, I, W, const DEPTH: usize> core::fmt::Debug
    for SlaveIsr<M, P, I, W, DEPTH>
where
    M: RawMutex + 'static,
    I: 'static,
    W: 'static,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SlaveIsr")
            .field("host", &self.host)
            .field("dma", &self.dma)
            .field("gate", &self.gate)
            .field("armed", &self.armed.is_some())
            .finish_non_exhaustive()
    }
}

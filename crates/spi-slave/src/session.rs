use core::future::poll_fn;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::TrySendError;
use embassy_time::{with_deadline, TimeoutError};

use crate::config::{BusFlags, Deadline, DmaChannel, HostId, Wait};
use crate::engine::Shared;
use crate::error::{Error, Rejected, TransferError};
use crate::hal::InterruptLine;
use crate::policy::{self, Capabilities};
use crate::transaction::Transaction;

/// Task-side handle of an open slave session.
///
/// Share it by reference between tasks; all methods take `&self`. Submitted
/// transactions belong to the engine until [`wait_result`](Self::wait_result)
/// hands them back.
pub struct SpiSlave<M, I, const DEPTH: usize>
where
    M: RawMutex + 'static,
    I: 'static,
{
    pub(crate) host: HostId,
    pub(crate) shared: &'static Shared<M, I, DEPTH>,
    pub(crate) dma: Option<DmaChannel>,
    pub(crate) bus_flags: BusFlags,
}

impl<M, I, const DEPTH: usize> SpiSlave<M, I, DEPTH>
where
    M: RawMutex + 'static,
    I: InterruptLine + 'static,
{
    pub fn host(&self) -> HostId {
        self.host
    }

    pub fn capabilities(&self) -> Capabilities {
        self.shared.caps
    }

    /// Capabilities the pin arbiter actually granted.
    pub fn bus_flags(&self) -> BusFlags {
        self.bus_flags
    }

    pub fn dma_channel(&self) -> Option<DmaChannel> {
        self.dma
    }

    /// Transactions submitted but not armed yet.
    pub fn pending(&self) -> usize {
        self.shared.submit.len()
    }

    /// Completed transactions waiting to be retrieved.
    pub fn completed(&self) -> usize {
        self.shared.done.len()
    }

    /// Queue a transaction without waiting. Safe to call from interrupt
    /// context.
    pub fn try_enqueue(&self, transaction: Transaction) -> Result<(), Rejected> {
        if let Err(reason) = policy::validate(&transaction, &self.shared.caps) {
            warn!("slave {}: refusing transaction: {}", self.host.0, reason);
            return Err(Rejected::new(reason, transaction));
        }
        match self.shared.submit.try_send(transaction) {
            Ok(()) => {
                self.shared.kick();
                Ok(())
            }
            Err(TrySendError::Full(transaction)) => {
                Err(Rejected::new(Error::Timeout, transaction))
            }
        }
    }

    /// Queue a transaction for the master to clock.
    ///
    /// Buffers are checked before anything is queued. If the submit queue is
    /// full this waits as `wait` allows; on failure the transaction is handed
    /// back untouched.
    pub async fn enqueue(
        &self,
        transaction: Transaction,
        wait: Wait,
    ) -> Result<(), Rejected> {
        self.enqueue_until(transaction, wait.deadline()).await
    }

    /// Take the next completed transaction, in completion order.
    pub async fn wait_result(&self, wait: Wait) -> Result<Transaction, Error> {
        self.receive_until(wait.deadline()).await
    }

    /// Queue a transaction and wait for its completion, sharing one time
    /// budget between the two.
    ///
    /// Assumes the next completion is this transaction: do not mix with
    /// outstanding [`enqueue`](Self::enqueue) calls.
    pub async fn transfer(
        &self,
        transaction: Transaction,
        wait: Wait,
    ) -> Result<Transaction, TransferError> {
        let deadline = wait.deadline();
        self.enqueue_until(transaction, deadline).await?;
        self.receive_until(deadline)
            .await
            .map_err(|_| TransferError::Timeout)
    }

    /// Stop arming queued transactions. An armed transaction still
    /// completes; queued ones stay queued.
    pub fn disable(&self) {
        info!("slave {}: disabled", self.host.0);
        self.shared.set_enabled(false);
    }

    /// Resume arming after [`disable`](Self::disable).
    pub fn enable(&self) {
        info!("slave {}: enabled", self.host.0);
        self.shared.set_enabled(true);
        self.shared.kick();
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.is_enabled()
    }

    async fn enqueue_until(
        &self,
        transaction: Transaction,
        deadline: Deadline,
    ) -> Result<(), Rejected> {
        let mut transaction = match self.try_enqueue(transaction) {
            Ok(()) => return Ok(()),
            Err(rejected) if rejected.error == Error::Timeout => {
                rejected.into_inner()
            }
            Err(rejected) => return Err(rejected),
        };

        loop {
            let ready = poll_fn(|cx| self.shared.submit.poll_ready_to_send(cx));
            let waited = match deadline {
                Deadline::Now => Err(TimeoutError),
                Deadline::At(at) => with_deadline(at, ready).await,
                Deadline::Never => {
                    ready.await;
                    Ok(())
                }
            };
            if waited.is_err() {
                debug!("slave {}: submit queue full", self.host.0);
                return Err(Rejected::new(Error::Timeout, transaction));
            }

            // Another task may have taken the slot first.
            match self.shared.submit.try_send(transaction) {
                Ok(()) => {
                    self.shared.kick();
                    return Ok(());
                }
                Err(TrySendError::Full(back)) => transaction = back,
            }
        }
    }

    async fn receive_until(
        &self,
        deadline: Deadline,
    ) -> Result<Transaction, Error> {
        let transaction = match deadline {
            Deadline::Now => {
                self.shared.done.try_receive().map_err(|_| Error::Timeout)?
            }
            Deadline::At(at) => with_deadline(at, self.shared.done.receive())
                .await
                .map_err(|_| Error::Timeout)?,
            Deadline::Never => self.shared.done.receive().await,
        };

        // Arming may have stalled on a full completion queue.
        if !self.shared.submit.is_empty() {
            self.shared.kick();
        }
        Ok(transaction)
    }
}

impl<M, I, const DEPTH: usize> core::fmt::Debug for SpiSlave<M, I, DEPTH>
where
    M: RawMutex + 'static,
    I: 'static,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SpiSlave")
            .field("host", &self.host)
            .field("dma", &self.dma)
            .field("bus_flags", &self.bus_flags)
            .finish()
    }
}

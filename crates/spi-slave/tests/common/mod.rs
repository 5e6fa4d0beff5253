#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use spi_slave::dma::{DescriptorStorage, DmaDescriptor};
use spi_slave::hal::{HwSetup, Load};
use spi_slave::{
    BusFlags, BusResources, DmaChannel, DmaWorkaround, Error, HostId,
    InterruptLine, InvalidArgument, NoWorkaround, PinConfig, SlaveHosts,
    SlaveIsr, SlaveResources, TransferPrimitive,
};

pub type Mutex = CriticalSectionRawMutex;
pub type Hosts<const DEPTH: usize> = SlaveHosts<Mutex, MockIrq, DEPTH, 2>;
pub type Isr<W, const DEPTH: usize> =
    SlaveIsr<Mutex, MockPrimitive, MockIrq, W, DEPTH>;

/// Memory the mock DMA engine cannot reach.
pub static NOT_DMA_CAPABLE: [u8; 64] = [0; 64];

pub fn arena<const DEPTH: usize>() -> &'static Hosts<DEPTH> {
    Box::leak(Box::new(SlaveHosts::new()))
}

pub fn leak_tx(bytes: &[u8]) -> &'static [u8] {
    Box::leak(bytes.to_vec().into_boxed_slice())
}

/// Word-aligned receive buffer.
pub fn leak_rx(len: usize) -> &'static mut [u8] {
    let words: &'static mut [u32] =
        Box::leak(vec![0u32; len.div_ceil(4)].into_boxed_slice());
    // SAFETY: the allocation spans at least `len` bytes and is leaked.
    unsafe { std::slice::from_raw_parts_mut(words.as_mut_ptr().cast(), len) }
}

pub fn descriptors(count: usize) -> DescriptorStorage {
    let chain = || -> &'static mut [DmaDescriptor] {
        Box::leak((0..count).map(|_| DmaDescriptor::EMPTY).collect())
    };
    DescriptorStorage::new(chain(), chain())
}

// ---------------------------------------------------------------------------
// Interrupt line
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct IrqState {
    enabled: AtomicBool,
    enables: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct MockIrq(Arc<IrqState>);

impl MockIrq {
    pub fn is_enabled(&self) -> bool {
        self.0.enabled.load(Ordering::SeqCst)
    }

    pub fn enable_count(&self) -> usize {
        self.0.enables.load(Ordering::SeqCst)
    }
}

impl InterruptLine for MockIrq {
    fn enable(&self) {
        self.0.enables.fetch_add(1, Ordering::SeqCst);
        self.0.enabled.store(true, Ordering::SeqCst);
    }

    fn disable(&self) {
        self.0.enabled.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Transfer primitive
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub addr: usize,
    pub size: usize,
    pub length: usize,
    pub eof: bool,
}

#[derive(Debug, Clone)]
pub struct Loaded {
    pub bits: usize,
    /// Bytes the master will see on MISO.
    pub tx: Option<Vec<u8>>,
    pub dma: bool,
    pub tx_chain: Vec<Link>,
    pub rx_chain: Vec<Link>,
}

/// Peripheral state as seen by the test.
#[derive(Debug, Default)]
pub struct Wire {
    pub setup: Option<HwSetup>,
    pub completion: bool,
    pub armed: bool,
    pub loads: Vec<Loaded>,
    pub stores: usize,
    pub select_frozen: bool,
    pub reset_required: bool,
    pub released: bool,
    /// Bytes clocked out per completed transfer.
    pub miso: Vec<Option<Vec<u8>>>,
    clocked_bits: usize,
    mosi: Vec<u8>,
}

pub struct MockPrimitive(Rc<RefCell<Wire>>);

fn walk(head: Option<&DmaDescriptor>) -> Vec<Link> {
    let mut links = Vec::new();
    let mut next = head.map(|desc| desc as *const DmaDescriptor);
    while let Some(ptr) = next {
        // SAFETY: the chain lives in leaked descriptor storage.
        let desc = unsafe { &*ptr };
        links.push(Link {
            addr: desc.buffer() as usize,
            size: desc.size(),
            length: desc.length(),
            eof: desc.is_eof(),
        });
        next = (!desc.next().is_null()).then(|| desc.next());
    }
    links
}

fn gather(chain: &[Link]) -> Vec<u8> {
    chain
        .iter()
        .flat_map(|link| {
            // SAFETY: links point into buffers owned by the armed
            // transaction.
            unsafe {
                std::slice::from_raw_parts(link.addr as *const u8, link.length)
            }
            .iter()
            .copied()
        })
        .collect()
}

impl TransferPrimitive for MockPrimitive {
    fn setup(&mut self, setup: &HwSetup) {
        let mut wire = self.0.borrow_mut();
        wire.setup = Some(*setup);
        wire.completion = true;
    }

    fn load(&mut self, load: Load<'_>) {
        let (dma, tx_chain, rx_chain) = match load.dma {
            Some(links) => (true, walk(links.tx), walk(links.rx)),
            None => (false, Vec::new(), Vec::new()),
        };
        let tx = match load.tx {
            Some(tx) => Some(tx.to_vec()),
            None if !tx_chain.is_empty() => Some(gather(&tx_chain)),
            None => None,
        };
        self.0.borrow_mut().loads.push(Loaded {
            bits: load.bits,
            tx,
            dma,
            tx_chain,
            rx_chain,
        });
    }

    fn arm_and_start(&mut self) {
        let mut wire = self.0.borrow_mut();
        wire.completion = false;
        wire.armed = true;
    }

    fn is_completion_flag_set(&self) -> bool {
        self.0.borrow().completion
    }

    fn store_result(&mut self, rx: &mut [u8]) {
        let mut wire = self.0.borrow_mut();
        let n = wire.mosi.len().min(rx.len());
        rx[..n].copy_from_slice(&wire.mosi[..n]);
        wire.stores += 1;
    }

    fn transferred_bit_count(&self) -> usize {
        self.0.borrow().clocked_bits
    }

    fn dma_reset_required(&self) -> bool {
        self.0.borrow().reset_required
    }

    fn freeze_select(&mut self) {
        self.0.borrow_mut().select_frozen = true;
    }

    fn restore_select(&mut self) {
        self.0.borrow_mut().select_frozen = false;
    }

    fn release(&mut self) {
        self.0.borrow_mut().released = true;
    }
}

// ---------------------------------------------------------------------------
// Bus arbiter
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MockBus {
    pub peripherals: Vec<HostId>,
    pub dma: Vec<DmaChannel>,
    pub pins: Vec<HostId>,
    pub power_locks: usize,
    pub requested: Option<BusFlags>,
    pub fail_pins: bool,
    pub fail_power_lock: bool,
    pub no_iomux: bool,
    pub log: Vec<&'static str>,
}

impl MockBus {
    pub fn is_released(&self) -> bool {
        self.peripherals.is_empty()
            && self.dma.is_empty()
            && self.pins.is_empty()
            && self.power_locks == 0
    }
}

impl BusResources for MockBus {
    const DMA_CHANNELS: u8 = 2;

    fn claim_peripheral(&mut self, host: HostId) -> bool {
        if self.peripherals.contains(&host) {
            return false;
        }
        self.log.push("claim peripheral");
        self.peripherals.push(host);
        true
    }

    fn release_peripheral(&mut self, host: HostId) {
        self.log.push("release peripheral");
        self.peripherals.retain(|h| *h != host);
    }

    fn claim_dma_channel(&mut self, channel: DmaChannel) -> bool {
        if self.dma.contains(&channel) {
            return false;
        }
        self.log.push("claim dma");
        self.dma.push(channel);
        true
    }

    fn release_dma_channel(&mut self, channel: DmaChannel) {
        self.log.push("release dma");
        self.dma.retain(|c| *c != channel);
    }

    fn configure_pins(
        &mut self,
        host: HostId,
        _pins: &PinConfig,
        _select_line: Option<u8>,
        requested: BusFlags,
    ) -> Result<BusFlags, Error> {
        self.requested = Some(requested);
        if self.fail_pins {
            return Err(InvalidArgument::PinRouting.into());
        }
        self.log.push("configure pins");
        self.pins.push(host);
        let mut granted = requested;
        if self.no_iomux {
            granted.remove(BusFlags::IOMUX_PINS);
        }
        Ok(granted)
    }

    fn release_pins(&mut self, host: HostId) {
        self.log.push("release pins");
        self.pins.retain(|h| *h != host);
    }

    fn acquire_power_lock(&mut self) -> bool {
        if self.fail_power_lock {
            return false;
        }
        self.log.push("acquire power lock");
        self.power_locks += 1;
        true
    }

    fn release_power_lock(&mut self) {
        self.log.push("release power lock");
        self.power_locks -= 1;
    }

    fn is_dma_capable(ptr: *const u8, len: usize) -> bool {
        let start = NOT_DMA_CAPABLE.as_ptr() as usize;
        let end = start + NOT_DMA_CAPABLE.len();
        let addr = ptr as usize;
        addr + len <= start || addr >= end
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Test-side view of the hardware handed to a session.
#[derive(Clone)]
pub struct Harness {
    pub wire: Rc<RefCell<Wire>>,
    pub irq: MockIrq,
}

impl Harness {
    pub fn new() -> Self {
        Self { wire: Rc::default(), irq: MockIrq::default() }
    }

    pub fn cpu(&self) -> SlaveResources<MockPrimitive, MockIrq, NoWorkaround> {
        SlaveResources::without_dma(
            MockPrimitive(self.wire.clone()),
            self.irq.clone(),
        )
    }

    pub fn dma<W>(
        &self,
        workaround: &'static W,
        descriptor_count: usize,
    ) -> SlaveResources<MockPrimitive, MockIrq, W> {
        SlaveResources::new(
            MockPrimitive(self.wire.clone()),
            self.irq.clone(),
            workaround,
            descriptors(descriptor_count),
        )
    }

    /// Service the interrupt for as long as it is enabled and pending.
    pub fn pump<W, const DEPTH: usize>(&self, isr: &mut Isr<W, DEPTH>)
    where
        W: DmaWorkaround + 'static,
    {
        for _ in 0..64 {
            if !(self.irq.is_enabled() && self.wire.borrow().completion) {
                return;
            }
            isr.on_interrupt();
        }
        panic!("interrupt storm");
    }

    /// The master clocks the armed transfer: `bits` bits, with `mosi` on
    /// the data input.
    pub fn clock(&self, mosi: &[u8], bits: usize) {
        let mut wire = self.wire.borrow_mut();
        assert!(wire.armed, "master clocked an idle slave");
        wire.armed = false;
        wire.completion = true;
        wire.clocked_bits = bits;
        wire.mosi = mosi.to_vec();

        let loaded = wire.loads.last().cloned().expect("nothing loaded");
        let mut offset = 0;
        for link in &loaded.rx_chain {
            let n = link.length.min(mosi.len().saturating_sub(offset));
            // SAFETY: the chain describes the armed transaction's receive
            // buffer, which the engine holds until completion.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    mosi[offset..].as_ptr(),
                    link.addr as *mut u8,
                    n,
                );
            }
            offset += n;
        }
        wire.miso.push(loaded.tx);
    }

    pub fn loads(&self) -> usize {
        self.wire.borrow().loads.len()
    }

    pub fn is_armed(&self) -> bool {
        self.wire.borrow().armed
    }
}

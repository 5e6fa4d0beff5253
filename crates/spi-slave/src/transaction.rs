/// One slave transaction: what to shift out, where to put what comes in.
///
/// Buffers are `'static` because the hardware may touch them at any moment
/// between arming and completion, long after the submitting task moved on.
/// Submitting moves the transaction (and the exclusive receive buffer) into
/// the engine, which hands it back from
/// [`wait_result`](crate::SpiSlave::wait_result) once the master has clocked
/// it.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Transaction {
    /// Total number of bits the master is expected to clock.
    pub bits: usize,
    /// Data shifted out on MISO. `None` sends whatever the peripheral idles at.
    pub tx: Option<&'static [u8]>,
    /// Destination of the data shifted in on MOSI.
    pub rx: Option<&'static mut [u8]>,
    /// Opaque tag, untouched by the engine.
    pub user: u32,
    trans_bits: Option<usize>,
}

impl Transaction {
    pub const fn new(bits: usize) -> Self {
        Self { bits, tx: None, rx: None, user: 0, trans_bits: None }
    }

    /// Full-duplex transaction sized to the longer of the two buffers.
    pub fn full_duplex(tx: &'static [u8], rx: &'static mut [u8]) -> Self {
        let bits = tx.len().max(rx.len()) * 8;
        Self::new(bits).with_tx(tx).with_rx(rx)
    }

    pub fn with_tx(mut self, tx: &'static [u8]) -> Self {
        self.tx = Some(tx);
        self
    }

    pub fn with_rx(mut self, rx: &'static mut [u8]) -> Self {
        self.rx = Some(rx);
        self
    }

    pub fn with_user(mut self, user: u32) -> Self {
        self.user = user;
        self
    }

    /// Bits the master actually clocked, available once completed.
    ///
    /// May be shorter than [`bits`](Self::bits) when the master deasserts
    /// the select line early, or longer when it keeps clocking.
    pub fn transferred_bits(&self) -> Option<usize> {
        self.trans_bits
    }

    /// Received bytes covered by the transferred bit count.
    pub fn received(&self) -> Option<&[u8]> {
        let bits = self.trans_bits?.min(self.bits);
        let rx = self.rx.as_deref()?;
        Some(&rx[..bytes_for(bits).min(rx.len())])
    }

    /// Returns the buffers, consuming the transaction.
    pub fn into_buffers(
        self,
    ) -> (Option<&'static [u8]>, Option<&'static mut [u8]>) {
        (self.tx, self.rx)
    }

    pub(crate) fn complete(&mut self, bits: usize) {
        self.trans_bits = Some(bits);
    }
}

/// Bytes needed to hold `bits`.
pub(crate) const fn bytes_for(bits: usize) -> usize {
    bits.div_ceil(8)
}

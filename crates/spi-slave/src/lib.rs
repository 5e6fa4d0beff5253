#![no_std]
//! Transaction engine for SPI peripherals running in slave mode.
//!
//! An external master decides when bits move. Tasks queue
//! [`Transaction`]s ahead of time through a [`SpiSlave`]; the peripheral
//! interrupt, through its [`SlaveIsr`], arms them one at a time and
//! publishes each one once the master has clocked it. Finished transactions
//! are handed back in submission order, with their buffers and the number
//! of bits actually transferred.
//!
//! Register access, pin routing and DMA reset quirks stay behind the traits
//! in [`hal`], so the engine runs unchanged on any part and under test.

#[macro_use]
mod fmt;

mod config;
pub mod dma;
mod engine;
mod error;
pub mod hal;
mod hosts;
pub mod policy;
mod session;
mod transaction;
mod workaround;

pub use config::{
    BusFlags, DmaChannel, DmaSelect, HostId, IsrHook, Mode, PinConfig,
    SlaveConfig, SlaveFlags, Wait,
};
pub use engine::{ArmGate, SlaveIsr};
pub use error::{
    Error, Exhausted, InvalidArgument, Refused, Rejected, StateError,
    TransferError,
};
pub use hal::{
    BusResources, DmaWorkaround, InterruptLine, NoWorkaround, ResetWaker,
    SlaveResources, TransferPrimitive,
};
pub use hosts::SlaveHosts;
pub use policy::Capabilities;
pub use session::SpiSlave;
pub use transaction::Transaction;
pub use workaround::DmaResetCoordinator;

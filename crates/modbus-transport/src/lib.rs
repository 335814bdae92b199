//! modbus-transport: blocking register reads from Modbus RTU devices
//!
//! This crate provides the [`RegisterBus`] trait and feature-gated backends. The
//! default build enables a `mock` backend so that binaries can compile and be
//! tested on any host without a serial adapter; the `rtu` feature adds a real
//! serial backend.

mod types;
pub use types::{Parity, PortInfo, SerialSettings};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::RegisterBus;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{BusStats, MockBus};

#[cfg(feature = "rtu")]
mod rtu;

#[cfg(feature = "rtu")]
pub use rtu::{list_ports, RtuBus};

use crate::Result;

/// A minimal blocking register-read interface.
///
/// One request is in flight at a time; callers connect, read and disconnect
/// around every register block so the port is free between reads.
pub trait RegisterBus {
    /// Open the underlying link.
    fn connect(&mut self) -> Result<()>;

    /// Read `count` holding registers starting at `address`.
    fn read_holding(&mut self, address: u16, count: u16) -> Result<Vec<u16>>;

    /// Close the link. Never fails; closing an already closed bus is a no-op.
    fn disconnect(&mut self);

    /// Whether `connect` has succeeded and `disconnect` has not been called since.
    fn is_connected(&self) -> bool;
}

impl<B: RegisterBus + ?Sized> RegisterBus for &mut B {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn read_holding(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        (**self).read_holding(address, count)
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}

impl<B: RegisterBus + ?Sized> RegisterBus for Box<B> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn read_holding(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        (**self).read_holding(address, count)
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}

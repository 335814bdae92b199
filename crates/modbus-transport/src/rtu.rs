use crate::{Parity, PortInfo, RegisterBus, Result, SerialSettings, TransportError};
use serialport::SerialPortType;
use std::io::ErrorKind;
use tokio_modbus::client::sync::{self, Reader};
use tokio_modbus::Slave;
use tracing::debug;

/// Modbus RTU over a serial port. Framing and CRC are handled by `tokio-modbus`.
///
/// The port is opened on `connect` and dropped on `disconnect`, so other
/// processes may use it between reads.
pub struct RtuBus {
    settings: SerialSettings,
    ctx: Option<sync::Context>,
}

impl RtuBus {
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            ctx: None,
        }
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    fn builder(&self) -> Result<tokio_serial::SerialPortBuilder> {
        let parity = match self.settings.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        };
        let data_bits = match self.settings.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            8 => tokio_serial::DataBits::Eight,
            _ => return Err(TransportError::Unsupported("data bits must be 5..=8")),
        };
        let stop_bits = match self.settings.stop_bits {
            1 => tokio_serial::StopBits::One,
            2 => tokio_serial::StopBits::Two,
            _ => return Err(TransportError::Unsupported("stop bits must be 1 or 2")),
        };
        Ok(
            tokio_serial::new(self.settings.path.as_str(), self.settings.baud_rate)
                .parity(parity)
                .data_bits(data_bits)
                .stop_bits(stop_bits)
                .timeout(self.settings.timeout),
        )
    }
}

impl RegisterBus for RtuBus {
    fn connect(&mut self) -> Result<()> {
        if self.ctx.is_some() {
            return Ok(());
        }
        let builder = self.builder()?;
        let mut ctx = sync::rtu::connect_slave(&builder, Slave(self.settings.slave))
            .map_err(|e| TransportError::Connection(format!("{}: {e}", self.settings.path)))?;
        ctx.set_timeout(self.settings.timeout);
        debug!(settings = %self.settings, "serial port opened");
        self.ctx = Some(ctx);
        Ok(())
    }

    fn read_holding(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| TransportError::Connection("read while disconnected".into()))?;
        map_reply(ctx.read_holding_registers(address, count))
    }

    fn disconnect(&mut self) {
        if self.ctx.take().is_some() {
            debug!(path = %self.settings.path, "serial port closed");
        }
    }

    fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }
}

/// Map a tokio-modbus reply onto the transport taxonomy; retry eligibility follows from it.
fn map_reply(reply: tokio_modbus::Result<Vec<u16>>) -> Result<Vec<u16>> {
    match reply {
        Ok(Ok(words)) => Ok(words),
        Ok(Err(code)) => Err(TransportError::Exception(format!("{code:?}"))),
        Err(tokio_modbus::Error::Transport(e)) => Err(map_io(&e)),
        Err(other) => Err(TransportError::Framing(other.to_string())),
    }
}

fn map_io(e: &std::io::Error) -> TransportError {
    match e.kind() {
        ErrorKind::TimedOut => TransportError::Timeout,
        ErrorKind::InvalidData => TransportError::Framing(e.to_string()),
        ErrorKind::BrokenPipe | ErrorKind::NotConnected => TransportError::Connection(e.to_string()),
        _ => TransportError::DeviceNotResponding(e.to_string()),
    }
}

/// Enumerate serial ports the host can see.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let mut out = Vec::new();
    for p in serialport::available_ports().map_err(|e| TransportError::Io(e.to_string()))? {
        let driver = match p.port_type {
            SerialPortType::UsbPort(_) => "usb-serial",
            SerialPortType::PciPort => "pci-serial",
            SerialPortType::BluetoothPort => "bluetooth",
            SerialPortType::Unknown => "serial",
        };
        out.push(PortInfo {
            name: p.port_name,
            driver: driver.to_string(),
        });
    }
    Ok(out)
}

use core::fmt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Serial line parity
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Parity::None => "N",
            Parity::Even => "E",
            Parity::Odd => "O",
        };
        f.write_str(s)
    }
}

/// Line and addressing parameters for one controller on one serial port.
///
/// These are handed to the backend constructor; nothing here is global.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SerialSettings {
    pub path: String,
    #[serde(default = "default_baud")]
    pub baud_rate: u32,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default = "default_timeout", with = "millis")]
    pub timeout: Duration,
    #[serde(default = "default_slave")]
    pub slave: u8,
}

impl SerialSettings {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: default_baud(),
            parity: Parity::None,
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            timeout: default_timeout(),
            slave: default_slave(),
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_slave(mut self, slave: u8) -> Self {
        self.slave = slave;
        self
    }
}

impl fmt::Display for SerialSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{path} {baud} {bits}{parity}{stop} slave={slave}",
            path = self.path,
            baud = self.baud_rate,
            bits = self.data_bits,
            parity = self.parity,
            stop = self.stop_bits,
            slave = self.slave
        )
    }
}

fn default_baud() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_slave() -> u8 {
    1
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// A serial port visible to the host.
#[derive(Clone, Debug)]
pub struct PortInfo {
    pub name: String,
    pub driver: String,
}

use crate::{RegisterBus, Result, TransportError};
use std::collections::HashMap;
use tracing::trace;

/// A simple in-process register image. Each bus instance is independent.
///
/// Faults can be injected per start address, either permanently or for a
/// fixed number of reads, so retry and degradation paths are testable
/// without hardware.
#[derive(Debug, Default)]
pub struct MockBus {
    name: String,
    registers: HashMap<u16, u16>,
    faults: HashMap<u16, Fault>,
    short_replies: HashMap<u16, usize>,
    connect_error: Option<TransportError>,
    connected: bool,
    stats: BusStats,
}

#[derive(Debug)]
struct Fault {
    error: TransportError,
    remaining: Option<u32>,
}

/// Call counters, mostly useful to assert that every connect was paired
/// with a disconnect.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BusStats {
    pub connects: u32,
    pub disconnects: u32,
    pub reads: u32,
    pub failures: u32,
}

impl MockBus {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store `words` at consecutive addresses starting at `start`.
    pub fn set_block(&mut self, start: u16, words: &[u16]) -> &mut Self {
        for (offset, word) in words.iter().enumerate() {
            if let Some(addr) = start.checked_add(offset as u16) {
                self.registers.insert(addr, *word);
            }
        }
        self
    }

    pub fn set_register(&mut self, address: u16, word: u16) -> &mut Self {
        self.registers.insert(address, word);
        self
    }

    /// Every read starting at `address` fails with `error`.
    pub fn fail_at(&mut self, address: u16, error: TransportError) -> &mut Self {
        self.faults.insert(
            address,
            Fault {
                error,
                remaining: None,
            },
        );
        self
    }

    /// The next `times` reads starting at `address` fail, later ones succeed.
    pub fn fail_times(&mut self, address: u16, times: u32, error: TransportError) -> &mut Self {
        if times > 0 {
            self.faults.insert(
                address,
                Fault {
                    error,
                    remaining: Some(times),
                },
            );
        }
        self
    }

    /// Reads starting at `address` return only `len` words.
    pub fn short_reply(&mut self, address: u16, len: usize) -> &mut Self {
        self.short_replies.insert(address, len);
        self
    }

    /// Every `connect` fails with `error`.
    pub fn fail_connect(&mut self, error: TransportError) -> &mut Self {
        self.connect_error = Some(error);
        self
    }

    pub fn clear_faults(&mut self) {
        self.faults.clear();
        self.short_replies.clear();
        self.connect_error = None;
    }

    pub fn stats(&self) -> BusStats {
        self.stats
    }

    fn take_fault(&mut self, address: u16) -> Option<TransportError> {
        let fault = self.faults.get_mut(&address)?;
        let error = fault.error.clone();
        if let Some(left) = fault.remaining.as_mut() {
            *left = left.saturating_sub(1);
            if *left == 0 {
                self.faults.remove(&address);
            }
        }
        Some(error)
    }
}

impl RegisterBus for MockBus {
    fn connect(&mut self) -> Result<()> {
        if let Some(err) = &self.connect_error {
            return Err(err.clone());
        }
        self.stats.connects += 1;
        self.connected = true;
        Ok(())
    }

    fn read_holding(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        if !self.connected {
            return Err(TransportError::Connection(format!(
                "{}: read while disconnected",
                self.name
            )));
        }
        self.stats.reads += 1;
        trace!(bus = %self.name, address, count, "mock read");
        if let Some(err) = self.take_fault(address) {
            self.stats.failures += 1;
            return Err(err);
        }
        let mut out = Vec::with_capacity(usize::from(count));
        for offset in 0..count {
            let word = address
                .checked_add(offset)
                .and_then(|addr| self.registers.get(&addr).copied());
            match word {
                Some(w) => out.push(w),
                None => {
                    self.stats.failures += 1;
                    return Err(TransportError::Exception(format!(
                        "illegal data address 0x{:04X}",
                        u32::from(address) + u32::from(offset)
                    )));
                }
            }
        }
        if let Some(len) = self.short_replies.get(&address) {
            out.truncate(*len);
        }
        Ok(out)
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.stats.disconnects += 1;
        }
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_consecutive_block() {
        let mut bus = MockBus::new("mock0");
        bus.set_block(0x0014, &[1, 2, 3, 4]);
        bus.connect().unwrap();
        assert_eq!(bus.read_holding(0x0014, 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(bus.read_holding(0x0015, 2).unwrap(), vec![2, 3]);
        bus.disconnect();
        assert_eq!(
            bus.stats(),
            BusStats {
                connects: 1,
                disconnects: 1,
                reads: 2,
                failures: 0
            }
        );
    }

    #[test]
    fn unmapped_address_is_an_exception() {
        let mut bus = MockBus::new("mock0");
        bus.set_register(0x0100, 7);
        bus.connect().unwrap();
        let err = bus.read_holding(0x0100, 2).unwrap_err();
        assert!(matches!(err, TransportError::Exception(_)));
    }

    #[test]
    fn read_requires_connection() {
        let mut bus = MockBus::new("mock0");
        bus.set_register(1, 1);
        assert!(matches!(
            bus.read_holding(1, 1),
            Err(TransportError::Connection(_))
        ));
    }

    #[test]
    fn fail_times_recovers() {
        let mut bus = MockBus::new("mock0");
        bus.set_register(0x000A, 0x0C05);
        bus.fail_times(0x000A, 2, TransportError::Timeout);
        bus.connect().unwrap();
        assert_eq!(bus.read_holding(0x000A, 1), Err(TransportError::Timeout));
        assert_eq!(bus.read_holding(0x000A, 1), Err(TransportError::Timeout));
        assert_eq!(bus.read_holding(0x000A, 1), Ok(vec![0x0C05]));
        assert_eq!(bus.stats().failures, 2);
    }

    #[test]
    fn short_reply_truncates() {
        let mut bus = MockBus::new("mock0");
        bus.set_block(0x0018, &[12, 34]);
        bus.short_reply(0x0018, 1);
        bus.connect().unwrap();
        assert_eq!(bus.read_holding(0x0018, 2).unwrap(), vec![12]);
    }

    #[test]
    fn connect_failure_is_reported() {
        let mut bus = MockBus::new("mock0");
        bus.fail_connect(TransportError::Connection("no such port".into()));
        assert!(bus.connect().is_err());
        assert!(!bus.is_connected());
        bus.clear_faults();
        assert!(bus.connect().is_ok());
    }
}

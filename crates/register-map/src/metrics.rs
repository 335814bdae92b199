use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

#[derive(Clone)]
pub struct RegisterMetrics {
    pub reads: IntCounter,
    pub read_failures: IntCounter,
    pub retries: IntCounter,
    pub snapshots: IntCounter,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub registers: RegisterMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let counter = |name: &str, help: &str| {
            IntCounter::new(name, help).map_err(|e| format!("metrics init error: {e}"))
        };
        let registers = RegisterMetrics {
            reads: counter("solar_register_reads_total", "Register read attempts")?,
            read_failures: counter(
                "solar_register_read_failures_total",
                "Register reads that failed or could not be decoded",
            )?,
            retries: counter(
                "solar_register_retries_total",
                "Retries of volatile register reads",
            )?,
            snapshots: counter("solar_snapshots_total", "Snapshots assembled")?,
        };
        let _ = registry.register(Box::new(registers.reads.clone()));
        let _ = registry.register(Box::new(registers.read_failures.clone()));
        let _ = registry.register(Box::new(registers.retries.clone()));
        let _ = registry.register(Box::new(registers.snapshots.clone()));
        Ok(Self {
            registry,
            registers,
        })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

use crate::{
    decode_with, DecodeOptions, DecodedValue, RegisterError, RegisterMetrics, RegisterSchema,
    RegisterSpec, Result,
};
use modbus_transport::{RegisterBus, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How the reader treats transient failures on volatile metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; `None` keeps trying until cancelled.
    pub max_attempts: Option<u32>,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(5);

    pub fn until_cancelled(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            delay,
        }
    }

    pub fn bounded(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            delay,
        }
    }

    pub fn no_retry() -> Self {
        Self::bounded(1, Duration::ZERO)
    }

    fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::until_cancelled(Self::DEFAULT_DELAY)
    }
}

/// Shared stop signal for blocking retry loops.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    const SLICE: Duration = Duration::from_millis(50);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `dur` unless cancelled first. Returns `true` if cancelled.
    pub fn wait(&self, dur: Duration) -> bool {
        let deadline = Instant::now() + dur;
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(Self::SLICE.min(deadline - now));
        }
    }
}

/// Connected for the lifetime of the value; disconnects on drop, including on error paths.
struct BusSession<'a, B: RegisterBus> {
    bus: &'a mut B,
}

impl<'a, B: RegisterBus> BusSession<'a, B> {
    fn open(bus: &'a mut B) -> core::result::Result<Self, TransportError> {
        bus.connect()?;
        Ok(Self { bus })
    }

    fn read(&mut self, address: u16, count: u16) -> core::result::Result<Vec<u16>, TransportError> {
        self.bus.read_holding(address, count)
    }
}

impl<B: RegisterBus> Drop for BusSession<'_, B> {
    fn drop(&mut self) {
        self.bus.disconnect();
    }
}

/// Reads one metric at a time: look up, connect, read, decode, disconnect.
pub struct MetricReader<'s, B: RegisterBus> {
    schema: &'s RegisterSchema,
    bus: B,
    options: DecodeOptions,
    retry: RetryPolicy,
    cancel: CancelToken,
    metrics: Option<RegisterMetrics>,
}

impl<'s, B: RegisterBus> MetricReader<'s, B> {
    pub fn new(schema: &'s RegisterSchema, bus: B) -> Self {
        Self {
            schema,
            bus,
            options: DecodeOptions::default(),
            retry: RetryPolicy::default(),
            cancel: CancelToken::new(),
            metrics: None,
        }
    }

    pub fn with_options(mut self, options: DecodeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_metrics(mut self, metrics: RegisterMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn schema(&self) -> &'s RegisterSchema {
        self.schema
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn into_bus(self) -> B {
        self.bus
    }

    pub(crate) fn metrics(&self) -> Option<&RegisterMetrics> {
        self.metrics.as_ref()
    }

    /// Read and decode one metric.
    ///
    /// Volatile metrics retry transient transport faults per the retry
    /// policy; everything else fails fast with `ReadFailed`. A response of
    /// the wrong length is `MalformedResponse`.
    pub fn read(&mut self, name: &str) -> Result<DecodedValue> {
        let schema = self.schema;
        let spec = schema.lookup(name)?;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if let Some(m) = &self.metrics {
                m.reads.inc();
            }
            match Self::read_words(&mut self.bus, spec) {
                Ok(words) => {
                    debug!(metric = %spec.name, address = spec.address, ?words, "register read");
                    return decode_with(&words, &spec.decode, &self.options).map_err(|e| {
                        self.count_failure();
                        warn!(metric = %spec.name, error = %e, "decode failed");
                        e
                    });
                }
                Err(err) => {
                    self.count_failure();
                    let retry = spec.volatile && err.is_transient() && self.retry.allows(attempt);
                    if !retry {
                        warn!(metric = %spec.name, attempt, error = %err, "read failed");
                        return Err(RegisterError::ReadFailed {
                            metric: spec.name.clone(),
                            source: err,
                        });
                    }
                    warn!(
                        metric = %spec.name,
                        attempt,
                        error = %err,
                        delay_ms = self.retry.delay.as_millis() as u64,
                        "read failed, retrying"
                    );
                    if let Some(m) = &self.metrics {
                        m.retries.inc();
                    }
                    if self.cancel.wait(self.retry.delay) {
                        return Err(RegisterError::Cancelled(spec.name.clone()));
                    }
                }
            }
        }
    }

    fn read_words(bus: &mut B, spec: &RegisterSpec) -> core::result::Result<Vec<u16>, TransportError> {
        let mut session = BusSession::open(bus)?;
        session.read(spec.address, spec.words)
    }

    fn count_failure(&self) {
        if let Some(m) = &self.metrics {
            m.read_failures.inc();
        }
    }
}

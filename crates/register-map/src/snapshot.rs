use crate::{DecodedValue, MetricGroup, MetricReader, Result};
use modbus_transport::RegisterBus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use tracing::{info, warn};

/// One poll cycle's decoded metrics. Immutable once assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(with = "time::serde::rfc3339")]
    taken_at: OffsetDateTime,
    values: BTreeMap<String, DecodedValue>,
}

impl Snapshot {
    pub fn new(taken_at: OffsetDateTime, values: BTreeMap<String, DecodedValue>) -> Self {
        Self { taken_at, values }
    }

    pub fn taken_at(&self) -> OffsetDateTime {
        self.taken_at
    }

    pub fn get(&self, name: &str) -> Option<&DecodedValue> {
        self.values.get(name)
    }

    pub fn values(&self) -> &BTreeMap<String, DecodedValue> {
        &self.values
    }

    pub fn into_values(self) -> BTreeMap<String, DecodedValue> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Metrics that decoded to `None`.
    pub fn missing(&self) -> impl Iterator<Item = &str> {
        self.values
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k.as_str())
    }
}

/// Reads metric groups through a [`MetricReader`] and merges them into snapshots.
///
/// A metric that fails to read or decode becomes `None`; only schema
/// errors and cancellation abort a collection.
pub struct SnapshotAssembler<'s, B: RegisterBus> {
    reader: MetricReader<'s, B>,
}

impl<'s, B: RegisterBus> SnapshotAssembler<'s, B> {
    pub fn new(reader: MetricReader<'s, B>) -> Self {
        Self { reader }
    }

    pub fn reader(&self) -> &MetricReader<'s, B> {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut MetricReader<'s, B> {
        &mut self.reader
    }

    pub fn into_reader(self) -> MetricReader<'s, B> {
        self.reader
    }

    pub fn collect_group(&mut self, group: MetricGroup) -> Result<Snapshot> {
        let taken_at = OffsetDateTime::now_utc();
        let mut values = BTreeMap::new();
        self.collect_into(group, &mut values)?;
        self.finish(taken_at, values, group.as_str())
    }

    /// Same as [`collect_group`](Self::collect_group) with the group given by name.
    pub fn collect_named(&mut self, group: &str) -> Result<Snapshot> {
        self.collect_group(group.parse()?)
    }

    /// Every group, merged into one flat snapshot. Earlier groups win on key clashes.
    pub fn collect_all(&mut self) -> Result<Snapshot> {
        let taken_at = OffsetDateTime::now_utc();
        let mut values = BTreeMap::new();
        for group in MetricGroup::ALL {
            self.collect_into(group, &mut values)?;
        }
        self.finish(taken_at, values, "all")
    }

    fn collect_into(
        &mut self,
        group: MetricGroup,
        values: &mut BTreeMap<String, DecodedValue>,
    ) -> Result<()> {
        let schema = self.reader.schema();
        for spec in schema.group(group) {
            if values.contains_key(&spec.name) {
                continue;
            }
            let value = match self.reader.read(&spec.name) {
                Ok(v) => v,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(metric = %spec.name, %group, error = %e, "metric degraded to none");
                    DecodedValue::None
                }
            };
            values.insert(spec.name.clone(), value);
        }
        Ok(())
    }

    fn finish(
        &self,
        taken_at: OffsetDateTime,
        values: BTreeMap<String, DecodedValue>,
        label: &str,
    ) -> Result<Snapshot> {
        let snapshot = Snapshot::new(taken_at, values);
        if let Some(m) = self.reader.metrics() {
            m.snapshots.inc();
        }
        info!(
            group = label,
            metrics = snapshot.len(),
            missing = snapshot.missing().count(),
            "snapshot collected"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ControllerModel, MetricsHub, RegisterError, RetryPolicy};
    use modbus_transport::{MockBus, TransportError};
    use std::time::Duration;

    /// A register image covering every address in the full Rover Li map.
    fn full_bus() -> MockBus {
        let mut bus = MockBus::new("mock0");
        bus.set_register(0x000A, 0x0C14)
            .set_block(0x000C, &[0x2020, 0x524E, 0x472D, 0x4354, 0x524C, 0x2D52, 0x5652, 0x3430])
            .set_block(0x0014, &[0x0001, 0x0203, 0x0004, 0x0506])
            .set_block(0x0018, &[1803, 27])
            .set_block(
                0x0100,
                &[85, 131, 250, 0x9E14, 131, 12, 2, 188, 310, 580],
            )
            .set_block(0x010B, &[120, 142, 1050, 300, 140, 36, 45, 12, 560, 144])
            .set_block(0x0115, &[400, 3, 120, 0, 9000, 0, 7000, 0, 120, 0, 95])
            .set_block(0x0120, &[0x8002, 0, 0])
            .set_block(0xE002, &[100, 0x0C0C, 4]);
        bus
    }

    #[test]
    fn battery_group() {
        let schema = ControllerModel::RenogyRoverLi.schema().unwrap();
        let mut bus = full_bus();
        let reader = MetricReader::new(&schema, &mut bus);
        let mut asm = SnapshotAssembler::new(reader);
        let snap = asm.collect_group(MetricGroup::Battery).unwrap();
        assert_eq!(snap.len(), schema.group(MetricGroup::Battery).count());
        assert_eq!(snap.get("battery_percentage"), Some(&DecodedValue::Int(85)));
        assert_eq!(snap.get("battery_voltage").unwrap().to_string(), "13.1");
        assert_eq!(snap.get("battery_type").unwrap().as_str(), Some("lithium"));
        assert_eq!(snap.get("charging_status").unwrap().as_str(), Some("mppt"));
        assert_eq!(snap.get("voltage_setting"), Some(&DecodedValue::Int(12)));
        assert!(snap.get("solar_power").is_none());
    }

    #[test]
    fn one_failing_metric_degrades_to_none() {
        let schema = ControllerModel::RenogyRoverLi.schema().unwrap();
        let mut bus = full_bus();
        bus.fail_at(0x0101, TransportError::Timeout);
        let reader = MetricReader::new(&schema, &mut bus);
        let mut asm = SnapshotAssembler::new(reader);
        let snap = asm.collect_group(MetricGroup::Battery).unwrap();
        assert_eq!(snap.get("battery_voltage"), Some(&DecodedValue::None));
        assert_eq!(snap.get("battery_percentage"), Some(&DecodedValue::Int(85)));
        assert_eq!(snap.get("battery_charging_current").unwrap().to_string(), "2.50");
        assert_eq!(snap.missing().collect::<Vec<_>>(), vec!["battery_voltage"]);
    }

    #[test]
    fn malformed_reply_degrades_to_none() {
        let schema = ControllerModel::RenogyRoverLi.schema().unwrap();
        let mut bus = full_bus();
        bus.short_reply(0x0014, 2);
        let reader = MetricReader::new(&schema, &mut bus);
        let mut asm = SnapshotAssembler::new(reader);
        let snap = asm.collect_named("controller-info").unwrap();
        assert!(snap.get("software_version").unwrap().is_none());
        assert!(snap.get("hardware_version").unwrap().is_none());
        assert_eq!(snap.get("model").unwrap().as_str(), Some("RNG-CTRL-RVR40"));
        assert_eq!(snap.get("serial_number").unwrap().as_str(), Some("180327"));
    }

    #[test]
    fn collect_all_covers_schema() {
        let schema = ControllerModel::RenogyRoverLi.schema().unwrap();
        let mut bus = full_bus();
        let hub = MetricsHub::new().unwrap();
        let reader = MetricReader::new(&schema, &mut bus).with_metrics(hub.registers.clone());
        let mut asm = SnapshotAssembler::new(reader);
        let snap = asm.collect_all().unwrap();
        assert_eq!(snap.len(), schema.len());
        assert_eq!(snap.missing().count(), 0);
        assert_eq!(snap.get("load_status"), Some(&DecodedValue::Bool(true)));
        assert_eq!(
            snap.get("total_charging_amp_hours"),
            Some(&DecodedValue::Words(vec![0, 9000]))
        );
        assert_eq!(snap.get("solar_current").unwrap().to_string(), "3.10");
        assert_eq!(hub.registers.snapshots.get(), 1);
        assert_eq!(hub.registers.reads.get(), schema.len() as u64);
    }

    #[test]
    fn unknown_group_is_an_error() {
        let schema = ControllerModel::RenogyRoverLi.schema().unwrap();
        let mut bus = full_bus();
        let mut asm = SnapshotAssembler::new(MetricReader::new(&schema, &mut bus));
        assert!(matches!(
            asm.collect_named("weather"),
            Err(RegisterError::UnknownGroup(_))
        ));
    }

    #[test]
    fn cancellation_aborts_collection() {
        let schema = ControllerModel::RenogyRoverLi.schema().unwrap();
        let mut bus = full_bus();
        bus.fail_at(0x000A, TransportError::Timeout);
        let cancel = crate::CancelToken::new();
        cancel.cancel();
        let reader = MetricReader::new(&schema, &mut bus)
            .with_retry(RetryPolicy::until_cancelled(Duration::ZERO))
            .with_cancel(cancel);
        let mut asm = SnapshotAssembler::new(reader);
        assert!(matches!(
            asm.collect_all(),
            Err(RegisterError::Cancelled(_))
        ));
    }

    #[test]
    fn snapshot_serializes_flat() {
        let mut values = BTreeMap::new();
        values.insert("battery_voltage".to_string(), DecodedValue::Int(12));
        values.insert("battery_type".to_string(), DecodedValue::None);
        let snap = Snapshot::new(OffsetDateTime::UNIX_EPOCH, values);
        let json = serde_json::to_string(&snap).unwrap();
        assert_eq!(
            json,
            r#"{"taken_at":"1970-01-01T00:00:00Z","values":{"battery_type":null,"battery_voltage":12}}"#
        );
        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }
}

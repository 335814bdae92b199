use crate::{ControllerModel, RegisterSchema, RegisterSpec};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// On-disk form of a register schema, for hardware variants without a built-in table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaFile {
    pub model: String,
    pub table: String,
    #[serde(default)]
    pub registers: Vec<RegisterSpec>,
}

impl SchemaFile {
    pub fn into_schema(self) -> anyhow::Result<RegisterSchema> {
        let model = self.model.clone();
        RegisterSchema::new(self.model, self.table, self.registers)
            .with_context(|| format!("validating schema for {model}"))
    }
}

impl From<&RegisterSchema> for SchemaFile {
    fn from(schema: &RegisterSchema) -> Self {
        Self {
            model: schema.model().to_string(),
            table: schema.table().to_string(),
            registers: schema.specs().to_vec(),
        }
    }
}

pub fn load_schema_str(raw: &str) -> anyhow::Result<RegisterSchema> {
    let file: SchemaFile = serde_yaml::from_str(raw).context("parsing schema yaml")?;
    file.into_schema()
}

pub fn load_schema_file(path: impl AsRef<Path>) -> anyhow::Result<RegisterSchema> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading schema: {}", path.display()))?;
    let file: SchemaFile =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing yaml: {}", path.display()))?;
    file.into_schema()
        .with_context(|| format!("loading schema: {}", path.display()))
}

/// Resolve a schema source: a built-in model name, or a path to a YAML file.
pub fn resolve_schema(source: &str) -> anyhow::Result<RegisterSchema> {
    if let Ok(model) = source.parse::<ControllerModel>() {
        return model
            .schema()
            .with_context(|| format!("building built-in schema {model}"));
    }
    load_schema_file(source)
}

pub fn schema_to_yaml(schema: &RegisterSchema) -> anyhow::Result<String> {
    serde_yaml::to_string(&SchemaFile::from(schema)).context("encoding schema yaml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DecodeKind, EnumMask, EnumTable, MetricGroup};
    use std::io::Write;

    const SAMPLE: &str = r#"
model: bench-controller
table: bench_controller
registers:
  - name: battery_voltage
    address: 257
    group: battery
    decode: { kind: scaled_float, scale: 10 }
  - name: battery_type
    address: 57348
    group: battery
    decode: { kind: enum_lookup, table: battery_type }
  - name: system_voltage
    address: 10
    words: 1
    group: controller_info
    volatile: true
    decode: { kind: unsigned_byte, half: high }
"#;

    #[test]
    fn parses_yaml_schema() {
        let schema = load_schema_str(SAMPLE).unwrap();
        assert_eq!(schema.model(), "bench-controller");
        assert_eq!(schema.len(), 3);
        let bt = schema.lookup("battery_type").unwrap();
        assert_eq!(
            bt.decode,
            DecodeKind::EnumLookup {
                table: EnumTable::BatteryType,
                mask: EnumMask::Word
            }
        );
        assert_eq!(bt.words, 1);
        let sv = schema.lookup("system_voltage").unwrap();
        assert!(sv.volatile);
        assert_eq!(sv.group, MetricGroup::ControllerInfo);
    }

    #[test]
    fn rejects_inconsistent_word_count() {
        let raw = r#"
model: m
table: t
registers:
  - name: serial_number
    address: 24
    words: 3
    group: controller_info
    decode: { kind: packed_serial }
"#;
        assert!(load_schema_str(raw).is_err());
    }

    #[test]
    fn builtin_round_trips_through_yaml() {
        let schema = ControllerModel::RenogyRoverLi.schema().unwrap();
        let yaml = schema_to_yaml(&schema).unwrap();
        let back = load_schema_str(&yaml).unwrap();
        assert_eq!(back.specs(), schema.specs());
        assert_eq!(back.table(), schema.table());
    }

    #[test]
    fn resolves_model_names_and_files() {
        assert_eq!(
            resolve_schema("renogy-rover").unwrap().model(),
            "renogy-rover"
        );
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(SAMPLE.as_bytes()).unwrap();
        let schema = resolve_schema(f.path().to_str().unwrap()).unwrap();
        assert_eq!(schema.table(), "bench_controller");
        assert!(resolve_schema("/nonexistent/schema.yaml").is_err());
    }
}

use crate::{DecodeKind, DecodedValue, RegisterSchema, Snapshot};
use core::fmt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const CREATED_AT: &str = "created_at";
pub const DEVICE_ID: &str = "device_id";

/// Digits in the largest unsigned 16-bit register value.
const WORD_DIGITS: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageType {
    Integer,
    Numeric { precision: u8, scale: u8 },
    Text,
    Boolean,
    Timestamp,
}

impl StorageType {
    pub fn for_kind(kind: &DecodeKind) -> Self {
        match kind {
            DecodeKind::RawUint
            | DecodeKind::UnsignedByte { .. }
            | DecodeKind::SignedMagnitude8 { .. } => StorageType::Integer,
            DecodeKind::ScaledFloat { .. } => StorageType::Numeric {
                precision: WORD_DIGITS,
                scale: kind.decimals().unwrap_or(0),
            },
            DecodeKind::Flag { .. } => StorageType::Boolean,
            DecodeKind::PackedVersion { .. }
            | DecodeKind::PackedSerial
            | DecodeKind::Ascii { .. }
            | DecodeKind::EnumLookup { .. }
            | DecodeKind::Raw { .. } => StorageType::Text,
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageType::Integer => f.write_str("INTEGER"),
            StorageType::Numeric { precision, scale } => write!(f, "NUMERIC({precision},{scale})"),
            StorageType::Text => f.write_str("TEXT"),
            StorageType::Boolean => f.write_str("BOOLEAN"),
            StorageType::Timestamp => f.write_str("TIMESTAMP"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub storage: StorageType,
    pub nullable: bool,
}

impl ColumnSpec {
    pub fn ddl(&self) -> String {
        if self.nullable {
            format!("{} {}", self.name, self.storage)
        } else {
            format!("{} {} NOT NULL", self.name, self.storage)
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.name == CREATED_AT || self.name == DEVICE_ID
    }
}

/// Columns for a schema: one per register spec, then `device_id` and `created_at`.
pub fn project(schema: &RegisterSchema) -> Vec<ColumnSpec> {
    let mut out: Vec<ColumnSpec> = schema
        .specs()
        .iter()
        .map(|spec| ColumnSpec {
            name: spec.name.clone(),
            storage: StorageType::for_kind(&spec.decode),
            nullable: true,
        })
        .collect();
    out.push(ColumnSpec {
        name: DEVICE_ID.to_string(),
        storage: StorageType::Integer,
        nullable: false,
    });
    out.push(ColumnSpec {
        name: CREATED_AT.to_string(),
        storage: StorageType::Timestamp,
        nullable: false,
    });
    out
}

pub fn create_table_sql(table: &str, columns: &[ColumnSpec]) -> String {
    let body: Vec<String> = columns.iter().map(|c| format!("    {}", c.ddl())).collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n    id INTEGER PRIMARY KEY,\n{}\n);",
        body.join(",\n")
    )
}

/// Column set computed once per schema, with snapshot filtering.
#[derive(Debug, Clone)]
pub struct SchemaProjector {
    table: String,
    columns: Vec<ColumnSpec>,
    metric_names: BTreeSet<String>,
}

impl SchemaProjector {
    pub fn new(schema: &RegisterSchema) -> Self {
        let columns = project(schema);
        let metric_names = columns
            .iter()
            .filter(|c| !c.is_synthetic())
            .map(|c| c.name.clone())
            .collect();
        Self {
            table: schema.table().to_string(),
            columns,
            metric_names,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn create_table_sql(&self) -> String {
        create_table_sql(&self.table, &self.columns)
    }

    /// Keep only snapshot entries that have a metric column.
    pub fn filter(&self, snapshot: &Snapshot) -> BTreeMap<String, DecodedValue> {
        snapshot
            .values()
            .iter()
            .filter(|(k, _)| self.metric_names.contains(k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

use crate::StoreError;
use register_map::{ColumnSpec, DecodedValue, StorageType, CREATED_AT, DEVICE_ID};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// One persisted snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    pub id: u64,
    pub device_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub values: BTreeMap<String, DecodedValue>,
}

impl StoredRow {
    /// Values in column order, as JSON, for upload.
    pub fn to_record(&self, columns: &[ColumnSpec]) -> Vec<serde_json::Value> {
        columns
            .iter()
            .map(|c| match c.name.as_str() {
                DEVICE_ID => serde_json::Value::from(self.device_id),
                CREATED_AT => self
                    .created_at
                    .format(&Rfc3339)
                    .map(serde_json::Value::from)
                    .unwrap_or(serde_json::Value::Null),
                name => match self.values.get(name) {
                    None | Some(DecodedValue::None) => serde_json::Value::Null,
                    // Text columns take the rendered word list.
                    Some(v @ DecodedValue::Words(_)) if c.storage == StorageType::Text => {
                        serde_json::Value::from(v.to_string())
                    }
                    // Numeric columns take a plain number on the wire.
                    Some(DecodedValue::Decimal(d)) => serde_json::Value::from(d.to_f64()),
                    Some(v) => serde_json::to_value(v).unwrap_or(serde_json::Value::Null),
                },
            })
            .collect()
    }
}

/// Local retention of snapshots until an upload is acknowledged.
pub trait SnapshotStore {
    /// Create the table, or verify an existing one has the same columns.
    fn ensure_table(&mut self, table: &str, columns: &[ColumnSpec]) -> Result<(), StoreError>;

    /// Name of the current table; empty before `ensure_table`.
    fn table(&self) -> &str;

    /// Columns of the current table.
    fn columns(&self) -> &[ColumnSpec];

    /// Append one row stamped with the current time. Every key must be a column.
    fn append(
        &mut self,
        device_id: i64,
        values: BTreeMap<String, DecodedValue>,
    ) -> Result<u64, StoreError>;

    /// The `n` most recent rows, oldest first.
    fn get_last(&self, n: usize) -> Result<Vec<StoredRow>, StoreError>;

    /// Drop the `n` most recent rows. Returns how many were removed.
    fn delete_last(&mut self, n: usize) -> Result<usize, StoreError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Column bookkeeping shared by the store backends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TableDef {
    pub table: String,
    pub columns: Vec<ColumnSpec>,
}

impl TableDef {
    pub fn is_ready(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn check_matches(&self, table: &str, columns: &[ColumnSpec]) -> Result<(), StoreError> {
        if self.table != table {
            return Err(StoreError::SchemaMismatch {
                table: table.to_string(),
                reason: format!("store holds table {}", self.table),
            });
        }
        if self.columns != columns {
            return Err(StoreError::SchemaMismatch {
                table: table.to_string(),
                reason: "column set differs".to_string(),
            });
        }
        Ok(())
    }

    pub fn check_values(&self, values: &BTreeMap<String, DecodedValue>) -> Result<(), StoreError> {
        if !self.is_ready() {
            return Err(StoreError::TableNotReady);
        }
        for key in values.keys() {
            let known = self
                .columns
                .iter()
                .any(|c| !c.is_synthetic() && &c.name == key);
            if !known {
                return Err(StoreError::UnknownColumn(key.clone()));
            }
        }
        Ok(())
    }
}

/// Rows held in memory; lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    def: TableDef,
    rows: Vec<StoredRow>,
    next_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemoryStore {
    fn ensure_table(&mut self, table: &str, columns: &[ColumnSpec]) -> Result<(), StoreError> {
        if self.def.is_ready() {
            return self.def.check_matches(table, columns);
        }
        self.def = TableDef {
            table: table.to_string(),
            columns: columns.to_vec(),
        };
        Ok(())
    }

    fn table(&self) -> &str {
        &self.def.table
    }

    fn columns(&self) -> &[ColumnSpec] {
        &self.def.columns
    }

    fn append(
        &mut self,
        device_id: i64,
        values: BTreeMap<String, DecodedValue>,
    ) -> Result<u64, StoreError> {
        self.def.check_values(&values)?;
        self.next_id += 1;
        self.rows.push(StoredRow {
            id: self.next_id,
            device_id,
            created_at: OffsetDateTime::now_utc(),
            values,
        });
        Ok(self.next_id)
    }

    fn get_last(&self, n: usize) -> Result<Vec<StoredRow>, StoreError> {
        let start = self.rows.len().saturating_sub(n);
        Ok(self.rows[start..].to_vec())
    }

    fn delete_last(&mut self, n: usize) -> Result<usize, StoreError> {
        let keep = self.rows.len().saturating_sub(n);
        let removed = self.rows.len() - keep;
        self.rows.truncate(keep);
        Ok(removed)
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}

use crate::store::TableDef;
use crate::{SnapshotStore, StoreError, StoredRow};
use register_map::{ColumnSpec, DecodedValue};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::debug;

/// Rows kept as JSON lines in a file, first line holding the table definition.
///
/// All rows are mirrored in memory; the file is appended to on insert and
/// rewritten on delete.
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    def: TableDef,
    rows: Vec<StoredRow>,
    next_id: u64,
}

impl JsonlStore {
    /// Open `path`, loading any rows already there.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut store = Self {
            path,
            def: TableDef::default(),
            rows: Vec::new(),
            next_id: 0,
        };
        if store.path.exists() {
            store.load()?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&mut self) -> Result<(), StoreError> {
        let reader = BufReader::new(File::open(&self.path)?);
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let corrupt = |e: serde_json::Error| StoreError::Corrupt {
                line: i + 1,
                reason: e.to_string(),
            };
            if i == 0 {
                self.def = serde_json::from_str(&line).map_err(corrupt)?;
                continue;
            }
            let row: StoredRow = serde_json::from_str(&line).map_err(corrupt)?;
            self.next_id = self.next_id.max(row.id);
            self.rows.push(row);
        }
        debug!(path = %self.path.display(), rows = self.rows.len(), "store loaded");
        Ok(())
    }

    fn rewrite(&self) -> Result<(), StoreError> {
        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut w = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(&mut w, &self.def)?;
            w.write_all(b"\n")?;
            for row in &self.rows {
                serde_json::to_writer(&mut w, row)?;
                w.write_all(b"\n")?;
            }
            w.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SnapshotStore for JsonlStore {
    fn ensure_table(&mut self, table: &str, columns: &[ColumnSpec]) -> Result<(), StoreError> {
        if self.def.is_ready() {
            return self.def.check_matches(table, columns);
        }
        self.def = TableDef {
            table: table.to_string(),
            columns: columns.to_vec(),
        };
        self.rewrite()
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
        let row = StoredRow {
            id: self.next_id + 1,
            device_id,
            created_at: OffsetDateTime::now_utc(),
            values,
        };
        let mut f = OpenOptions::new().append(true).open(&self.path)?;
        let mut line = serde_json::to_vec(&row)?;
        line.push(b'\n');
        f.write_all(&line)?;
        self.next_id = row.id;
        self.rows.push(row);
        Ok(self.next_id)
    }

    fn get_last(&self, n: usize) -> Result<Vec<StoredRow>, StoreError> {
        let start = self.rows.len().saturating_sub(n);
        Ok(self.rows[start..].to_vec())
    }

    fn delete_last(&mut self, n: usize) -> Result<usize, StoreError> {
        let keep = self.rows.len().saturating_sub(n);
        let removed = self.rows.len() - keep;
        if removed > 0 {
            self.rows.truncate(keep);
            self.rewrite()?;
        }
        Ok(removed)
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use register_map::{ControllerModel, FixedPoint, SchemaProjector};

    fn projector() -> SchemaProjector {
        SchemaProjector::new(&ControllerModel::RenogyRoverLi.schema().unwrap())
    }

    fn sample() -> BTreeMap<String, DecodedValue> {
        let mut m = BTreeMap::new();
        m.insert(
            "battery_voltage".into(),
            DecodedValue::Decimal(FixedPoint::new(131, 1)),
        );
        m.insert(
            "battery_charging_current".into(),
            DecodedValue::Decimal(FixedPoint::new(250, 2)),
        );
        m.insert("charging_status".into(), DecodedValue::Text("mppt".into()));
        m.insert("total_charging_amp_hours".into(), DecodedValue::Words(vec![0, 9000]));
        m.insert("load_status".into(), DecodedValue::Bool(false));
        m.insert("battery_type".into(), DecodedValue::None);
        m
    }

    #[test]
    fn rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rover.jsonl");
        let p = projector();
        {
            let mut store = JsonlStore::open(&path).unwrap();
            store.ensure_table(p.table(), p.columns()).unwrap();
            store.append(1, sample()).unwrap();
            store.append(1, sample()).unwrap();
        }
        let mut store = JsonlStore::open(&path).unwrap();
        assert_eq!(store.len(), 2);
        store.ensure_table(p.table(), p.columns()).unwrap();
        let rows = store.get_last(1).unwrap();
        assert_eq!(rows[0].id, 2);
        assert_eq!(rows[0].values, sample());
        assert_eq!(rows[0].values["battery_charging_current"].to_string(), "2.50");
        assert_eq!(store.append(1, sample()).unwrap(), 3);
    }

    #[test]
    fn delete_rewrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rover.jsonl");
        let p = projector();
        let mut store = JsonlStore::open(&path).unwrap();
        store.ensure_table(p.table(), p.columns()).unwrap();
        for _ in 0..4 {
            store.append(2, sample()).unwrap();
        }
        assert_eq!(store.delete_last(3).unwrap(), 3);
        drop(store);
        let store = JsonlStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_last(5).unwrap()[0].id, 1);
    }

    #[test]
    fn mismatched_table_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rover.jsonl");
        let p = projector();
        let mut store = JsonlStore::open(&path).unwrap();
        store.ensure_table(p.table(), p.columns()).unwrap();
        drop(store);
        let legacy = SchemaProjector::new(&ControllerModel::RenogyRover.schema().unwrap());
        let mut store = JsonlStore::open(&path).unwrap();
        assert!(matches!(
            store.ensure_table(legacy.table(), legacy.columns()),
            Err(StoreError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn corrupt_line_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        let p = projector();
        let mut store = JsonlStore::open(&path).unwrap();
        store.ensure_table(p.table(), p.columns()).unwrap();
        store.append(1, sample()).unwrap();
        drop(store);
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{not json\n").unwrap();
        assert!(matches!(
            JsonlStore::open(&path),
            Err(StoreError::Corrupt { line: 3, .. })
        ));
    }
}

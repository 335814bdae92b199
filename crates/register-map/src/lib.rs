//! register-map: schema-driven decoding of charge controller registers
//!
//! A [`RegisterSchema`] says where each metric lives and how its words are
//! decoded. [`MetricReader`] reads one metric over a
//! [`modbus_transport::RegisterBus`], [`SnapshotAssembler`] merges metric
//! groups into a [`Snapshot`], and [`SchemaProjector`] derives the storage
//! columns for the same schema.

mod error;
pub use error::{RegisterError, Result};

mod types;
pub use types::{
    ByteHalf, DecodeKind, EnumMask, EnumTable, MetricGroup, RegisterSpec, VersionPart,
};

mod tables;

mod value;
pub use value::{DecodedValue, FixedPoint, ParseFixedPointError};

mod decode;
pub use decode::{decode, decode_versions, decode_with, DecodeOptions};

mod schema;
pub use schema::{ControllerModel, RegisterSchema};

mod loader;
pub use loader::{load_schema_file, load_schema_str, resolve_schema, schema_to_yaml, SchemaFile};

mod metrics;
pub use metrics::{MetricsHub, RegisterMetrics};

mod reader;
pub use reader::{CancelToken, MetricReader, RetryPolicy};

mod snapshot;
pub use snapshot::{Snapshot, SnapshotAssembler};

mod projector;
pub use projector::{
    create_table_sql, project, ColumnSpec, SchemaProjector, StorageType, CREATED_AT, DEVICE_ID,
};

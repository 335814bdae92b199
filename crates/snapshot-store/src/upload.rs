use crate::{FlushError, SnapshotStore, StoredRow, UploadError};
use register_map::ColumnSpec;
use serde::Serialize;
use tracing::{info, warn};

/// Request body sent to the collector: column names and one value array per row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadBatch {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl UploadBatch {
    pub fn new(table: &str, columns: &[ColumnSpec], rows: &[StoredRow]) -> Self {
        Self {
            table: table.to_string(),
            columns: columns.iter().map(|c| c.name.clone()).collect(),
            rows: rows.iter().map(|r| r.to_record(columns)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Transmits batches of stored rows. `Ok` means the remote side acknowledged them.
pub trait Uploader {
    fn upload(&mut self, batch: &UploadBatch) -> Result<(), UploadError>;
}

impl<U: Uploader + ?Sized> Uploader for &mut U {
    fn upload(&mut self, batch: &UploadBatch) -> Result<(), UploadError> {
        (**self).upload(batch)
    }
}

impl<U: Uploader + ?Sized> Uploader for Box<U> {
    fn upload(&mut self, batch: &UploadBatch) -> Result<(), UploadError> {
        (**self).upload(batch)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub uploaded: usize,
    pub batches: usize,
}

/// Upload pending rows newest first in batches of `batch`, deleting each
/// batch only after the uploader acknowledges it.
///
/// A failed upload leaves the batch in the store for the next flush.
pub fn flush_pending<S, U>(
    store: &mut S,
    uploader: &mut U,
    batch: usize,
) -> Result<FlushReport, FlushError>
where
    S: SnapshotStore + ?Sized,
    U: Uploader + ?Sized,
{
    let batch = batch.max(1);
    let mut report = FlushReport::default();
    loop {
        let rows = store.get_last(batch)?;
        if rows.is_empty() {
            break;
        }
        let body = UploadBatch::new(store.table(), store.columns(), &rows);
        if let Err(source) = uploader.upload(&body) {
            warn!(
                pending = store.len(),
                uploaded = report.uploaded,
                error = %source,
                "upload failed; rows kept"
            );
            return Err(FlushError::Upload {
                uploaded: report.uploaded,
                source,
            });
        }
        let removed = store.delete_last(rows.len())?;
        report.uploaded += removed;
        report.batches += 1;
    }
    if report.uploaded > 0 {
        info!(
            uploaded = report.uploaded,
            batches = report.batches,
            "pending rows flushed"
        );
    }
    Ok(report)
}

#[cfg(feature = "http")]
pub use http::HttpUploader;

#[cfg(feature = "http")]
mod http {
    use super::{UploadBatch, Uploader};
    use crate::UploadError;
    use reqwest::blocking::Client;
    use reqwest::header::AUTHORIZATION;
    use std::time::Duration;
    use tracing::debug;

    /// POSTs each batch as JSON to a collector endpoint.
    #[derive(Debug, Clone)]
    pub struct HttpUploader {
        client: Client,
        url: String,
        token: Option<String>,
    }

    impl HttpUploader {
        pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, UploadError> {
            let client = Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| UploadError::Transport(e.to_string()))?;
            Ok(Self {
                client,
                url: url.into(),
                token: None,
            })
        }

        /// Send `Authorization: Bearer <token>` with every request.
        pub fn with_token(mut self, token: impl Into<String>) -> Self {
            self.token = Some(token.into());
            self
        }

        pub fn url(&self) -> &str {
            &self.url
        }
    }

    impl Uploader for HttpUploader {
        fn upload(&mut self, batch: &UploadBatch) -> Result<(), UploadError> {
            let mut req = self.client.post(&self.url).json(batch);
            if let Some(token) = &self.token {
                req = req.header(AUTHORIZATION, format!("Bearer {token}"));
            }
            let resp = req
                .send()
                .map_err(|e| UploadError::Transport(e.to_string()))?;
            let status = resp.status();
            debug!(url = %self.url, rows = batch.len(), %status, "upload response");
            if !status.is_success() {
                return Err(UploadError::Rejected(status.as_u16()));
            }
            Ok(())
        }
    }
}

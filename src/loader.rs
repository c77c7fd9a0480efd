//! Transform-and-load of one raw object into the destination table.
//!
//! A run walks `Fetch → Parse → Normalize → Dedup → Batch → Write` and always
//! ends in a [`LoadReport`]. Per-record problems are collected into the report;
//! only an unreadable object, an undecodable payload, or a failed insert call
//! end the run as [`LoadStatus::Failed`].

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::domain::{KeyValue, NaturalKey, NormalizedRow};
use crate::error::{PipelineError, RejectionReason};
use crate::normalize::{decode_payload, normalize_value};
use crate::raw_store::RawStore;
use crate::table::{DuplicateOracle, RowError, TableWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStage {
    Fetch,
    Parse,
    Normalize,
    Dedup,
    Batch,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadStatus {
    /// Every new row was written; zero rows is still a success.
    Written,
    /// Some candidate rows were lost to a failed duplicate check or a
    /// per-row write error.
    PartialWritten,
    /// The run stopped before any row could be written.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MalformedPayload,
    FullRunFailure,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunFailure {
    pub stage: LoadStage,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordRejection {
    /// Position of the record in the payload array.
    pub index: usize,
    pub reason: RejectionReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordFailure {
    /// Position of the record in the payload array.
    pub index: usize,
    pub key: KeyValue,
    pub message: String,
}

/// A batched row the writer refused.
///
/// `index` and `key` are absent when the writer names a row outside the
/// submitted batch.
#[derive(Debug, Clone, Serialize)]
pub struct WriteFailure {
    pub index: Option<usize>,
    pub key: Option<KeyValue>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub bucket: String,
    pub object_key: String,
    pub status: LoadStatus,
    /// Last stage the run entered.
    pub stage: LoadStage,
    pub records_seen: usize,
    pub rows_normalized: usize,
    pub duplicates_skipped: usize,
    pub rows_written: usize,
    pub rejections: Vec<RecordRejection>,
    pub check_failures: Vec<RecordFailure>,
    pub write_errors: Vec<WriteFailure>,
    pub failure: Option<RunFailure>,
}

impl LoadReport {
    fn new(bucket: &str, object_key: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            object_key: object_key.to_string(),
            status: LoadStatus::Written,
            stage: LoadStage::Fetch,
            records_seen: 0,
            rows_normalized: 0,
            duplicates_skipped: 0,
            rows_written: 0,
            rejections: Vec::new(),
            check_failures: Vec::new(),
            write_errors: Vec::new(),
            failure: None,
        }
    }

    /// Nothing new was found and nothing went wrong.
    pub fn is_up_to_date(&self) -> bool {
        self.status == LoadStatus::Written && self.rows_written == 0
    }

    /// Any error beyond per-record rejections.
    pub fn has_errors(&self) -> bool {
        self.status != LoadStatus::Written
    }

    fn fail(mut self, kind: FailureKind, err: PipelineError) -> Self {
        warn!(stage = ?self.stage, error = %err, "load failed");
        self.status = LoadStatus::Failed;
        self.failure = Some(RunFailure {
            stage: self.stage,
            kind,
            message: err.to_string(),
        });
        self
    }

    fn finish(mut self) -> Self {
        self.status = if self.check_failures.is_empty() && self.write_errors.is_empty() {
            LoadStatus::Written
        } else {
            LoadStatus::PartialWritten
        };
        info!(
            status = ?self.status,
            records = self.records_seen,
            written = self.rows_written,
            duplicates = self.duplicates_skipped,
            rejected = self.rejections.len(),
            check_failures = self.check_failures.len(),
            write_errors = self.write_errors.len(),
            "load finished"
        );
        self
    }
}

struct Candidate {
    index: usize,
    row: NormalizedRow,
    key: KeyValue,
}

/// Load coordinator.
///
/// Overlapping runs that carry the same natural key can both pass the
/// duplicate check before either writes; only a uniqueness constraint on the
/// destination (or serialized triggering) prevents the resulting duplicate.
#[derive(Clone)]
pub struct Loader<S: RawStore, O: DuplicateOracle, W: TableWriter> {
    store: S,
    oracle: O,
    writer: W,
    natural_key: NaturalKey,
}

impl<S: RawStore, O: DuplicateOracle, W: TableWriter> Loader<S, O, W> {
    pub fn new(store: S, oracle: O, writer: W, natural_key: NaturalKey) -> Self {
        Self {
            store,
            oracle,
            writer,
            natural_key,
        }
    }

    pub fn natural_key(&self) -> &NaturalKey {
        &self.natural_key
    }

    pub fn load_from_blob(&self, bucket: &str, object_key: &str) -> LoadReport {
        let span = info_span!("load", bucket, object_key);
        let _guard = span.enter();
        let mut report = LoadReport::new(bucket, object_key);

        let bytes = match self.store.read(bucket, object_key) {
            Ok(bytes) => bytes,
            Err(err) => return report.fail(FailureKind::FullRunFailure, err),
        };

        report.stage = LoadStage::Parse;
        let records = match decode_payload(&bytes) {
            Ok(records) => records,
            Err(err) => return report.fail(FailureKind::MalformedPayload, err),
        };
        report.records_seen = records.len();
        info!(records = records.len(), "payload decoded");

        report.stage = LoadStage::Normalize;
        let mut normalized = Vec::with_capacity(records.len());
        for (index, value) in records.iter().enumerate() {
            match normalize_value(value) {
                Ok(row) => normalized.push((index, row)),
                Err(reason) => {
                    warn!(index, %reason, "record rejected");
                    report.rejections.push(RecordRejection { index, reason });
                }
            }
        }
        report.rows_normalized = normalized.len();

        report.stage = LoadStage::Dedup;
        let candidates = self.dedup(normalized, &mut report);

        report.stage = LoadStage::Batch;
        let (origins, batch): (Vec<(usize, KeyValue)>, Vec<NormalizedRow>) = candidates
            .into_iter()
            .map(|candidate| ((candidate.index, candidate.key), candidate.row))
            .unzip();
        if batch.is_empty() {
            info!("no new rows to load");
            return report.finish();
        }

        report.stage = LoadStage::Write;
        let row_errors = match self.writer.insert_rows(&batch) {
            Ok(row_errors) => row_errors,
            Err(err) => return report.fail(FailureKind::FullRunFailure, err),
        };

        let mut failed = HashSet::new();
        for RowError { index, message } in row_errors {
            if !failed.insert(index) {
                continue;
            }
            match origins.get(index) {
                Some((payload_index, key)) => {
                    warn!(index = payload_index, %key, %message, "row not written");
                    report.write_errors.push(WriteFailure {
                        index: Some(*payload_index),
                        key: Some(key.clone()),
                        message,
                    });
                }
                None => {
                    warn!(batch_index = index, %message, "writer reported a row outside the batch");
                    report.write_errors.push(WriteFailure {
                        index: None,
                        key: None,
                        message,
                    });
                }
            }
        }
        report.rows_written = batch.len().saturating_sub(failed.len());
        report.finish()
    }

    /// Drops rows whose key repeats within the payload or already exists in
    /// the table. Rows whose check failed are reported and left out.
    fn dedup(
        &self,
        normalized: Vec<(usize, NormalizedRow)>,
        report: &mut LoadReport,
    ) -> Vec<Candidate> {
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(normalized.len());
        for (index, row) in normalized {
            let key = self.natural_key.key_of(&row);
            if !seen.insert(key.clone()) {
                debug!(index, %key, "key repeated within payload; skipping");
                report.duplicates_skipped += 1;
                continue;
            }
            unique.push(Candidate { index, row, key });
        }

        let keys = unique.iter().map(|c| c.key.clone()).collect::<Vec<_>>();
        let mut checks = self.oracle.exists_many(&keys).into_iter();

        let mut survivors = Vec::with_capacity(unique.len());
        for candidate in unique {
            match checks.next() {
                Some(Ok(false)) => survivors.push(candidate),
                Some(Ok(true)) => {
                    debug!(index = candidate.index, key = %candidate.key, "already loaded; skipping");
                    report.duplicates_skipped += 1;
                }
                Some(Err(err)) => {
                    warn!(index = candidate.index, key = %candidate.key, error = %err, "duplicate check failed");
                    report.check_failures.push(RecordFailure {
                        index: candidate.index,
                        key: candidate.key,
                        message: err.to_string(),
                    });
                }
                None => {
                    warn!(index = candidate.index, key = %candidate.key, "duplicate check returned no answer");
                    report.check_failures.push(RecordFailure {
                        index: candidate.index,
                        key: candidate.key,
                        message: PipelineError::DuplicateCheckFailed(
                            "no answer for key".to_string(),
                        )
                        .to_string(),
                    });
                }
            }
        }
        survivors
    }
}

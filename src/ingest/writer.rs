// src/ingest/writer.rs
use metrics::counter;

use crate::ingest::types::NormalizedItem;
use crate::store::{NewsStore, UpsertOutcome};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

impl WriteReport {
    pub fn merge(&mut self, other: &WriteReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.failed += other.failed;
    }
}

/// Upsert every item by permalink. No transaction: a failed item is logged
/// and the rest of the batch still goes through.
pub async fn write_batch(store: &dyn NewsStore, items: &[NormalizedItem]) -> WriteReport {
    let mut report = WriteReport::default();
    for item in items {
        match store.upsert(item).await {
            Ok(UpsertOutcome::Created) => report.created += 1,
            Ok(UpsertOutcome::Updated) => report.updated += 1,
            Err(e) => {
                tracing::error!(target: "ingest", error = ?e, url = %item.url, "upsert failed");
                counter!("ingest_upsert_errors_total").increment(1);
                report.failed += 1;
            }
        }
    }
    counter!("ingest_created_total").increment(report.created as u64);
    counter!("ingest_updated_total").increment(report.updated as u64);
    report
}

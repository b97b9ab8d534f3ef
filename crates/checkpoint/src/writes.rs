use std::collections::BTreeMap;
use std::sync::Arc;

use ny_domain::error::Result;
use ny_domain::trace::TraceEvent;
use ny_store::{DocumentStore, Query};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::{from_document, to_document};
use crate::layout;
use crate::types::PendingWrite;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub stored: usize,
    /// Positional writes already present from an earlier attempt.
    pub skipped: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct WriteRecord {
    task_id: String,
    channel: String,
    write_index: i64,
    #[serde(default)]
    value: Value,
}

/// Pending writes of a step, keyed by `(checkpoint, task, slot)`.
///
/// A write's slot is its position in the producing call, unless its
/// channel is in the known-channel table, which pins it to a fixed
/// negative slot. Positional slots are insert-if-absent, so replaying a
/// partially failed step stores nothing twice. Fixed slots are replaced in
/// place, so a task never holds more than one write per known channel.
#[derive(Clone)]
pub struct WriteLog {
    docs: Arc<dyn DocumentStore>,
    known_channels: Arc<BTreeMap<String, i64>>,
}

impl WriteLog {
    pub fn new(docs: Arc<dyn DocumentStore>, known_channels: BTreeMap<String, i64>) -> Self {
        Self { docs, known_channels: Arc::new(known_channels) }
    }

    pub fn slot_for(&self, channel: &str, position: usize) -> i64 {
        self.known_channels
            .get(channel)
            .copied()
            .unwrap_or(position as i64)
    }

    pub async fn put_writes(
        &self,
        thread_id: &str,
        namespace: &str,
        checkpoint_id: &str,
        task_id: &str,
        writes: &[(String, Value)],
    ) -> Result<WriteReport> {
        let items = layout::write_items(thread_id, namespace, checkpoint_id);
        let mut report = WriteReport::default();

        for (position, (channel, value)) in writes.iter().enumerate() {
            let slot = self.slot_for(channel, position);
            let record = WriteRecord {
                task_id: task_id.to_owned(),
                channel: channel.clone(),
                write_index: slot,
                value: value.clone(),
            };
            let path = items.doc(format!("{task_id}_{slot}"));
            let doc = to_document(&record)?;

            if slot >= 0 {
                if self.docs.create(&path, doc).await? {
                    report.stored += 1;
                } else {
                    report.skipped += 1;
                }
            } else {
                self.docs.set(&path, doc).await?;
                report.stored += 1;
            }
        }

        TraceEvent::WritesStored {
            thread_id: thread_id.to_owned(),
            checkpoint_id: checkpoint_id.to_owned(),
            task_id: task_id.to_owned(),
            stored: report.stored,
            skipped: report.skipped,
        }
        .emit();
        Ok(report)
    }

    /// All pending writes for a checkpoint, ordered by task then slot.
    pub async fn load_writes(
        &self,
        thread_id: &str,
        namespace: &str,
        checkpoint_id: &str,
    ) -> Result<Vec<PendingWrite>> {
        let items = layout::write_items(thread_id, namespace, checkpoint_id);
        let docs = self.docs.list(&items, &Query::by_id()).await?;
        let mut writes = docs
            .into_iter()
            .map(|(_, doc)| {
                let r: WriteRecord = from_document("pending write", doc)?;
                Ok(PendingWrite {
                    task_id: r.task_id,
                    channel: r.channel,
                    value: r.value,
                    write_index: r.write_index,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        writes.sort_by(|a, b| {
            a.task_id
                .cmp(&b.task_id)
                .then(a.write_index.cmp(&b.write_index))
        });
        Ok(writes)
    }
}

//! Key-sharded batch execution.
//!
//! Events go to `workers` tokio tasks through bounded queues. The shard key
//! is `(parking_id, matricula)`: coarser than the visit key, so credential
//! fan-outs stay ordered with the exit/payment events of the same person.
//! Within a shard, input order is kept.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use prk_feed::{FeedKind, RawRecord};
use prk_schemas::FeedEvent;
use tokio::sync::mpsc;
use tracing::warn;

use crate::engine::{BatchReport, ReconcileError, Reconciler};

/// Stable shard index for a person in a lot.
pub fn shard_of(parking_id: i64, matricula: &str, shards: usize) -> usize {
    let mut h = DefaultHasher::new();
    (parking_id, matricula).hash(&mut h);
    (h.finish() % shards.max(1) as u64) as usize
}

impl Reconciler {
    pub(crate) async fn run_sharded(
        &self,
        kind: FeedKind,
        records: &[RawRecord],
        report: &mut BatchReport,
    ) -> Result<(), ReconcileError> {
        let workers = self.settings.workers;
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for _ in 0..workers {
            let (tx, mut rx) = mpsc::channel::<(usize, FeedEvent)>(self.settings.queue_depth);
            let engine = self.clone();
            handles.push(tokio::spawn(async move {
                let mut part = BatchReport::default();
                while let Some((row, event)) = rx.recv().await {
                    engine.ingest_one(row, &event, &mut part).await?;
                }
                Ok::<_, ReconcileError>(part)
            }));
            senders.push(tx);
        }

        for raw in records {
            let Some(event) = self.normalize_counted(kind, raw, report) else {
                continue;
            };
            let shard = shard_of(self.parking.id, event.matricula(), workers);
            if senders[shard].send((raw.row, event)).await.is_err() {
                // the worker hit a fatal error; it is collected below
                warn!(shard, row = raw.row, "shard closed, stopping dispatch");
                break;
            }
        }
        drop(senders);

        let mut fatal = None;
        for (shard, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(Ok(part)) => report.absorb(&part),
                Ok(Err(e)) => {
                    fatal.get_or_insert(e);
                }
                Err(join) => {
                    fatal.get_or_insert(ReconcileError::WorkerFailed(format!("shard {shard}: {join}")));
                }
            }
        }
        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, error, info};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

use super::{Filter, MemoryStore, Store, StoreError};

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL. Appends that queue up while one flush is in progress are
/// written and fsynced together.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            error!("WAL flush of {} events failed: {e}", batch.len());
        }
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
    debug!("WAL writer stopped");
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-buffered bytes do not leak
    // into the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// [`MemoryStore`] whose every change is first made durable in the WAL.
/// Rows are rebuilt from the log on open.
pub struct DurableStore {
    memory: MemoryStore,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Writers hold it shared from append to apply; compaction holds it
    /// exclusively so its snapshot never misses a logged change.
    compaction: RwLock<()>,
    /// Held by updates and deletes from the existence check until the change
    /// is applied, so a delete cannot land between an update's check and its
    /// log entry.
    row_writes: Mutex<()>,
}

impl DurableStore {
    /// Replay the log at `path` and start the writer task. Must be called
    /// inside a Tokio runtime.
    pub fn open(path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&path)?;
        let memory = MemoryStore::new();
        for event in &events {
            memory.apply_event(event);
        }
        info!("replayed {} events, {} rows from {}", events.len(), memory.len(), path.display());

        let wal = Wal::open(&path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));
        Ok(Self {
            memory,
            wal_tx,
            compaction: RwLock::new(()),
            row_writes: Mutex::new(()),
        })
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)??;
        Ok(())
    }

    /// Make `event` durable, then apply it to the in-memory rows.
    async fn persist_and_apply(&self, event: Event) -> Result<(), StoreError> {
        let _guard = self.compaction.read().await;
        self.wal_append(&event).await?;
        self.memory.apply_event(&event);
        Ok(())
    }

    /// Rewrite the log as one insert per live row.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _guard = self.compaction.write().await;
        let events = self.memory.snapshot();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)??;
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl Store for DurableStore {
    async fn insert(&self, body: RecordBody) -> Result<Record, StoreError> {
        let record = MemoryStore::stamp(body);
        self.persist_and_apply(Event::Inserted(record.clone())).await?;
        Ok(record)
    }

    async fn update(&self, id: Ulid, body: RecordBody) -> Result<Record, StoreError> {
        let _rows = self.row_writes.lock().await;
        let record = self.memory.prepare_update(id, body)?;
        self.persist_and_apply(Event::Updated(record.clone())).await?;
        Ok(record)
    }

    async fn delete(&self, table: Table, id: Ulid) -> Result<(), StoreError> {
        let _rows = self.row_writes.lock().await;
        self.memory.ensure_exists(table, id)?;
        self.persist_and_apply(Event::Deleted { table, id }).await
    }

    async fn query(&self, table: Table, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        Ok(self.memory.select(table, filter))
    }

    async fn get(&self, table: Table, id: Ulid) -> Result<Option<Record>, StoreError> {
        Ok(self.memory.find(table, &id))
    }
}

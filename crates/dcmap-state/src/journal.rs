//! Ordered durability queue for collection snapshots.
//!
//! Mutators enqueue a snapshot while they still hold the collection lock,
//! so the queue order is the mutation order. A single writer thread drains
//! the queue into redb; snapshots never reach disk out of order.
//!
//! When several snapshots are waiting, only the newest is written: it
//! supersedes the older ones, and the on-disk state still only moves
//! forward.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use redb::Database;
use tracing::{debug, error};

use crate::codec::Snapshot;
use crate::error::{StoreError, StoreResult, table_err};
use crate::tables::{COLLECTION_KEY, DATACENTERS};

/// Destination of persisted snapshots.
pub(crate) trait SnapshotSink: Send + 'static {
    fn write(&self, snapshot: &Snapshot) -> StoreResult<()>;
}

impl SnapshotSink for Arc<Database> {
    fn write(&self, snapshot: &Snapshot) -> StoreResult<()> {
        write_snapshot(self, snapshot)
    }
}

enum Command {
    Persist { snapshot: Snapshot, queued_at: Instant },
    Flush(Sender<()>),
    Shutdown,
}

/// Sending half of the queue. Cheap to clone.
#[derive(Clone)]
pub(crate) struct Journal {
    tx: Sender<Command>,
}

/// Handle on the writer thread, joined on shutdown.
pub(crate) struct JournalWorker {
    handle: JoinHandle<()>,
}

impl Journal {
    /// Start the writer thread.
    pub(crate) fn spawn(sink: impl SnapshotSink) -> StoreResult<(Self, JournalWorker)> {
        let (tx, rx) = unbounded();
        let handle = std::thread::Builder::new()
            .name("dcmap-journal".to_string())
            .spawn(move || run(sink, rx))
            .map_err(|e| StoreError::Open(format!("failed to start journal writer: {e}")))?;
        Ok((Self { tx }, JournalWorker { handle }))
    }

    /// Queue a snapshot for writing. Never blocks.
    pub(crate) fn submit(&self, snapshot: Snapshot) -> StoreResult<()> {
        self.tx
            .send(Command::Persist {
                snapshot,
                queued_at: Instant::now(),
            })
            .map_err(|_| StoreError::Closed)
    }

    /// Wait until everything queued before this call has been written.
    pub(crate) fn flush(&self, timeout: Option<Duration>) -> StoreResult<()> {
        let (ack_tx, ack_rx) = bounded(1);
        self.tx
            .send(Command::Flush(ack_tx))
            .map_err(|_| StoreError::Closed)?;
        match timeout {
            Some(timeout) => ack_rx.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => StoreError::Timeout,
                RecvTimeoutError::Disconnected => StoreError::Closed,
            }),
            None => ack_rx.recv().map_err(|_| StoreError::Closed),
        }
    }

    /// Write what is pending, then stop the writer thread.
    pub(crate) fn shutdown(self, worker: JournalWorker) {
        let _ = self.tx.send(Command::Shutdown);
        drop(self);
        if worker.handle.join().is_err() {
            error!("journal writer thread panicked");
        }
    }
}

fn run(sink: impl SnapshotSink, rx: Receiver<Command>) {
    debug!("journal writer started");
    while let Ok(first) = rx.recv() {
        let mut latest: Option<(Snapshot, Instant)> = None;
        let mut stop = false;
        for command in std::iter::once(first).chain(rx.try_iter()) {
            match command {
                Command::Persist {
                    snapshot,
                    queued_at,
                } => latest = Some((snapshot, queued_at)),
                Command::Flush(ack) => {
                    if let Some((snapshot, queued_at)) = latest.take() {
                        persist(&sink, &snapshot, queued_at);
                    }
                    let _ = ack.send(());
                }
                Command::Shutdown => {
                    stop = true;
                    break;
                }
            }
        }
        if let Some((snapshot, queued_at)) = latest.take() {
            persist(&sink, &snapshot, queued_at);
        }
        if stop {
            break;
        }
    }
    debug!("journal writer stopped");
}

fn persist(sink: &impl SnapshotSink, snapshot: &Snapshot, queued_at: Instant) {
    let started = Instant::now();
    match sink.write(snapshot) {
        Ok(()) => debug!(
            bytes = snapshot.as_bytes().len(),
            queued_ms = started.duration_since(queued_at).as_millis() as u64,
            write_ms = started.elapsed().as_millis() as u64,
            "snapshot persisted"
        ),
        Err(e) => error!(
            error = %e,
            queued_ms = started.duration_since(queued_at).as_millis() as u64,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "durability write failed"
        ),
    }
}

/// Store a snapshot under the collection key in one write transaction.
pub(crate) fn write_snapshot(db: &Database, snapshot: &Snapshot) -> StoreResult<()> {
    let txn = db.begin_write().map_err(map_err!(Transaction))?;
    {
        let mut table = txn.open_table(DATACENTERS).map_err(table_err)?;
        table
            .insert(COLLECTION_KEY, snapshot.as_bytes())
            .map_err(map_err!(Write))?;
    }
    txn.commit().map_err(map_err!(Transaction))?;
    Ok(())
}

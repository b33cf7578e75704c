mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use conflict::check_capacity;
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::catalog::SpaceCatalog;
use crate::model::*;
use crate::wal::Wal;

pub type SharedSpaceState = Arc<RwLock<SpaceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Each wake-up takes the first append plus every append already queued,
/// writes them all, and fsyncs once for the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
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
        commit_batch(&mut wal, batch);
        // Compaction must observe every append queued ahead of it.
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't bleed into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// In-memory reservation store backed by the WAL. One partition per space type, so a
/// capacity check and the write it guards happen under the same lock.
pub struct Engine {
    spaces: DashMap<SpaceType, SharedSpaceState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    catalog: Arc<SpaceCatalog>,
    /// Reverse lookup: reservation id → space partition.
    pub(super) reservation_index: DashMap<Ulid, SpaceType>,
}

/// Apply an event to a partition (caller holds its write lock).
fn apply_event(ss: &mut SpaceState, event: &Event, index: &DashMap<Ulid, SpaceType>) {
    match event {
        Event::ReservationCreated { reservation } => {
            ss.insert_reservation(reservation.clone());
            index.insert(reservation.id, reservation.space_type);
        }
        Event::ReservationUpdated { reservation } => {
            ss.replace_reservation(reservation.clone());
            index.insert(reservation.id, reservation.space_type);
        }
        Event::ReservationDeleted { id, .. } => {
            ss.remove_reservation(*id);
            index.remove(id);
        }
    }
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task. Must run inside a Tokio runtime.
    pub fn new(wal_path: PathBuf, catalog: Arc<SpaceCatalog>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            spaces: SpaceType::ALL
                .into_iter()
                .map(|t| (t, Arc::new(RwLock::new(SpaceState::new(t)))))
                .collect(),
            wal_tx,
            catalog,
            reservation_index: DashMap::new(),
        };

        // Sole owner of the partitions during replay, so try_write never contends.
        // blocking_write would panic here when called from async code.
        for event in &events {
            let Some(space) = engine.space(event.space_type()) else {
                continue;
            };
            let mut guard = space
                .try_write()
                .map_err(|_| io::Error::other("replay: partition locked"))?;
            apply_event(&mut guard, event, &engine.reservation_index);
        }

        tracing::info!(
            events = events.len(),
            reservations = engine.reservation_index.len(),
            "reservation journal replayed"
        );
        Ok(engine)
    }

    pub fn catalog(&self) -> &Arc<SpaceCatalog> {
        &self.catalog
    }

    pub(super) fn space(&self, space_type: SpaceType) -> Option<SharedSpaceState> {
        self.spaces.get(&space_type).map(|e| e.value().clone())
    }

    pub(super) fn space_types(&self) -> Vec<SpaceType> {
        let mut types: Vec<SpaceType> = self.spaces.iter().map(|e| *e.key()).collect();
        types.sort();
        types
    }

    /// Send an event to the group-commit writer and wait for its fsync.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Durable first, then visible.
    pub(super) async fn persist_and_apply(
        &self,
        ss: &mut SpaceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_event(ss, event, &self.reservation_index);
        Ok(())
    }

    /// Lookup reservation → partition and take its write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<SpaceState>, EngineError> {
        let space_type = self
            .reservation_index
            .get(id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(*id))?;
        let space = self
            .space(space_type)
            .ok_or(EngineError::NotFound(*id))?;
        Ok(space.write_owned().await)
    }
}

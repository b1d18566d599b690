mod compact;
mod error;
mod registry;
mod unit_of_work;

pub use error::StoreError;
pub use unit_of_work::{Committed, UnitOfWork};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};

use crate::model::*;
use crate::wal::Wal;

pub type SharedService = Arc<RwLock<Service>>;
pub type SharedEvent = Arc<RwLock<Event>>;

/// Catalog entry. Only the `Service` variant can be reserved.
#[derive(Clone)]
pub enum Merchandise {
    Product(Arc<Product>),
    Service(SharedService),
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        change: Change,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        changes: Vec<Change>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { change, response } => {
                let mut batch = vec![(change, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { change, response }) => {
                            batch.push((change, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Change, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (change, _) in batch {
        if let Err(e) = wal.append_buffered(change) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err.or(flush_err) {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: Vec<(Change, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { changes, response } => {
            let result = Wal::write_compact_file(wal.path(), &changes)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Durable home of services, events and users.
///
/// Every aggregate that a reservation mutates sits behind its own `RwLock`.
/// Writers lock a service before its event, never the other way round.
pub struct Store {
    merchandise: DashMap<MerchandiseId, Merchandise>,
    events: DashMap<EventId, SharedEvent>,
    users: DashMap<UserId, User>,
    /// Reverse lookup: merchandise id → owning provider id
    merchandise_owner: DashMap<MerchandiseId, UserId>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Held shared by every writer, exclusively by compaction.
    commit_gate: RwLock<()>,
    /// Serializes merchandise upserts; an id never changes kind.
    catalog_lock: Mutex<()>,
}

impl Store {
    /// Replay the WAL at `wal_path` and start the group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let changes = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            merchandise: DashMap::new(),
            events: DashMap::new(),
            users: DashMap::new(),
            merchandise_owner: DashMap::new(),
            wal_tx,
            commit_gate: RwLock::new(()),
            catalog_lock: Mutex::new(()),
        };
        for change in &changes {
            store.replay_change(change);
        }
        tracing::debug!("replayed {} changes from {}", changes.len(), wal_path.display());
        Ok(store)
    }

    /// Apply a replayed change. We're the sole owner of every lock here, so
    /// try_write always succeeds. Never block: this may run inside an async context.
    fn replay_change(&self, change: &Change) {
        match change {
            Change::UserSaved(user) => {
                self.users.insert(user.id, user.clone());
            }
            Change::ProductSaved(product) => self.insert_product(product.clone()),
            Change::ServiceSaved { info, terms } => match self.shared_service(info.id) {
                Some(shared) => {
                    let mut guard = shared.try_write().expect("replay: uncontended write");
                    self.merchandise_owner.insert(info.id, info.provider_id);
                    guard.info = info.clone();
                    guard.terms = *terms;
                }
                None => self.insert_service(Service::new(info.clone(), *terms)),
            },
            Change::ServiceRestored(service) => self.insert_service(service.clone()),
            Change::EventSaved(event) => match self.shared_event(event.id) {
                Some(shared) => {
                    *shared.try_write().expect("replay: uncontended write") = event.clone();
                }
                None => {
                    self.events.insert(event.id, Arc::new(RwLock::new(event.clone())));
                }
            },
            Change::ReservationCommitted { .. } | Change::ReservationReverted { .. } => {
                let Some((service_id, event_id)) = reservation_target(change) else {
                    return;
                };
                let service = self.shared_service(service_id);
                let event = self.shared_event(event_id);
                if let (Some(service), Some(event)) = (service, event) {
                    let mut s = service.try_write().expect("replay: uncontended write");
                    let mut e = event.try_write().expect("replay: uncontended write");
                    apply_reservation(&mut s, &mut e, change);
                }
            }
        }
    }

    fn insert_product(&self, product: Product) {
        self.merchandise_owner
            .insert(product.info.id, product.info.provider_id);
        self.merchandise
            .insert(product.info.id, Merchandise::Product(Arc::new(product)));
    }

    fn insert_service(&self, service: Service) {
        self.merchandise_owner
            .insert(service.info.id, service.info.provider_id);
        self.merchandise.insert(
            service.info.id,
            Merchandise::Service(Arc::new(RwLock::new(service))),
        );
    }

    /// Write a change to the WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, change: &Change) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                change: change.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    pub(super) fn shared_service(&self, id: ServiceId) -> Option<SharedService> {
        match self.merchandise.get(&id)?.value() {
            Merchandise::Service(shared) => Some(shared.clone()),
            Merchandise::Product(_) => None,
        }
    }

    pub(super) fn is_product(&self, id: MerchandiseId) -> bool {
        self.merchandise
            .get(&id)
            .is_some_and(|m| matches!(m.value(), Merchandise::Product(_)))
    }

    pub(super) fn shared_event(&self, id: EventId) -> Option<SharedEvent> {
        self.events.get(&id).map(|e| e.value().clone())
    }

    // ── Lookups ──────────────────────────────────────────────

    /// Snapshot of a service that can currently be reserved.
    pub async fn find_available_service(&self, id: ServiceId) -> Option<Service> {
        let shared = self.shared_service(id)?;
        let guard = shared.read().await;
        guard.info.is_available().then(|| guard.clone())
    }

    /// Snapshot of a service regardless of availability.
    pub async fn find_service(&self, id: ServiceId) -> Option<Service> {
        let shared = self.shared_service(id)?;
        let guard = shared.read().await;
        Some(guard.clone())
    }

    pub async fn find_event(&self, id: EventId) -> Option<Event> {
        let shared = self.shared_event(id)?;
        let guard = shared.read().await;
        Some(guard.clone())
    }

    pub fn find_user(&self, id: UserId) -> Option<User> {
        self.users.get(&id).map(|e| e.value().clone())
    }

    /// The provider that owns a piece of merchandise.
    pub fn find_provider_by_merchandise_id(&self, id: MerchandiseId) -> Option<User> {
        let owner = *self.merchandise_owner.get(&id)?.value();
        self.find_user(owner).filter(|u| u.role == Role::Provider)
    }

    /// Ids of every service owned by a provider, ascending.
    pub fn service_ids_owned_by(&self, provider_id: UserId) -> Vec<ServiceId> {
        let mut ids: Vec<ServiceId> = self
            .merchandise_owner
            .iter()
            .filter(|e| *e.value() == provider_id)
            .map(|e| *e.key())
            .filter(|id| self.shared_service(*id).is_some())
            .collect();
        ids.sort_unstable();
        ids
    }

    // ── Locking ──────────────────────────────────────────────

    /// Write-lock a service, yielding it only if it is currently available.
    /// Availability is judged under the lock.
    pub async fn lock_available_service(
        &self,
        id: ServiceId,
    ) -> Option<OwnedRwLockWriteGuard<Service>> {
        let guard = self.shared_service(id)?.write_owned().await;
        guard.info.is_available().then_some(guard)
    }

    pub async fn lock_event(&self, id: EventId) -> Option<OwnedRwLockWriteGuard<Event>> {
        Some(self.shared_event(id)?.write_owned().await)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
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

/// Extract the (service, event) pair a reservation change touches.
fn reservation_target(change: &Change) -> Option<(ServiceId, EventId)> {
    match change {
        Change::ReservationCommitted { timeslot, .. } => {
            Some((timeslot.service_id, timeslot.event_id))
        }
        Change::ReservationReverted {
            service_id,
            event_id,
            ..
        } => Some((*service_id, *event_id)),
        _ => None,
    }
}

/// Apply a reservation change to its service and event (caller holds both locks).
fn apply_reservation(service: &mut Service, event: &mut Event, change: &Change) {
    match change {
        Change::ReservationCommitted { timeslot, budget } => {
            service.insert_timeslot(timeslot.clone());
            event.budget.apply(budget);
        }
        Change::ReservationReverted {
            timeslot_id,
            budget,
            ..
        } => {
            service.remove_timeslot(*timeslot_id);
            event.budget.revert(budget);
        }
        _ => {}
    }
}

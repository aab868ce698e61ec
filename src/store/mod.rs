//! Durable booking storage.
//!
//! Every conflict scope (one tutor or one user on one date) is its own
//! `RwLock<DaySchedule>`, so writers only serialize with writers touching the
//! same party on the same day. Users and tutors carry a liveness lock that a
//! create holds shared and a cascade delete holds exclusively.
//!
//! Lock order, outermost first: commit gate (shared), party liveness,
//! tutor scope, user scope. Compaction is the only exclusive holder of the
//! commit gate and holds nothing else while waiting for it.
//!
//! A scope lock exists while its day holds bookings or someone has it checked
//! out. [`ReservationStore::reclaim_idle_scopes`] drops the rest, so the map
//! stays proportional to live bookings rather than to every day ever touched.

mod error;
mod registry;
mod txn;
mod writer;

pub use error::StoreError;
pub use txn::ScopeTxn;

use std::collections::BTreeSet;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock, RwLockWriteGuard};
use tracing::info;

use crate::model::*;
use crate::wal::Wal;

use writer::{Control, WalCommand};

pub type SharedDay = Arc<RwLock<DaySchedule>>;

/// `true` while the party exists. Held shared by creates, exclusively by removal.
pub(crate) type Liveness = Arc<RwLock<bool>>;

pub(crate) struct PartyEntry<T> {
    pub record: T,
    pub liveness: Liveness,
}

impl<T> PartyEntry<T> {
    fn new(record: T) -> Self {
        Self {
            record,
            liveness: Arc::new(RwLock::new(true)),
        }
    }
}

pub struct ReservationStore {
    scopes: DashMap<ScopeKey, SharedDay>,
    bookings: DashMap<BookingId, Booking>,
    users: DashMap<UserId, PartyEntry<User>>,
    emails: DashMap<String, UserId>,
    /// Password hashes by user. Users registered without one have no entry.
    credentials: DashMap<UserId, String>,
    tutors: DashMap<TutorId, PartyEntry<Tutor>>,
    /// Dates on which a party holds at least one booking, ascending.
    days: DashMap<Party, BTreeSet<NaiveDate>>,
    commit_gate: RwLock<()>,
    wal_tx: mpsc::Sender<WalCommand>,
    lock_timeout: Duration,
}

impl ReservationStore {
    /// Replay the WAL at `wal_path`, cut any torn tail, and start the
    /// group-commit writer. Must be called inside a tokio runtime.
    pub fn open(wal_path: PathBuf, lock_timeout: Duration) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(writer::run_wal_writer(wal, wal_rx));

        let store = Self {
            scopes: DashMap::new(),
            bookings: DashMap::new(),
            users: DashMap::new(),
            emails: DashMap::new(),
            credentials: DashMap::new(),
            tutors: DashMap::new(),
            days: DashMap::new(),
            commit_gate: RwLock::new(()),
            wal_tx,
            lock_timeout,
        };

        // Nothing else can see the store yet, so every try_write succeeds.
        for event in &events {
            store.replay_event(event)?;
        }
        info!(
            "replayed {} events: {} users, {} tutors, {} bookings",
            events.len(),
            store.users.len(),
            store.tutors.len(),
            store.bookings.len()
        );
        Ok(store)
    }

    fn replay_event(&self, event: &Event) -> io::Result<()> {
        match event {
            Event::UserRegistered { id, email, credential } => {
                self.emails.insert(email.clone(), *id);
                if let Some(hash) = credential {
                    self.credentials.insert(*id, hash.clone());
                }
                self.users.insert(
                    *id,
                    PartyEntry::new(User {
                        id: *id,
                        email: email.clone(),
                    }),
                );
            }
            Event::UserRemoved { id } => {
                self.replay_purge(Party::User(*id))?;
                if let Some((_, entry)) = self.users.remove(id) {
                    self.emails.remove(&entry.record.email);
                }
                self.credentials.remove(id);
            }
            Event::TutorAdded { id, name } => {
                self.tutors.insert(
                    *id,
                    PartyEntry::new(Tutor {
                        id: *id,
                        name: name.clone(),
                    }),
                );
            }
            Event::TutorRemoved { id } => {
                self.replay_purge(Party::Tutor(*id))?;
                self.tutors.remove(id);
            }
            Event::BookingCreated { booking } => {
                let tutor_day = self.day(booking.tutor_scope());
                let user_day = self.day(booking.user_scope());
                let mut t = replay_guard(&tutor_day)?;
                let mut u = replay_guard(&user_day)?;
                self.link(booking, &mut t, &mut u);
            }
            Event::BookingCancelled { id } => {
                let Some(booking) = self.find_by_id(id) else {
                    return Ok(());
                };
                self.replay_unlink(&booking)?;
            }
        }
        Ok(())
    }

    fn replay_unlink(&self, booking: &Booking) -> io::Result<()> {
        let tutor_day = self.day(booking.tutor_scope());
        let user_day = self.day(booking.user_scope());
        let mut t = replay_guard(&tutor_day)?;
        let mut u = replay_guard(&user_day)?;
        self.unlink(booking, &mut t, &mut u);
        Ok(())
    }

    fn replay_purge(&self, party: Party) -> io::Result<()> {
        for booking in self.party_bookings_now(party)? {
            self.replay_unlink(&booking)?;
        }
        self.days.remove(&party);
        Ok(())
    }

    fn party_bookings_now(&self, party: Party) -> io::Result<Vec<Booking>> {
        let mut out = Vec::new();
        for date in self.party_dates(party) {
            if let Some(day) = self.existing_day(ScopeKey::new(party, date)) {
                let guard = day
                    .try_read()
                    .map_err(|_| io::Error::other("replay: scope contended"))?;
                out.extend(guard.bookings.iter().cloned());
            }
        }
        Ok(out)
    }

    // ── Scope plumbing ───────────────────────────────────────

    /// Get or create the lock for a scope. The clone is taken under the map's
    /// shard lock, and entries are only reclaimed while nobody holds a clone,
    /// so every caller for the same key observes the same lock.
    pub(crate) fn day(&self, key: ScopeKey) -> SharedDay {
        self.scopes
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(DaySchedule::new())))
            .clone()
    }

    fn existing_day(&self, key: ScopeKey) -> Option<SharedDay> {
        self.scopes.get(&key).map(|e| e.value().clone())
    }

    /// Drop scope locks that hold no bookings and that no caller has checked
    /// out. Returns how many were dropped.
    pub fn reclaim_idle_scopes(&self) -> usize {
        let mut reclaimed = 0;
        self.scopes.retain(|_, day| {
            let idle = Arc::strong_count(day) == 1 && day.try_read().is_ok_and(|d| d.is_empty());
            if idle {
                reclaimed += 1;
            }
            !idle
        });
        reclaimed
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    fn party_dates(&self, party: Party) -> BTreeSet<NaiveDate> {
        self.days
            .get(&party)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Await `fut`, giving up with `Contention` after the lock timeout.
    pub(crate) async fn bounded<F: Future>(&self, fut: F) -> Result<F::Output, StoreError> {
        tokio::time::timeout(self.lock_timeout, fut)
            .await
            .map_err(|_| StoreError::Contention)
    }

    pub(crate) async fn write_scope(
        &self,
        key: ScopeKey,
    ) -> Result<OwnedRwLockWriteGuard<DaySchedule>, StoreError> {
        self.bounded(self.day(key).write_owned()).await
    }

    /// Insert into both scopes and the indexes. Caller holds both scope locks.
    pub(crate) fn link(&self, booking: &Booking, tutor_day: &mut DaySchedule, user_day: &mut DaySchedule) {
        tutor_day.insert(booking.clone());
        user_day.insert(booking.clone());
        self.bookings.insert(booking.id, booking.clone());
        self.days
            .entry(Party::Tutor(booking.tutor_id))
            .or_default()
            .insert(booking.date);
        self.days
            .entry(Party::User(booking.user_id))
            .or_default()
            .insert(booking.date);
    }

    /// Remove from both scopes and the indexes. Caller holds both scope locks.
    pub(crate) fn unlink(&self, booking: &Booking, tutor_day: &mut DaySchedule, user_day: &mut DaySchedule) {
        tutor_day.remove(booking.id);
        user_day.remove(booking.id);
        self.bookings.remove(&booking.id);
        if tutor_day.is_empty() {
            self.forget_day(Party::Tutor(booking.tutor_id), booking.date);
        }
        if user_day.is_empty() {
            self.forget_day(Party::User(booking.user_id), booking.date);
        }
    }

    fn forget_day(&self, party: Party, date: NaiveDate) {
        if let Some(mut dates) = self.days.get_mut(&party) {
            dates.remove(&date);
        }
    }

    // ── WAL ──────────────────────────────────────────────────

    /// Durably append one event through the group-commit writer.
    pub(crate) async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    /// Rewrite the WAL as the minimal event list that recreates current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _exclusive = self.commit_gate.write().await;

        let mut events: Vec<Event> = Vec::new();
        events.extend(self.users.iter().map(|e| Event::UserRegistered {
            id: e.record.id,
            email: e.record.email.clone(),
            credential: self.credential(&e.record.id),
        }));
        events.extend(self.tutors.iter().map(|e| Event::TutorAdded {
            id: e.record.id,
            name: e.record.name.clone(),
        }));
        let mut bookings: Vec<Booking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        bookings.sort_by_key(|b| b.id);
        events.extend(bookings.into_iter().map(|booking| Event::BookingCreated { booking }));

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Control(Control::Compact { events, response: tx }))
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::Control(Control::AppendsSinceCompact { response: tx }))
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    // ── Reads ────────────────────────────────────────────────

    pub fn find_by_id(&self, id: &BookingId) -> Option<Booking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    async fn scope_snapshot(&self, key: ScopeKey) -> Vec<Booking> {
        match self.existing_day(key) {
            Some(day) => day.read().await.bookings.clone(),
            None => Vec::new(),
        }
    }

    pub async fn bookings_for_tutor_on_date(&self, tutor_id: TutorId, date: NaiveDate) -> Vec<Booking> {
        self.scope_snapshot(ScopeKey::new(Party::Tutor(tutor_id), date))
            .await
    }

    pub async fn bookings_for_user_on_date(&self, user_id: UserId, date: NaiveDate) -> Vec<Booking> {
        self.scope_snapshot(ScopeKey::new(Party::User(user_id), date))
            .await
    }

    /// All bookings of a user, by date then start time.
    pub async fn bookings_for_user(&self, user_id: UserId) -> Vec<Booking> {
        let party = Party::User(user_id);
        let mut out = Vec::new();
        for date in self.party_dates(party) {
            out.extend(self.scope_snapshot(ScopeKey::new(party, date)).await);
        }
        out
    }
}

fn replay_guard(day: &SharedDay) -> io::Result<RwLockWriteGuard<'_, DaySchedule>> {
    day.try_write()
        .map_err(|_| io::Error::other("replay: scope contended"))
}

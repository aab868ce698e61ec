use dashmap::mapref::entry::Entry;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{PartyEntry, ReservationStore, StoreError};

impl ReservationStore {
    // ── Users ────────────────────────────────────────────────

    /// Register a user under a unique, case-insensitive email, with no login
    /// credential. Used for seeding and by tests.
    pub async fn register_user(&self, email: &str) -> Result<User, StoreError> {
        self.register(email, None).await
    }

    /// Register a user together with the password hash they log in with.
    /// The hash is written in the same WAL record as the user.
    pub async fn register_user_with_credential(
        &self,
        email: &str,
        credential: String,
    ) -> Result<User, StoreError> {
        self.register(email, Some(credential)).await
    }

    async fn register(&self, email: &str, credential: Option<String>) -> Result<User, StoreError> {
        let email = email.trim().to_lowercase();
        if email.len() > MAX_EMAIL_LEN {
            return Err(StoreError::LimitExceeded("email too long"));
        }
        if self.users.len() >= MAX_USERS {
            return Err(StoreError::LimitExceeded("too many users"));
        }
        let _gate = self.commit_gate.read().await;

        let id = Ulid::new();
        match self.emails.entry(email.clone()) {
            Entry::Occupied(_) => return Err(StoreError::EmailTaken(email)),
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let event = Event::UserRegistered {
            id,
            email: email.clone(),
            credential: credential.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            self.emails.remove(&email);
            return Err(e);
        }
        if let Some(hash) = credential {
            self.credentials.insert(id, hash);
        }
        let user = User { id, email };
        self.users.insert(id, PartyEntry::new(user.clone()));
        info!("registered user {id}");
        Ok(user)
    }

    pub fn get_user(&self, id: &UserId) -> Option<User> {
        self.users.get(id).map(|e| e.record.clone())
    }

    pub fn find_user_by_email(&self, email: &str) -> Option<User> {
        let id = *self.emails.get(&email.trim().to_lowercase())?;
        self.get_user(&id)
    }

    /// Password hash stored at registration, if the user has one.
    pub fn credential(&self, id: &UserId) -> Option<String> {
        self.credentials.get(id).map(|e| e.value().clone())
    }

    /// Remove a user and every booking they own.
    /// Returns the number of bookings removed.
    pub async fn remove_user(&self, id: UserId) -> Result<usize, StoreError> {
        let _gate = self.commit_gate.read().await;
        let liveness = self
            .users
            .get(&id)
            .map(|e| e.liveness.clone())
            .ok_or(StoreError::UnknownUser(id))?;

        // Waits for in-flight creates by this user; blocks new ones.
        let mut live = liveness.write().await;
        if !*live {
            return Err(StoreError::UnknownUser(id));
        }
        self.wal_append(&Event::UserRemoved { id }).await?;
        *live = false;

        let purged = self.purge(Party::User(id)).await;
        if let Some((_, entry)) = self.users.remove(&id) {
            self.emails.remove(&entry.record.email);
        }
        self.credentials.remove(&id);
        info!("removed user {id} and {purged} bookings");
        Ok(purged)
    }

    // ── Tutors ───────────────────────────────────────────────

    pub async fn add_tutor(&self, name: &str) -> Result<Tutor, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::LimitExceeded("tutor name empty"));
        }
        if name.len() > MAX_TUTOR_NAME_LEN {
            return Err(StoreError::LimitExceeded("tutor name too long"));
        }
        if self.tutors.len() >= MAX_TUTORS {
            return Err(StoreError::LimitExceeded("too many tutors"));
        }
        let _gate = self.commit_gate.read().await;

        let tutor = Tutor {
            id: Ulid::new(),
            name: name.to_string(),
        };
        self.wal_append(&Event::TutorAdded {
            id: tutor.id,
            name: tutor.name.clone(),
        })
        .await?;
        self.tutors.insert(tutor.id, PartyEntry::new(tutor.clone()));
        info!("added tutor {} ({})", tutor.id, tutor.name);
        Ok(tutor)
    }

    pub fn get_tutor(&self, id: &TutorId) -> Option<Tutor> {
        self.tutors.get(id).map(|e| e.record.clone())
    }

    pub fn tutor_count(&self) -> usize {
        self.tutors.len()
    }

    /// Tutors ordered by display name, ties broken by id.
    pub fn tutors_by_name(&self) -> Vec<Tutor> {
        let mut tutors: Vec<Tutor> = self.tutors.iter().map(|e| e.record.clone()).collect();
        tutors.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        tutors
    }

    /// Remove a tutor and every booking with them.
    /// Returns the number of bookings removed.
    pub async fn remove_tutor(&self, id: TutorId) -> Result<usize, StoreError> {
        let _gate = self.commit_gate.read().await;
        let liveness = self
            .tutors
            .get(&id)
            .map(|e| e.liveness.clone())
            .ok_or(StoreError::UnknownTutor(id))?;

        let mut live = liveness.write().await;
        if !*live {
            return Err(StoreError::UnknownTutor(id));
        }
        self.wal_append(&Event::TutorRemoved { id }).await?;
        *live = false;

        let purged = self.purge(Party::Tutor(id)).await;
        self.tutors.remove(&id);
        info!("removed tutor {id} and {purged} bookings");
        Ok(purged)
    }

    // ── Cascade ──────────────────────────────────────────────

    /// Unlink every booking of a party whose liveness lock is held exclusively,
    /// so no new booking for it can appear while this runs. Waits on scope
    /// locks without a timeout: the removal is already durable.
    async fn purge(&self, party: Party) -> usize {
        let mut purged = 0;
        for date in self.party_dates(party) {
            let snapshot = self.scope_snapshot(ScopeKey::new(party, date)).await;
            for booking in snapshot {
                let tutor_day = self.day(booking.tutor_scope());
                let user_day = self.day(booking.user_scope());
                let mut tutor_day = tutor_day.write_owned().await;
                let mut user_day = user_day.write_owned().await;
                if self.bookings.contains_key(&booking.id) {
                    self.unlink(&booking, &mut tutor_day, &mut user_day);
                    purged += 1;
                }
            }
        }
        self.days.remove(&party);
        purged
    }
}

use async_trait::async_trait;
use tracing::info;

use crate::model::Tutor;
use crate::store::{ReservationStore, StoreError};

/// Read-only source of tutors.
#[async_trait]
pub trait Directory: Send + Sync {
    /// All tutors by display name, ascending.
    async fn list_tutors(&self) -> Vec<Tutor>;
}

#[async_trait]
impl Directory for ReservationStore {
    async fn list_tutors(&self) -> Vec<Tutor> {
        self.tutors_by_name()
    }
}

/// Add `names` as tutors if the store has none yet. Returns how many were added.
pub async fn seed_tutors(store: &ReservationStore, names: &[String]) -> Result<usize, StoreError> {
    if store.tutor_count() > 0 {
        return Ok(0);
    }
    let mut added = 0;
    for name in names.iter().filter(|n| !n.trim().is_empty()) {
        store.add_tutor(name).await?;
        added += 1;
    }
    if added > 0 {
        info!("seeded {added} tutors");
    }
    Ok(added)
}

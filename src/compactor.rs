use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::observability;
use crate::store::ReservationStore;

/// Background task that rewrites the WAL once enough appends pile up and
/// drops scope locks left idle by cancellations and cascades.
pub async fn run_compactor(store: Arc<ReservationStore>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_needed(&store, threshold).await;
        let reclaimed = store.reclaim_idle_scopes();
        if reclaimed > 0 {
            debug!(
                "compactor: reclaimed {reclaimed} idle scopes, {} remain",
                store.scope_count()
            );
        }
    }
}

/// Compact when at least `threshold` events were appended since the last
/// compaction. Returns whether it compacted.
pub async fn compact_if_needed(store: &ReservationStore, threshold: u64) -> bool {
    let appended = store.appends_since_compact().await;
    if appended < threshold {
        debug!("compactor: {appended} appends, below threshold {threshold}");
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
            info!(
                "compacted WAL after {appended} appends, {} bookings live",
                store.booking_count()
            );
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::Wal;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("tutorbook_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let store = ReservationStore::open(path.clone(), Duration::from_millis(250)).unwrap();
        for i in 0..5 {
            let tutor = store.add_tutor(&format!("Tutor {i}")).await.unwrap();
            store.remove_tutor(tutor.id).await.unwrap();
        }
        assert!(!compact_if_needed(&store, 100).await);
        assert_eq!(Wal::replay(&path).unwrap().len(), 10);

        assert!(compact_if_needed(&store, 10).await);
        assert!(Wal::replay(&path).unwrap().is_empty());
        assert_eq!(store.appends_since_compact().await, 0);
    }

    #[tokio::test]
    async fn background_loop_reclaims_idle_scopes() {
        let path = test_wal_path("loop_reclaim.wal");
        let store = Arc::new(ReservationStore::open(path, Duration::from_millis(250)).unwrap());
        let tutor = store.add_tutor("Ada").await.unwrap();
        let user = store.register_user("u@test.com").await.unwrap();
        let date = chrono::NaiveDate::from_ymd_opt(2024, 12, 25).unwrap();
        let slot = crate::model::Interval::new(
            chrono::NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            chrono::NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
        );
        let txn = store.begin(tutor.id, user.id, date).await.unwrap();
        let booking = txn.commit(slot).await.unwrap();
        store.delete(booking.id, user.id).await.unwrap();
        assert_eq!(store.scope_count(), 2);

        let task = tokio::spawn(run_compactor(store.clone(), u64::MAX, Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.scope_count(), 0);
        task.abort();
    }
}

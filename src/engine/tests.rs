use super::*;
use super::conflict::overlaps;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("tutorbook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn christmas() -> NaiveDate {
    date(2024, 12, 25)
}

/// Engine whose "today" is 2024-12-20, with a generous lock timeout.
fn test_engine(name: &str) -> ReservationEngine {
    engine_with_timeout(name, Duration::from_secs(5), RetryPolicy::default())
}

fn engine_with_timeout(name: &str, lock_timeout: Duration, retry: RetryPolicy) -> ReservationEngine {
    let store = ReservationStore::open(test_wal_path(name), lock_timeout).unwrap();
    ReservationEngine::new(Arc::new(store))
        .with_clock(Arc::new(FixedClock(date(2024, 12, 20))))
        .with_retry(retry)
}

async fn users(engine: &ReservationEngine, n: usize) -> Vec<User> {
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        out.push(
            engine
                .store()
                .register_user(&format!("user{i}@test.com"))
                .await
                .unwrap(),
        );
    }
    out
}

fn assert_pairwise_disjoint(bookings: &[Booking]) {
    for (i, a) in bookings.iter().enumerate() {
        for b in &bookings[i + 1..] {
            assert!(
                !overlaps(&a.interval(), &b.interval()),
                "overlap: {a:?} and {b:?}"
            );
        }
    }
}

// ── Single-threaded behaviour ────────────────────────────

#[tokio::test]
async fn booking_walkthrough() {
    let engine = test_engine("walkthrough.wal");
    let store = engine.store().clone();
    let ada = store.add_tutor("Ada").await.unwrap();
    let grace = store.add_tutor("Grace").await.unwrap();
    let u1 = store.register_user("u1@test.com").await.unwrap();
    let u2 = store.register_user("u2@test.com").await.unwrap();

    let b1 = engine
        .create(ada.id, u1.id, christmas(), t(10, 0), t(11, 0))
        .await
        .unwrap();
    assert_eq!(b1.start, t(10, 0));

    // Same tutor, overlapping, different user.
    let err = engine
        .create(ada.id, u2.id, christmas(), t(10, 30), t(11, 30))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(ConflictReason::TutorBusy)));

    // Back-to-back is fine.
    engine
        .create(ada.id, u2.id, christmas(), t(11, 0), t(12, 0))
        .await
        .unwrap();

    // Same user, overlapping, different tutor.
    let err = engine
        .create(grace.id, u1.id, christmas(), t(10, 30), t(11, 30))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(ConflictReason::UserBusy)));

    // Cancel frees the slot.
    engine.cancel(b1.id, u1.id).await.unwrap();
    engine
        .create(ada.id, u2.id, christmas(), t(10, 0), t(11, 0))
        .await
        .unwrap();
    assert!(engine.list(u1.id).await.is_empty());
    assert_eq!(engine.list(u2.id).await.len(), 2);
}

#[tokio::test]
async fn tutor_conflict_reported_before_user_conflict() {
    let engine = test_engine("reason_order.wal");
    let store = engine.store().clone();
    let ada = store.add_tutor("Ada").await.unwrap();
    let user = store.register_user("u@test.com").await.unwrap();
    engine
        .create(ada.id, user.id, christmas(), t(10, 0), t(11, 0))
        .await
        .unwrap();

    let err = engine
        .create(ada.id, user.id, christmas(), t(10, 0), t(11, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(ConflictReason::TutorBusy)));
}

#[tokio::test]
async fn past_date_rejected_without_side_effects() {
    let engine = test_engine("past_date.wal");
    let store = engine.store().clone();
    let ada = store.add_tutor("Ada").await.unwrap();
    let user = store.register_user("u@test.com").await.unwrap();

    let err = engine
        .create(ada.id, user.id, date(2024, 12, 19), t(10, 0), t(11, 0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::PastDate { date: d, today } if d == date(2024, 12, 19) && today == date(2024, 12, 20)
    ));
    assert_eq!(store.booking_count(), 0);

    // Today itself is bookable.
    engine
        .create(ada.id, user.id, date(2024, 12, 20), t(10, 0), t(11, 0))
        .await
        .unwrap();
}

#[tokio::test]
async fn empty_or_inverted_interval_rejected() {
    let engine = test_engine("bad_interval.wal");
    let store = engine.store().clone();
    let ada = store.add_tutor("Ada").await.unwrap();
    let user = store.register_user("u@test.com").await.unwrap();

    for (start, end) in [(t(11, 0), t(11, 0)), (t(12, 0), t(11, 0))] {
        let err = engine
            .create(ada.id, user.id, christmas(), start, end)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
    assert_eq!(store.booking_count(), 0);
}

#[tokio::test]
async fn unknown_parties() {
    let engine = test_engine("unknown.wal");
    let store = engine.store().clone();
    let ada = store.add_tutor("Ada").await.unwrap();
    let user = store.register_user("u@test.com").await.unwrap();
    let ghost = ulid::Ulid::new();

    let err = engine
        .create(ghost, user.id, christmas(), t(10, 0), t(11, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = engine
        .create(ada.id, ghost, christmas(), t(10, 0), t(11, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownUser(id) if id == ghost));
}

#[tokio::test]
async fn cancel_is_owner_only() {
    let engine = test_engine("cancel_owner.wal");
    let store = engine.store().clone();
    let ada = store.add_tutor("Ada").await.unwrap();
    let owner = store.register_user("owner@test.com").await.unwrap();
    let other = store.register_user("other@test.com").await.unwrap();
    let booking = engine
        .create(ada.id, owner.id, christmas(), t(10, 0), t(11, 0))
        .await
        .unwrap();

    assert!(matches!(
        engine.cancel(booking.id, other.id).await,
        Err(EngineError::NotFound(_))
    ));
    assert_eq!(engine.list(owner.id).await, vec![booking.clone()]);

    engine.cancel(booking.id, owner.id).await.unwrap();
    assert!(matches!(
        engine.cancel(booking.id, owner.id).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        engine.cancel(ulid::Ulid::new(), owner.id).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn list_ordered_by_date_then_start() {
    let engine = test_engine("list_order.wal");
    let store = engine.store().clone();
    let ada = store.add_tutor("Ada").await.unwrap();
    let grace = store.add_tutor("Grace").await.unwrap();
    let user = store.register_user("u@test.com").await.unwrap();

    let d26 = engine
        .create(ada.id, user.id, date(2024, 12, 26), t(9, 0), t(10, 0))
        .await
        .unwrap();
    let d25_late = engine
        .create(grace.id, user.id, christmas(), t(15, 0), t(16, 0))
        .await
        .unwrap();
    let d25_early = engine
        .create(ada.id, user.id, christmas(), t(10, 0), t(11, 0))
        .await
        .unwrap();

    let listed: Vec<BookingId> = engine.list(user.id).await.into_iter().map(|b| b.id).collect();
    assert_eq!(listed, vec![d25_early.id, d25_late.id, d26.id]);
}

#[tokio::test]
async fn committed_bookings_survive_restart() {
    let path = test_wal_path("restart.wal");
    let (user, booked) = {
        let store = ReservationStore::open(path.clone(), Duration::from_secs(1)).unwrap();
        let engine = ReservationEngine::new(Arc::new(store))
            .with_clock(Arc::new(FixedClock(date(2024, 12, 20))));
        let ada = engine.store().add_tutor("Ada").await.unwrap();
        let user = engine.store().register_user("u@test.com").await.unwrap();
        let b = engine
            .create(ada.id, user.id, christmas(), t(10, 0), t(11, 0))
            .await
            .unwrap();
        (user, b)
    };

    let store = ReservationStore::open(path, Duration::from_secs(1)).unwrap();
    let engine = ReservationEngine::new(Arc::new(store))
        .with_clock(Arc::new(FixedClock(date(2024, 12, 20))));
    assert_eq!(engine.list(user.id).await, vec![booked.clone()]);

    // The restored booking still blocks its slot.
    let other = engine.store().register_user("other@test.com").await.unwrap();
    let err = engine
        .create(booked.tutor_id, other.id, christmas(), t(10, 30), t(11, 30))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(ConflictReason::TutorBusy)));
}

#[test]
fn retry_delay_doubles_and_caps() {
    let retry = RetryPolicy {
        max_attempts: 10,
        backoff: Duration::from_millis(10),
    };
    assert_eq!(retry.delay(1), Duration::from_millis(10));
    assert_eq!(retry.delay(2), Duration::from_millis(20));
    assert_eq!(retry.delay(4), Duration::from_millis(80));
    assert_eq!(retry.delay(30), Duration::from_millis(MAX_BACKOFF_MS));
}

// ── Contention ───────────────────────────────────────────

#[tokio::test]
async fn contention_becomes_transient_after_retries() {
    let retry = RetryPolicy {
        max_attempts: 3,
        backoff: Duration::from_millis(1),
    };
    let engine = engine_with_timeout("transient.wal", Duration::from_millis(20), retry);
    let store = engine.store().clone();
    let ada = store.add_tutor("Ada").await.unwrap();
    let u = users(&engine, 2).await;

    let held = store.begin(ada.id, u[0].id, christmas()).await.unwrap();
    let err = engine
        .create(ada.id, u[1].id, christmas(), t(14, 0), t(15, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Transient { attempts: 3 }));
    assert_eq!(store.booking_count(), 0);

    drop(held);
    engine
        .create(ada.id, u[1].id, christmas(), t(14, 0), t(15, 0))
        .await
        .unwrap();
}

#[tokio::test]
async fn disjoint_scopes_do_not_wait() {
    let engine = engine_with_timeout(
        "disjoint.wal",
        Duration::from_millis(50),
        RetryPolicy {
            max_attempts: 1,
            backoff: Duration::from_millis(1),
        },
    );
    let store = engine.store().clone();
    let ada = store.add_tutor("Ada").await.unwrap();
    let grace = store.add_tutor("Grace").await.unwrap();
    let u = users(&engine, 2).await;

    let _held = store.begin(ada.id, u[0].id, christmas()).await.unwrap();
    // Different tutor, different user: no shared scope.
    engine
        .create(grace.id, u[1].id, christmas(), t(10, 0), t(11, 0))
        .await
        .unwrap();
    // Same tutor on another date.
    engine
        .create(ada.id, u[1].id, date(2024, 12, 26), t(10, 0), t(11, 0))
        .await
        .unwrap();
}

#[tokio::test]
async fn cancel_retries_then_succeeds() {
    let engine = engine_with_timeout(
        "cancel_retry.wal",
        Duration::from_millis(20),
        RetryPolicy {
            max_attempts: 20,
            backoff: Duration::from_millis(5),
        },
    );
    let engine = Arc::new(engine);
    let store = engine.store().clone();
    let ada = store.add_tutor("Ada").await.unwrap();
    let u = users(&engine, 2).await;
    let booking = engine
        .create(ada.id, u[0].id, christmas(), t(10, 0), t(11, 0))
        .await
        .unwrap();

    let owner = u[0].id;
    let held = store.begin(ada.id, u[1].id, christmas()).await.unwrap();
    let canceller = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.cancel(booking.id, owner).await })
    };
    tokio::time::sleep(Duration::from_millis(60)).await;
    drop(held);
    canceller.await.unwrap().unwrap();
    assert_eq!(store.booking_count(), 0);
}

// ── Races ────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn identical_concurrent_creates_admit_exactly_one() {
    const N: usize = 32;
    let engine = Arc::new(test_engine("race_identical.wal"));
    let ada = engine.store().add_tutor("Ada").await.unwrap().id;
    let racers = users(&engine, N).await;

    let barrier = Arc::new(tokio::sync::Barrier::new(N));
    let mut handles = Vec::new();
    for user in racers {
        let engine = engine.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            engine
                .create(ada, user.id, christmas(), t(14, 0), t(15, 0))
                .await
        }));
    }

    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    let wins = results.iter().filter(|r| r.is_ok()).count();
    let tutor_busy = results
        .iter()
        .filter(|r| matches!(r, Err(EngineError::Conflict(ConflictReason::TutorBusy))))
        .count();
    assert_eq!(wins, 1);
    assert_eq!(tutor_busy, N - 1);
    assert_eq!(
        engine
            .store()
            .bookings_for_tutor_on_date(ada, christmas())
            .await
            .len(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn same_user_racing_across_tutors_gets_one_slot() {
    const N: usize = 16;
    let engine = Arc::new(test_engine("race_user.wal"));
    let user = engine.store().register_user("busy@test.com").await.unwrap().id;
    let mut tutors = Vec::new();
    for i in 0..N {
        tutors.push(engine.store().add_tutor(&format!("Tutor {i}")).await.unwrap());
    }

    let barrier = Arc::new(tokio::sync::Barrier::new(N));
    let mut handles = Vec::new();
    for tutor in tutors {
        let engine = engine.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            engine
                .create(tutor.id, user, christmas(), t(9, 0), t(10, 0))
                .await
        }));
    }

    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r, Err(EngineError::Conflict(ConflictReason::UserBusy))))
    );
    assert_eq!(engine.list(user).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn random_concurrent_creates_never_overlap() {
    const TASKS: usize = 64;
    let engine = Arc::new(test_engine("race_fuzz.wal"));
    let store = engine.store().clone();
    let mut tutors = Vec::new();
    for name in ["Ada", "Grace", "Edsger"] {
        tutors.push(store.add_tutor(name).await.unwrap());
    }
    let racers = users(&engine, 8).await;
    let days = [christmas(), date(2024, 12, 26)];

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut handles = Vec::new();
    for _ in 0..TASKS {
        let tutor = tutors[rng.gen_range(0..tutors.len())].id;
        let user = racers[rng.gen_range(0..racers.len())].id;
        let day = days[rng.gen_range(0..days.len())];
        // Quarter-hour grid between 08:00 and 20:00, 15 to 120 minutes long.
        let start_min: u32 = 8 * 60 + rng.gen_range(0..48) * 15;
        let len: u32 = rng.gen_range(1..=8) * 15;
        let start = t(start_min / 60, start_min % 60);
        let end_min = start_min + len;
        let end = t(end_min / 60, end_min % 60);

        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.create(tutor, user, day, start, end).await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(EngineError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(created > 0);
    assert_eq!(store.booking_count(), created);

    for day in days {
        for tutor in &tutors {
            assert_pairwise_disjoint(&store.bookings_for_tutor_on_date(tutor.id, day).await);
        }
        for user in &racers {
            assert_pairwise_disjoint(&store.bookings_for_user_on_date(user.id, day).await);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn creates_racing_user_removal_leave_no_orphans() {
    let engine = Arc::new(test_engine("race_removal.wal"));
    let store = engine.store().clone();
    let ada = store.add_tutor("Ada").await.unwrap().id;
    let leaving = store.register_user("leaving@test.com").await.unwrap().id;

    let mut handles = Vec::new();
    for h in 8..20 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create(ada, leaving, christmas(), t(h, 0), t(h + 1, 0))
                .await
        }));
    }
    store.remove_user(leaving).await.unwrap();

    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) | Err(EngineError::UnknownUser(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(store.bookings_for_tutor_on_date(ada, christmas()).await.is_empty());
    assert_eq!(store.booking_count(), 0);
}

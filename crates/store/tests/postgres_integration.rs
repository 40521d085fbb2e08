//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container and truncate between tests.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{ReservationId, ShowtimeId, Version};
use domain::{
    ContactEmail, Currency, Money, NewReservation, PaymentHandle, Quantity, ReleaseReason,
    Reservation, ReservationState, Showtime, Transition,
};
use futures_util::StreamExt;
use serial_test::serial;
use sqlx::PgPool;
use store::{
    HoldOutcome, InventoryLedger, PostgresStore, ReservationStore, StoreError, TransitionOutcome,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            for migration in [
                include_str!("../../../migrations/001_create_inventory_tables.sql"),
                include_str!("../../../migrations/002_create_showtimes.sql"),
            ] {
                sqlx::raw_sql(migration).execute(&temp_pool).await.unwrap();
            }

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE reservations, showtime_inventory, showtimes")
        .execute(&pool)
        .await
        .unwrap();

    PostgresStore::new(pool)
}

fn qty(n: u32) -> Quantity {
    Quantity::new(n).unwrap()
}

fn pending(showtime_id: ShowtimeId, quantity: u32, ttl: Duration) -> Reservation {
    Reservation::pending(
        NewReservation {
            id: ReservationId::new(),
            showtime_id,
            quantity: qty(quantity),
            contact_email: ContactEmail::parse("fan@cinema.example").unwrap(),
            amount_due: Money::from_cents(1250 * i64::from(quantity)),
            currency: Currency::usd(),
            requested_by: Some("user-42".to_string()),
        },
        Utc::now(),
        ttl,
    )
}

/// Holds `quantity` and stores the matching reservation in one step.
async fn held_reservation(
    store: &PostgresStore,
    showtime_id: ShowtimeId,
    quantity: u32,
    ttl: Duration,
) -> ReservationId {
    let reservation = pending(showtime_id, quantity, ttl);
    let id = reservation.id;
    let outcome = store.hold_and_create(reservation).await.unwrap();
    assert!(matches!(outcome, HoldOutcome::Held(_)));
    id
}

#[tokio::test]
#[serial]
async fn register_and_read_counters() {
    let store = get_test_store().await;
    let showtime_id = ShowtimeId::new();

    store.register_showtime(showtime_id, 120).await.unwrap();

    let counters = store.counters(showtime_id).await.unwrap().unwrap();
    assert_eq!(counters.total_tickets, 120);
    assert_eq!(counters.held_tickets, 0);
    assert_eq!(counters.confirmed_tickets, 0);
    assert_eq!(counters.available(), 120);

    let again = store.register_showtime(showtime_id, 50).await;
    assert!(matches!(again, Err(StoreError::ShowtimeAlreadyRegistered(_))));
}

#[tokio::test]
#[serial]
async fn hold_respects_capacity() {
    let store = get_test_store().await;
    let showtime_id = ShowtimeId::new();
    store.register_showtime(showtime_id, 3).await.unwrap();

    let first = store.try_hold(showtime_id, qty(2)).await.unwrap();
    assert!(matches!(first, HoldOutcome::Held(c) if c.held_tickets == 2));

    let second = store.try_hold(showtime_id, qty(2)).await.unwrap();
    assert_eq!(second, HoldOutcome::InsufficientCapacity { available: 1 });

    let unknown = store.try_hold(ShowtimeId::new(), qty(1)).await;
    assert!(matches!(unknown, Err(StoreError::ShowtimeNotFound(_))));
}

#[tokio::test]
#[serial]
async fn concurrent_holds_never_oversell() {
    let store = get_test_store().await;
    let showtime_id = ShowtimeId::new();
    store.register_showtime(showtime_id, 5).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.try_hold(showtime_id, qty(1)).await.unwrap()
        }));
    }

    let mut held = 0;
    for handle in handles {
        if matches!(handle.await.unwrap(), HoldOutcome::Held(_)) {
            held += 1;
        }
    }

    assert_eq!(held, 5);
    let counters = store.counters(showtime_id).await.unwrap().unwrap();
    assert_eq!(counters.held_tickets, 5);
    assert_eq!(counters.available(), 0);
}

#[tokio::test]
#[serial]
async fn create_get_and_duplicate() {
    let store = get_test_store().await;
    let showtime_id = ShowtimeId::new();
    store.register_showtime(showtime_id, 10).await.unwrap();

    let reservation = pending(showtime_id, 2, Duration::minutes(10));
    let id = store.create(reservation.clone()).await.unwrap();

    let loaded = store.get(id).await.unwrap().unwrap();
    assert_eq!(loaded.id, id);
    assert_eq!(loaded.state, ReservationState::Pending);
    assert_eq!(loaded.quantity, qty(2));
    assert_eq!(loaded.amount_due, Money::from_cents(2500));
    assert_eq!(loaded.currency, Currency::usd());
    assert_eq!(loaded.requested_by.as_deref(), Some("user-42"));
    assert_eq!(loaded.version, Version::first());
    assert!(loaded.payment_handle.is_none());

    let duplicate = store.create(reservation).await;
    assert!(matches!(duplicate, Err(StoreError::DuplicateReservation(d)) if d == id));

    assert!(store.get(ReservationId::new()).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn hold_and_create_commits_hold_with_record() {
    let store = get_test_store().await;
    let showtime_id = ShowtimeId::new();
    store.register_showtime(showtime_id, 3).await.unwrap();

    let id = held_reservation(&store, showtime_id, 2, Duration::minutes(10)).await;

    let loaded = store.get(id).await.unwrap().unwrap();
    assert_eq!(loaded.state, ReservationState::Pending);
    let counters = store.counters(showtime_id).await.unwrap().unwrap();
    assert_eq!(counters.held_tickets, 2);

    let refused = pending(showtime_id, 2, Duration::minutes(10));
    let refused_id = refused.id;
    let outcome = store.hold_and_create(refused).await.unwrap();
    assert_eq!(outcome, HoldOutcome::InsufficientCapacity { available: 1 });
    assert!(store.get(refused_id).await.unwrap().is_none());
    assert_eq!(store.list_for_showtime(showtime_id).await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn hold_and_create_with_taken_id_rolls_back() {
    let store = get_test_store().await;
    let showtime_id = ShowtimeId::new();
    store.register_showtime(showtime_id, 10).await.unwrap();

    let reservation = pending(showtime_id, 2, Duration::minutes(10));
    store.hold_and_create(reservation.clone()).await.unwrap();

    let again = store.hold_and_create(reservation).await;
    assert!(matches!(again, Err(StoreError::DuplicateReservation(_))));
    let counters = store.counters(showtime_id).await.unwrap().unwrap();
    assert_eq!(counters.held_tickets, 2);

    let unknown = store
        .hold_and_create(pending(ShowtimeId::new(), 1, Duration::minutes(10)))
        .await;
    assert!(matches!(unknown, Err(StoreError::ShowtimeNotFound(_))));
}

#[tokio::test]
#[serial]
async fn showtime_catalog_survives_new_store() {
    let store = get_test_store().await;
    let matinee = Showtime::new(
        ShowtimeId::new(),
        80,
        Money::from_cents(1150),
        Currency::parse("eur").unwrap(),
    )
    .unwrap();
    let late = Showtime::new(ShowtimeId::new(), 40, Money::from_cents(1400), Currency::usd())
        .unwrap();

    store.insert_showtime(&matinee).await.unwrap();
    store.insert_showtime(&late).await.unwrap();
    let again = store.insert_showtime(&matinee).await;
    assert!(matches!(again, Err(StoreError::ShowtimeAlreadyRegistered(_))));

    let reopened = PostgresStore::new(store.pool().clone());
    assert_eq!(reopened.showtime(matinee.id).await.unwrap(), Some(matinee.clone()));
    assert_eq!(reopened.showtimes().await.unwrap(), vec![matinee, late]);
    assert!(reopened.showtime(ShowtimeId::new()).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn create_for_unknown_showtime_fails() {
    let store = get_test_store().await;

    let result = store
        .create(pending(ShowtimeId::new(), 1, Duration::minutes(10)))
        .await;
    assert!(matches!(result, Err(StoreError::ShowtimeNotFound(_))));
}

#[tokio::test]
#[serial]
async fn confirm_moves_held_to_confirmed() {
    let store = get_test_store().await;
    let showtime_id = ShowtimeId::new();
    store.register_showtime(showtime_id, 10).await.unwrap();
    let id = held_reservation(&store, showtime_id, 3, Duration::minutes(10)).await;

    let attached = store
        .compare_and_transition(
            id,
            ReservationState::Pending,
            Version::first(),
            Transition::attach_handle(PaymentHandle::new("pi_123")),
        )
        .await
        .unwrap();
    let TransitionOutcome::Applied(attached) = attached else {
        panic!("expected Applied, got {attached:?}");
    };
    assert_eq!(attached.version, Version::new(2));

    let confirmed = store
        .compare_and_transition(
            id,
            ReservationState::Pending,
            attached.version,
            Transition::confirm(),
        )
        .await
        .unwrap();
    assert!(matches!(
        confirmed,
        TransitionOutcome::Applied(ref r) if r.state == ReservationState::Confirmed
    ));

    let counters = store.counters(showtime_id).await.unwrap().unwrap();
    assert_eq!(counters.held_tickets, 0);
    assert_eq!(counters.confirmed_tickets, 3);

    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.state, ReservationState::Confirmed);
    assert_eq!(stored.payment_handle, Some(PaymentHandle::new("pi_123")));
}

#[tokio::test]
#[serial]
async fn stale_transition_is_a_conflict() {
    let store = get_test_store().await;
    let showtime_id = ShowtimeId::new();
    store.register_showtime(showtime_id, 10).await.unwrap();
    let id = held_reservation(&store, showtime_id, 2, Duration::minutes(10)).await;

    store
        .compare_and_transition(
            id,
            ReservationState::Pending,
            Version::first(),
            Transition::release(ReleaseReason::Expired),
        )
        .await
        .unwrap();

    let late = store
        .compare_and_transition(
            id,
            ReservationState::Pending,
            Version::first(),
            Transition::confirm(),
        )
        .await
        .unwrap();
    let TransitionOutcome::Conflict(current) = late else {
        panic!("expected Conflict, got {late:?}");
    };
    assert_eq!(current.state, ReservationState::Released);
    assert_eq!(current.release_reason, Some(ReleaseReason::Expired));

    let counters = store.counters(showtime_id).await.unwrap().unwrap();
    assert_eq!(counters.held_tickets, 0);
    assert_eq!(counters.confirmed_tickets, 0);

    let missing = store
        .compare_and_transition(
            ReservationId::new(),
            ReservationState::Pending,
            Version::first(),
            Transition::confirm(),
        )
        .await
        .unwrap();
    assert_eq!(missing, TransitionOutcome::NotFound);
}

#[tokio::test]
#[serial]
async fn racing_transitions_apply_once() {
    let store = get_test_store().await;
    let showtime_id = ShowtimeId::new();
    store.register_showtime(showtime_id, 10).await.unwrap();
    let id = held_reservation(&store, showtime_id, 4, Duration::minutes(10)).await;

    let confirm = {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .compare_and_transition(
                    id,
                    ReservationState::Pending,
                    Version::first(),
                    Transition::confirm(),
                )
                .await
                .unwrap()
        })
    };
    let release = {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .compare_and_transition(
                    id,
                    ReservationState::Pending,
                    Version::first(),
                    Transition::release(ReleaseReason::Expired),
                )
                .await
                .unwrap()
        })
    };

    let outcomes = [confirm.await.unwrap(), release.await.unwrap()];
    let applied = outcomes
        .iter()
        .filter(|o| matches!(o, TransitionOutcome::Applied(_)))
        .count();
    assert_eq!(applied, 1);

    let stored = store.get(id).await.unwrap().unwrap();
    let expected_confirmed = match stored.state {
        ReservationState::Confirmed => 4,
        ReservationState::Released => 0,
        other => panic!("unexpected state {other}"),
    };
    let counters = store.counters(showtime_id).await.unwrap().unwrap();
    assert_eq!(counters.held_tickets, 0);
    assert_eq!(counters.confirmed_tickets, expected_confirmed);
}

#[tokio::test]
#[serial]
async fn failed_transition_releases_hold() {
    let store = get_test_store().await;
    let showtime_id = ShowtimeId::new();
    store.register_showtime(showtime_id, 4).await.unwrap();
    let id = held_reservation(&store, showtime_id, 4, Duration::minutes(10)).await;

    let outcome = store
        .compare_and_transition(
            id,
            ReservationState::Pending,
            Version::first(),
            Transition::fail("payment adapter unavailable"),
        )
        .await
        .unwrap();
    let TransitionOutcome::Applied(record) = outcome else {
        panic!("expected Applied, got {outcome:?}");
    };
    assert_eq!(record.state, ReservationState::Failed);
    assert_eq!(
        record.failure_reason.as_deref(),
        Some("payment adapter unavailable")
    );

    let counters = store.counters(showtime_id).await.unwrap().unwrap();
    assert_eq!(counters.available(), 4);
}

#[tokio::test]
#[serial]
async fn expired_pending_are_streamed_in_expiry_order() {
    let store = get_test_store().await;
    let showtime_id = ShowtimeId::new();
    store.register_showtime(showtime_id, 500).await.unwrap();

    // More than one page of expired holds.
    let mut expired = Vec::new();
    for _ in 0..130 {
        expired.push(held_reservation(&store, showtime_id, 1, Duration::zero()).await);
    }
    let live = held_reservation(&store, showtime_id, 1, Duration::minutes(10)).await;
    let confirmed = held_reservation(&store, showtime_id, 1, Duration::zero()).await;
    store
        .compare_and_transition(
            confirmed,
            ReservationState::Pending,
            Version::first(),
            Transition::confirm(),
        )
        .await
        .unwrap();

    let now = Utc::now() + Duration::seconds(1);
    let listed: Vec<Reservation> = store
        .list_expired_pending(now)
        .await
        .unwrap()
        .map(|r| r.unwrap())
        .collect()
        .await;

    assert_eq!(listed.len(), expired.len());
    assert!(listed.iter().all(|r| r.state == ReservationState::Pending));
    assert!(listed.iter().all(|r| r.id != live && r.id != confirmed));
    assert!(listed.windows(2).all(|w| w[0].expires_at <= w[1].expires_at));
}

#[tokio::test]
#[serial]
async fn list_for_showtime_returns_every_record() {
    let store = get_test_store().await;
    let showtime_id = ShowtimeId::new();
    let other = ShowtimeId::new();
    store.register_showtime(showtime_id, 10).await.unwrap();
    store.register_showtime(other, 10).await.unwrap();

    held_reservation(&store, showtime_id, 1, Duration::minutes(10)).await;
    held_reservation(&store, showtime_id, 2, Duration::minutes(10)).await;
    held_reservation(&store, other, 3, Duration::minutes(10)).await;

    let records = store.list_for_showtime(showtime_id).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.showtime_id == showtime_id));

    let all = store.all_counters().await.unwrap();
    assert_eq!(all.len(), 2);
}

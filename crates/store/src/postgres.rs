use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ReservationId, ShowtimeId, Version};
use domain::{
    ContactEmail, Currency, LedgerEffect, Money, PaymentHandle, Quantity, Reservation,
    ReservationState, Showtime, Transition,
};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    HoldOutcome, InventoryCounters, Result, StoreError,
    ledger::InventoryLedger,
    reservations::{ReservationStore, ReservationStream, TransitionOutcome},
};

const RESERVATION_COLUMNS: &str = "id, showtime_id, quantity, contact_email, amount_due_cents, \
     currency, state, payment_handle, release_reason, failure_reason, requested_by, \
     created_at, expires_at, updated_at, version";

const COUNTER_COLUMNS: &str =
    "showtime_id, total_tickets, held_tickets, confirmed_tickets, version";

const SHOWTIME_COLUMNS: &str = "showtime_id, total_tickets, ticket_price_cents, currency";

/// Rows fetched per round trip when streaming expired reservations.
const EXPIRED_PAGE_SIZE: i64 = 100;

/// PostgreSQL-backed ledger, reservation store and showtime catalog.
///
/// Both traits share one pool so that `compare_and_transition` can update
/// the reservation row and the showtime counters in one transaction.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Stores a showtime's catalog entry.
    ///
    /// Fails with `ShowtimeAlreadyRegistered` if the id is already listed.
    pub async fn insert_showtime(&self, showtime: &Showtime) -> Result<()> {
        let total = i32::try_from(showtime.total_tickets).map_err(|_| {
            StoreError::LedgerInvariant {
                showtime_id: showtime.id,
                reason: format!("capacity {} exceeds storage range", showtime.total_tickets),
            }
        })?;

        let result = sqlx::query(
            r#"
            INSERT INTO showtimes (showtime_id, total_tickets, ticket_price_cents, currency)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (showtime_id) DO NOTHING
            "#,
        )
        .bind(showtime.id.as_uuid())
        .bind(total)
        .bind(showtime.ticket_price.cents())
        .bind(showtime.currency.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ShowtimeAlreadyRegistered(showtime.id));
        }
        Ok(())
    }

    /// Loads a showtime's catalog entry.
    pub async fn showtime(&self, showtime_id: ShowtimeId) -> Result<Option<Showtime>> {
        let row = sqlx::query(&format!(
            "SELECT {SHOWTIME_COLUMNS} FROM showtimes WHERE showtime_id = $1"
        ))
        .bind(showtime_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_showtime).transpose()
    }

    /// Lists every catalog entry in registration order.
    pub async fn showtimes(&self) -> Result<Vec<Showtime>> {
        let rows = sqlx::query(&format!(
            "SELECT {SHOWTIME_COLUMNS} FROM showtimes ORDER BY registration_order ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_showtime).collect()
    }

    fn row_to_showtime(row: &PgRow) -> Result<Showtime> {
        let currency: String = row.try_get("currency")?;
        Showtime::new(
            ShowtimeId::from_uuid(row.try_get::<Uuid, _>("showtime_id")?),
            to_u32(row.try_get("total_tickets")?, "total_tickets")?,
            Money::from_cents(row.try_get("ticket_price_cents")?),
            Currency::parse(&currency).map_err(corrupt)?,
        )
        .map_err(corrupt)
    }

    fn row_to_counters(row: &PgRow) -> Result<InventoryCounters> {
        Ok(InventoryCounters {
            showtime_id: ShowtimeId::from_uuid(row.try_get::<Uuid, _>("showtime_id")?),
            total_tickets: to_u32(row.try_get("total_tickets")?, "total_tickets")?,
            held_tickets: to_u32(row.try_get("held_tickets")?, "held_tickets")?,
            confirmed_tickets: to_u32(row.try_get("confirmed_tickets")?, "confirmed_tickets")?,
            version: Version::new(row.try_get("version")?),
        })
    }

    fn row_to_reservation(row: &PgRow) -> Result<Reservation> {
        let quantity = to_u32(row.try_get("quantity")?, "quantity")?;
        let state: String = row.try_get("state")?;
        let release_reason: Option<String> = row.try_get("release_reason")?;
        let contact_email: String = row.try_get("contact_email")?;
        let currency: String = row.try_get("currency")?;

        Ok(Reservation {
            id: ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?),
            showtime_id: ShowtimeId::from_uuid(row.try_get::<Uuid, _>("showtime_id")?),
            quantity: Quantity::new(quantity).map_err(corrupt)?,
            contact_email: ContactEmail::parse(&contact_email).map_err(corrupt)?,
            amount_due: Money::from_cents(row.try_get("amount_due_cents")?),
            currency: Currency::parse(&currency).map_err(corrupt)?,
            state: state.parse().map_err(StoreError::CorruptRecord)?,
            payment_handle: row
                .try_get::<Option<String>, _>("payment_handle")?
                .map(PaymentHandle::new),
            release_reason: release_reason
                .map(|r| r.parse())
                .transpose()
                .map_err(StoreError::CorruptRecord)?,
            failure_reason: row.try_get("failure_reason")?,
            requested_by: row.try_get("requested_by")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            updated_at: row.try_get("updated_at")?,
            version: Version::new(row.try_get("version")?),
        })
    }

    async fn fetch_counters(
        conn: &mut PgConnection,
        showtime_id: ShowtimeId,
    ) -> Result<Option<InventoryCounters>> {
        let row = sqlx::query(&format!(
            "SELECT {COUNTER_COLUMNS} FROM showtime_inventory WHERE showtime_id = $1"
        ))
        .bind(showtime_id.as_uuid())
        .fetch_optional(conn)
        .await?;

        row.as_ref().map(Self::row_to_counters).transpose()
    }

    /// Applies a ledger effect on `conn`, which may be inside a transaction.
    async fn apply_effect(
        conn: &mut PgConnection,
        showtime_id: ShowtimeId,
        quantity: Quantity,
        effect: LedgerEffect,
    ) -> Result<()> {
        let sql = match effect {
            LedgerEffect::None => return Ok(()),
            LedgerEffect::Confirm => {
                r#"
                UPDATE showtime_inventory
                SET held_tickets = held_tickets - $2,
                    confirmed_tickets = confirmed_tickets + $2,
                    version = version + 1,
                    updated_at = NOW()
                WHERE showtime_id = $1 AND held_tickets >= $2
                "#
            }
            LedgerEffect::Release => {
                r#"
                UPDATE showtime_inventory
                SET held_tickets = held_tickets - $2,
                    version = version + 1,
                    updated_at = NOW()
                WHERE showtime_id = $1 AND held_tickets >= $2
                "#
            }
        };

        let result = sqlx::query(sql)
            .bind(showtime_id.as_uuid())
            .bind(ticket_count(showtime_id, quantity)?)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return match Self::fetch_counters(conn, showtime_id).await? {
                None => Err(StoreError::ShowtimeNotFound(showtime_id)),
                Some(counters) => {
                    tracing::error!(
                        %showtime_id,
                        held = counters.held_tickets,
                        requested = quantity.get(),
                        ?effect,
                        "ledger effect would underflow held tickets"
                    );
                    Err(StoreError::LedgerInvariant {
                        showtime_id,
                        reason: format!(
                            "cannot apply {effect:?} for {quantity} tickets, only {} held",
                            counters.held_tickets
                        ),
                    })
                }
            };
        }
        Ok(())
    }

    /// Adds `quantity` to the held count if capacity allows.
    async fn hold_tickets(
        conn: &mut PgConnection,
        showtime_id: ShowtimeId,
        quantity: Quantity,
    ) -> Result<HoldOutcome> {
        // Single conditional UPDATE: the row lock makes check-and-increment indivisible.
        let row = sqlx::query(&format!(
            "UPDATE showtime_inventory \
             SET held_tickets = held_tickets + $2, version = version + 1, updated_at = NOW() \
             WHERE showtime_id = $1 AND held_tickets + confirmed_tickets + $2 <= total_tickets \
             RETURNING {COUNTER_COLUMNS}"
        ))
        .bind(showtime_id.as_uuid())
        .bind(ticket_count(showtime_id, quantity)?)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(row) = row {
            return Ok(HoldOutcome::Held(Self::row_to_counters(&row)?));
        }

        match Self::fetch_counters(conn, showtime_id).await? {
            Some(counters) => Ok(HoldOutcome::InsufficientCapacity {
                available: counters.available(),
            }),
            None => Err(StoreError::ShowtimeNotFound(showtime_id)),
        }
    }

    async fn insert_reservation(conn: &mut PgConnection, reservation: &Reservation) -> Result<()> {
        let id = reservation.id;
        sqlx::query(&format!(
            "INSERT INTO reservations ({RESERVATION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
        ))
        .bind(id.as_uuid())
        .bind(reservation.showtime_id.as_uuid())
        .bind(ticket_count(reservation.showtime_id, reservation.quantity)?)
        .bind(reservation.contact_email.as_str())
        .bind(reservation.amount_due.cents())
        .bind(reservation.currency.as_str())
        .bind(reservation.state.as_str())
        .bind(reservation.payment_handle.as_ref().map(PaymentHandle::as_str))
        .bind(reservation.release_reason.map(|r| r.as_str()))
        .bind(reservation.failure_reason.as_deref())
        .bind(reservation.requested_by.as_deref())
        .bind(reservation.created_at)
        .bind(reservation.expires_at)
        .bind(reservation.updated_at)
        .bind(reservation.version.as_i64())
        .execute(conn)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.is_unique_violation() {
                    return StoreError::DuplicateReservation(id);
                }
                if db_err.is_foreign_key_violation() {
                    return StoreError::ShowtimeNotFound(reservation.showtime_id);
                }
            }
            StoreError::Database(e)
        })?;

        Ok(())
    }

    async fn fetch_expired_page(
        pool: &PgPool,
        now: DateTime<Utc>,
        after: Option<(DateTime<Utc>, Uuid)>,
    ) -> Result<Vec<Reservation>> {
        let rows = match after {
            None => {
                sqlx::query(&format!(
                    "SELECT {RESERVATION_COLUMNS} FROM reservations \
                     WHERE state = 'PENDING' AND expires_at <= $1 \
                     ORDER BY expires_at ASC, id ASC LIMIT $2"
                ))
                .bind(now)
                .bind(EXPIRED_PAGE_SIZE)
                .fetch_all(pool)
                .await?
            }
            Some((expires_at, id)) => {
                sqlx::query(&format!(
                    "SELECT {RESERVATION_COLUMNS} FROM reservations \
                     WHERE state = 'PENDING' AND expires_at <= $1 \
                       AND (expires_at, id) > ($3, $4) \
                     ORDER BY expires_at ASC, id ASC LIMIT $2"
                ))
                .bind(now)
                .bind(EXPIRED_PAGE_SIZE)
                .bind(expires_at)
                .bind(id)
                .fetch_all(pool)
                .await?
            }
        };

        rows.iter().map(Self::row_to_reservation).collect()
    }
}

/// Converts a quantity to the column type, refusing values that would wrap.
fn ticket_count(showtime_id: ShowtimeId, quantity: Quantity) -> Result<i32> {
    i32::try_from(quantity.get()).map_err(|_| StoreError::LedgerInvariant {
        showtime_id,
        reason: format!("quantity {quantity} exceeds storage range"),
    })
}

fn to_u32(value: i32, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| StoreError::CorruptRecord(format!("negative {column}: {value}")))
}

fn corrupt(err: domain::DomainError) -> StoreError {
    StoreError::CorruptRecord(err.to_string())
}

#[async_trait]
impl InventoryLedger for PostgresStore {
    async fn register_showtime(&self, showtime_id: ShowtimeId, total_tickets: u32) -> Result<()> {
        let total = i32::try_from(total_tickets).map_err(|_| StoreError::LedgerInvariant {
            showtime_id,
            reason: format!("capacity {total_tickets} exceeds storage range"),
        })?;

        let result = sqlx::query(
            r#"
            INSERT INTO showtime_inventory (showtime_id, total_tickets)
            VALUES ($1, $2)
            ON CONFLICT (showtime_id) DO NOTHING
            "#,
        )
        .bind(showtime_id.as_uuid())
        .bind(total)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ShowtimeAlreadyRegistered(showtime_id));
        }
        Ok(())
    }

    async fn try_hold(&self, showtime_id: ShowtimeId, quantity: Quantity) -> Result<HoldOutcome> {
        let mut conn = self.pool.acquire().await?;
        Self::hold_tickets(&mut *conn, showtime_id, quantity).await
    }

    async fn confirm(&self, showtime_id: ShowtimeId, quantity: Quantity) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::apply_effect(&mut *conn, showtime_id, quantity, LedgerEffect::Confirm).await
    }

    async fn release(&self, showtime_id: ShowtimeId, quantity: Quantity) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::apply_effect(&mut *conn, showtime_id, quantity, LedgerEffect::Release).await
    }

    async fn counters(&self, showtime_id: ShowtimeId) -> Result<Option<InventoryCounters>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_counters(&mut *conn, showtime_id).await
    }

    async fn all_counters(&self) -> Result<Vec<InventoryCounters>> {
        let rows = sqlx::query(&format!(
            "SELECT {COUNTER_COLUMNS} FROM showtime_inventory ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_counters).collect()
    }
}

#[async_trait]
impl ReservationStore for PostgresStore {
    async fn create(&self, reservation: Reservation) -> Result<ReservationId> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_reservation(&mut *conn, &reservation).await?;
        Ok(reservation.id)
    }

    async fn hold_and_create(&self, reservation: Reservation) -> Result<HoldOutcome> {
        // Dropping `tx` before commit rolls back the insert and the hold together.
        let mut tx = self.pool.begin().await?;
        Self::insert_reservation(&mut *tx, &reservation).await?;

        let outcome =
            Self::hold_tickets(&mut *tx, reservation.showtime_id, reservation.quantity).await?;
        match outcome {
            HoldOutcome::Held(_) => tx.commit().await?,
            HoldOutcome::InsufficientCapacity { .. } => tx.rollback().await?,
        }
        Ok(outcome)
    }

    async fn get(&self, id: ReservationId) -> Result<Option<Reservation>> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_reservation).transpose()
    }

    async fn compare_and_transition(
        &self,
        id: ReservationId,
        expected_state: ReservationState,
        expected_version: Version,
        transition: Transition,
    ) -> Result<TransitionOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(TransitionOutcome::NotFound);
        };
        let mut reservation = Self::row_to_reservation(&row)?;

        if !reservation.matches(expected_state, expected_version) {
            return Ok(TransitionOutcome::Conflict(reservation));
        }

        let effect = reservation.plan(&transition)?;
        reservation.apply(transition, Utc::now())?;

        // Dropping `tx` on any error below rolls back both the effect and the state change.
        Self::apply_effect(
            &mut *tx,
            reservation.showtime_id,
            reservation.quantity,
            effect,
        )
        .await?;

        sqlx::query(
            r#"
            UPDATE reservations
            SET state = $2,
                payment_handle = $3,
                release_reason = $4,
                failure_reason = $5,
                updated_at = $6,
                version = $7
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(reservation.state.as_str())
        .bind(reservation.payment_handle.as_ref().map(PaymentHandle::as_str))
        .bind(reservation.release_reason.map(|r| r.as_str()))
        .bind(reservation.failure_reason.as_deref())
        .bind(reservation.updated_at)
        .bind(reservation.version.as_i64())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(TransitionOutcome::Applied(reservation))
    }

    async fn list_expired_pending(&self, now: DateTime<Utc>) -> Result<ReservationStream> {
        use futures_util::{StreamExt, TryStreamExt, stream};

        enum Cursor {
            Start,
            After(DateTime<Utc>, Uuid),
            Done,
        }

        // Keyset pagination: each page is fetched only when the previous one is drained.
        let pool = self.pool.clone();
        let pages = stream::try_unfold(Cursor::Start, move |cursor| {
            let pool = pool.clone();
            async move {
                let after = match cursor {
                    Cursor::Done => return Ok::<_, StoreError>(None),
                    Cursor::Start => None,
                    Cursor::After(expires_at, id) => Some((expires_at, id)),
                };
                let page = Self::fetch_expired_page(&pool, now, after).await?;
                let next = match page.last() {
                    Some(last) if page.len() as i64 == EXPIRED_PAGE_SIZE => {
                        Cursor::After(last.expires_at, last.id.as_uuid())
                    }
                    _ => Cursor::Done,
                };
                if page.is_empty() {
                    return Ok(None);
                }
                Ok(Some((page, next)))
            }
        });

        let stream = pages
            .map_ok(|page| stream::iter(page.into_iter().map(Ok)))
            .try_flatten();

        Ok(stream.boxed())
    }

    async fn list_for_showtime(&self, showtime_id: ShowtimeId) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE showtime_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(showtime_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_reservation).collect()
    }
}

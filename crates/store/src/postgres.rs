use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    Money, OrderId, OrderState, ProductId, ReservationId, ReservationState, Size, UserId,
    VariantKey,
};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Order, OrderLine, OrderTransition, Product, ReconciliationEntry, Reservation, Result,
    StockLevel, StoreError,
    store::{
        CatalogStore, Credit, Decrement, OrderInsert, OrderStore, ReconciliationStore,
        ReservationStore, StockStore, Transition,
    },
};

const RESERVATION_COLUMNS: &str =
    "id, product_id, size, quantity, order_id, state, created_at, expires_at, resolved_at";

const ORDER_COLUMNS: &str = "id, user_id, total_minor, currency, state, payment_ref, payment_id, failure_reason, created_at, updated_at";

/// PostgreSQL-backed store.
///
/// Stock counters change only through `UPDATE … WHERE available >= $n` style
/// statements, so any number of server instances can share one database.
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

    fn to_count(value: i64, column: &str) -> Result<u32> {
        u32::try_from(value)
            .map_err(|_| StoreError::Corrupt(format!("{column} out of range: {value}")))
    }

    fn row_to_key(row: &PgRow) -> Result<VariantKey> {
        let size: String = row.try_get("size")?;
        Ok(VariantKey::new(
            ProductId::new(row.try_get("product_id")?),
            Size::new(size)?,
        ))
    }

    fn row_to_stock_level(row: PgRow) -> Result<StockLevel> {
        Ok(StockLevel {
            key: Self::row_to_key(&row)?,
            available: Self::to_count(row.try_get("available")?, "available")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_reservation(row: PgRow) -> Result<Reservation> {
        let state: String = row.try_get("state")?;
        Ok(Reservation {
            id: ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?),
            key: Self::row_to_key(&row)?,
            quantity: Self::to_count(row.try_get("quantity")?, "quantity")?,
            order_id: row
                .try_get::<Option<Uuid>, _>("order_id")?
                .map(OrderId::from_uuid),
            state: state.parse()?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            resolved_at: row.try_get("resolved_at")?,
        })
    }

    fn row_to_line(row: PgRow) -> Result<(OrderId, OrderLine)> {
        let order_id = OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?);
        let position: i32 = row.try_get("position")?;
        let line = OrderLine {
            position: Self::to_count(i64::from(position), "position")?,
            reservation_id: ReservationId::from_uuid(row.try_get::<Uuid, _>("reservation_id")?),
            key: Self::row_to_key(&row)?,
            product_name: row.try_get("product_name")?,
            quantity: Self::to_count(row.try_get("quantity")?, "quantity")?,
            unit_price: Money::from_minor(row.try_get("unit_price_minor")?),
        };
        Ok((order_id, line))
    }

    fn row_to_order(row: PgRow, lines: Vec<OrderLine>) -> Result<Order> {
        let state: String = row.try_get("state")?;
        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::new(row.try_get("user_id")?),
            lines,
            total: Money::from_minor(row.try_get("total_minor")?),
            currency: row.try_get("currency")?,
            state: state.parse()?,
            payment_ref: row.try_get("payment_ref")?,
            payment_id: row.try_get("payment_id")?,
            failure_reason: row.try_get("failure_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_reconciliation(row: PgRow) -> Result<ReconciliationEntry> {
        let committed: Vec<Uuid> = row.try_get("committed_reservations")?;
        Ok(ReconciliationEntry {
            id: row.try_get("id")?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            payment_ref: row.try_get("payment_ref")?,
            payment_id: row.try_get("payment_id")?,
            committed: committed.into_iter().map(ReservationId::from_uuid).collect(),
            reason: row.try_get("reason")?,
            created_at: row.try_get("created_at")?,
            resolved_at: row.try_get("resolved_at")?,
            resolution: row.try_get("resolution")?,
        })
    }

    /// Loads the line items of the given orders, grouped by order.
    async fn lines_for(&self, order_ids: &[Uuid]) -> Result<HashMap<OrderId, Vec<OrderLine>>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, position, reservation_id, product_id, size, product_name, quantity, unit_price_minor
            FROM order_lines
            WHERE order_id = ANY($1)
            ORDER BY order_id, position ASC
            "#,
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<OrderId, Vec<OrderLine>> = HashMap::new();
        for row in rows {
            let (order_id, line) = Self::row_to_line(row)?;
            grouped.entry(order_id).or_default().push(line);
        }
        Ok(grouped)
    }

    async fn orders_with_lines(&self, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        let ids = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut lines = self.lines_for(&ids).await?;

        rows.into_iter()
            .zip(ids)
            .map(|(row, id)| {
                let order_lines = lines.remove(&OrderId::from_uuid(id)).unwrap_or_default();
                Self::row_to_order(row, order_lines)
            })
            .collect()
    }
}

#[async_trait]
impl StockStore for PostgresStore {
    async fn register_variant(&self, key: &VariantKey, initial: u32) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO stock_variants (product_id, size, available, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (product_id, size) DO NOTHING
            "#,
        )
        .bind(key.product_id.as_i64())
        .bind(key.size.as_str())
        .bind(i64::from(initial))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn try_decrement(&self, key: &VariantKey, quantity: u32) -> Result<Decrement> {
        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE stock_variants
            SET available = available - $3, updated_at = NOW()
            WHERE product_id = $1 AND size = $2 AND available >= $3
            RETURNING available
            "#,
        )
        .bind(key.product_id.as_i64())
        .bind(key.size.as_str())
        .bind(i64::from(quantity))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(remaining) = remaining {
            return Ok(Decrement::Applied {
                remaining: Self::to_count(remaining, "available")?,
            });
        }

        // The update did not apply; read the counter only to say why.
        match self.stock_level(key).await? {
            Some(level) => Ok(Decrement::Insufficient {
                available: level.available,
            }),
            None => Ok(Decrement::UnknownVariant),
        }
    }

    async fn credit(&self, key: &VariantKey, quantity: u32, credit_id: Uuid) -> Result<Credit> {
        let mut tx = self.pool.begin().await?;

        let recorded = sqlx::query(
            r#"
            INSERT INTO stock_credits (credit_id, product_id, size, quantity, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (credit_id) DO NOTHING
            "#,
        )
        .bind(credit_id)
        .bind(key.product_id.as_i64())
        .bind(key.size.as_str())
        .bind(i64::from(quantity))
        .execute(&mut *tx)
        .await?;

        if recorded.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(Credit::AlreadyApplied);
        }

        let available: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE stock_variants
            SET available = available + $3, updated_at = NOW()
            WHERE product_id = $1 AND size = $2
            RETURNING available
            "#,
        )
        .bind(key.product_id.as_i64())
        .bind(key.size.as_str())
        .bind(i64::from(quantity))
        .fetch_optional(&mut *tx)
        .await?;

        // Checked before commit so an overflowing credit leaves nothing behind.
        match available.map(|available| Self::to_count(available, "available")) {
            Some(Ok(available)) => {
                tx.commit().await?;
                Ok(Credit::Applied { available })
            }
            Some(Err(_)) => {
                tx.rollback().await?;
                Err(StoreError::Corrupt(format!(
                    "stock counter for {key} would overflow"
                )))
            }
            None => {
                tx.rollback().await?;
                Ok(Credit::UnknownVariant)
            }
        }
    }

    async fn stock_level(&self, key: &VariantKey) -> Result<Option<StockLevel>> {
        let row = sqlx::query(
            r#"
            SELECT product_id, size, available, updated_at
            FROM stock_variants
            WHERE product_id = $1 AND size = $2
            "#,
        )
        .bind(key.product_id.as_i64())
        .bind(key.size.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_stock_level).transpose()
    }

    async fn stock_levels(&self, product_id: ProductId) -> Result<Vec<StockLevel>> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, size, available, updated_at
            FROM stock_variants
            WHERE product_id = $1
            ORDER BY size ASC
            "#,
        )
        .bind(product_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_stock_level).collect()
    }
}

#[async_trait]
impl ReservationStore for PostgresStore {
    async fn insert_reservation(&self, reservation: &Reservation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reservations (id, product_id, size, quantity, order_id, state, created_at, expires_at, resolved_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.key.product_id.as_i64())
        .bind(reservation.key.size.as_str())
        .bind(i64::from(reservation.quantity))
        .bind(reservation.order_id.map(|id| id.as_uuid()))
        .bind(reservation.state.as_str())
        .bind(reservation.created_at)
        .bind(reservation.expires_at)
        .bind(reservation.resolved_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_reservation).transpose()
    }

    async fn reservations_for_order(&self, order_id: OrderId) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE order_id = $1 ORDER BY created_at ASC"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    async fn transition_reservation(
        &self,
        id: ReservationId,
        from: ReservationState,
        to: ReservationState,
        at: DateTime<Utc>,
    ) -> Result<Transition<ReservationState>> {
        let result = sqlx::query(
            r#"
            UPDATE reservations
            SET state = $3, resolved_at = $4
            WHERE id = $1 AND state = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(Transition::Applied);
        }

        let actual: Option<String> =
            sqlx::query_scalar("SELECT state FROM reservations WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        match actual {
            Some(state) => Ok(Transition::Conflict {
                actual: state.parse()?,
            }),
            None => Ok(Transition::NotFound),
        }
    }

    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE state = 'Held' AND expires_at <= $1 \
             ORDER BY expires_at ASC LIMIT $2"
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    async fn uncredited_releases(&self, limit: usize) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.product_id, r.size, r.quantity, r.order_id, r.state, r.created_at, r.expires_at, r.resolved_at
            FROM reservations r
            LEFT JOIN stock_credits c ON c.credit_id = r.id
            WHERE r.state = 'Released' AND c.credit_id IS NULL
            ORDER BY r.resolved_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_reservation).collect()
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn insert_order(&self, order: &Order) -> Result<OrderInsert> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, total_minor, currency, state, payment_ref, payment_id, failure_reason, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_i64())
        .bind(order.total.minor())
        .bind(&order.currency)
        .bind(order.state.as_str())
        .bind(&order.payment_ref)
        .bind(&order.payment_id)
        .bind(&order.failure_reason)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        let reservation_ids: Vec<Uuid> = order.reservation_ids().map(|id| id.as_uuid()).collect();
        let attached = sqlx::query(
            r#"
            UPDATE reservations
            SET order_id = $1
            WHERE id = ANY($2) AND state = 'Held' AND order_id IS NULL
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(&reservation_ids)
        .execute(&mut *tx)
        .await?;

        if attached.rows_affected() != reservation_ids.len() as u64 {
            tx.rollback().await?;
            return Ok(OrderInsert::ReservationsUnavailable);
        }

        for line in &order.lines {
            let position = i32::try_from(line.position)
                .map_err(|_| StoreError::Corrupt(format!("line position {}", line.position)))?;
            sqlx::query(
                r#"
                INSERT INTO order_lines (order_id, position, reservation_id, product_id, size, product_name, quantity, unit_price_minor)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(position)
            .bind(line.reservation_id.as_uuid())
            .bind(line.key.product_id.as_i64())
            .bind(line.key.size.as_str())
            .bind(&line.product_name)
            .bind(i64::from(line.quantity))
            .bind(line.unit_price.minor())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(OrderInsert::Inserted)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.orders_with_lines(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn find_order_by_payment_ref(&self, payment_ref: &str) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE payment_ref = $1"
        ))
        .bind(payment_ref)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(self.orders_with_lines(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        self.orders_with_lines(rows).await
    }

    async fn stranded_orders(&self, limit: usize) -> Result<Vec<OrderId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT o.id
            FROM orders o
            WHERE o.state = 'PendingPayment'
              AND EXISTS (
                  SELECT 1 FROM reservations r
                  WHERE r.order_id = o.id AND r.state = 'Released'
              )
            ORDER BY o.created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(OrderId::from_uuid).collect())
    }

    async fn set_payment_ref(&self, id: OrderId, payment_ref: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET payment_ref = $2, updated_at = NOW()
            WHERE id = $1 AND payment_ref IS NULL
            "#,
        )
        .bind(id.as_uuid())
        .bind(payment_ref)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn transition_order(
        &self,
        id: OrderId,
        transition: OrderTransition,
    ) -> Result<Transition<OrderState>> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET state = $3,
                updated_at = $4,
                failure_reason = COALESCE($5, failure_reason),
                payment_id = COALESCE($6, payment_id)
            WHERE id = $1 AND state = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(transition.from.as_str())
        .bind(transition.to.as_str())
        .bind(transition.at)
        .bind(&transition.reason)
        .bind(&transition.payment_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(Transition::Applied);
        }

        let actual: Option<String> = sqlx::query_scalar("SELECT state FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        match actual {
            Some(state) => Ok(Transition::Conflict {
                actual: state.parse()?,
            }),
            None => Ok(Transition::NotFound),
        }
    }
}

#[async_trait]
impl ReconciliationStore for PostgresStore {
    async fn insert_reconciliation(&self, entry: &ReconciliationEntry) -> Result<()> {
        let committed: Vec<Uuid> = entry.committed.iter().map(|id| id.as_uuid()).collect();
        sqlx::query(
            r#"
            INSERT INTO reconciliations (id, order_id, payment_ref, payment_id, committed_reservations, reason, created_at, resolved_at, resolution)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id)
        .bind(entry.order_id.as_uuid())
        .bind(&entry.payment_ref)
        .bind(&entry.payment_id)
        .bind(&committed)
        .bind(&entry.reason)
        .bind(entry.created_at)
        .bind(entry.resolved_at)
        .bind(&entry.resolution)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn open_reconciliations(&self) -> Result<Vec<ReconciliationEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, payment_ref, payment_id, committed_reservations, reason, created_at, resolved_at, resolution
            FROM reconciliations
            WHERE resolved_at IS NULL
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_reconciliation).collect()
    }

    async fn resolve_reconciliation(
        &self,
        id: Uuid,
        note: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reconciliations
            SET resolved_at = $2, resolution = $3
            WHERE id = $1 AND resolved_at IS NULL
            "#,
        )
        .bind(id)
        .bind(at)
        .bind(note)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl CatalogStore for PostgresStore {
    async fn product(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query("SELECT id, name, price_minor FROM products WHERE id = $1")
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Product {
                id: ProductId::new(row.try_get("id")?),
                name: row.try_get("name")?,
                price: Money::from_minor(row.try_get("price_minor")?),
            })),
            None => Ok(None),
        }
    }

    async fn upsert_product(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, price_minor)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                price_minor = EXCLUDED.price_minor
            "#,
        )
        .bind(product.id.as_i64())
        .bind(&product.name)
        .bind(product.price.minor())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

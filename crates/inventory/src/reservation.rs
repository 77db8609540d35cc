//! Time-boxed stock holds.
//!
//! A hold decrements the ledger up front, so stock is never promised twice.
//! It then resolves exactly once: `commit` keeps the decrement, `release`
//! returns it. Both are compare-and-set transitions out of `Held`; whoever
//! loses a race sees [`ReservationError::AlreadyResolved`] and changes nothing.

use chrono::{DateTime, Duration, Utc};
use common::{Clock, OrderId, ReservationId, ReservationState, SystemClock, VariantKey};
use store::{Reservation, ReservationStore, StockStore, Transition};

use crate::error::{LedgerError, ReservationError};
use crate::ledger::{CreditOutcome, InventoryLedger};

/// Result of a pass over released reservations that never got their credit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub scanned: usize,
    pub repaired: usize,
}

/// Issues, commits and releases reservations against the ledger.
#[derive(Clone)]
pub struct ReservationManager<S, C = SystemClock> {
    ledger: InventoryLedger<S>,
    store: S,
    clock: C,
}

impl<S> ReservationManager<S, SystemClock>
where
    S: StockStore + ReservationStore + Clone,
{
    /// Creates a manager on the wall clock.
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S, C> ReservationManager<S, C>
where
    S: StockStore + ReservationStore + Clone,
    C: Clock,
{
    pub fn with_clock(store: S, clock: C) -> Self {
        Self {
            ledger: InventoryLedger::new(store.clone()),
            store,
            clock,
        }
    }

    pub fn ledger(&self) -> &InventoryLedger<S> {
        &self.ledger
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Takes `quantity` of `key` out of available stock for `ttl`.
    ///
    /// On `InsufficientStock` nothing was changed.
    #[tracing::instrument(skip(self), fields(product_id = %key.product_id, size = %key.size))]
    pub async fn hold(
        &self,
        key: &VariantKey,
        quantity: u32,
        ttl: Duration,
    ) -> Result<Reservation, ReservationError> {
        if quantity == 0 {
            return Err(ReservationError::InvalidQuantity(quantity));
        }

        if let Err(err) = self.ledger.try_decrement(key, quantity).await {
            let outcome = match &err {
                LedgerError::InsufficientStock { .. } => "insufficient",
                LedgerError::UnknownVariant(_) => "unknown_variant",
                _ => "error",
            };
            metrics::counter!("inventory_holds_total", "outcome" => outcome).increment(1);
            return Err(err.into());
        }

        let reservation = Reservation::held(
            ReservationId::new(),
            key.clone(),
            quantity,
            self.clock.now(),
            ttl,
        );

        if let Err(err) = self.store.insert_reservation(&reservation).await {
            // The stock is already gone from the counter; put it back under the
            // id the reservation would have had so a retry cannot double it.
            tracing::error!(
                reservation_id = %reservation.id,
                error = %err,
                "failed to persist reservation, compensating decrement"
            );
            if let Err(compensation) = self
                .ledger
                .increment(key, quantity, reservation.id.as_uuid())
                .await
            {
                tracing::error!(
                    reservation_id = %reservation.id,
                    error = %compensation,
                    "compensating increment failed"
                );
            }
            metrics::counter!("inventory_holds_total", "outcome" => "error").increment(1);
            return Err(err.into());
        }

        metrics::counter!("inventory_holds_total", "outcome" => "held").increment(1);
        tracing::debug!(
            reservation_id = %reservation.id,
            expires_at = %reservation.expires_at,
            "stock held"
        );
        Ok(reservation)
    }

    /// Turns a hold into consumed stock. The ledger is not touched.
    #[tracing::instrument(skip(self))]
    pub async fn commit(&self, id: ReservationId) -> Result<Reservation, ReservationError> {
        let mut reservation = self.get(id).await?;
        let at = self.clock.now();

        self.resolve(id, ReservationState::Committed, at).await?;

        reservation.state = ReservationState::Committed;
        reservation.resolved_at = Some(at);
        metrics::counter!("reservations_committed_total").increment(1);
        Ok(reservation)
    }

    /// Cancels a hold and returns its quantity to the ledger, exactly once.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, id: ReservationId) -> Result<Reservation, ReservationError> {
        let mut reservation = self.get(id).await?;
        let at = self.clock.now();

        self.resolve(id, ReservationState::Released, at).await?;

        reservation.state = ReservationState::Released;
        reservation.resolved_at = Some(at);
        metrics::counter!("reservations_released_total").increment(1);

        // A failure here leaves a Released row without its credit; the
        // sweeper's repair pass applies it later under the same id.
        let outcome = self
            .ledger
            .increment(&reservation.key, reservation.quantity, id.as_uuid())
            .await
            .inspect_err(|err| {
                tracing::warn!(reservation_id = %id, error = %err, "release credit failed");
            })?;
        if outcome == CreditOutcome::AlreadyApplied {
            tracing::warn!(reservation_id = %id, "release credit was already applied");
        }

        Ok(reservation)
    }

    async fn resolve(
        &self,
        id: ReservationId,
        to: ReservationState,
        at: DateTime<Utc>,
    ) -> Result<(), ReservationError> {
        match self
            .store
            .transition_reservation(id, ReservationState::Held, to, at)
            .await?
        {
            Transition::Applied => Ok(()),
            Transition::Conflict { actual } => {
                Err(ReservationError::AlreadyResolved { id, state: actual })
            }
            Transition::NotFound => Err(ReservationError::NotFound(id)),
        }
    }

    pub async fn get(&self, id: ReservationId) -> Result<Reservation, ReservationError> {
        self.store
            .get_reservation(id)
            .await?
            .ok_or(ReservationError::NotFound(id))
    }

    pub async fn for_order(&self, order_id: OrderId) -> Result<Vec<Reservation>, ReservationError> {
        Ok(self.store.reservations_for_order(order_id).await?)
    }

    /// Releases up to `batch` holds whose TTL lapsed at or before `now`.
    ///
    /// Returns the reservations this call released, including any whose
    /// ledger credit failed after the release itself applied. Holds resolved
    /// by a concurrent commit or release in the meantime are skipped.
    #[tracing::instrument(skip(self))]
    pub async fn release_expired(
        &self,
        now: DateTime<Utc>,
        batch: usize,
    ) -> Result<Vec<Reservation>, ReservationError> {
        let expired = self.store.expired_reservations(now, batch).await?;
        let mut released = Vec::with_capacity(expired.len());

        for reservation in expired {
            match self.release(reservation.id).await {
                Ok(reservation) => released.push(reservation),
                Err(ReservationError::AlreadyResolved { id, state }) => {
                    tracing::debug!(reservation_id = %id, %state, "expired hold already resolved");
                }
                Err(err) => {
                    tracing::warn!(
                        reservation_id = %reservation.id,
                        error = %err,
                        "failed to release expired hold"
                    );
                    // The release may have applied before its credit failed;
                    // the repair pass owes that credit, the caller owns the order.
                    match self.get(reservation.id).await {
                        Ok(current) if current.state == ReservationState::Released => {
                            released.push(current);
                        }
                        _ => {}
                    }
                }
            }
        }

        if !released.is_empty() {
            tracing::info!(count = released.len(), "released expired holds");
        }
        Ok(released)
    }

    /// Applies missing ledger credits for released reservations.
    #[tracing::instrument(skip(self))]
    pub async fn repair_uncredited(&self, batch: usize) -> Result<RepairReport, ReservationError> {
        let pending = self.store.uncredited_releases(batch).await?;
        let mut report = RepairReport {
            scanned: pending.len(),
            repaired: 0,
        };

        for reservation in pending {
            match self
                .ledger
                .increment(&reservation.key, reservation.quantity, reservation.id.as_uuid())
                .await
            {
                Ok(CreditOutcome::Applied { .. }) => {
                    tracing::info!(reservation_id = %reservation.id, "applied missing release credit");
                    report.repaired += 1;
                }
                Ok(CreditOutcome::AlreadyApplied) => {}
                Err(err) => {
                    tracing::warn!(
                        reservation_id = %reservation.id,
                        error = %err,
                        "failed to apply missing release credit"
                    );
                }
            }
        }

        Ok(report)
    }
}

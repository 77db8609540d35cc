//! The order state machine.
//!
//! ```text
//! PendingPayment ──success callback──▶ Paid
//!        │ ├──────failure callback──▶ Failed
//!        │ ├──────commit failure────▶ Failed (+ reconciliation)
//!        │ ├──────cancel────────────▶ Cancelled
//!        │ └──────hold lapsed───────▶ Expired
//! ```
//!
//! Every arrow is a compare-and-set out of `PendingPayment`. Whichever caller
//! applies it owns the follow-up (committing or releasing holds); every other
//! caller sees [`OrderError::AlreadyResolved`].

use std::time::Instant;

use chrono::Duration;
use common::{Clock, Money, OrderId, OrderState, ReservationId, ReservationState, SystemClock, UserId};
use inventory::{InventoryLedger, LedgerError, ReservationError, ReservationManager};
use serde::Serialize;
use store::{Order, OrderInsert, OrderLine, OrderTransition, Product, Reservation, Store, Transition};
use uuid::Uuid;

use crate::error::{OrderError, UnavailableLine, ValidationError};
use crate::gateway::{PaymentCallback, PaymentGateway, PaymentStatus};
use crate::reconciliation::ReconciliationQueue;
use crate::validation::{CheckoutLine, ValidatedCheckout};

/// Order placement settings.
#[derive(Debug, Clone)]
pub struct OrderConfig {
    /// How long checkout holds stay valid without a payment result.
    pub reservation_ttl: Duration,
    pub currency: String,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            reservation_ttl: Duration::minutes(10),
            currency: "INR".to_string(),
        }
    }
}

/// What a verified payment callback did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// Every hold was committed and the order is Paid.
    Paid,
    /// The payment failed and the holds were released.
    Failed,
    /// The order had already reached this result; nothing changed.
    Duplicate,
    /// A hold could not be committed. The order is Failed and the payment
    /// was queued for an operator.
    PartialCommitFailure { reconciliation_id: Uuid },
    /// Money moved for an order that is no longer payable.
    NeedsReconciliation { reconciliation_id: Uuid },
}

#[derive(Debug, Clone)]
pub struct PaymentResolution {
    pub order: Order,
    pub outcome: PaymentOutcome,
}

/// Drives orders through their lifecycle.
pub struct OrderService<S, G, C = SystemClock> {
    store: S,
    reservations: ReservationManager<S, C>,
    reconciliations: ReconciliationQueue<S, C>,
    gateway: G,
    config: OrderConfig,
}

impl<S, G> OrderService<S, G, SystemClock>
where
    S: Store + Clone,
    G: PaymentGateway,
{
    pub fn new(store: S, gateway: G, config: OrderConfig) -> Self {
        Self::with_clock(store, gateway, SystemClock, config)
    }
}

impl<S, G, C> OrderService<S, G, C>
where
    S: Store + Clone,
    G: PaymentGateway,
    C: Clock + Clone,
{
    pub fn with_clock(store: S, gateway: G, clock: C, config: OrderConfig) -> Self {
        Self {
            reservations: ReservationManager::with_clock(store.clone(), clock.clone()),
            reconciliations: ReconciliationQueue::new(store.clone(), clock),
            store,
            gateway,
            config,
        }
    }

    pub fn reservations(&self) -> &ReservationManager<S, C> {
        &self.reservations
    }

    pub fn ledger(&self) -> &InventoryLedger<S> {
        self.reservations.ledger()
    }

    pub fn reconciliations(&self) -> &ReconciliationQueue<S, C> {
        &self.reconciliations
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn clock(&self) -> &C {
        self.reservations.clock()
    }

    pub fn config(&self) -> &OrderConfig {
        &self.config
    }

    pub async fn get_order(&self, id: OrderId) -> Result<Order, OrderError> {
        self.store
            .get_order(id)
            .await?
            .ok_or(OrderError::NotFound(id))
    }

    /// Orders of a user, newest first.
    pub async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, OrderError> {
        Ok(self.store.orders_for_user(user_id).await?)
    }

    /// Holds every line and opens a payment for the order.
    ///
    /// Either every line is held and a `PendingPayment` order exists, or
    /// nothing is held and no order was saved. The only exception is a
    /// gateway failure after the order was saved: the order is then moved
    /// to `Failed` and its holds released.
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id, lines = request.lines.len()))]
    pub async fn checkout(&self, request: ValidatedCheckout) -> Result<Order, OrderError> {
        let started = Instant::now();

        let products = self.price_lines(&request.lines).await?;
        let total = request
            .lines
            .iter()
            .zip(&products)
            .try_fold(Money::zero(), |total, (line, product)| {
                product
                    .price
                    .checked_multiply(line.quantity)
                    .and_then(|line_total| total.checked_add(line_total))
            })
            .ok_or(ValidationError::TotalOverflow)?;

        let holds = self.hold_all(&request.lines).await?;

        let now = self.clock().now();
        let order = Order {
            id: OrderId::new(),
            user_id: request.user_id,
            lines: request
                .lines
                .iter()
                .zip(products)
                .zip(&holds)
                .enumerate()
                .map(|(position, ((line, product), hold))| OrderLine {
                    position: position as u32,
                    reservation_id: hold.id,
                    key: line.key.clone(),
                    product_name: product.name,
                    quantity: line.quantity,
                    unit_price: product.price,
                })
                .collect(),
            total,
            currency: self.config.currency.clone(),
            state: OrderState::PendingPayment,
            payment_ref: None,
            payment_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };

        match self.store.insert_order(&order).await {
            Ok(OrderInsert::Inserted) => {}
            Ok(OrderInsert::ReservationsUnavailable) => {
                tracing::warn!(order_id = %order.id, "holds lapsed before the order was saved");
                self.release_all(holds.iter().map(|hold| hold.id).collect::<Vec<_>>()).await;
                return Err(OrderError::HoldLapsed);
            }
            Err(err) => {
                self.release_all(holds.iter().map(|hold| hold.id).collect::<Vec<_>>()).await;
                return Err(err.into());
            }
        }
        metrics::counter!("orders_created_total").increment(1);

        let order = self.open_payment(order).await?;

        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!(
            order_id = %order.id,
            total = %order.total,
            payment_ref = order.payment_ref.as_deref().unwrap_or_default(),
            "order awaiting payment"
        );
        Ok(order)
    }

    async fn price_lines(&self, lines: &[CheckoutLine]) -> Result<Vec<Product>, OrderError> {
        let mut products = Vec::with_capacity(lines.len());
        for line in lines {
            let product = self
                .store
                .product(line.key.product_id)
                .await?
                .ok_or(OrderError::UnknownProduct(line.key.product_id))?;
            products.push(product);
        }
        Ok(products)
    }

    /// Holds lines in request order, stopping at the first that cannot be held.
    async fn hold_all(&self, lines: &[CheckoutLine]) -> Result<Vec<Reservation>, OrderError> {
        let mut held = Vec::with_capacity(lines.len());

        for (index, line) in lines.iter().enumerate() {
            match self
                .reservations
                .hold(&line.key, line.quantity, self.config.reservation_ttl)
                .await
            {
                Ok(reservation) => held.push(reservation),
                Err(err) => {
                    self.release_all(held.iter().map(|hold| hold.id).collect::<Vec<_>>()).await;
                    if !err.is_unavailable() {
                        return Err(err.into());
                    }
                    let unavailable = self.unavailable_lines(&lines[index..], &err).await?;
                    tracing::info!(
                        unavailable = unavailable.len(),
                        "checkout rejected, stock unavailable"
                    );
                    return Err(OrderError::Unavailable(unavailable));
                }
            }
        }

        Ok(held)
    }

    /// The line that failed plus every later line that would fail right now.
    async fn unavailable_lines(
        &self,
        remaining: &[CheckoutLine],
        err: &ReservationError,
    ) -> Result<Vec<UnavailableLine>, OrderError> {
        let Some((failed, later)) = remaining.split_first() else {
            return Ok(Vec::new());
        };

        let available = match err {
            ReservationError::InsufficientStock { available, .. } => *available,
            _ => 0,
        };
        let mut lines = vec![UnavailableLine::new(&failed.key, failed.quantity, available)];

        for line in later {
            let available = match self.ledger().get_available(&line.key).await {
                Ok(available) => available,
                Err(LedgerError::UnknownVariant(_)) => 0,
                Err(err) => return Err(err.into()),
            };
            if available < line.quantity {
                lines.push(UnavailableLine::new(&line.key, line.quantity, available));
            }
        }

        Ok(lines)
    }

    async fn open_payment(&self, mut order: Order) -> Result<Order, OrderError> {
        let gateway_order = match self
            .gateway
            .create_order(order.total, &order.currency, order.id)
            .await
        {
            Ok(gateway_order) => gateway_order,
            Err(err) => {
                tracing::warn!(order_id = %order.id, error = %err, "gateway order creation failed");
                let transition = OrderTransition::new(
                    OrderState::PendingPayment,
                    OrderState::Failed,
                    self.clock().now(),
                )
                .with_reason(format!("payment could not be opened: {err}"));
                if self.transition(order.id, transition).await.is_ok() {
                    self.release_all(order.reservation_ids()).await;
                }
                return Err(err);
            }
        };

        self.store
            .set_payment_ref(order.id, &gateway_order.id)
            .await?;
        order.payment_ref = Some(gateway_order.id);
        Ok(order)
    }

    /// Applies a payment callback from the gateway.
    ///
    /// The signature, which covers the reported status, is checked before
    /// anything is looked up. Retried callbacks for an order that already
    /// reached the reported result come back as [`PaymentOutcome::Duplicate`].
    #[tracing::instrument(skip(self, callback), fields(payment_ref = %callback.gateway_order_id, payment_id = %callback.payment_id))]
    pub async fn on_payment_result(
        &self,
        callback: PaymentCallback,
    ) -> Result<PaymentResolution, OrderError> {
        let status = callback.payment_status()?;

        if !self.gateway.verify_signature(&callback) {
            tracing::warn!("rejected payment callback with invalid signature");
            return Err(OrderError::GatewaySignatureInvalid);
        }

        let order = self
            .store
            .find_order_by_payment_ref(&callback.gateway_order_id)
            .await?
            .ok_or_else(|| OrderError::UnknownPaymentReference(callback.gateway_order_id.clone()))?;

        match status {
            PaymentStatus::Succeeded => self.apply_success(order, callback.payment_id).await,
            PaymentStatus::Failed => self.apply_failure(order, callback.payment_id).await,
        }
    }

    async fn apply_failure(
        &self,
        order: Order,
        payment_id: String,
    ) -> Result<PaymentResolution, OrderError> {
        if order.state != OrderState::PendingPayment {
            return Ok(PaymentResolution {
                order,
                outcome: PaymentOutcome::Duplicate,
            });
        }

        let transition = OrderTransition::new(
            OrderState::PendingPayment,
            OrderState::Failed,
            self.clock().now(),
        )
        .with_reason("payment failed")
        .with_payment_id(payment_id);

        let outcome = match self.transition(order.id, transition).await {
            Ok(()) => {
                self.release_all(order.reservation_ids()).await;
                PaymentOutcome::Failed
            }
            Err(OrderError::AlreadyResolved { .. }) => PaymentOutcome::Duplicate,
            Err(err) => return Err(err),
        };

        Ok(PaymentResolution {
            order: self.get_order(order.id).await?,
            outcome,
        })
    }

    async fn apply_success(
        &self,
        order: Order,
        payment_id: String,
    ) -> Result<PaymentResolution, OrderError> {
        match order.state {
            OrderState::PendingPayment => {}
            OrderState::Paid if order.payment_id.as_deref() == Some(payment_id.as_str()) => {
                return Ok(PaymentResolution {
                    order,
                    outcome: PaymentOutcome::Duplicate,
                });
            }
            state => {
                let entry = self
                    .reconciliations
                    .raise(
                        &order,
                        Some(payment_id),
                        Vec::new(),
                        format!("payment captured for {state} order"),
                    )
                    .await?;
                return Ok(PaymentResolution {
                    order,
                    outcome: PaymentOutcome::NeedsReconciliation {
                        reconciliation_id: entry.id,
                    },
                });
            }
        }

        let (committed, failure) = self.commit_all(&order).await?;

        if let Some(failure) = failure {
            return self
                .fail_partial_commit(order, payment_id, committed, failure)
                .await;
        }

        let transition = OrderTransition::new(
            OrderState::PendingPayment,
            OrderState::Paid,
            self.clock().now(),
        )
        .with_payment_id(payment_id.clone());

        match self.transition(order.id, transition).await {
            Ok(()) => Ok(PaymentResolution {
                order: self.get_order(order.id).await?,
                outcome: PaymentOutcome::Paid,
            }),
            Err(OrderError::AlreadyResolved { state, .. }) => {
                let current = self.get_order(order.id).await?;
                if state == OrderState::Paid
                    && current.payment_id.as_deref() == Some(payment_id.as_str())
                {
                    return Ok(PaymentResolution {
                        order: current,
                        outcome: PaymentOutcome::Duplicate,
                    });
                }
                let entry = self
                    .reconciliations
                    .raise(
                        &current,
                        Some(payment_id),
                        committed,
                        format!("order became {state} while the payment was applied"),
                    )
                    .await?;
                Ok(PaymentResolution {
                    order: current,
                    outcome: PaymentOutcome::NeedsReconciliation {
                        reconciliation_id: entry.id,
                    },
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Commits holds in line order until one cannot be committed.
    ///
    /// Holds this order already committed (a retried callback) count as
    /// committed. Store errors abort without touching the order.
    async fn commit_all(
        &self,
        order: &Order,
    ) -> Result<(Vec<ReservationId>, Option<String>), OrderError> {
        let mut committed = Vec::with_capacity(order.lines.len());

        for id in order.reservation_ids() {
            match self.reservations.commit(id).await {
                Ok(_)
                | Err(ReservationError::AlreadyResolved {
                    state: ReservationState::Committed,
                    ..
                }) => committed.push(id),
                Err(err @ ReservationError::AlreadyResolved { .. })
                | Err(err @ ReservationError::NotFound(_)) => {
                    tracing::warn!(reservation_id = %id, error = %err, "hold could not be committed");
                    return Ok((committed, Some(err.to_string())));
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok((committed, None))
    }

    async fn fail_partial_commit(
        &self,
        order: Order,
        payment_id: String,
        committed: Vec<ReservationId>,
        failure: String,
    ) -> Result<PaymentResolution, OrderError> {
        let reason = format!("partial commit failure: {failure}");
        let transition = OrderTransition::new(
            OrderState::PendingPayment,
            OrderState::Failed,
            self.clock().now(),
        )
        .with_reason(reason.clone())
        .with_payment_id(payment_id.clone());

        match self.transition(order.id, transition).await {
            Ok(()) | Err(OrderError::AlreadyResolved { .. }) => {}
            Err(err) => return Err(err),
        }

        // Committed siblings answer AlreadyResolved and stay committed.
        self.release_all(order.reservation_ids()).await;

        let current = self.get_order(order.id).await?;
        let entry = self
            .reconciliations
            .raise(&current, Some(payment_id), committed, reason)
            .await?;

        Ok(PaymentResolution {
            order: current,
            outcome: PaymentOutcome::PartialCommitFailure {
                reconciliation_id: entry.id,
            },
        })
    }

    /// Pending orders that lost a hold, oldest first. The expiry sweep moves
    /// them to `Expired`.
    pub async fn stranded_orders(&self, limit: usize) -> Result<Vec<OrderId>, OrderError> {
        Ok(self.store.stranded_orders(limit).await?)
    }

    /// Moves a pending order whose hold lapsed to `Expired` and releases the
    /// rest of its holds.
    #[tracing::instrument(skip(self))]
    pub async fn expire(&self, order_id: OrderId) -> Result<Order, OrderError> {
        self.close(order_id, OrderState::Expired, "payment window expired")
            .await
    }

    /// Cancels an order that has not been paid yet.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, order_id: OrderId) -> Result<Order, OrderError> {
        self.close(order_id, OrderState::Cancelled, "cancelled before payment")
            .await
    }

    async fn close(
        &self,
        order_id: OrderId,
        to: OrderState,
        reason: &str,
    ) -> Result<Order, OrderError> {
        let order = self.get_order(order_id).await?;
        let transition =
            OrderTransition::new(OrderState::PendingPayment, to, self.clock().now())
                .with_reason(reason);

        self.transition(order_id, transition).await?;
        self.release_all(order.reservation_ids()).await;

        self.get_order(order_id).await
    }

    async fn transition(
        &self,
        order_id: OrderId,
        transition: OrderTransition,
    ) -> Result<(), OrderError> {
        let to = transition.to;
        match self.store.transition_order(order_id, transition).await? {
            Transition::Applied => {
                metrics::counter!("orders_resolved_total", "state" => to.as_str()).increment(1);
                tracing::info!(%order_id, state = %to, "order resolved");
                Ok(())
            }
            Transition::Conflict { actual } => Err(OrderError::AlreadyResolved {
                id: order_id,
                state: actual,
            }),
            Transition::NotFound => Err(OrderError::NotFound(order_id)),
        }
    }

    /// Best-effort release. Holds that already left `Held` are skipped; other
    /// failures are left to the expiry sweep.
    async fn release_all(&self, ids: impl IntoIterator<Item = ReservationId>) {
        for id in ids {
            match self.reservations.release(id).await {
                Ok(_) | Err(ReservationError::AlreadyResolved { .. }) => {}
                Err(err) => {
                    tracing::warn!(reservation_id = %id, error = %err, "failed to release hold");
                }
            }
        }
    }
}

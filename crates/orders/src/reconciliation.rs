//! Operator queue for payments that moved money without producing a Paid order.

use common::{Clock, ReservationId, SystemClock};
use store::{Order, ReconciliationEntry, ReconciliationStore};
use uuid::Uuid;

use crate::error::OrderError;

/// Raises, lists and resolves reconciliation entries. Entries are never deleted.
#[derive(Clone)]
pub struct ReconciliationQueue<S, C = SystemClock> {
    store: S,
    clock: C,
}

impl<S, C> ReconciliationQueue<S, C>
where
    S: ReconciliationStore,
    C: Clock,
{
    pub fn new(store: S, clock: C) -> Self {
        Self { store, clock }
    }

    /// Queues a payment on `order` for manual follow-up.
    #[tracing::instrument(skip_all, fields(order_id = %order.id))]
    pub async fn raise(
        &self,
        order: &Order,
        payment_id: Option<String>,
        committed: Vec<ReservationId>,
        reason: impl Into<String>,
    ) -> Result<ReconciliationEntry, OrderError> {
        let entry = ReconciliationEntry::open(
            order.id,
            order.payment_ref.clone(),
            payment_id,
            committed,
            reason,
            self.clock.now(),
        );
        self.store.insert_reconciliation(&entry).await?;

        metrics::counter!("reconciliations_raised_total").increment(1);
        tracing::warn!(
            reconciliation_id = %entry.id,
            committed = entry.committed.len(),
            reason = %entry.reason,
            "payment needs reconciliation"
        );
        Ok(entry)
    }

    /// Unresolved entries, oldest first.
    pub async fn list_open(&self) -> Result<Vec<ReconciliationEntry>, OrderError> {
        Ok(self.store.open_reconciliations().await?)
    }

    /// Closes an open entry with an operator note.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, id: Uuid, note: &str) -> Result<(), OrderError> {
        if !self
            .store
            .resolve_reconciliation(id, note, self.clock.now())
            .await?
        {
            return Err(OrderError::ReconciliationNotFound(id));
        }
        tracing::info!(reconciliation_id = %id, "reconciliation resolved");
        Ok(())
    }
}

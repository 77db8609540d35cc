//! The inventory ledger: authoritative available quantity per size variant.
//!
//! Every mutation maps to exactly one conditional store update. The ledger
//! never reads a counter to compute a value it then writes back, so any number
//! of processes can share the same store without in-process locking.

use common::{ProductId, VariantKey};
use store::{Credit, Decrement, StockLevel, StockStore};
use uuid::Uuid;

use crate::error::LedgerError;

/// Namespace for restock credit ids. Restocks credit under
/// `v5(RESTOCK_NAMESPACE, adjustment_id)`, which can never equal a (v4)
/// reservation id, so an adjustment cannot consume a release's credit.
const RESTOCK_NAMESPACE: Uuid = Uuid::from_u128(0x6c1f_2d4e_93a7_4b0e_8f55_1d2c_7e90_ab34);

/// Outcome of a keyed increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    /// Stock was returned; `available` is the new counter value.
    Applied { available: u32 },
    /// The same credit id was applied earlier; nothing changed.
    AlreadyApplied,
}

/// Per-(product, size) stock counters with compare-and-decrement semantics.
#[derive(Clone)]
pub struct InventoryLedger<S> {
    store: S,
}

impl<S: StockStore> InventoryLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn check_quantity(quantity: u32) -> Result<(), LedgerError> {
        if quantity == 0 {
            return Err(LedgerError::InvalidQuantity(quantity));
        }
        Ok(())
    }

    /// Decrements `key` by `quantity` only if at least that much is available.
    ///
    /// Returns the remaining quantity.
    #[tracing::instrument(skip(self), fields(product_id = %key.product_id, size = %key.size))]
    pub async fn try_decrement(&self, key: &VariantKey, quantity: u32) -> Result<u32, LedgerError> {
        Self::check_quantity(quantity)?;

        match self.store.try_decrement(key, quantity).await? {
            Decrement::Applied { remaining } => Ok(remaining),
            Decrement::Insufficient { available } => Err(LedgerError::InsufficientStock {
                key: key.clone(),
                requested: quantity,
                available,
            }),
            Decrement::UnknownVariant => Err(LedgerError::UnknownVariant(key.clone())),
        }
    }

    /// Returns `quantity` to `key`, at most once per `credit_id`.
    ///
    /// Releases pass the reservation id as the credit id, so a retried release
    /// can never add the same stock twice.
    #[tracing::instrument(skip(self), fields(product_id = %key.product_id, size = %key.size))]
    pub async fn increment(
        &self,
        key: &VariantKey,
        quantity: u32,
        credit_id: Uuid,
    ) -> Result<CreditOutcome, LedgerError> {
        Self::check_quantity(quantity)?;

        match self.store.credit(key, quantity, credit_id).await? {
            Credit::Applied { available } => Ok(CreditOutcome::Applied { available }),
            Credit::AlreadyApplied => {
                tracing::debug!(%credit_id, "credit already applied");
                Ok(CreditOutcome::AlreadyApplied)
            }
            Credit::UnknownVariant => Err(LedgerError::UnknownVariant(key.clone())),
        }
    }

    /// Point-in-time available quantity.
    pub async fn get_available(&self, key: &VariantKey) -> Result<u32, LedgerError> {
        self.store
            .stock_level(key)
            .await?
            .map(|level| level.available)
            .ok_or_else(|| LedgerError::UnknownVariant(key.clone()))
    }

    /// Creates the counter for a new size variant.
    ///
    /// Returns false if the variant already existed; its counter is left as is.
    #[tracing::instrument(skip(self), fields(product_id = %key.product_id, size = %key.size))]
    pub async fn register_variant(&self, key: &VariantKey, initial: u32) -> Result<bool, LedgerError> {
        let created = self.store.register_variant(key, initial).await?;
        if created {
            tracing::info!(initial, "variant registered");
        }
        Ok(created)
    }

    /// Administrative stock receipt. Retrying with the same `adjustment_id`
    /// is a no-op.
    #[tracing::instrument(skip(self), fields(product_id = %key.product_id, size = %key.size))]
    pub async fn restock(
        &self,
        key: &VariantKey,
        quantity: u32,
        adjustment_id: Uuid,
    ) -> Result<CreditOutcome, LedgerError> {
        let credit_id = Uuid::new_v5(&RESTOCK_NAMESPACE, adjustment_id.as_bytes());
        let outcome = self.increment(key, quantity, credit_id).await?;
        if let CreditOutcome::Applied { available } = outcome {
            tracing::info!(quantity, available, "stock received");
        }
        Ok(outcome)
    }

    /// Removes damaged or lost stock. Fails rather than going below zero.
    #[tracing::instrument(skip(self), fields(product_id = %key.product_id, size = %key.size))]
    pub async fn write_off(&self, key: &VariantKey, quantity: u32) -> Result<u32, LedgerError> {
        let remaining = self.try_decrement(key, quantity).await?;
        tracing::info!(quantity, remaining, "stock written off");
        Ok(remaining)
    }

    /// All size variants of a product, ordered by size.
    pub async fn list_variants(&self, product_id: ProductId) -> Result<Vec<StockLevel>, LedgerError> {
        Ok(self.store.stock_levels(product_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Size;
    use store::InMemoryStore;

    fn key(size: &str) -> VariantKey {
        VariantKey::new(10, Size::new(size).unwrap())
    }

    async fn ledger_with(size: &str, available: u32) -> InventoryLedger<InMemoryStore> {
        let ledger = InventoryLedger::new(InMemoryStore::new());
        ledger.register_variant(&key(size), available).await.unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_decrement_reduces_available() {
        let ledger = ledger_with("UK-8", 5).await;

        let remaining = ledger.try_decrement(&key("UK-8"), 2).await.unwrap();

        assert_eq!(remaining, 3);
        assert_eq!(ledger.get_available(&key("UK-8")).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_decrement_beyond_stock_is_rejected() {
        let ledger = ledger_with("UK-8", 1).await;

        let result = ledger.try_decrement(&key("UK-8"), 2).await;

        assert!(matches!(
            result,
            Err(LedgerError::InsufficientStock {
                requested: 2,
                available: 1,
                ..
            })
        ));
        assert_eq!(ledger.get_available(&key("UK-8")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_zero_quantity_is_rejected() {
        let ledger = ledger_with("UK-8", 1).await;

        assert!(matches!(
            ledger.try_decrement(&key("UK-8"), 0).await,
            Err(LedgerError::InvalidQuantity(0))
        ));
        assert!(matches!(
            ledger.increment(&key("UK-8"), 0, Uuid::new_v4()).await,
            Err(LedgerError::InvalidQuantity(0))
        ));
    }

    #[tokio::test]
    async fn test_unknown_variant() {
        let ledger = ledger_with("UK-8", 1).await;

        assert!(matches!(
            ledger.try_decrement(&key("UK-9"), 1).await,
            Err(LedgerError::UnknownVariant(_))
        ));
        assert!(matches!(
            ledger.get_available(&key("UK-9")).await,
            Err(LedgerError::UnknownVariant(_))
        ));
    }

    #[tokio::test]
    async fn test_increment_is_idempotent_per_credit_id() {
        let ledger = ledger_with("UK-8", 0).await;
        let credit_id = Uuid::new_v4();

        let first = ledger.increment(&key("UK-8"), 3, credit_id).await.unwrap();
        let second = ledger.increment(&key("UK-8"), 3, credit_id).await.unwrap();

        assert_eq!(first, CreditOutcome::Applied { available: 3 });
        assert_eq!(second, CreditOutcome::AlreadyApplied);
        assert_eq!(ledger.get_available(&key("UK-8")).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_register_does_not_overwrite() {
        let ledger = ledger_with("UK-8", 4).await;

        let created = ledger.register_variant(&key("UK-8"), 100).await.unwrap();

        assert!(!created);
        assert_eq!(ledger.get_available(&key("UK-8")).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_restock_and_write_off() {
        let ledger = ledger_with("UK-8", 2).await;
        let adjustment = Uuid::new_v4();

        ledger.restock(&key("UK-8"), 10, adjustment).await.unwrap();
        ledger.restock(&key("UK-8"), 10, adjustment).await.unwrap();
        assert_eq!(ledger.get_available(&key("UK-8")).await.unwrap(), 12);

        assert_eq!(ledger.write_off(&key("UK-8"), 5).await.unwrap(), 7);
        assert!(matches!(
            ledger.write_off(&key("UK-8"), 8).await,
            Err(LedgerError::InsufficientStock { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_variants_sorted_by_size() {
        let ledger = ledger_with("UK-9", 1).await;
        ledger.register_variant(&key("UK-10"), 2).await.unwrap();
        ledger.register_variant(&key("UK-8"), 3).await.unwrap();

        let sizes: Vec<String> = ledger
            .list_variants(ProductId::new(10))
            .await
            .unwrap()
            .into_iter()
            .map(|level| level.key.size.to_string())
            .collect();

        assert_eq!(sizes, vec!["UK-10", "UK-8", "UK-9"]);
    }
}

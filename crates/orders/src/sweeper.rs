//! Background reclamation of holds nobody paid for.

use std::sync::Arc;
use std::time::Duration;

use common::{Clock, SystemClock};
use store::Store;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::error::OrderError;
use crate::gateway::PaymentGateway;
use crate::service::OrderService;

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval: Duration,
    /// Maximum reservations or orders handled per step and tick.
    pub batch_size: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_size: 500,
        }
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub released: usize,
    pub orders_expired: usize,
    pub credits_repaired: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Periodically releases lapsed holds, expires every pending order left with
/// a released hold and re-applies ledger credits lost to a crash. Every step
/// is safe to repeat, so an interrupted sweep is finished by the next one.
pub struct ExpirySweeper<S, G, C = SystemClock> {
    service: Arc<OrderService<S, G, C>>,
    config: SweeperConfig,
}

impl<S, G, C> ExpirySweeper<S, G, C>
where
    S: Store + Clone,
    G: PaymentGateway,
    C: Clock + Clone,
{
    pub fn new(service: Arc<OrderService<S, G, C>>, config: SweeperConfig) -> Self {
        Self { service, config }
    }

    /// Runs one sweep.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<SweepReport, OrderError> {
        let now = self.service.clock().now();
        let released = self
            .service
            .reservations()
            .release_expired(now, self.config.batch_size)
            .await?;

        // Covers this tick's releases as well as orders an earlier tick
        // released a hold for but never got to expire.
        let order_ids = self.service.stranded_orders(self.config.batch_size).await?;

        let mut orders_expired = 0;
        for order_id in order_ids {
            match self.service.expire(order_id).await {
                Ok(_) => orders_expired += 1,
                Err(OrderError::AlreadyResolved { .. }) => {}
                Err(err) => {
                    tracing::warn!(%order_id, error = %err, "failed to expire order");
                }
            }
        }

        let repair = self
            .service
            .reservations()
            .repair_uncredited(self.config.batch_size)
            .await?;

        metrics::counter!("sweeper_runs_total").increment(1);
        Ok(SweepReport {
            released: released.len(),
            orders_expired,
            credits_repaired: repair.repaired,
        })
    }

    /// Sweeps every `interval` until `shutdown` flips to true or its sender
    /// is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.config.interval.as_secs(), "expiry sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(report) if report.is_empty() => {}
                        Ok(report) => tracing::info!(
                            released = report.released,
                            orders_expired = report.orders_expired,
                            credits_repaired = report.credits_repaired,
                            "sweep complete"
                        ),
                        Err(err) => tracing::error!(error = %err, "sweep failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("expiry sweeper stopped");
    }
}

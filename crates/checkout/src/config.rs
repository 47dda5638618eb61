use std::time::Duration;

/// Orchestrator tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckoutConfig {
    /// Lifetime of a checkout attempt. Reservations made for it never outlive it.
    pub checkout_ttl: Duration,
    /// Upper bound on every validator, pricing, payment and order call.
    pub downstream_timeout: Duration,
    /// How many expired checkouts `expire_stale` loads per query.
    pub expire_batch: usize,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            checkout_ttl: Duration::from_secs(30 * 60),
            downstream_timeout: Duration::from_secs(5),
            expire_batch: 100,
        }
    }
}

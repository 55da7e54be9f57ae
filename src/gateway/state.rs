use std::sync::Arc;

use crate::cache::PurchaseCache;
use crate::chain::ChainService;
use crate::config::AppConfig;
use crate::queue::EventQueue;
use crate::rebalance::RebalanceEngine;
use crate::store::{EarmarkStore, OperationStore, PauseStore};

/// Gateway application state (shared)
#[derive(Clone)]
pub struct AdminState {
    pub config: Arc<AppConfig>,
    pub earmarks: Arc<EarmarkStore>,
    pub operations: Arc<OperationStore>,
    pub pause: Arc<PauseStore>,
    pub queue: Arc<EventQueue>,
    pub cache: Arc<PurchaseCache>,
    pub engine: Arc<RebalanceEngine>,
    pub chain: Arc<dyn ChainService>,
}

//! Mark - Autonomous Market-Maker / Rebalancer
//!
//! Mark watches the Everclear settlement hub for invoices, fills them with
//! its own liquidity, and continuously rebalances that liquidity across
//! chains through pluggable bridge back-ends.
//!
//! # Modules
//!
//! - [`amount`] - Arbitrary-precision monetary amounts (18-decimal canonical)
//! - [`config`] - Service configuration (YAML + environment)
//! - [`receipt`] - Transaction receipt normalisation
//! - [`queue`] - Redis-backed durable event queue
//! - [`cache`] - Purchase fingerprint cache
//! - [`store`] - Postgres operations store (earmarks, operations, pause flags)
//! - [`adapters`] - Bridge adapter capability set and registry
//! - [`chain`] - Transaction submission / balance reads via the signer
//! - [`hub`] - Everclear hub REST client
//! - [`balances`] - Canonical balance reads across chains
//! - [`planner`] - Split-intent planner
//! - [`rebalance`] - Rebalance engine (callbacks, on-demand, threshold)
//! - [`processor`] - Event consumer pool and handlers
//! - [`poller`] - Backfill poller reconciling webhooks against the hub
//! - [`gateway`] - Admin HTTP surface and webhook ingress

// Foundations
pub mod amount;
pub mod config;
pub mod logging;
pub mod receipt;

// Shared infrastructure
pub mod cache;
pub mod queue;
pub mod store;

// External collaborators
pub mod adapters;
pub mod chain;
pub mod hub;

// Core engine
pub mod balances;
pub mod planner;
pub mod poller;
pub mod processor;
pub mod rebalance;

// HTTP surface
pub mod gateway;

// Convenient re-exports at crate root
pub use amount::{Amount, DBPS_MULTIPLIER};
pub use cache::{PurchaseCache, PurchaseRecord};
pub use config::AppConfig;
pub use hub::{HubClient, Invoice};
pub use planner::{SplitIntentPlan, plan_split_intents};
pub use queue::{EventQueue, EventType, Priority, QueuedEvent};
pub use rebalance::RebalanceEngine;
pub use store::{Earmark, EarmarkStatus, OperationStatus, RebalanceOperation};

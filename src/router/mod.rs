// Router module - the trade pipeline
// Quote aggregation, route selection, message building, submission tracking
// and the coordinator plus HTTP API driving them

pub mod aggregator;
pub mod api;
pub mod builder;
pub mod coordinator;
pub mod execution;
pub mod routes;
pub mod selector;

pub use aggregator::QuoteAggregator;
pub use builder::TransactionBuilder;
pub use coordinator::{CoordinatorSettings, TradeCoordinator};
pub use execution::{ConfirmationTracker, SeqnoAllocator};
pub use routes::{Route, RouteSelection};
pub use selector::RouteSelector;

// Library root module for ton-trade-aggr
// Trade-execution coordinator for TON DEX swaps: quotes DeDust and STON.fi,
// picks a route, builds and signs the wallet message and tracks it on-chain

pub mod config;
pub mod control;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod quant;
pub mod router;
pub mod signing;
pub mod state;
pub mod transport;
pub mod venues;

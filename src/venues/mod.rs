// Venue adapters module
// DEX backends the aggregator queries and the builder encodes swaps for

pub mod adapter;
pub mod dedust;
pub mod stonfi;

pub use adapter::{BackendRegistry, DexBackend};

pub mod tiers;

pub use tiers::{SqliteTierStore, TierStore};

//! freshsync - cross-view data freshness
//!
//! A write performed through one view is announced on an in-process
//! invalidation bus, and every other mounted view of the same collection
//! debounces and re-reads it. See [`sync`] for the components.

pub mod cli;
pub mod config;
pub mod observability;
pub mod sync;

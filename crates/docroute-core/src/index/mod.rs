//! Derived, rebuildable indexes over a [`Collection`](crate::models::Collection).
//!
//! Neither index has an identity of its own: the [`Catalog`](crate::catalog::Catalog)
//! caches one of each per collection generation and discards both when the
//! collection is replaced.

pub mod summary;
pub mod vector;

pub use summary::SummaryIndex;
pub use vector::VectorIndex;

//! State domain module.
//!
//! # Module Structure
//!
//! - `model`: state objects, tiers, kinds and provenance
//! - `store`: fast/durable tier contracts with versioned writes

mod model;
mod store;

pub use model::{
    Contribution, Provenance, StateKind, StateObject, StateQuery, StateWrite, Tier,
};
pub use store::{
    Document, DocumentFilter, DurableStore, Expiry, FastStore, Precondition, StoreError,
    StoreResult, Versioned,
};

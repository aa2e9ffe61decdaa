//! # Stage: Model Routing
//!
//! ## Responsibility
//! Decide which backend model a request deserves. The [`Classifier`] maps raw
//! input text to a [`Tier`]; the [`ModelCatalog`] maps a tier to the
//! [`ModelDescriptor`] serving it.
//!
//! ## Guarantees
//! - Deterministic: the same text always yields the same tier and rationale.
//! - Pure: classification performs no I/O and holds no state.
//! - Available: resolving a tier missing from the catalog falls back to the
//!   highest-capability descriptor instead of failing.
//!
//! ## NOT Responsible For
//! - Calling the backends (that belongs to `pipeline` / `worker`)
//! - Retrying failed calls (that belongs to `enhanced::retry`)

pub mod catalog;
pub mod classifier;
pub mod tier;

// Re-exports for convenience
pub use catalog::{reference_descriptors, ModelCatalog, ModelDescriptor, ModelSelection, Resolution};
pub use classifier::{Classification, Classifier};
pub use tier::Tier;

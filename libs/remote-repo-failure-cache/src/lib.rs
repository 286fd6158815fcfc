#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Cross-request cache of failed remote lookups.
//!
//! Remembering that a lookup failed a moment ago lets callers fail fast instead
//! of repeating an expensive remote call that is very likely to fail again:
//!
//! - [`classify`] maps an error onto a [`FailureCategory`]
//! - [`FailureCacheConfig::ttl_for`] picks how long the category is remembered
//! - [`FailureCache`] checks, records and clears entries in a shared [`FailureStore`]
//!
//! A hit surfaces as [`CachedLookupFailure`], which is a different type from the
//! live remote error so callers can treat "failed recently" differently from
//! "failing right now".
//!
//! ```ignore
//! let cache = FailureCache::in_memory("products", FailureCacheConfig::recommended());
//!
//! cache.check("by_id", &["42"]).await?;
//! match remote.fetch("42").await {
//!     Ok(item) => Ok(item),
//!     Err(err) => {
//!         cache.record("by_id", &err, &["42"]).await;
//!         Err(err.into())
//!     }
//! }
//! ```

mod cache;
mod category;
mod classify;
mod config;
mod entry;
mod error;
mod key;
mod store;

pub use cache::FailureCache;
pub use category::{FailureCategory, UnknownCategory};
pub use classify::{FailureSnapshot, FailureSource, classify};
pub use config::FailureCacheConfig;
pub use entry::FailureCacheEntry;
pub use error::{CachedLookupFailure, FailureStoreError};
pub use key::{KEY_PREFIX, cache_key};
pub use store::{FailureStore, InMemoryFailureStore};

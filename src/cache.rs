//! TTL cache store, backing stores, and the single-flight request cache.

pub mod backend;
pub mod entry;
pub mod manager;
pub mod policy;
pub mod store;

pub use self::{
	backend::{CacheBackend, FileBackend, MemoryBackend},
	entry::{CacheEntry, CacheKey},
	manager::CacheManager,
	policy::{TtlCategory, TtlPolicy},
	store::TtlCache,
};

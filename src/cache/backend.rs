//! Backing stores for [`TtlCache`](crate::cache::store::TtlCache).
//!
//! The in-memory backend serves per-session request caching; the file backend gives the same
//! interface durable storage so persisted indexes survive a restart.

// std
use std::{
	collections::HashMap,
	fmt::Debug,
	fs,
	io::ErrorKind,
	path::{Path, PathBuf},
	sync::atomic::{AtomicU64, Ordering},
};
// crates.io
use parking_lot::Mutex;
use serde_json::Value;
// self
use crate::{_prelude::*, cache::entry::CacheEntry};

type Entries = HashMap<String, CacheEntry<Value>>;

/// Storage primitive consumed by the TTL cache.
///
/// Every method runs under the backend's own lock, so conditional removal is atomic with
/// respect to concurrent writers.
pub trait CacheBackend: Debug + Send + Sync {
	/// Read the raw entry for `key`, expired or not.
	fn read(&self, key: &str) -> Option<CacheEntry<Value>>;

	/// Insert or overwrite `key`.
	fn write(&self, key: &str, entry: CacheEntry<Value>);

	/// Remove `key` when `predicate` holds for the stored entry; returns whether it was removed.
	fn remove_if(&self, key: &str, predicate: &dyn Fn(&CacheEntry<Value>) -> bool) -> bool;

	/// Keep only entries accepted by `keep`; returns the number removed.
	fn retain(&self, keep: &dyn Fn(&str, &CacheEntry<Value>) -> bool) -> usize;

	/// Number of stored entries, including expired ones not yet purged.
	fn len(&self) -> usize;

	/// Whether no entries are stored.
	fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Process-local backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
	entries: Mutex<Entries>,
}
impl MemoryBackend {
	/// Create an empty backend.
	pub fn new() -> Self {
		Self::default()
	}
}
impl CacheBackend for MemoryBackend {
	fn read(&self, key: &str) -> Option<CacheEntry<Value>> {
		self.entries.lock().get(key).cloned()
	}

	fn write(&self, key: &str, entry: CacheEntry<Value>) {
		self.entries.lock().insert(key.to_owned(), entry);
	}

	fn remove_if(&self, key: &str, predicate: &dyn Fn(&CacheEntry<Value>) -> bool) -> bool {
		remove_matching(&mut self.entries.lock(), key, predicate)
	}

	fn retain(&self, keep: &dyn Fn(&str, &CacheEntry<Value>) -> bool) -> usize {
		retain_matching(&mut self.entries.lock(), keep)
	}

	fn len(&self) -> usize {
		self.entries.lock().len()
	}
}

/// Durable backend persisting every mutation to a single JSON document.
///
/// Writes go to a sibling temporary file first and are renamed into place. A missing file
/// starts empty; an unreadable or corrupt file is logged and replaced on the next write.
///
/// The document is serialised under the entry lock but written after it is released, so reads
/// never wait on disk I/O. Each snapshot carries a revision and an older snapshot never
/// overwrites a newer one. Flushes are still synchronous, so keep payloads small.
#[derive(Debug)]
pub struct FileBackend {
	path: PathBuf,
	entries: Mutex<Entries>,
	revision: AtomicU64,
	on_disk: Mutex<u64>,
}
impl FileBackend {
	/// Open (or lazily create) the store at `path`.
	pub fn open(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref().to_path_buf();

		if let Some(parent) = path.parent()
			&& !parent.as_os_str().is_empty()
		{
			fs::create_dir_all(parent)?;
		}

		let entries = match fs::read(&path) {
			Ok(bytes) => serde_json::from_slice::<Entries>(&bytes).unwrap_or_else(|err| {
				tracing::warn!(path = %path.display(), error = %err, "discarding corrupt cache file");

				Entries::new()
			}),
			Err(err) if err.kind() == ErrorKind::NotFound => Entries::new(),
			Err(err) => return Err(err.into()),
		};

		tracing::debug!(path = %path.display(), entries = entries.len(), "opened durable cache");

		Ok(Self {
			path,
			entries: Mutex::new(entries),
			revision: AtomicU64::new(0),
			on_disk: Mutex::new(0),
		})
	}

	/// Location of the backing file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Serialise `entries`; call with the entry lock held.
	fn snapshot(&self, entries: &Entries) -> Snapshot {
		Snapshot {
			revision: self.revision.fetch_add(1, Ordering::Relaxed) + 1,
			bytes: serde_json::to_vec(entries).map_err(Error::from),
		}
	}

	/// Persist `snapshot` unless a newer one is already on disk; call without the entry lock.
	fn flush(&self, snapshot: Snapshot) {
		let mut on_disk = self.on_disk.lock();

		if *on_disk >= snapshot.revision {
			return;
		}

		match snapshot.bytes.and_then(|bytes| self.persist(&bytes)) {
			Ok(()) => *on_disk = snapshot.revision,
			Err(err) => {
				tracing::warn!(path = %self.path.display(), error = %err, "failed to persist cache");
			},
		}
	}

	fn persist(&self, bytes: &[u8]) -> Result<()> {
		let tmp = self.path.with_extension("tmp");

		fs::write(&tmp, bytes)?;
		fs::rename(&tmp, &self.path)?;

		Ok(())
	}
}
impl CacheBackend for FileBackend {
	fn read(&self, key: &str) -> Option<CacheEntry<Value>> {
		self.entries.lock().get(key).cloned()
	}

	fn write(&self, key: &str, entry: CacheEntry<Value>) {
		let snapshot = {
			let mut entries = self.entries.lock();

			entries.insert(key.to_owned(), entry);

			self.snapshot(&entries)
		};

		self.flush(snapshot);
	}

	fn remove_if(&self, key: &str, predicate: &dyn Fn(&CacheEntry<Value>) -> bool) -> bool {
		let snapshot = {
			let mut entries = self.entries.lock();

			remove_matching(&mut entries, key, predicate).then(|| self.snapshot(&entries))
		};
		let removed = snapshot.is_some();

		if let Some(snapshot) = snapshot {
			self.flush(snapshot);
		}

		removed
	}

	fn retain(&self, keep: &dyn Fn(&str, &CacheEntry<Value>) -> bool) -> usize {
		let (removed, snapshot) = {
			let mut entries = self.entries.lock();
			let removed = retain_matching(&mut entries, keep);

			(removed, (removed > 0).then(|| self.snapshot(&entries)))
		};

		if let Some(snapshot) = snapshot {
			self.flush(snapshot);
		}

		removed
	}

	fn len(&self) -> usize {
		self.entries.lock().len()
	}
}

struct Snapshot {
	revision: u64,
	bytes: Result<Vec<u8>>,
}

fn remove_matching(
	entries: &mut Entries,
	key: &str,
	predicate: &dyn Fn(&CacheEntry<Value>) -> bool,
) -> bool {
	if entries.get(key).is_some_and(predicate) {
		entries.remove(key);

		true
	} else {
		false
	}
}

fn retain_matching(
	entries: &mut Entries,
	keep: &dyn Fn(&str, &CacheEntry<Value>) -> bool,
) -> usize {
	let before = entries.len();

	entries.retain(|key, entry| keep(key, entry));

	before - entries.len()
}

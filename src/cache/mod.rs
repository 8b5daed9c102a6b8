//! Durable on-device storage for the whole document.
//!
//! One fixed key maps to one JSON-serialized [`Document`]. Loads never fail:
//! a missing entry yields the default document and an unreadable one is
//! treated as data loss (logged, then the default document), since the remote
//! store is the long-term backstop.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, warn};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::document::Document;

/// File name of the cached document inside the cache directory.
pub const CACHE_FILE_NAME: &str = "clinic-document.json";

#[derive(Debug, Error)]
pub enum CacheError {
	#[error("failed to serialize document: {0}")]
	Serialize(#[from] serde_json::Error),

	#[error("failed to write cache at {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

/// Synchronous load/save of the document.
pub trait LocalCache: Send + Sync {
	/// Last known good document, or the default document.
	fn load(&self) -> Document;

	/// Persist `doc` atomically with respect to `load`.
	fn save(&self, doc: &Document) -> Result<(), CacheError>;
}

/// Decode a cached payload, falling back to the default document.
fn decode_or_default(raw: &str, origin: &str) -> Document {
	match serde_json::from_str::<Document>(raw) {
		Ok(doc) => doc,
		Err(e) => {
			warn!(
				"Local cache at {} is corrupt ({}); starting from an empty document",
				origin, e
			);
			Document::default()
		}
	}
}

/// File-backed cache. Saves go through a temporary file in the same
/// directory followed by a rename, so readers see the old or the new
/// document, never a partial one.
pub struct FileCache {
	path: PathBuf,
}

impl FileCache {
	/// Cache stored at `dir/clinic-document.json`.
	pub fn in_dir(dir: impl AsRef<Path>) -> Self {
		Self::at(dir.as_ref().join(CACHE_FILE_NAME))
	}

	/// Cache stored at an explicit file path.
	pub fn at(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn io_error(&self, source: std::io::Error) -> CacheError {
		CacheError::Io {
			path: self.path.clone(),
			source,
		}
	}
}

impl LocalCache for FileCache {
	fn load(&self) -> Document {
		match std::fs::read_to_string(&self.path) {
			Ok(raw) => decode_or_default(&raw, &self.path.display().to_string()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				debug!("No cached document at {}", self.path.display());
				Document::default()
			}
			Err(e) => {
				warn!(
					"Failed to read cached document at {}: {}; starting from an empty document",
					self.path.display(),
					e
				);
				Document::default()
			}
		}
	}

	fn save(&self, doc: &Document) -> Result<(), CacheError> {
		let bytes = serde_json::to_vec(doc)?;
		let dir = match self.path.parent() {
			Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
			_ => PathBuf::from("."),
		};
		std::fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;

		let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| self.io_error(e))?;
		tmp.write_all(&bytes).map_err(|e| self.io_error(e))?;
		tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;
		tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;

		debug!(
			"Saved document revision {} to {}",
			doc.revision,
			self.path.display()
		);
		Ok(())
	}
}

/// In-process cache holding the serialized document, for tests and for
/// running without a writable data directory.
#[derive(Default)]
pub struct MemoryCache {
	slot: Mutex<Option<String>>,
}

impl MemoryCache {
	pub fn new() -> Self {
		Self::default()
	}

	/// Seed the slot with a raw payload, e.g. to simulate corruption.
	pub fn with_raw(raw: impl Into<String>) -> Self {
		Self {
			slot: Mutex::new(Some(raw.into())),
		}
	}

	/// Raw payload currently stored, if any.
	pub fn raw(&self) -> Option<String> {
		let slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
		slot.clone()
	}
}

impl LocalCache for MemoryCache {
	fn load(&self) -> Document {
		match self.raw() {
			Some(raw) => decode_or_default(&raw, "memory"),
			None => Document::default(),
		}
	}

	fn save(&self, doc: &Document) -> Result<(), CacheError> {
		let raw = serde_json::to_string(doc)?;
		let mut slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
		*slot = Some(raw);
		Ok(())
	}
}

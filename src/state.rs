use std::sync::{Arc, Mutex};

use log::debug;
use tokio::sync::watch;

use crate::cache::{CacheError, LocalCache};
use crate::document::Document;

/// The device's current document.
///
/// Documents are immutable values: a transition reads the current one,
/// computes the next, persists it to the local cache and only then swaps it
/// in and notifies subscribers. A failed save leaves the current document in
/// place.
pub struct DocumentState {
	cache: Arc<dyn LocalCache>,
	current: Mutex<Arc<Document>>,
	updates: watch::Sender<Arc<Document>>,
}

impl DocumentState {
	/// Load the last known document from `cache`.
	pub fn load(cache: Arc<dyn LocalCache>) -> Self {
		let doc = Arc::new(cache.load());
		debug!("Loaded local document at revision {}", doc.revision);
		let (updates, _) = watch::channel(Arc::clone(&doc));
		Self {
			cache,
			current: Mutex::new(doc),
			updates,
		}
	}

	pub fn current(&self) -> Arc<Document> {
		Arc::clone(&self.lock())
	}

	/// Receiver that always holds the latest document.
	pub fn subscribe(&self) -> watch::Receiver<Arc<Document>> {
		self.updates.subscribe()
	}

	/// Run one read-compute-persist-replace step.
	///
	/// `step` returns `Ok(None)` to keep the current document. The returned
	/// value is the document in effect afterwards.
	pub fn transition<E, F>(&self, step: F) -> Result<Arc<Document>, E>
	where
		F: FnOnce(&Document) -> Result<Option<Document>, E>,
		E: From<CacheError>,
	{
		let mut current = self.lock();
		let Some(next) = step(&current)? else {
			return Ok(Arc::clone(&current));
		};

		self.cache.save(&next)?;
		let next = Arc::new(next);
		*current = Arc::clone(&next);
		self.updates.send_replace(Arc::clone(&next));
		Ok(next)
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, Arc<Document>> {
		self.current.lock().unwrap_or_else(|p| p.into_inner())
	}
}

//! The synchronized clinic document and its transitions.
//!
//! A [`Document`] is treated as an immutable value: every change produces a
//! new document with a strictly greater `revision`, computed by
//! [`Document::apply`].

pub mod entity;
pub mod mutation;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use entity::{Entity, UPDATED_AT};
pub use mutation::{DocumentError, Mutation};

/// Device-local preferences.
///
/// They travel with the document for convenience but are always overlaid
/// from the local device after a merge and never taken from a remote copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicePreferences {
	pub language: String,
	pub theme: String,
}

impl Default for DevicePreferences {
	fn default() -> Self {
		Self {
			language: "en".to_string(),
			theme: "light".to_string(),
		}
	}
}

/// The single unit of synchronization for one account.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Document {
	/// Logical clock, bumped on every local mutation.
	pub revision: u64,
	/// Ids of deleted entities. Never shrinks across merges.
	#[serde(default)]
	pub tombstones: BTreeSet<String>,
	/// Top-level collections keyed by name, e.g. `patients`.
	#[serde(default)]
	pub collections: BTreeMap<String, Vec<Entity>>,
	/// Clinic profile section (name, address, logo, ...).
	#[serde(default)]
	pub profile: Map<String, Value>,
	#[serde(default)]
	pub preferences: DevicePreferences,
}

impl Document {
	/// Next revision for a mutation happening at `now_ms`.
	///
	/// Wall-clock milliseconds are used when they move forward; otherwise the
	/// previous revision plus one keeps the clock strictly increasing. A
	/// document already at `u64::MAX` cannot advance any further.
	pub fn next_revision_at(&self, now_ms: u64) -> Result<u64, DocumentError> {
		let bumped = self
			.revision
			.checked_add(1)
			.ok_or(DocumentError::RevisionExhausted)?;
		Ok(now_ms.max(bumped))
	}

	pub fn next_revision(&self) -> Result<u64, DocumentError> {
		self.next_revision_at(now_millis())
	}

	pub fn is_tombstoned(&self, id: &str) -> bool {
		self.tombstones.contains(id)
	}

	/// Live entities of a collection, tombstoned ids excluded.
	pub fn collection<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Entity> + 'a {
		self.collections
			.get(name)
			.into_iter()
			.flatten()
			.filter(move |e| !self.tombstones.contains(&e.id))
	}

	/// Look up a live entity by collection and id.
	pub fn entity(&self, collection: &str, id: &str) -> Option<&Entity> {
		self.collection(collection).find(|e| e.id == id)
	}

	/// Replace the local-only preference fields, keeping everything else.
	pub fn with_preferences(mut self, preferences: DevicePreferences) -> Self {
		self.preferences = preferences;
		self
	}

	/// Number of live entities across all top-level collections.
	pub fn live_entity_count(&self) -> usize {
		self.collections
			.keys()
			.map(|name| self.collection(name).count())
			.sum()
	}
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> u64 {
	u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

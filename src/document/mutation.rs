use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::{DevicePreferences, Document, Entity};

/// A single state change requested by the application layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
	/// Insert or replace a top-level entity.
	Upsert { collection: String, entity: Entity },
	/// Delete a top-level entity and tombstone its id.
	Remove { collection: String, id: String },
	/// Insert or replace an entity inside a parent's nested collection.
	UpsertNested {
		collection: String,
		parent_id: String,
		nested: String,
		entity: Entity,
	},
	/// Delete an entity from a parent's nested collection.
	RemoveNested {
		collection: String,
		parent_id: String,
		nested: String,
		id: String,
	},
	/// Replace the clinic profile section.
	SetProfile { profile: Map<String, Value> },
	/// Replace the local-only device preferences.
	SetPreferences { preferences: DevicePreferences },
}

impl Mutation {
	/// Whether this change is purely device-local and never worth pushing.
	pub fn is_local_only(&self) -> bool {
		matches!(self, Mutation::SetPreferences { .. })
	}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
	#[error("entity {id} was deleted and cannot be recreated")]
	Tombstoned { id: String },

	#[error("no entity {id} in collection {collection}")]
	NotFound { collection: String, id: String },

	#[error("revision counter exhausted")]
	RevisionExhausted,
}

impl Document {
	/// Compute the document that results from `mutation`, stamped with the
	/// current wall-clock revision.
	pub fn apply(&self, mutation: &Mutation) -> Result<Document, DocumentError> {
		self.apply_at(mutation, super::now_millis())
	}

	/// Compute the document that results from `mutation` at `now_ms`.
	///
	/// The receiver is left untouched. Touched entities get `updatedAt` set to
	/// the new revision; removed ids are appended to `tombstones`.
	pub fn apply_at(&self, mutation: &Mutation, now_ms: u64) -> Result<Document, DocumentError> {
		let revision = self.next_revision_at(now_ms)?;
		let mut next = self.clone();
		next.revision = revision;

		match mutation {
			Mutation::Upsert { collection, entity } => {
				self.ensure_live(&entity.id)?;
				let stamped = entity.clone().with_updated_at(revision);
				upsert_into(next.collections.entry(collection.clone()).or_default(), stamped);
			}
			Mutation::Remove { collection, id } => {
				if let Some(items) = next.collections.get_mut(collection) {
					items.retain(|e| &e.id != id);
				}
				next.tombstones.insert(id.clone());
			}
			Mutation::UpsertNested {
				collection,
				parent_id,
				nested,
				entity,
			} => {
				self.ensure_live(&entity.id)?;
				let parent = next.live_parent_mut(collection, parent_id)?;
				let mut children = parent.nested(nested).unwrap_or_default();
				upsert_into(&mut children, entity.clone().with_updated_at(revision));
				parent.set_nested(nested, children);
				parent.updated_at = Some(revision);
			}
			Mutation::RemoveNested {
				collection,
				parent_id,
				nested,
				id,
			} => {
				let parent = next.live_parent_mut(collection, parent_id)?;
				if let Some(mut children) = parent.nested(nested) {
					children.retain(|e| &e.id != id);
					parent.set_nested(nested, children);
				}
				parent.updated_at = Some(revision);
				next.tombstones.insert(id.clone());
			}
			Mutation::SetProfile { profile } => {
				next.profile = profile.clone();
			}
			Mutation::SetPreferences { preferences } => {
				next.preferences = preferences.clone();
			}
		}

		Ok(next)
	}

	fn ensure_live(&self, id: &str) -> Result<(), DocumentError> {
		if self.is_tombstoned(id) {
			return Err(DocumentError::Tombstoned { id: id.to_string() });
		}
		Ok(())
	}

	fn live_parent_mut(&mut self, collection: &str, id: &str) -> Result<&mut Entity, DocumentError> {
		let not_found = || DocumentError::NotFound {
			collection: collection.to_string(),
			id: id.to_string(),
		};
		if self.tombstones.contains(id) {
			return Err(not_found());
		}
		self.collections
			.get_mut(collection)
			.and_then(|items| items.iter_mut().find(|e| e.id == id))
			.ok_or_else(not_found)
	}
}

fn upsert_into(items: &mut Vec<Entity>, entity: Entity) {
	match items.iter_mut().find(|e| e.id == entity.id) {
		Some(existing) => *existing = entity,
		None => items.push(entity),
	}
}

//! The fixed path every write goes through: precondition check, next
//! snapshot, local persist, then an asynchronous remote push.

use std::path::Path;
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backup::{self, ImportMode};
use crate::cache::LocalCache;
use crate::document::{Document, Entity, Mutation};
use crate::error::{SyncError, SyncResult};
use crate::state::DocumentState;
use crate::sync::{PullOutcome, PushOutcome, SyncEngine};

/// Whether a write must reach the cloud to count as saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
	/// Committed once it is in the local cache; works offline.
	#[default]
	Local,
	/// Refused up front while offline.
	Cloud,
}

/// A committed local change and its pending push.
pub struct Commit {
	/// The document as persisted locally.
	pub document: Arc<Document>,
	/// `None` for device-local changes, which are never pushed.
	push: Option<JoinHandle<PushOutcome>>,
}

impl Commit {
	/// Wait for the push started by this commit.
	pub async fn push_outcome(self) -> PushOutcome {
		let Some(push) = self.push else {
			return PushOutcome::LocalOnly;
		};
		match push.await {
			Ok(outcome) => outcome,
			Err(e) => {
				error!("Push task for revision {} failed: {}", self.document.revision, e);
				PushOutcome::Failed
			}
		}
	}

	/// True only when the remote row confirmed this exact snapshot, as
	/// opposed to an optimistic local-only commit.
	///
	/// A commit whose push was superseded by a later commit reports `false`
	/// even though the later push carries its changes. Await the most recent
	/// commit to learn whether the whole sequence reached the cloud.
	pub async fn is_cloud_durable(self) -> bool {
		self.push_outcome().await == PushOutcome::Synced
	}
}

/// Device-side entry point: holds the current document and routes every
/// transition through the cache and the sync engine.
pub struct ClinicStore {
	state: DocumentState,
	engine: Arc<SyncEngine>,
}

impl ClinicStore {
	/// Open the store on the last cached document.
	pub fn open(cache: Arc<dyn LocalCache>, engine: Arc<SyncEngine>) -> Self {
		Self {
			state: DocumentState::load(cache),
			engine,
		}
	}

	pub fn document(&self) -> Arc<Document> {
		self.state.current()
	}

	/// Receiver that always holds the latest document.
	pub fn subscribe(&self) -> watch::Receiver<Arc<Document>> {
		self.state.subscribe()
	}

	pub fn engine(&self) -> &Arc<SyncEngine> {
		&self.engine
	}

	/// Apply `mutation`, persist it locally and start pushing it.
	///
	/// Must be called from within a tokio runtime. Fails before any side
	/// effect when `durability` is [`Durability::Cloud`] and the device is
	/// offline, or when the mutation is rejected by the document.
	///
	/// Device-local mutations are persisted but never pushed, so they ignore
	/// `durability` and report [`PushOutcome::LocalOnly`].
	pub fn commit(&self, mutation: &Mutation, durability: Durability) -> SyncResult<Commit> {
		let local_only = mutation.is_local_only();
		if !local_only && durability == Durability::Cloud && !self.engine.is_online() {
			warn!("Refusing cloud-durable change while offline");
			return Err(SyncError::Connectivity);
		}

		let document = self
			.state
			.transition(|current| current.apply(mutation).map(Some).map_err(SyncError::from))?;

		if local_only {
			debug!("Revision {} is device-local; not pushing", document.revision);
			return Ok(Commit { document, push: None });
		}

		let push = Some(self.engine.spawn_push(Arc::clone(&document)));
		Ok(Commit { document, push })
	}

	pub fn upsert(&self, collection: &str, entity: Entity, durability: Durability) -> SyncResult<Commit> {
		self.commit(
			&Mutation::Upsert {
				collection: collection.to_string(),
				entity,
			},
			durability,
		)
	}

	pub fn remove(&self, collection: &str, id: &str, durability: Durability) -> SyncResult<Commit> {
		self.commit(
			&Mutation::Remove {
				collection: collection.to_string(),
				id: id.to_string(),
			},
			durability,
		)
	}

	/// Pull the remote document and merge it in (startup, manual refresh).
	pub async fn refresh(&self, force: bool) -> SyncResult<PullOutcome> {
		self.engine.pull(&self.state, force).await
	}

	/// Push the current document without changing it.
	pub async fn push_now(&self) -> PushOutcome {
		self.engine.push(self.document()).await
	}

	/// Push the current document, reporting a failed push as an error.
	pub async fn try_push_now(&self) -> SyncResult<PushOutcome> {
		self.engine.try_push(self.document()).await
	}

	/// Write the current document to a backup file.
	pub fn export(&self, path: &Path) -> SyncResult<()> {
		backup::export_to(&self.document(), path)
	}

	/// Merge a backup file into the local document, exactly like a forced
	/// pull whose remote copy is the file.
	pub fn import_merge(&self, path: &Path) -> SyncResult<PullOutcome> {
		let incoming = backup::read_backup(path)?;
		self.engine.reconcile(&self.state, Some(incoming), true)
	}

	/// Replace the local document with a backup file, bypassing the merge.
	///
	/// Unsynced local edits are discarded. The installed document gets a
	/// fresh revision so it is pushed as the newest state.
	pub fn import_replace(&self, path: &Path) -> SyncResult<Commit> {
		let incoming = backup::read_backup(path)?;
		warn!(
			"Replacing local document with backup {}; unsynced local edits are discarded",
			path.display()
		);

		let document = self.state.transition(|local| {
			let revision = incoming.next_revision()?.max(local.next_revision()?);
			let replaced = Document {
				revision,
				..incoming
			}
			.with_preferences(local.preferences.clone());
			Ok::<_, SyncError>(Some(replaced))
		})?;
		info!("Installed backup as revision {}", document.revision);

		let push = Some(self.engine.spawn_push(Arc::clone(&document)));
		Ok(Commit { document, push })
	}

	/// Import a backup file with the given mode.
	pub fn import(&self, path: &Path, mode: ImportMode) -> SyncResult<()> {
		match mode {
			ImportMode::Merge => self.import_merge(path).map(|_| ()),
			ImportMode::Replace => self.import_replace(path).map(|_| ()),
		}
	}
}

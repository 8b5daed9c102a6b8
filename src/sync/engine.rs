use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::auth::{Connectivity, Session, SessionProvider};
use super::merge::{MergeConfig, MergeResolver};
use super::status::{StatusSignal, SyncStatus};
use crate::config::Settings;
use crate::document::Document;
use crate::error::{SyncError, SyncResult};
use crate::observability::SyncMetrics;
use crate::remote::{RemoteStore, restore_inline_binaries};
use crate::state::DocumentState;

/// Bounded retry schedule for the push path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
	/// Total upsert attempts, first one included.
	pub max_attempts: u32,
	/// Unit of the exponential backoff: the wait after the n-th failure is
	/// `2^n` of these.
	pub backoff_base: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 5,
			backoff_base: Duration::from_secs(1),
		}
	}
}

impl RetryPolicy {
	pub fn from_settings(settings: &Settings) -> Self {
		Self {
			max_attempts: settings.max_push_attempts.max(1),
			backoff_base: Duration::from_millis(settings.backoff_base_ms),
		}
	}

	/// Wait before the attempt following the `failures`-th failure.
	pub fn backoff_for(&self, failures: u32) -> Duration {
		self.backoff_base
			.saturating_mul(2u32.saturating_pow(failures))
	}

	/// Total time spent waiting when every attempt fails.
	pub fn total_backoff(&self) -> Duration {
		(1..=self.max_attempts).map(|n| self.backoff_for(n)).sum()
	}
}

/// Result of one push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushOutcome {
	/// The remote row now holds this snapshot.
	Synced,
	/// No session or no connection; nothing was sent.
	Offline,
	/// Every attempt failed.
	Failed,
	/// A newer snapshot was queued; it carries this one's changes.
	Superseded,
	/// Device-local change; nothing was sent.
	LocalOnly,
}

/// Result of one pull or merge-mode import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PullOutcome {
	Offline,
	/// The account has no remote row yet.
	NoRemote,
	/// The remote copy was not newer than the local one.
	UpToDate,
	/// The remote copy was merged into the local document.
	Merged { revision: u64 },
}

/// Orchestrates push (local to remote, with retry) and pull (remote to
/// local, with merge) and publishes the sync status.
pub struct SyncEngine {
	remote: Arc<dyn RemoteStore>,
	sessions: Arc<dyn SessionProvider>,
	connectivity: Arc<dyn Connectivity>,
	resolver: MergeResolver,
	policy: RetryPolicy,
	status: StatusSignal,
	metrics: Option<Arc<SyncMetrics>>,
	/// Highest revision handed to the push path so far.
	newest_queued: AtomicU64,
	/// Serializes upserts so an older snapshot never lands after a newer one.
	push_lock: Mutex<()>,
}

impl SyncEngine {
	pub fn builder(
		remote: Arc<dyn RemoteStore>,
		sessions: Arc<dyn SessionProvider>,
		connectivity: Arc<dyn Connectivity>,
	) -> SyncEngineBuilder {
		SyncEngineBuilder::new(remote, sessions, connectivity)
	}

	pub fn status(&self) -> &StatusSignal {
		&self.status
	}

	pub fn policy(&self) -> RetryPolicy {
		self.policy
	}

	pub fn resolver(&self) -> &MergeResolver {
		&self.resolver
	}

	pub fn is_online(&self) -> bool {
		self.connectivity.is_online()
	}

	/// Session to sync with, if authenticated and online.
	fn active_session(&self) -> Option<Session> {
		if !self.connectivity.is_online() {
			return None;
		}
		self.sessions.current()
	}

	fn record(&self, f: impl FnOnce(&SyncMetrics)) {
		if let Some(m) = &self.metrics {
			f(m);
		}
	}

	/// Mark `revision` as queued for pushing, superseding older snapshots.
	pub fn note_queued(&self, revision: u64) {
		self.newest_queued.fetch_max(revision, Ordering::SeqCst);
	}

	fn is_superseded(&self, revision: u64) -> bool {
		self.newest_queued.load(Ordering::SeqCst) > revision
	}

	/// Queue `doc` for pushing and run the push on the tokio runtime.
	pub fn spawn_push(self: &Arc<Self>, doc: Arc<Document>) -> JoinHandle<PushOutcome> {
		self.note_queued(doc.revision);
		let engine = Arc::clone(self);
		tokio::spawn(async move { engine.push(doc).await })
	}

	/// Push the full document to the remote row with bounded retries.
	///
	/// The local document is never touched; failure only delays propagation.
	pub async fn push(&self, doc: Arc<Document>) -> PushOutcome {
		self.try_push(doc).await.unwrap_or(PushOutcome::Failed)
	}

	/// Like [`SyncEngine::push`], but exhausting the retries yields the last
	/// write error instead of [`PushOutcome::Failed`].
	#[tracing::instrument(skip(self, doc), fields(revision = doc.revision))]
	pub async fn try_push(&self, doc: Arc<Document>) -> SyncResult<PushOutcome> {
		self.note_queued(doc.revision);

		let Some(session) = self.active_session() else {
			debug!("Skipping push of revision {}: offline or signed out", doc.revision);
			self.status.set(SyncStatus::Offline);
			return Ok(PushOutcome::Offline);
		};

		let _guard = self.push_lock.lock().await;
		let mut failures = 0;

		loop {
			if self.is_superseded(doc.revision) {
				debug!("Push of revision {} superseded by a newer snapshot", doc.revision);
				self.record(|m| m.push_superseded_total.inc());
				return Ok(PushOutcome::Superseded);
			}

			self.status.set(SyncStatus::Syncing);
			self.record(|m| m.push_attempts_total.inc());

			match self.remote.upsert(&session.account_id, &doc).await {
				Ok(()) => {
					info!("Pushed revision {} for account {}", doc.revision, session.account_id);
					self.record(|m| {
						m.push_successes_total.inc();
						m.synced_revision.set(i64::try_from(doc.revision).unwrap_or(i64::MAX));
					});
					self.status.set(SyncStatus::Synced);
					return Ok(PushOutcome::Synced);
				}
				Err(e) => {
					failures += 1;
					self.record(|m| m.push_failures_total.inc());

					// Every failure is followed by its backoff, the last one included.
					let backoff = self.policy.backoff_for(failures);
					warn!(
						"Push failed (attempt {}/{}): {}, backing off {:?}",
						failures, self.policy.max_attempts, e, backoff
					);
					sleep(backoff).await;

					if failures >= self.policy.max_attempts {
						error!(
							"Push of revision {} failed after {} attempts: {}",
							doc.revision, failures, e
						);
						self.status.set(SyncStatus::Error);
						return Err(SyncError::RemoteWrite(e));
					}
				}
			}
		}
	}

	/// Fetch the remote document and merge it into `state`.
	///
	/// A fetch failure leaves local state untouched. The merged result is not
	/// pushed; it propagates with the next ordinary mutation.
	#[tracing::instrument(skip(self, state))]
	pub async fn pull(&self, state: &DocumentState, force: bool) -> SyncResult<PullOutcome> {
		let Some(session) = self.active_session() else {
			debug!("Skipping pull: offline or signed out");
			self.status.set(SyncStatus::Offline);
			return Ok(PullOutcome::Offline);
		};

		self.status.set(SyncStatus::Syncing);
		self.record(|m| m.pull_attempts_total.inc());

		let remote = match self.remote.fetch_latest(&session.account_id).await {
			Ok(remote) => remote,
			Err(e) => {
				warn!("Pull failed for account {}: {}", session.account_id, e);
				self.record(|m| m.pull_failures_total.inc());
				self.status.set(SyncStatus::Error);
				return Err(SyncError::RemoteRead(e));
			}
		};

		match self.reconcile(state, remote, force) {
			Ok(outcome) => {
				self.record(|m| m.pull_successes_total.inc());
				self.status.set(SyncStatus::Synced);
				Ok(outcome)
			}
			Err(e) => {
				error!("Failed to apply pulled document: {}", e);
				self.status.set(SyncStatus::Error);
				Err(e)
			}
		}
	}

	/// Merge an incoming replica into `state` and persist the result.
	///
	/// Shared by pull and merge-mode import. When the incoming revision is
	/// not newer and `force` is false the replica is discarded. Local device
	/// preferences always survive.
	pub fn reconcile(
		&self,
		state: &DocumentState,
		incoming: Option<Document>,
		force: bool,
	) -> SyncResult<PullOutcome> {
		let Some(incoming) = incoming else {
			debug!("No remote document yet");
			return Ok(PullOutcome::NoRemote);
		};

		let mut outcome = PullOutcome::UpToDate;
		state.transition(|local| {
			if incoming.revision <= local.revision && !force {
				debug!(
					"Remote revision {} is not newer than local {}; keeping local",
					incoming.revision, local.revision
				);
				return Ok::<_, SyncError>(None);
			}

			let mut merged = self
				.resolver
				.merge(local, &incoming)
				.with_preferences(local.preferences.clone());
			restore_inline_binaries(&mut merged, local);
			info!(
				"Merged remote revision {} into local revision {} -> {}",
				incoming.revision, local.revision, merged.revision
			);
			outcome = PullOutcome::Merged {
				revision: merged.revision,
			};
			Ok(Some(merged))
		})?;

		if matches!(outcome, PullOutcome::Merged { .. }) {
			self.record(|m| m.merges_total.inc());
		}
		Ok(outcome)
	}
}

/// Builder for [`SyncEngine`].
pub struct SyncEngineBuilder {
	remote: Arc<dyn RemoteStore>,
	sessions: Arc<dyn SessionProvider>,
	connectivity: Arc<dyn Connectivity>,
	merge_config: MergeConfig,
	policy: RetryPolicy,
	metrics: Option<Arc<SyncMetrics>>,
}

impl SyncEngineBuilder {
	pub fn new(
		remote: Arc<dyn RemoteStore>,
		sessions: Arc<dyn SessionProvider>,
		connectivity: Arc<dyn Connectivity>,
	) -> Self {
		Self {
			remote,
			sessions,
			connectivity,
			merge_config: MergeConfig::clinic(),
			policy: RetryPolicy::default(),
			metrics: None,
		}
	}

	pub fn merge_config(mut self, config: MergeConfig) -> Self {
		self.merge_config = config;
		self
	}

	pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
		self.policy = policy;
		self
	}

	pub fn metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
		self.metrics = Some(metrics);
		self
	}

	pub fn build(self) -> SyncEngine {
		let initial = if self.connectivity.is_online() && self.sessions.is_authenticated() {
			SyncStatus::Synced
		} else {
			SyncStatus::Offline
		};

		SyncEngine {
			remote: self.remote,
			sessions: self.sessions,
			connectivity: self.connectivity,
			resolver: MergeResolver::new(self.merge_config),
			policy: self.policy,
			status: StatusSignal::new(initial),
			metrics: self.metrics,
			newest_queued: AtomicU64::new(0),
			push_lock: Mutex::new(()),
		}
	}
}

/// Common test utilities and helpers for integration tests.
use std::sync::Arc;
use std::time::Duration;

use clinic_sync::cache::{LocalCache, MemoryCache};
use clinic_sync::document::{Document, Entity};
use clinic_sync::remote::MemoryRemoteStore;
use clinic_sync::sync::{ConnectivityFlag, RetryPolicy, Session, StaticSession, SyncEngine};
use clinic_sync::ClinicStore;

pub const ACCOUNT: &str = "acct-1";

/// A device wired to an in-process remote, with handles on every
/// collaborator so tests can flip connectivity or inject failures.
#[allow(dead_code)]
pub struct Harness {
	pub remote: Arc<MemoryRemoteStore>,
	pub sessions: Arc<StaticSession>,
	pub connectivity: Arc<ConnectivityFlag>,
	pub cache: Arc<MemoryCache>,
	pub engine: Arc<SyncEngine>,
	pub store: ClinicStore,
}

/// Retry schedule with the production shape but millisecond waits.
#[allow(dead_code)]
pub fn fast_policy() -> RetryPolicy {
	RetryPolicy {
		max_attempts: 5,
		backoff_base: Duration::from_millis(1),
	}
}

#[allow(dead_code)]
pub fn harness(policy: RetryPolicy) -> Harness {
	harness_with(policy, Arc::new(MemoryRemoteStore::new()), Arc::new(MemoryCache::new()))
}

#[allow(dead_code)]
pub fn harness_with(policy: RetryPolicy, remote: Arc<MemoryRemoteStore>, cache: Arc<MemoryCache>) -> Harness {
	let sessions = Arc::new(StaticSession::new(Some(Session::new(ACCOUNT, "token"))));
	let connectivity = Arc::new(ConnectivityFlag::new(true));
	let engine = Arc::new(
		SyncEngine::builder(remote.clone(), sessions.clone(), connectivity.clone())
			.retry_policy(policy)
			.build(),
	);
	let store = ClinicStore::open(cache.clone() as Arc<dyn LocalCache>, engine.clone());

	Harness {
		remote,
		sessions,
		connectivity,
		cache,
		engine,
		store,
	}
}

/// Document at `revision` holding `patients`.
#[allow(dead_code)]
pub fn with_patients(revision: u64, patients: Vec<Entity>) -> Document {
	let mut doc = Document {
		revision,
		..Document::default()
	};
	doc.collections.insert("patients".to_string(), patients);
	doc
}

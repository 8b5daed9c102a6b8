pub mod backup;
pub mod cache;
pub mod config;
pub mod document;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod remote;
pub mod state;
pub mod sync;

use std::sync::Arc;

use anyhow::Context;

pub use error::{SyncError, SyncResult};
pub use pipeline::{ClinicStore, Commit, Durability};

use crate::cache::FileCache;
use crate::config::Settings;
use crate::observability::SyncMetrics;
use crate::remote::HttpRemoteStore;
use crate::sync::{ConnectivityFlag, RetryPolicy, Session, StaticSession, SyncEngine};

/// Wire a device store from `settings`: file cache, HTTP remote, the
/// configured session and retry policy.
pub fn open_store(settings: &Settings, metrics: Option<Arc<SyncMetrics>>) -> anyhow::Result<ClinicStore> {
	let session = settings
		.is_signed_in()
		.then(|| Session::new(settings.account_id.clone(), settings.access_token.clone()));
	let sessions = Arc::new(StaticSession::new(session));
	let connectivity = Arc::new(ConnectivityFlag::new(!settings.offline));

	let remote = HttpRemoteStore::from_settings(settings, sessions.clone())
		.context("failed to create remote store client")?;

	let mut builder = SyncEngine::builder(Arc::new(remote), sessions, connectivity)
		.retry_policy(RetryPolicy::from_settings(settings));
	if let Some(metrics) = metrics {
		builder = builder.metrics(metrics);
	}

	let cache = Arc::new(FileCache::in_dir(settings.cache_path()));
	log::info!(
		"Opening clinic store for device {} (cache {})",
		settings.device_name,
		cache.path().display()
	);

	Ok(ClinicStore::open(cache, Arc::new(builder.build())))
}

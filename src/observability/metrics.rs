use prometheus::{IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Prometheus metrics for the sync engine.
pub struct SyncMetrics {
	registry: Registry,

	// Push path
	pub push_attempts_total: IntCounter,
	pub push_successes_total: IntCounter,
	pub push_failures_total: IntCounter,
	pub push_superseded_total: IntCounter,

	// Pull path
	pub pull_attempts_total: IntCounter,
	pub pull_successes_total: IntCounter,
	pub pull_failures_total: IntCounter,
	pub merges_total: IntCounter,

	/// Revision of the last document confirmed by the remote store.
	pub synced_revision: IntGauge,
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
	let c = IntCounter::with_opts(Opts::new(name, help).namespace("clinic_sync"))?;
	registry.register(Box::new(c.clone()))?;
	Ok(c)
}

impl SyncMetrics {
	pub fn new() -> prometheus::Result<Self> {
		let registry = Registry::new();

		let push_attempts_total = counter(&registry, "push_attempts_total", "Total upsert attempts")?;
		let push_successes_total = counter(&registry, "push_successes_total", "Pushes confirmed by the remote store")?;
		let push_failures_total = counter(&registry, "push_failures_total", "Failed upsert attempts")?;
		let push_superseded_total = counter(
			&registry,
			"push_superseded_total",
			"Pushes abandoned because a newer snapshot was queued",
		)?;
		let pull_attempts_total = counter(&registry, "pull_attempts_total", "Total pull attempts")?;
		let pull_successes_total = counter(&registry, "pull_successes_total", "Successful pulls")?;
		let pull_failures_total = counter(&registry, "pull_failures_total", "Failed remote reads")?;
		let merges_total = counter(&registry, "merges_total", "Remote documents merged into the local document")?;

		let synced_revision = IntGauge::with_opts(
			Opts::new("synced_revision", "Revision of the last pushed document").namespace("clinic_sync"),
		)?;
		registry.register(Box::new(synced_revision.clone()))?;

		Ok(Self {
			registry,
			push_attempts_total,
			push_successes_total,
			push_failures_total,
			push_superseded_total,
			pull_attempts_total,
			pull_successes_total,
			pull_failures_total,
			merges_total,
			synced_revision,
		})
	}

	/// Encode metrics in Prometheus text format
	pub fn encode(&self) -> String {
		let encoder = TextEncoder::new();
		let metric_families = self.registry.gather();
		match encoder.encode_to_string(&metric_families) {
			Ok(s) => s,
			Err(e) => {
				log::error!("Failed to encode metrics: {}", e);
				String::new()
			}
		}
	}
}

/// Build the metrics registry shared by the engine and the CLI.
pub fn init_metrics() -> anyhow::Result<Arc<SyncMetrics>> {
	Ok(Arc::new(SyncMetrics::new()?))
}

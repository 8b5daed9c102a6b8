pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{SyncMetrics, init_metrics};

use std::sync::Arc;

/// Observability handles shared with the sync engine.
pub struct ObservabilityState {
	pub metrics: Arc<SyncMetrics>,
}

/// Initialize logging and the metrics registry.
pub fn init_observability(level: log::Level) -> anyhow::Result<ObservabilityState> {
	init_logging(level)?;
	let metrics = init_metrics()?;

	tracing::info!(
		component = "observability",
		"Observability initialized: structured logging and metrics enabled"
	);

	Ok(ObservabilityState { metrics })
}

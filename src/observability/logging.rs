use log::Level;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured JSON logging to stderr.
///
/// `RUST_LOG` wins when set; otherwise `default_level` applies. Records from
/// the `log` facade are forwarded into the same subscriber.
pub fn init_logging(default_level: Level) -> anyhow::Result<()> {
	let fallback = default_level.as_str().to_ascii_lowercase();
	let env_filter = EnvFilter::try_from_default_env()
		.or_else(|_| EnvFilter::try_new(&fallback))
		.unwrap_or_else(|_| EnvFilter::new("info"));

	let json_layer = tracing_subscriber::fmt::layer()
		.json()
		.with_writer(std::io::stderr)
		.with_current_span(true)
		.with_span_list(true)
		.with_target(true)
		.with_level(true)
		.with_thread_ids(true)
		.with_file(true)
		.with_line_number(true);

	tracing_subscriber::registry()
		.with(env_filter)
		.with(json_layer)
		.try_init()
		.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

	Ok(())
}

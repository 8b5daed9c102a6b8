use std::path::PathBuf;
use std::time::Duration;

use log::Level;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Runtime configuration for a clinic-sync device.
///
/// Values are loaded from (in order): `/etc/clinic-sync/clinic-sync.json`,
/// the same file in the user config folders (optional), and environment
/// variables prefixed with `CSY_` (e.g. `CSY_ACCOUNT_ID`).
#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Settings {
	pub device_name: String,
	/// Base URL of the remote store; `rest/v1/<table>` is appended.
	pub remote_url: Url,
	pub remote_table: String,
	pub api_key: String,
	/// Signed-in account. Empty means signed out.
	pub account_id: String,
	pub access_token: String,
	/// Directory holding the cached document.
	pub cache_dir: String,
	pub log_level: Level,
	pub request_timeout_ms: u64,
	pub max_push_attempts: u32,
	pub backoff_base_ms: u64,
	/// Force offline mode: nothing is pushed or pulled.
	pub offline: bool,
}

impl Default for Settings {
	fn default() -> Self {
		let device_name = hostname::get()
			.ok()
			.and_then(|s| s.into_string().ok())
			.unwrap_or_else(|| "clinic-device".to_string());

		let cache_dir = dirs::data_local_dir()
			.map(|d| d.join("clinic-sync"))
			.unwrap_or_else(|| PathBuf::from(".clinic-sync"))
			.to_string_lossy()
			.into_owned();

		Self {
			device_name,
			remote_url: Url::parse("http://localhost:54321").expect("static URL is valid"),
			remote_table: "clinic_data".to_string(),
			api_key: String::new(),
			account_id: String::new(),
			access_token: String::new(),
			cache_dir,
			log_level: Level::Info,
			request_timeout_ms: 15_000,
			max_push_attempts: 5,
			backoff_base_ms: 1_000,
			offline: false,
		}
	}
}

impl Settings {
	pub fn request_timeout(&self) -> Duration {
		Duration::from_millis(self.request_timeout_ms)
	}

	pub fn cache_path(&self) -> PathBuf {
		PathBuf::from(&self.cache_dir)
	}

	pub fn is_signed_in(&self) -> bool {
		!self.account_id.is_empty() && !self.access_token.is_empty()
	}
}

#[derive(Debug, Error)]
pub enum SettingsError {
	#[error("configuration error: {0}")]
	Config(#[from] config::ConfigError),
}

pub fn load() -> Result<Settings, SettingsError> {
	let mut builder = config::Config::builder()
		.add_source(config::File::with_name("/etc/clinic-sync/clinic-sync.json").required(false));

	if let Some(folder) = dirs::config_dir() {
		let user_config_path = folder.join("clinic-sync").join("clinic-sync.json");
		builder = builder.add_source(config::File::from(user_config_path).required(false));
	}
	if let Some(folder) = dirs::config_local_dir() {
		let local_config_path = folder.join("clinic-sync").join("clinic-sync.json");
		builder = builder.add_source(config::File::from(local_config_path).required(false));
	}

	builder = builder.add_source(config::Environment::with_prefix("CSY").separator("__"));

	let cfg = builder.build()?;

	let mut s: Settings = cfg.try_deserialize()?;

	// Direct environment variables win over whatever the `config` crate
	// mapped from them.
	if let Ok(v) = std::env::var("CSY_DEVICE_NAME") {
		if !v.is_empty() {
			s.device_name = v;
		}
	}
	if let Ok(v) = std::env::var("CSY_REMOTE_URL") {
		if let Ok(parsed) = Url::parse(&v) {
			s.remote_url = parsed;
		}
	}
	if let Ok(v) = std::env::var("CSY_REMOTE_TABLE") {
		if !v.is_empty() {
			s.remote_table = v;
		}
	}
	if let Ok(v) = std::env::var("CSY_API_KEY") {
		s.api_key = v;
	}
	if let Ok(v) = std::env::var("CSY_ACCOUNT_ID") {
		s.account_id = v;
	}
	if let Ok(v) = std::env::var("CSY_ACCESS_TOKEN") {
		s.access_token = v;
	}
	if let Ok(v) = std::env::var("CSY_CACHE_DIR") {
		if !v.is_empty() {
			s.cache_dir = v;
		}
	}
	if let Ok(v) = std::env::var("CSY_LOG_LEVEL") {
		if let Ok(parsed) = v.parse::<Level>() {
			s.log_level = parsed;
		}
	}
	if let Ok(v) = std::env::var("CSY_REQUEST_TIMEOUT_MS") {
		if let Ok(parsed) = v.parse::<u64>() {
			s.request_timeout_ms = parsed;
		}
	}
	if let Ok(v) = std::env::var("CSY_MAX_PUSH_ATTEMPTS") {
		if let Ok(parsed) = v.parse::<u32>() {
			s.max_push_attempts = parsed;
		}
	}
	if let Ok(v) = std::env::var("CSY_BACKOFF_BASE_MS") {
		if let Ok(parsed) = v.parse::<u64>() {
			s.backoff_base_ms = parsed;
		}
	}
	if let Ok(v) = std::env::var("CSY_OFFLINE") {
		if let Ok(parsed) = v.parse::<bool>() {
			s.offline = parsed;
		}
	}

	Ok(s)
}

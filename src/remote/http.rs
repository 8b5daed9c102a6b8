use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use super::{RemoteError, RemoteStore, latest_of, outbound_payload};
use crate::config::Settings;
use crate::document::Document;
use crate::sync::auth::SessionProvider;

/// A row of the remote table: one per account, JSON document in `data`.
#[derive(Debug, Deserialize)]
struct RemoteRow {
	id: Value,
	data: Document,
}

/// Remote store backed by a PostgREST-style HTTP table.
///
/// Rows are addressed with `account_id=eq.<id>`; writes update the existing
/// row by primary key and only insert when the account has none yet.
pub struct HttpRemoteStore {
	endpoint: Url,
	api_key: Option<String>,
	sessions: Arc<dyn SessionProvider>,
	client: Client,
}

impl HttpRemoteStore {
	/// Create a client for `table` under `base_url`.
	///
	/// `timeout` bounds every individual request; the transport default is
	/// never relied upon.
	pub fn new(
		base_url: &Url,
		table: &str,
		api_key: Option<String>,
		timeout: Duration,
		sessions: Arc<dyn SessionProvider>,
	) -> Result<Self, RemoteError> {
		let mut endpoint = base_url.clone();
		endpoint
			.path_segments_mut()
			.map_err(|_| RemoteError::Http(format!("invalid base URL: {}", base_url)))?
			.pop_if_empty()
			.extend(["rest", "v1", table]);

		let client = Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| RemoteError::Http(format!("failed to build HTTP client: {}", e)))?;

		Ok(Self {
			endpoint,
			api_key,
			sessions,
			client,
		})
	}

	pub fn from_settings(settings: &Settings, sessions: Arc<dyn SessionProvider>) -> Result<Self, RemoteError> {
		let api_key = Some(settings.api_key.clone()).filter(|k| !k.is_empty());
		Self::new(
			&settings.remote_url,
			&settings.remote_table,
			api_key,
			settings.request_timeout(),
			sessions,
		)
	}

	pub fn endpoint(&self) -> &Url {
		&self.endpoint
	}

	fn authorize(&self, req: RequestBuilder) -> Result<RequestBuilder, RemoteError> {
		let session = self.sessions.current().ok_or(RemoteError::Unauthenticated)?;
		let mut req = req.bearer_auth(session.access_token);
		if let Some(key) = &self.api_key {
			req = req.header("apikey", key.as_str());
		}
		Ok(req)
	}

	async fn rows(&self, account_id: &str) -> Result<Vec<RemoteRow>, RemoteError> {
		let filter = format!("eq.{}", account_id);
		let req = self
			.client
			.get(self.endpoint.clone())
			.query(&[("account_id", filter.as_str()), ("select", "id,data")]);

		let response = self.authorize(req)?.send().await?;
		let status = response.status();
		if !status.is_success() {
			return Err(RemoteError::Status(status.as_u16()));
		}

		let rows: Vec<RemoteRow> = response.json().await?;
		if rows.len() > 1 {
			debug!(
				"Account {} has {} remote rows; using the highest revision",
				account_id,
				rows.len()
			);
		}
		Ok(rows)
	}
}

/// Render a row primary key for a PostgREST `eq.` filter.
fn row_key(id: &Value) -> String {
	match id {
		Value::String(s) => s.clone(),
		other => other.to_string(),
	}
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
	async fn fetch_latest(&self, account_id: &str) -> Result<Option<Document>, RemoteError> {
		let rows = self.rows(account_id).await?;
		Ok(latest_of(rows.into_iter().map(|r| r.data)))
	}

	async fn upsert(&self, account_id: &str, doc: &Document) -> Result<(), RemoteError> {
		let payload = outbound_payload(doc)?;
		let existing = self
			.rows(account_id)
			.await?
			.into_iter()
			.max_by_key(|r| r.data.revision);

		let updated_at = chrono::Utc::now().to_rfc3339();
		let req = match existing {
			Some(row) => {
				let filter = format!("eq.{}", row_key(&row.id));
				debug!("Updating remote row {} for account {}", row_key(&row.id), account_id);
				self.client
					.patch(self.endpoint.clone())
					.query(&[("id", filter.as_str())])
					.json(&json!({
						"data": payload,
						"updated_at": updated_at,
					}))
			}
			None => {
				info!("Creating remote row for account {}", account_id);
				self.client.post(self.endpoint.clone()).json(&json!({
					"account_id": account_id,
					"data": payload,
					"updated_at": updated_at,
				}))
			}
		};

		let response = self
			.authorize(req)?
			.header("Prefer", "return=minimal")
			.send()
			.await?;
		let status = response.status();
		if !status.is_success() {
			return Err(RemoteError::Status(status.as_u16()));
		}
		Ok(())
	}
}

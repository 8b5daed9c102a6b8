//! Client side of the authoritative per-account remote row.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::document::Document;

pub use http::HttpRemoteStore;
pub use memory::MemoryRemoteStore;

/// Prefix of inlined binary payloads (images as data URIs).
const DATA_URI_PREFIX: &str = "data:";

/// Errors that can occur while talking to the remote store.
#[derive(Debug, Error)]
pub enum RemoteError {
	#[error("no authenticated session")]
	Unauthenticated,

	#[error("HTTP request failed: {0}")]
	Http(String),

	#[error("HTTP error status: {0}")]
	Status(u16),

	#[error("request timeout")]
	Timeout,

	#[error("malformed remote payload: {0}")]
	Decode(String),

	#[error("remote store unavailable: {0}")]
	Unavailable(String),
}

impl From<reqwest::Error> for RemoteError {
	fn from(e: reqwest::Error) -> Self {
		if e.is_timeout() {
			RemoteError::Timeout
		} else if let Some(status) = e.status() {
			RemoteError::Status(status.as_u16())
		} else if e.is_decode() {
			RemoteError::Decode(e.to_string())
		} else {
			RemoteError::Http(e.to_string())
		}
	}
}

/// Fetch-one / upsert-one access to the remote row of an account.
///
/// Implemented by [`HttpRemoteStore`] and [`MemoryRemoteStore`] so the sync
/// engine can be exercised without a network.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
	/// Latest document stored for the account, or `None` if no row exists.
	async fn fetch_latest(&self, account_id: &str) -> Result<Option<Document>, RemoteError>;

	/// Update the account's row if present, else insert it.
	async fn upsert(&self, account_id: &str, doc: &Document) -> Result<(), RemoteError>;
}

/// JSON body sent to the remote store for `doc`.
///
/// Inlined binary payloads are blanked: large assets stay on the device and
/// are never part of the synchronized body. The source document is untouched.
pub fn outbound_payload(doc: &Document) -> Result<Value, RemoteError> {
	let mut value = serde_json::to_value(doc).map_err(|e| RemoteError::Decode(e.to_string()))?;
	strip_inline_binaries(&mut value);
	Ok(value)
}

/// Replace every data-URI string inside `value` with an empty string.
pub fn strip_inline_binaries(value: &mut Value) {
	match value {
		Value::String(s) if s.starts_with(DATA_URI_PREFIX) => s.clear(),
		Value::Array(items) => items.iter_mut().for_each(strip_inline_binaries),
		Value::Object(map) => map.values_mut().for_each(strip_inline_binaries),
		_ => {}
	}
}

/// Put back the inlined binaries that the remote copy only holds blanked.
///
/// Remote rows never carry data URIs, so after a merge every blank string
/// whose local counterpart (same profile key, or same field of the same
/// entity) is a data URI takes the local value again.
pub fn restore_inline_binaries(merged: &mut Document, local: &Document) {
	restore_map(&mut merged.profile, &local.profile);

	for (name, entities) in merged.collections.iter_mut() {
		let Some(local_entities) = local.collections.get(name) else {
			continue;
		};
		for entity in entities.iter_mut() {
			if let Some(original) = local_entities.iter().find(|e| e.id == entity.id) {
				restore_map(&mut entity.fields, &original.fields);
			}
		}
	}
}

fn restore_map(merged: &mut Map<String, Value>, local: &Map<String, Value>) {
	for (key, value) in merged.iter_mut() {
		if let Some(original) = local.get(key) {
			restore_value(value, original);
		}
	}
}

fn restore_value(merged: &mut Value, local: &Value) {
	match (merged, local) {
		(Value::String(s), Value::String(original)) if s.is_empty() && original.starts_with(DATA_URI_PREFIX) => {
			s.clone_from(original);
		}
		(Value::Object(map), Value::Object(original)) => restore_map(map, original),
		(Value::Array(items), Value::Array(originals)) => {
			for (index, item) in items.iter_mut().enumerate() {
				// Entity-shaped items are matched by id, anything else by position.
				let counterpart = match item.get("id") {
					Some(id) => originals.iter().find(|o| o.get("id") == Some(id)),
					None => originals.get(index),
				};
				if let Some(original) = counterpart {
					restore_value(item, original);
				}
			}
		}
		_ => {}
	}
}

/// Pick the most recent document among possibly duplicated rows.
pub fn latest_of(docs: impl IntoIterator<Item = Document>) -> Option<Document> {
	docs.into_iter().max_by_key(|d| d.revision)
}

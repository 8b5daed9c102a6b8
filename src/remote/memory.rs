use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use super::{RemoteError, RemoteStore, outbound_payload};
use crate::document::Document;

/// In-process remote store.
///
/// Stores exactly what an HTTP backend would receive (the stripped outbound
/// payload) and supports injected failures so retry and error paths can be
/// driven deterministically.
#[derive(Default)]
pub struct MemoryRemoteStore {
	rows: Mutex<HashMap<String, Vec<Value>>>,
	failing_reads: AtomicU32,
	failing_writes: AtomicU32,
	read_calls: AtomicU64,
	write_calls: AtomicU64,
}

impl MemoryRemoteStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Fail the next `n` reads with a transport error.
	pub fn fail_next_reads(&self, n: u32) {
		self.failing_reads.store(n, Ordering::SeqCst);
	}

	/// Fail the next `n` writes with a transport error.
	pub fn fail_next_writes(&self, n: u32) {
		self.failing_writes.store(n, Ordering::SeqCst);
	}

	pub fn read_calls(&self) -> u64 {
		self.read_calls.load(Ordering::SeqCst)
	}

	pub fn write_calls(&self) -> u64 {
		self.write_calls.load(Ordering::SeqCst)
	}

	/// Append a raw row for `account_id`, bypassing upsert semantics.
	/// Used to simulate duplicate rows left behind by older clients.
	pub fn insert_raw_row(&self, account_id: &str, data: Value) {
		self.lock().entry(account_id.to_string()).or_default().push(data);
	}

	/// Overwrite the account's row with `doc`, as another device would.
	pub fn put(&self, account_id: &str, doc: &Document) -> Result<(), RemoteError> {
		let payload = outbound_payload(doc)?;
		self.lock().insert(account_id.to_string(), vec![payload]);
		Ok(())
	}

	/// Raw payloads stored for `account_id`.
	pub fn rows(&self, account_id: &str) -> Vec<Value> {
		self.lock().get(account_id).cloned().unwrap_or_default()
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Value>>> {
		self.rows.lock().unwrap_or_else(|p| p.into_inner())
	}

	/// Consume one injected failure from `counter`, if any is pending.
	fn take_failure(counter: &AtomicU32) -> bool {
		counter
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok()
	}
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
	async fn fetch_latest(&self, account_id: &str) -> Result<Option<Document>, RemoteError> {
		self.read_calls.fetch_add(1, Ordering::SeqCst);
		if Self::take_failure(&self.failing_reads) {
			return Err(RemoteError::Unavailable("injected read failure".to_string()));
		}

		let rows = self.rows(account_id);
		let docs = rows
			.into_iter()
			.map(|raw| serde_json::from_value::<Document>(raw).map_err(|e| RemoteError::Decode(e.to_string())))
			.collect::<Result<Vec<_>, _>>()?;
		Ok(super::latest_of(docs))
	}

	async fn upsert(&self, account_id: &str, doc: &Document) -> Result<(), RemoteError> {
		self.write_calls.fetch_add(1, Ordering::SeqCst);
		if Self::take_failure(&self.failing_writes) {
			return Err(RemoteError::Unavailable("injected write failure".to_string()));
		}
		let payload = outbound_payload(doc)?;

		let mut rows = self.lock();
		let entry = rows.entry(account_id.to_string()).or_default();
		// Update the newest row in place, insert only when none exists.
		let newest = entry
			.iter_mut()
			.max_by_key(|row| row.get("revision").and_then(Value::as_u64).unwrap_or(0));
		match newest {
			Some(row) => *row = payload,
			None => entry.push(payload),
		}
		Ok(())
	}
}

use thiserror::Error;

use crate::cache::CacheError;
use crate::document::DocumentError;
use crate::remote::RemoteError;

/// Errors surfaced by the sync engine, the mutation pipeline and backups.
///
/// None of these are fatal: remote failures are retried and reported through
/// the status signal, and a corrupt cache is recovered by falling back to the
/// default document before it ever reaches this type.
#[derive(Debug, Error)]
pub enum SyncError {
	/// The operation needs cloud durability but the device is offline.
	#[error("device is offline; this action requires a connection")]
	Connectivity,

	#[error("failed to read remote document: {0}")]
	RemoteRead(#[source] RemoteError),

	#[error("failed to write remote document: {0}")]
	RemoteWrite(#[source] RemoteError),

	#[error("local storage error: {0}")]
	Storage(#[from] CacheError),

	#[error("rejected change: {0}")]
	Document(#[from] DocumentError),

	#[error("backup file error: {0}")]
	Backup(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

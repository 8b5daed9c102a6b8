//! Export and import of the whole document as a backup file.
//!
//! Exports contain the full local document, inlined binaries included.
//! Imports either merge through the regular resolver (like a pull whose
//! remote copy is the file) or replace the local document outright.

use std::io::Write;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::document::Document;
use crate::error::{SyncError, SyncResult};

/// How an imported backup is combined with the local document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
	/// Merge the file's content with the local document.
	#[default]
	Merge,
	/// Discard the local document (including unsynced edits) for the file's.
	Replace,
}

/// Write `doc` to `path` as pretty JSON, atomically.
pub fn export_to(doc: &Document, path: &Path) -> SyncResult<()> {
	let bytes = serde_json::to_vec_pretty(doc).map_err(|e| SyncError::Backup(e.to_string()))?;
	let dir = match path.parent() {
		Some(p) if !p.as_os_str().is_empty() => p,
		_ => Path::new("."),
	};
	let backup_err = |e: std::io::Error| SyncError::Backup(format!("{}: {}", path.display(), e));

	let mut tmp = NamedTempFile::new_in(dir).map_err(backup_err)?;
	tmp.write_all(&bytes).map_err(backup_err)?;
	tmp.persist(path).map_err(|e| backup_err(e.error))?;

	info!(
		"Exported revision {} ({} live entities) to {}",
		doc.revision,
		doc.live_entity_count(),
		path.display()
	);
	Ok(())
}

/// Read a backup file. Unlike the local cache, an unreadable file is an
/// error: nothing should be merged or replaced from it.
pub fn read_backup(path: &Path) -> SyncResult<Document> {
	let raw = std::fs::read_to_string(path)
		.map_err(|e| SyncError::Backup(format!("{}: {}", path.display(), e)))?;
	serde_json::from_str(&raw)
		.map_err(|e| SyncError::Backup(format!("{} is not a valid backup: {}", path.display(), e)))
}

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

/// Sync state exposed to the application layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
	Synced,
	Syncing,
	Error,
	Offline,
}

impl fmt::Display for SyncStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			SyncStatus::Synced => "synced",
			SyncStatus::Syncing => "syncing",
			SyncStatus::Error => "error",
			SyncStatus::Offline => "offline",
		};
		f.write_str(s)
	}
}

/// Capacity of the transition stream; slow listeners lag rather than block.
const TRANSITION_BUFFER: usize = 64;

/// Status surface: the latest value for views, and every transition for
/// listeners that care about the sequence (retry indicators, tests).
pub struct StatusSignal {
	latest: watch::Sender<SyncStatus>,
	transitions: broadcast::Sender<SyncStatus>,
}

impl StatusSignal {
	pub fn new(initial: SyncStatus) -> Self {
		let (latest, _) = watch::channel(initial);
		let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
		Self { latest, transitions }
	}

	/// Publish a phase. Emitted even when the value is unchanged so each
	/// retry attempt is observable.
	pub fn set(&self, status: SyncStatus) {
		self.latest.send_replace(status);
		// No listeners is fine.
		let _ = self.transitions.send(status);
	}

	pub fn get(&self) -> SyncStatus {
		*self.latest.borrow()
	}

	/// Receiver of the latest status.
	pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
		self.latest.subscribe()
	}

	/// Receiver of every status transition from now on.
	pub fn transitions(&self) -> broadcast::Receiver<SyncStatus> {
		self.transitions.subscribe()
	}
}

impl Default for StatusSignal {
	fn default() -> Self {
		Self::new(SyncStatus::Offline)
	}
}

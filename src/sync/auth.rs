use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use log::{debug, info};
use serde::{Deserialize, Serialize};

/// An authenticated account session supplied by the sign-in collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
	/// Opaque account identity; selects the remote row.
	pub account_id: String,
	/// Bearer token presented to the remote store.
	pub access_token: String,
}

impl Session {
	pub fn new(account_id: impl Into<String>, access_token: impl Into<String>) -> Self {
		Self {
			account_id: account_id.into(),
			access_token: access_token.into(),
		}
	}
}

/// Source of the current session. Sync is a no-op without one.
pub trait SessionProvider: Send + Sync {
	fn current(&self) -> Option<Session>;

	fn is_authenticated(&self) -> bool {
		self.current().is_some()
	}
}

/// Online/offline signal supplied by the platform.
pub trait Connectivity: Send + Sync {
	fn is_online(&self) -> bool;
}

/// Session holder that the sign-in flow updates in place.
#[derive(Debug, Default)]
pub struct StaticSession {
	inner: RwLock<Option<Session>>,
}

impl StaticSession {
	pub fn new(session: Option<Session>) -> Self {
		Self {
			inner: RwLock::new(session),
		}
	}

	pub fn sign_in(&self, session: Session) {
		info!("Signed in as account {}", session.account_id);
		*self.inner.write().unwrap_or_else(|p| p.into_inner()) = Some(session);
	}

	pub fn sign_out(&self) {
		info!("Signed out");
		*self.inner.write().unwrap_or_else(|p| p.into_inner()) = None;
	}
}

impl SessionProvider for StaticSession {
	fn current(&self) -> Option<Session> {
		self.inner.read().unwrap_or_else(|p| p.into_inner()).clone()
	}
}

/// Connectivity flag toggled by the platform's network observer.
#[derive(Debug)]
pub struct ConnectivityFlag {
	online: AtomicBool,
}

impl ConnectivityFlag {
	pub fn new(online: bool) -> Self {
		Self {
			online: AtomicBool::new(online),
		}
	}

	pub fn set_online(&self, online: bool) {
		let was = self.online.swap(online, Ordering::SeqCst);
		if was != online {
			debug!("Connectivity changed: online={}", online);
		}
	}
}

impl Default for ConnectivityFlag {
	fn default() -> Self {
		Self::new(true)
	}
}

impl Connectivity for ConnectivityFlag {
	fn is_online(&self) -> bool {
		self.online.load(Ordering::SeqCst)
	}
}

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use clinic_sync::SyncError;
use clinic_sync::cache::{LocalCache, MemoryCache};
use clinic_sync::document::{DevicePreferences, Document, Entity, Mutation};
use clinic_sync::remote::{MemoryRemoteStore, RemoteError};
use clinic_sync::sync::{PullOutcome, PushOutcome, RetryPolicy, SyncStatus};

use common::{ACCOUNT, fast_policy, harness, harness_with, with_patients};

#[cfg(feature = "unit-tests")]
mod integration_tests {
	use super::*;

	fn seeded_cache(doc: &Document) -> Arc<MemoryCache> {
		Arc::new(MemoryCache::with_raw(serde_json::to_string(doc).unwrap()))
	}

	fn drain(rx: &mut tokio::sync::broadcast::Receiver<SyncStatus>) -> Vec<SyncStatus> {
		let mut seen = Vec::new();
		while let Ok(status) = rx.try_recv() {
			seen.push(status);
		}
		seen
	}

	/// Five consecutive push failures: five attempts, then error, and the
	/// local document is left exactly as it was.
	#[tokio::test]
	async fn test_push_failures_exhaust_retries() {
		let local = with_patients(10, vec![Entity::new("p1").with_updated_at(10)]);
		let h = harness_with(fast_policy(), Arc::new(MemoryRemoteStore::new()), seeded_cache(&local));
		let before = h.cache.raw().unwrap();
		let mut events = h.engine.status().transitions();

		h.remote.fail_next_writes(5);
		let outcome = h.store.push_now().await;

		assert_eq!(outcome, PushOutcome::Failed);
		assert_eq!(h.remote.write_calls(), 5);
		assert_eq!(
			drain(&mut events),
			vec![
				SyncStatus::Syncing,
				SyncStatus::Syncing,
				SyncStatus::Syncing,
				SyncStatus::Syncing,
				SyncStatus::Syncing,
				SyncStatus::Error,
			]
		);
		assert_eq!(h.cache.raw().unwrap(), before);
		assert_eq!(*h.store.document(), local);
		assert!(h.remote.rows(ACCOUNT).is_empty());
	}

	#[tokio::test]
	async fn test_try_push_reports_write_error() {
		let h = harness(fast_policy());
		h.remote.fail_next_writes(5);

		let err = h.store.try_push_now().await.unwrap_err();
		assert!(matches!(err, SyncError::RemoteWrite(RemoteError::Unavailable(_))));
		assert_eq!(h.engine.status().get(), SyncStatus::Error);
	}

	/// With the default policy the push gives up after 2+4+8+16+32 seconds.
	#[tokio::test(start_paused = true)]
	async fn test_push_backoff_schedule_in_time() {
		let h = harness(RetryPolicy::default());
		h.remote.fail_next_writes(5);

		let started = tokio::time::Instant::now();
		assert_eq!(h.store.push_now().await, PushOutcome::Failed);
		let elapsed = started.elapsed();

		assert!(elapsed >= Duration::from_secs(62), "elapsed {:?}", elapsed);
		assert!(elapsed < Duration::from_secs(63), "elapsed {:?}", elapsed);
	}

	#[tokio::test]
	async fn test_push_recovers_after_transient_failures() {
		let h = harness(fast_policy());
		h.remote.fail_next_writes(2);

		assert_eq!(h.store.push_now().await, PushOutcome::Synced);
		assert_eq!(h.remote.write_calls(), 3);
		assert_eq!(h.engine.status().get(), SyncStatus::Synced);
		assert_eq!(h.remote.rows(ACCOUNT).len(), 1);
	}

	#[tokio::test]
	async fn test_push_offline_is_noop() {
		let h = harness(fast_policy());
		h.connectivity.set_online(false);

		assert_eq!(h.store.push_now().await, PushOutcome::Offline);
		assert_eq!(h.remote.write_calls(), 0);
		assert_eq!(h.engine.status().get(), SyncStatus::Offline);
	}

	#[tokio::test]
	async fn test_push_signed_out_is_noop() {
		let h = harness(fast_policy());
		h.sessions.sign_out();

		assert_eq!(h.store.push_now().await, PushOutcome::Offline);
		assert_eq!(h.store.refresh(false).await.unwrap(), PullOutcome::Offline);
		assert_eq!(h.remote.write_calls(), 0);
		assert_eq!(h.remote.read_calls(), 0);
	}

	/// A snapshot queued behind a newer one is abandoned; only the newest
	/// revision reaches the remote row.
	#[tokio::test]
	async fn test_newer_snapshot_supersedes_pending_push() {
		let h = harness(fast_policy());
		let older = Arc::new(with_patients(1, vec![Entity::new("p1").with_updated_at(1)]));
		let newer = Arc::new(with_patients(
			2,
			vec![Entity::new("p1").with_updated_at(1), Entity::new("p2").with_updated_at(2)],
		));

		let first = h.engine.spawn_push(older);
		let second = h.engine.spawn_push(newer);

		assert_eq!(first.await.unwrap(), PushOutcome::Superseded);
		assert_eq!(second.await.unwrap(), PushOutcome::Synced);
		let rows = h.remote.rows(ACCOUNT);
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0]["revision"], 2);
	}

	#[tokio::test]
	async fn test_pull_without_remote_row() {
		let h = harness(fast_policy());

		assert_eq!(h.store.refresh(false).await.unwrap(), PullOutcome::NoRemote);
		assert_eq!(h.engine.status().get(), SyncStatus::Synced);
		assert_eq!(h.store.document().revision, 0);
	}

	/// A newer remote copy is merged in; device preferences stay local and
	/// the merge result is not pushed back.
	#[tokio::test]
	async fn test_pull_merges_newer_remote_and_keeps_preferences() {
		let local = with_patients(100, vec![Entity::new("p1").with_updated_at(100)]).with_preferences(
			DevicePreferences {
				language: "pt".into(),
				theme: "dark".into(),
			},
		);
		let h = harness_with(fast_policy(), Arc::new(MemoryRemoteStore::new()), seeded_cache(&local));

		let remote = with_patients(200, vec![Entity::new("p2").with_updated_at(200)]).with_preferences(
			DevicePreferences {
				language: "fr".into(),
				theme: "light".into(),
			},
		);
		h.remote.put(ACCOUNT, &remote).unwrap();

		let outcome = h.store.refresh(false).await.unwrap();
		assert_eq!(outcome, PullOutcome::Merged { revision: 200 });

		let doc = h.store.document();
		assert!(doc.entity("patients", "p1").is_some());
		assert!(doc.entity("patients", "p2").is_some());
		assert_eq!(doc.preferences.language, "pt");
		assert_eq!(doc.preferences.theme, "dark");
		assert_eq!(h.cache.load(), *doc);
		assert_eq!(h.remote.write_calls(), 0);
		assert_eq!(h.engine.status().get(), SyncStatus::Synced);
	}

	#[tokio::test]
	async fn test_pull_stale_remote_short_circuits_unless_forced() {
		let local = with_patients(500, vec![Entity::new("p1").with_updated_at(500)]);
		let h = harness_with(fast_policy(), Arc::new(MemoryRemoteStore::new()), seeded_cache(&local));
		let remote = with_patients(
			300,
			vec![Entity::new("p1").with_updated_at(200).with_field("phone", json!("stale")), Entity::new("p7").with_updated_at(300)],
		);
		h.remote.put(ACCOUNT, &remote).unwrap();

		assert_eq!(h.store.refresh(false).await.unwrap(), PullOutcome::UpToDate);
		assert_eq!(*h.store.document(), local);

		// Forced pulls still go through the merge: the newer local p1 survives.
		assert_eq!(h.store.refresh(true).await.unwrap(), PullOutcome::Merged { revision: 500 });
		let doc = h.store.document();
		assert!(doc.entity("patients", "p7").is_some());
		assert_eq!(doc.entity("patients", "p1").unwrap().field("phone"), None);
	}

	#[tokio::test]
	async fn test_pull_failure_leaves_local_untouched() {
		let local = with_patients(42, vec![Entity::new("p1").with_updated_at(42)]);
		let h = harness_with(fast_policy(), Arc::new(MemoryRemoteStore::new()), seeded_cache(&local));
		h.remote.fail_next_reads(1);

		let err = h.store.refresh(false).await.unwrap_err();
		assert!(matches!(err, SyncError::RemoteRead(_)));
		assert_eq!(h.engine.status().get(), SyncStatus::Error);
		assert_eq!(*h.store.document(), local);
	}

	/// Duplicate remote rows resolve to the one with the highest revision.
	#[tokio::test]
	async fn test_pull_picks_latest_of_duplicate_rows() {
		let h = harness(fast_policy());
		h.remote.insert_raw_row(
			ACCOUNT,
			serde_json::to_value(with_patients(5, vec![Entity::new("old").with_updated_at(5)])).unwrap(),
		);
		h.remote.insert_raw_row(
			ACCOUNT,
			serde_json::to_value(with_patients(9, vec![Entity::new("new").with_updated_at(9)])).unwrap(),
		);

		assert_eq!(h.store.refresh(false).await.unwrap(), PullOutcome::Merged { revision: 9 });
		let doc = h.store.document();
		assert!(doc.entity("patients", "new").is_some());
		assert!(doc.entity("patients", "old").is_none());
	}

	/// Inlined images never leave the device, so pulling another device's
	/// newer row must not blank the local logo or patient photo.
	#[tokio::test]
	async fn test_pull_keeps_local_inline_images() {
		const LOGO: &str = "data:image/png;base64,TE9HTw==";
		const PHOTO: &str = "data:image/jpeg;base64,UEhPVE8=";

		let remote = Arc::new(MemoryRemoteStore::new());
		let a = harness_with(fast_policy(), remote.clone(), Arc::new(MemoryCache::new()));
		let b = harness_with(fast_policy(), remote.clone(), Arc::new(MemoryCache::new()));

		let mut profile = serde_json::Map::new();
		profile.insert("name".into(), json!("Clinica Sol"));
		profile.insert("logo".into(), json!(LOGO));
		let set_profile = a
			.store
			.commit(&Mutation::SetProfile { profile }, clinic_sync::Durability::Local)
			.unwrap();
		assert_eq!(set_profile.push_outcome().await, PushOutcome::Synced);
		let photo = a
			.store
			.upsert(
				"patients",
				Entity::new("p1").with_field("photo", json!(PHOTO)).with_field("phone", json!("111")),
				clinic_sync::Durability::Local,
			)
			.unwrap();
		assert_eq!(photo.push_outcome().await, PushOutcome::Synced);

		// Device B only ever sees the blanked copies.
		b.store.refresh(false).await.unwrap();
		assert_eq!(b.store.document().profile["logo"], "");
		let edited = b
			.store
			.upsert(
				"patients",
				Entity::new("p1").with_field("photo", json!("")).with_field("phone", json!("222")),
				clinic_sync::Durability::Local,
			)
			.unwrap();
		assert_eq!(edited.push_outcome().await, PushOutcome::Synced);
		let added = b.store.upsert("patients", Entity::new("p9"), clinic_sync::Durability::Local).unwrap();
		assert_eq!(added.push_outcome().await, PushOutcome::Synced);

		let outcome = a.store.refresh(false).await.unwrap();
		assert!(matches!(outcome, PullOutcome::Merged { .. }));

		let doc = a.store.document();
		assert_eq!(doc.profile["logo"], LOGO);
		assert_eq!(doc.profile["name"], "Clinica Sol");
		let p1 = doc.entity("patients", "p1").unwrap();
		assert_eq!(p1.field("phone"), Some(&json!("222")));
		assert_eq!(p1.field("photo"), Some(&json!(PHOTO)));
		assert!(doc.entity("patients", "p9").is_some());
		assert_eq!(a.cache.load(), *doc);
	}

	/// Two offline devices converge through the shared remote row.
	#[tokio::test]
	async fn test_two_devices_converge() {
		let remote = Arc::new(MemoryRemoteStore::new());
		let a = harness_with(fast_policy(), remote.clone(), Arc::new(MemoryCache::new()));
		let b = harness_with(fast_policy(), remote.clone(), Arc::new(MemoryCache::new()));
		a.connectivity.set_online(false);
		b.connectivity.set_online(false);

		let a_commit = a
			.store
			.upsert("patients", Entity::new("pa"), clinic_sync::Durability::Local)
			.unwrap();
		assert_eq!(a_commit.push_outcome().await, PushOutcome::Offline);
		let b_commit = b
			.store
			.upsert("patients", Entity::new("pb"), clinic_sync::Durability::Local)
			.unwrap();
		assert_eq!(b_commit.push_outcome().await, PushOutcome::Offline);

		a.connectivity.set_online(true);
		b.connectivity.set_online(true);

		a.store.refresh(false).await.unwrap();
		assert_eq!(a.store.push_now().await, PushOutcome::Synced);
		b.store.refresh(true).await.unwrap();
		assert_eq!(b.store.push_now().await, PushOutcome::Synced);
		a.store.refresh(true).await.unwrap();

		for device in [&a, &b] {
			let doc = device.store.document();
			let ids: Vec<_> = doc.collection("patients").map(|e| e.id.as_str()).collect();
			assert_eq!(ids.len(), 2, "{:?}", ids);
			assert!(ids.contains(&"pa") && ids.contains(&"pb"));
		}
	}
}

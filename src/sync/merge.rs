use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{Document, Entity};

/// Merge rule for one collection: which of its entities' fields hold nested
/// collections that must be merged id-by-id rather than replaced with the
/// owning entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRule {
	/// Collection name (top level) or field name (nested).
	pub collection: String,
	/// Rules for nested collections, applied recursively.
	#[serde(default)]
	pub nested: Vec<MergeRule>,
}

impl MergeRule {
	/// A flat collection rule with no nested collections.
	pub fn new(collection: impl Into<String>) -> Self {
		Self {
			collection: collection.into(),
			nested: Vec::new(),
		}
	}

	/// Declare a nested collection.
	pub fn with_nested(mut self, rule: MergeRule) -> Self {
		self.nested.push(rule);
		self
	}
}

/// Configuration for the merge resolver with per-collection rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeConfig {
	#[serde(default)]
	pub rules: HashMap<String, MergeRule>,
}

impl MergeConfig {
	pub fn new() -> Self {
		Self::default()
	}

	/// Add a rule for a top-level collection.
	pub fn add_rule(mut self, rule: MergeRule) -> Self {
		self.rules.insert(rule.collection.clone(), rule);
		self
	}

	/// Rule for `collection`; unknown collections merge flat.
	pub fn get_rule(&self, collection: &str) -> MergeRule {
		self.rules
			.get(collection)
			.cloned()
			.unwrap_or_else(|| MergeRule::new(collection))
	}

	/// Collections of the clinic document.
	pub fn clinic() -> Self {
		Self::new()
			.add_rule(
				MergeRule::new("patients")
					.with_nested(MergeRule::new("visits"))
					.with_nested(MergeRule::new("ledger"))
					.with_nested(MergeRule::new("documents")),
			)
			.add_rule(MergeRule::new("appointments"))
			.add_rule(MergeRule::new("prescriptions"))
			.add_rule(MergeRule::new("inventory"))
			.add_rule(MergeRule::new("expenses"))
	}
}

static CLINIC_RESOLVER: Lazy<MergeResolver> = Lazy::new(|| MergeResolver::new(MergeConfig::clinic()));

/// Merge two replicas of the clinic document with the clinic rules.
pub fn merge(a: &Document, b: &Document) -> Document {
	CLINIC_RESOLVER.merge(a, b)
}

/// One replica's view of a collection plus the revision of the document
/// that owns it (the fallback clock for untimestamped entities).
#[derive(Clone, Copy)]
struct Side<'a> {
	items: &'a [Entity],
	revision: u64,
}

/// Tombstone-aware, per-entity last-writer-wins resolver.
///
/// The result is deterministic and independent of argument order in
/// content; only collection ordering follows the first argument.
pub struct MergeResolver {
	config: MergeConfig,
}

impl MergeResolver {
	pub fn new(config: MergeConfig) -> Self {
		Self { config }
	}

	pub fn config(&self) -> &MergeConfig {
		&self.config
	}

	/// Merge two documents. Never fails.
	pub fn merge(&self, a: &Document, b: &Document) -> Document {
		let tombstones: BTreeSet<String> = a.tombstones.union(&b.tombstones).cloned().collect();

		let names: BTreeSet<&String> = a.collections.keys().chain(b.collections.keys()).collect();
		let mut collections = BTreeMap::new();
		for name in names {
			let rule = self.config.get_rule(name);
			let left = Side {
				items: a.collections.get(name).map(Vec::as_slice).unwrap_or(&[]),
				revision: a.revision,
			};
			let right = Side {
				items: b.collections.get(name).map(Vec::as_slice).unwrap_or(&[]),
				revision: b.revision,
			};
			collections.insert(name.clone(), merge_collection(left, right, &rule, &tombstones));
		}

		// Document-level sections follow the newer replica as a whole.
		let newer = match a.revision.cmp(&b.revision) {
			Ordering::Greater => a,
			Ordering::Less => b,
			Ordering::Equal => {
				if sections_key(a) >= sections_key(b) {
					a
				} else {
					b
				}
			}
		};

		Document {
			revision: a.revision.max(b.revision),
			tombstones,
			collections,
			profile: newer.profile.clone(),
			preferences: newer.preferences.clone(),
		}
	}
}

fn sections_key(doc: &Document) -> String {
	let prefs = serde_json::to_string(&doc.preferences).unwrap_or_default();
	format!("{}{}", Value::Object(doc.profile.clone()), prefs)
}

fn merge_collection(
	left: Side<'_>,
	right: Side<'_>,
	rule: &MergeRule,
	tombstones: &BTreeSet<String>,
) -> Vec<Entity> {
	let right_by_id: HashMap<&str, &Entity> = right.items.iter().map(|e| (e.id.as_str(), e)).collect();
	let left_by_id: HashMap<&str, &Entity> = left.items.iter().map(|e| (e.id.as_str(), e)).collect();
	let mut seen: HashSet<&str> = HashSet::new();
	let mut out = Vec::with_capacity(left.items.len().max(right.items.len()));

	// Left order first, then ids only the right side knows about.
	for entity in left.items.iter().chain(right.items.iter()) {
		let id = entity.id.as_str();
		if tombstones.contains(id) || !seen.insert(id) {
			continue;
		}
		let merged = match (left_by_id.get(id), right_by_id.get(id)) {
			(Some(l), Some(r)) => resolve_pair(l, left.revision, r, right.revision, rule, tombstones),
			(Some(only), None) | (None, Some(only)) => prune(only, rule, tombstones),
			(None, None) => continue,
		};
		out.push(merged);
	}

	out
}

/// Order two copies of the same entity: own `updatedAt` first, the owning
/// document's revision when neither has one, canonical encoding on ties.
fn compare(l: &Entity, l_rev: u64, r: &Entity, r_rev: u64) -> Ordering {
	let by_clock = match (l.updated_at, r.updated_at) {
		(Some(x), Some(y)) => x.cmp(&y),
		(None, None) => l_rev.cmp(&r_rev),
		(Some(_), None) => Ordering::Greater,
		(None, Some(_)) => Ordering::Less,
	};
	by_clock.then_with(|| l.canonical().cmp(&r.canonical()))
}

fn resolve_pair(
	l: &Entity,
	l_rev: u64,
	r: &Entity,
	r_rev: u64,
	rule: &MergeRule,
	tombstones: &BTreeSet<String>,
) -> Entity {
	// The losing copy is discarded wholesale; no field-level splice.
	let winner = if compare(l, l_rev, r, r_rev) == Ordering::Less { r } else { l };
	let mut result = winner.clone();

	for nested_rule in &rule.nested {
		let key = nested_rule.collection.as_str();
		let merged = match (l.nested(key), r.nested(key)) {
			(Some(ln), Some(rn)) => merge_collection(
				Side {
					items: &ln,
					revision: l_rev,
				},
				Side {
					items: &rn,
					revision: r_rev,
				},
				nested_rule,
				tombstones,
			),
			(Some(only), None) | (None, Some(only)) => prune_all(&only, nested_rule, tombstones),
			(None, None) => continue,
		};
		result.set_nested(key, merged);
	}

	result
}

/// Copy a one-sided entity, dropping tombstoned ids from its nested data.
fn prune(entity: &Entity, rule: &MergeRule, tombstones: &BTreeSet<String>) -> Entity {
	let mut result = entity.clone();
	for nested_rule in &rule.nested {
		let key = nested_rule.collection.as_str();
		if let Some(children) = entity.nested(key) {
			result.set_nested(key, prune_all(&children, nested_rule, tombstones));
		}
	}
	result
}

fn prune_all(items: &[Entity], rule: &MergeRule, tombstones: &BTreeSet<String>) -> Vec<Entity> {
	let mut seen = HashSet::new();
	items
		.iter()
		.filter(|e| !tombstones.contains(&e.id) && seen.insert(e.id.as_str()))
		.map(|e| prune(e, rule, tombstones))
		.collect()
}

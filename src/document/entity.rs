use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field name of the per-entity revision stamp on the wire.
pub const UPDATED_AT: &str = "updatedAt";

/// An addressable record inside a collection.
///
/// Everything besides `id` and `updatedAt` is kept as raw JSON so that the
/// engine stays agnostic of the clinic's business fields. Nested collections
/// (a patient's visits, ledger entries, ...) live in `fields` as arrays of
/// entity-shaped objects and are interpreted through [`Entity::nested`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
	pub id: String,
	#[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
	pub updated_at: Option<u64>,
	#[serde(flatten)]
	pub fields: Map<String, Value>,
}

impl Entity {
	/// Create an entity with no fields and no revision stamp.
	pub fn new(id: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			updated_at: None,
			fields: Map::new(),
		}
	}

	/// Set a field, builder style.
	pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
		self.fields.insert(key.into(), value);
		self
	}

	pub fn with_updated_at(mut self, updated_at: u64) -> Self {
		self.updated_at = Some(updated_at);
		self
	}

	pub fn field(&self, key: &str) -> Option<&Value> {
		self.fields.get(key)
	}

	/// Decode the nested collection stored under `key`.
	///
	/// Returns `None` when the field is absent or does not hold an array of
	/// entity-shaped objects; such data is treated as an opaque field.
	pub fn nested(&self, key: &str) -> Option<Vec<Entity>> {
		match self.fields.get(key)? {
			Value::Array(items) => items
				.iter()
				.map(|item| Entity::deserialize(item))
				.collect::<Result<Vec<_>, _>>()
				.ok(),
			_ => None,
		}
	}

	/// Replace the nested collection stored under `key`.
	pub fn set_nested(&mut self, key: &str, items: Vec<Entity>) {
		let array = items.into_iter().map(Entity::into_value).collect();
		self.fields.insert(key.to_string(), Value::Array(array));
	}

	/// Convert into the JSON object this entity serializes to.
	pub fn into_value(self) -> Value {
		let mut map = Map::with_capacity(self.fields.len() + 2);
		map.insert("id".to_string(), Value::String(self.id));
		if let Some(ts) = self.updated_at {
			map.insert(UPDATED_AT.to_string(), Value::from(ts));
		}
		map.extend(self.fields);
		Value::Object(map)
	}

	/// Canonical JSON encoding, used as a deterministic tie-break.
	///
	/// `serde_json::Map` is key-ordered, so equal entities always encode to
	/// the same string.
	pub fn canonical(&self) -> String {
		self.clone().into_value().to_string()
	}
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A row from the record store. Schemaless: the engine only reads a handful of
/// well-known fields (`id`, `subject_id`, `role`, `name`, `parent_id`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

/// Ordered collection of records as returned by one query.
pub type Collection = Vec<Record>;

impl Record {
	pub fn new() -> Self {
		Self::default()
	}

	/// Wraps a JSON object. Returns `None` for any other JSON value.
	pub fn from_value(value: Value) -> Option<Self> {
		match value {
			Value::Object(map) => Some(Self(map)),
			_ => None,
		}
	}

	#[must_use]
	pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
		self.0.insert(field.into(), value.into());
		self
	}

	pub fn get(&self, field: &str) -> Option<&Value> {
		self.0.get(field)
	}

	pub fn get_str(&self, field: &str) -> Option<&str> {
		self.0.get(field).and_then(Value::as_str)
	}

	pub fn id(&self) -> Option<&str> {
		self.get_str("id")
	}

	pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
		self.0.insert(field.into(), value.into());
	}

	/// Overwrites fields present in `patch`, leaving the rest untouched.
	pub fn merge(&mut self, patch: &Record) {
		for (k, v) in &patch.0 {
			self.0.insert(k.clone(), v.clone());
		}
	}

	pub fn fields(&self) -> &Map<String, Value> {
		&self.0
	}

	pub fn into_value(self) -> Value {
		Value::Object(self.0)
	}
}

impl From<Map<String, Value>> for Record {
	fn from(map: Map<String, Value>) -> Self {
		Self(map)
	}
}

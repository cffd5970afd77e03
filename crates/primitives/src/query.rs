use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::Record;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
	Eq(Value),
	Neq(Value),
	In(Vec<Value>),
}

/// One predicate on a single field. Missing fields compare as JSON `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
	pub field: String,
	pub op: FilterOp,
}

impl Filter {
	pub fn matches(&self, record: &Record) -> bool {
		let actual = record.get(&self.field).unwrap_or(&Value::Null);
		match &self.op {
			FilterOp::Eq(expected) => actual == expected,
			FilterOp::Neq(expected) => actual != expected,
			FilterOp::In(options) => options.iter().any(|o| o == actual),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
	Asc,
	Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
	pub field: String,
	pub direction: Direction,
}

/// Filter/order/limit specification for one `query` call against a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
	pub table: String,
	#[serde(default)]
	pub filters: Vec<Filter>,
	#[serde(default)]
	pub order: Vec<Order>,
	#[serde(default)]
	pub limit: Option<usize>,
}

impl Query {
	pub fn table(table: impl Into<String>) -> Self {
		Self {
			table: table.into(),
			filters: Vec::new(),
			order: Vec::new(),
			limit: None,
		}
	}

	#[must_use]
	pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
		self.filters.push(Filter {
			field: field.into(),
			op: FilterOp::Eq(value.into()),
		});
		self
	}

	#[must_use]
	pub fn neq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
		self.filters.push(Filter {
			field: field.into(),
			op: FilterOp::Neq(value.into()),
		});
		self
	}

	#[must_use]
	pub fn within(mut self, field: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
		self.filters.push(Filter {
			field: field.into(),
			op: FilterOp::In(values.into_iter().collect()),
		});
		self
	}

	#[must_use]
	pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
		self.order.push(Order {
			field: field.into(),
			direction,
		});
		self
	}

	#[must_use]
	pub fn limit(mut self, limit: usize) -> Self {
		self.limit = Some(limit);
		self
	}

	pub fn matches(&self, record: &Record) -> bool {
		self.filters.iter().all(|f| f.matches(record))
	}

	/// Evaluates this query over an in-memory row set: filter, stable sort, limit.
	pub fn apply<'a>(&self, rows: impl IntoIterator<Item = &'a Record>) -> Vec<Record> {
		let mut out: Vec<Record> = rows.into_iter().filter(|r| self.matches(r)).cloned().collect();
		if !self.order.is_empty() {
			out.sort_by(|a, b| self.compare(a, b));
		}
		if let Some(limit) = self.limit {
			out.truncate(limit);
		}
		out
	}

	fn compare(&self, a: &Record, b: &Record) -> Ordering {
		for order in &self.order {
			let lhs = a.get(&order.field).unwrap_or(&Value::Null);
			let rhs = b.get(&order.field).unwrap_or(&Value::Null);
			let ord = compare_values(lhs, rhs);
			let ord = match order.direction {
				Direction::Asc => ord,
				Direction::Desc => ord.reverse(),
			};
			if ord != Ordering::Equal {
				return ord;
			}
		}
		Ordering::Equal
	}
}

/// Total order over scalar JSON values: null < bool < number < string.
/// Arrays and objects compare equal to each other and sort last.
fn compare_values(a: &Value, b: &Value) -> Ordering {
	fn rank(v: &Value) -> u8 {
		match v {
			Value::Null => 0,
			Value::Bool(_) => 1,
			Value::Number(_) => 2,
			Value::String(_) => 3,
			Value::Array(_) | Value::Object(_) => 4,
		}
	}
	match (a, b) {
		(Value::Bool(x), Value::Bool(y)) => x.cmp(y),
		(Value::Number(x), Value::Number(y)) => {
			let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
			x.partial_cmp(&y).unwrap_or(Ordering::Equal)
		}
		(Value::String(x), Value::String(y)) => x.cmp(y),
		_ => rank(a).cmp(&rank(b)),
	}
}

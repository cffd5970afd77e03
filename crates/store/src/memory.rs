use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use carebase_primitives::{Collection, Query, Record, RecordId};
use parking_lot::{Mutex, RwLock};

use crate::{RecordStore, Result, StoreError};

/// Per-table call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
	pub queries: usize,
	pub writes: usize,
	pub in_flight: usize,
	pub max_in_flight: usize,
}

#[derive(Default)]
struct Faults {
	queries: HashMap<String, StoreError>,
	writes: HashMap<String, StoreError>,
}

#[derive(Default)]
struct Inner {
	tables: RwLock<HashMap<String, Vec<Record>>>,
	latency: Mutex<HashMap<String, Duration>>,
	faults: Mutex<Faults>,
	stats: Mutex<HashMap<String, TableStats>>,
}

/// In-process record store.
///
/// Tables are created on first write. Per-table query latency and injected
/// failures let tests reproduce slow or broken backends, and [`TableStats`]
/// records how many queries for a table were in flight at once.
#[derive(Clone, Default)]
pub struct MemoryStore {
	inner: Arc<Inner>,
}

/// Decrements a table's in-flight count when the query finishes or is dropped.
struct InFlight<'a> {
	inner: &'a Inner,
	table: &'a str,
}

impl<'a> InFlight<'a> {
	fn enter(inner: &'a Inner, table: &'a str) -> Self {
		let mut stats = inner.stats.lock();
		let entry = stats.entry(table.to_owned()).or_default();
		entry.queries += 1;
		entry.in_flight += 1;
		entry.max_in_flight = entry.max_in_flight.max(entry.in_flight);
		Self { inner, table }
	}
}

impl Drop for InFlight<'_> {
	fn drop(&mut self) {
		if let Some(entry) = self.inner.stats.lock().get_mut(self.table) {
			entry.in_flight = entry.in_flight.saturating_sub(1);
		}
	}
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Builds a store from a table name to rows map.
	pub fn from_tables(tables: HashMap<String, Vec<Record>>) -> Self {
		let store = Self::new();
		*store.inner.tables.write() = tables;
		store
	}

	/// Appends rows to `table`.
	#[must_use]
	pub fn with_rows(self, table: &str, rows: impl IntoIterator<Item = Record>) -> Self {
		self.seed(table, rows);
		self
	}

	pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Record>) {
		self.inner.tables.write().entry(table.to_owned()).or_default().extend(rows);
	}

	/// Delays every query against `table` by `latency`.
	pub fn set_latency(&self, table: &str, latency: Duration) {
		self.inner.latency.lock().insert(table.to_owned(), latency);
	}

	/// Makes every query against `table` fail with `err` until cleared.
	pub fn fail_queries(&self, table: &str, err: StoreError) {
		self.inner.faults.lock().queries.insert(table.to_owned(), err);
	}

	/// Makes every insert/update/delete against `table` fail with `err` until cleared.
	pub fn fail_writes(&self, table: &str, err: StoreError) {
		self.inner.faults.lock().writes.insert(table.to_owned(), err);
	}

	pub fn clear_faults(&self, table: &str) {
		let mut faults = self.inner.faults.lock();
		faults.queries.remove(table);
		faults.writes.remove(table);
	}

	/// Snapshot of every row currently in `table`.
	pub fn rows(&self, table: &str) -> Vec<Record> {
		self.inner.tables.read().get(table).cloned().unwrap_or_default()
	}

	pub fn stats(&self, table: &str) -> TableStats {
		self.inner.stats.lock().get(table).copied().unwrap_or_default()
	}

	fn check_write(&self, table: &str) -> Result<()> {
		if let Some(err) = self.inner.faults.lock().writes.get(table) {
			return Err(err.clone());
		}
		self.inner.stats.lock().entry(table.to_owned()).or_default().writes += 1;
		Ok(())
	}
}

#[async_trait]
impl RecordStore for MemoryStore {
	async fn query(&self, query: &Query) -> Result<Collection> {
		let _in_flight = InFlight::enter(&self.inner, &query.table);
		let latency = self.inner.latency.lock().get(&query.table).copied();
		if let Some(latency) = latency {
			tokio::time::sleep(latency).await;
		}

		if let Some(err) = self.inner.faults.lock().queries.get(&query.table) {
			tracing::debug!(table = %query.table, error = %err, "store.query.injected_failure");
			return Err(err.clone());
		}

		let tables = self.inner.tables.read();
		let rows = tables.get(&query.table).map(|rows| query.apply(rows)).unwrap_or_default();
		tracing::trace!(table = %query.table, rows = rows.len(), "store.query");
		Ok(rows)
	}

	async fn insert(&self, table: &str, mut record: Record) -> Result<Record> {
		self.check_write(table)?;
		let id = match record.id() {
			Some(id) => id.to_owned(),
			None => {
				let id = RecordId::random().to_string();
				record.set("id", id.clone());
				id
			}
		};

		let mut tables = self.inner.tables.write();
		let rows = tables.entry(table.to_owned()).or_default();
		if rows.iter().any(|r| r.id() == Some(id.as_str())) {
			return Err(StoreError::Conflict { table: table.to_owned(), id });
		}
		rows.push(record.clone());
		Ok(record)
	}

	async fn update(&self, table: &str, id: &RecordId, patch: Record) -> Result<Record> {
		self.check_write(table)?;
		let mut tables = self.inner.tables.write();
		let row = tables
			.get_mut(table)
			.and_then(|rows| rows.iter_mut().find(|r| r.id() == Some(id.as_str())))
			.ok_or_else(|| StoreError::NotFound {
				table: table.to_owned(),
				id: Some(id.to_string()),
			})?;
		row.merge(&patch);
		row.set("id", id.as_str());
		Ok(row.clone())
	}

	async fn delete(&self, table: &str, id: &RecordId) -> Result<()> {
		self.check_write(table)?;
		let mut tables = self.inner.tables.write();
		let rows = tables.get_mut(table);
		let position = rows.as_ref().and_then(|rows| rows.iter().position(|r| r.id() == Some(id.as_str())));
		match (rows, position) {
			(Some(rows), Some(idx)) => {
				rows.remove(idx);
				Ok(())
			}
			_ => Err(StoreError::NotFound {
				table: table.to_owned(),
				id: Some(id.to_string()),
			}),
		}
	}
}

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use carebase_identity::MemoryIdentityProvider;
use carebase_primitives::{Collection, Credentials, Query, Record, RecordId};
use carebase_store::{MemoryStore, RecordStore, SharedStore, StoreError};
use carebase_sync::{SyncConfig, SyncEngine};
use parking_lot::Mutex;
use tokio::sync::{Semaphore, watch};

pub const PASSWORD: &str = "pw";

pub fn creds(email: &str) -> Credentials {
	Credentials::new(email, PASSWORD)
}

fn row(pairs: &[(&str, &str)]) -> Record {
	pairs.iter().fold(Record::new(), |record, (k, v)| record.with(*k, *v))
}

/// Store seeded with one of every profile kind and a few rows per resource.
pub fn seeded_store() -> MemoryStore {
	MemoryStore::new()
		.with_rows(
			"staff_profiles",
			[
				row(&[("id", "st-admin"), ("subject_id", "sub-admin"), ("role", "Admin"), ("name", "Ada Admin")]),
				row(&[("id", "st-teach"), ("subject_id", "sub-teach"), ("role", "Teacher"), ("name", "Tess Teacher")]),
			],
		)
		.with_rows("parent_profiles", [row(&[("id", "p-1"), ("subject_id", "sub-parent"), ("name", "Pat Parent")])])
		.with_rows("facility", [row(&[("id", "f-1"), ("name", "Maple Street")])])
		.with_rows("classrooms", [row(&[("id", "r-1"), ("name", "Acorns")]), row(&[("id", "r-2"), ("name", "Oaks")])])
		.with_rows("announcements", [row(&[("id", "a-1"), ("created_at", "2026-09-01")])])
		.with_rows("children", [row(&[("id", "c-1"), ("last_name", "Lovelace"), ("parent_id", "p-1")])])
		.with_rows("attendance", [row(&[("id", "at-1"), ("date", "2026-10-01")])])
		.with_rows("incidents", [row(&[("id", "in-1"), ("occurred_at", "2026-10-02")])])
		.with_rows(
			"invoices",
			[
				row(&[("id", "iv-1"), ("due_date", "2026-11-01"), ("parent_id", "p-1")]),
				row(&[("id", "iv-2"), ("due_date", "2026-11-01"), ("parent_id", "p-2")]),
			],
		)
		.with_rows("payroll", [row(&[("id", "pr-1"), ("period", "2026-10")])])
		.with_rows(
			"schedules",
			[
				row(&[("id", "sc-1"), ("staff_id", "st-teach"), ("starts_at", "08:00")]),
				row(&[("id", "sc-2"), ("staff_id", "st-other"), ("starts_at", "09:00")]),
			],
		)
		.with_rows("lesson_plans", [row(&[("id", "lp-1"), ("week", "2026-W41")])])
		.with_rows("reports", [row(&[("id", "rp-1"), ("created_at", "2026-10-03"), ("parent_id", "p-1")])])
}

/// Provider with one account per fixture profile plus one that matches none.
pub fn provider() -> MemoryIdentityProvider {
	MemoryIdentityProvider::new()
		.with_account("admin@example.com", PASSWORD, "sub-admin")
		.with_account("teacher@example.com", PASSWORD, "sub-teach")
		.with_account("parent@example.com", PASSWORD, "sub-parent")
		.with_account("nobody@example.com", PASSWORD, "sub-nobody")
}

pub fn config() -> SyncConfig {
	SyncConfig {
		fetch_timeout_ms: 2_000,
		refresh_timeout_ms: 2_000,
		..SyncConfig::default()
	}
}

pub fn start(provider: &MemoryIdentityProvider, store: SharedStore) -> SyncEngine {
	SyncEngine::start(config(), Arc::new(provider.clone()), store).expect("valid config")
}

pub async fn settled(engine: &SyncEngine) {
	tokio::time::timeout(Duration::from_secs(5), engine.wait_settled())
		.await
		.expect("engine did not settle");
}

pub fn ids(rows: &[Record]) -> Vec<String> {
	rows.iter().filter_map(|r| r.id().map(str::to_owned)).collect()
}

pub fn record_id(id: &str) -> RecordId {
	RecordId::new(id)
}

struct Hold {
	remaining: usize,
	gate: Arc<Semaphore>,
}

/// Store that parks selected queries until released.
///
/// A held query reads its rows first and parks afterwards, so the result it
/// eventually returns reflects the table as it was when the query started.
pub struct GatedStore {
	inner: MemoryStore,
	holds: Mutex<HashMap<String, Hold>>,
	parked: watch::Sender<usize>,
}

impl GatedStore {
	pub fn new(inner: MemoryStore) -> Self {
		let (parked, _) = watch::channel(0);
		Self {
			inner,
			holds: Mutex::new(HashMap::new()),
			parked,
		}
	}

	pub fn memory(&self) -> &MemoryStore {
		&self.inner
	}

	/// Parks the next `count` queries against `table`.
	pub fn hold(&self, table: &str, count: usize) {
		self.holds.lock().insert(
			table.to_owned(),
			Hold {
				remaining: count,
				gate: Arc::new(Semaphore::new(0)),
			},
		);
	}

	/// Lets every parked query against `table` finish.
	pub fn release(&self, table: &str) {
		if let Some(hold) = self.holds.lock().remove(table) {
			hold.gate.close();
		}
	}

	/// Waits until at least `count` queries have parked in total.
	pub async fn wait_parked(&self, count: usize) {
		let mut rx = self.parked.subscribe();
		tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|n| *n >= count))
			.await
			.expect("query never parked")
			.expect("parked counter dropped");
	}
}

#[async_trait]
impl RecordStore for GatedStore {
	async fn query(&self, query: &Query) -> Result<Collection, StoreError> {
		let gate = {
			let mut holds = self.holds.lock();
			match holds.get_mut(&query.table) {
				Some(hold) if hold.remaining > 0 => {
					hold.remaining -= 1;
					Some(Arc::clone(&hold.gate))
				}
				_ => None,
			}
		};
		let rows = self.inner.query(query).await;
		if let Some(gate) = gate {
			self.parked.send_modify(|n| *n += 1);
			// A closed gate means released.
			let _ = gate.acquire().await;
		}
		rows
	}

	async fn insert(&self, table: &str, record: Record) -> Result<Record, StoreError> {
		self.inner.insert(table, record).await
	}

	async fn update(&self, table: &str, id: &RecordId, patch: Record) -> Result<Record, StoreError> {
		self.inner.update(table, id, patch).await
	}

	async fn delete(&self, table: &str, id: &RecordId) -> Result<(), StoreError> {
		self.inner.delete(table, id).await
	}
}

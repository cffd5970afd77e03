//! Record store client contract.
//!
//! The record store is the remote CRUD backend every console page reads and
//! writes. The sync engine only depends on [`RecordStore`]; [`MemoryStore`]
//! is the in-process implementation used by tests and the demo binary.

use std::sync::Arc;

use async_trait::async_trait;
use carebase_primitives::{Collection, Query, Record, RecordId};
use thiserror::Error;

mod memory;

pub use memory::{MemoryStore, TableStats};

/// Errors reported by a record store call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
	/// No row matched. For lookups this is a valid negative answer.
	#[error("no row found in {table}{}", .id.as_ref().map(|id| format!(" with id {id}")).unwrap_or_default())]
	NotFound {
		/// Table that was queried.
		table: String,
		/// Row id, when the call addressed a single row.
		id: Option<String>,
	},

	/// A row with the same primary key already exists.
	#[error("row {id} already exists in {table}")]
	Conflict { table: String, id: String },

	/// The backend refused the call (permissions, constraint violation).
	#[error("{table}: {reason}")]
	Rejected { table: String, reason: String },

	/// The backend could not be reached or failed internally.
	#[error("record store unavailable: {0}")]
	Unavailable(String),
}

impl StoreError {
	pub fn is_not_found(&self) -> bool {
		matches!(self, Self::NotFound { .. })
	}
}

/// Result type for record store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Request/response CRUD interface to the record store.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
	/// Returns every row of `query.table` matching its filters, ordered and limited.
	async fn query(&self, query: &Query) -> Result<Collection>;

	/// Inserts a row, assigning an `id` when the record has none. Returns the stored row.
	async fn insert(&self, table: &str, record: Record) -> Result<Record>;

	/// Merges `patch` into the row with `id`. Returns the updated row.
	async fn update(&self, table: &str, id: &RecordId, patch: Record) -> Result<Record>;

	/// Deletes the row with `id`.
	async fn delete(&self, table: &str, id: &RecordId) -> Result<()>;
}

/// Shared handle to a record store.
pub type SharedStore = Arc<dyn RecordStore>;

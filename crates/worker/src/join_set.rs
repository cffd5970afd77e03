use std::future::Future;

use tokio::task::{JoinError, JoinSet};
use tracing::Instrument;

use crate::TaskClass;

/// Classified wrapper around a Tokio [`JoinSet`].
///
/// Every task runs inside a `worker.task` span carrying the set's class.
#[derive(Debug)]
pub struct WorkerJoinSet<T> {
	class: TaskClass,
	inner: JoinSet<T>,
}

impl<T> WorkerJoinSet<T>
where
	T: Send + 'static,
{
	/// Creates an empty set for tasks of `class`.
	pub fn new(class: TaskClass) -> Self {
		Self { class, inner: JoinSet::new() }
	}

	/// Returns the number of tasks currently in the set.
	pub fn len(&self) -> usize {
		self.inner.len()
	}

	/// Returns true when the set has no tasks.
	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	/// Spawns a future into the set on the ambient runtime.
	pub fn spawn<F>(&mut self, fut: F)
	where
		F: Future<Output = T> + Send + 'static,
	{
		tracing::trace!(worker_class = self.class.as_str(), pending = self.inner.len(), "worker.join_set.spawn");
		self.inner.spawn(fut.instrument(crate::spawn::task_span(self.class)));
	}

	/// Waits for the next completed task. `None` once the set is empty.
	pub async fn join_next(&mut self) -> Option<Result<T, JoinError>> {
		self.inner.join_next().await
	}

	/// Aborts every task still in the set.
	pub fn abort_all(&mut self) {
		self.inner.abort_all();
	}
}

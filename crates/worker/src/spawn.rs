use std::future::Future;

use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::TaskClass;

/// Spawns `fut` on the ambient Tokio runtime inside a `worker.task` span
/// tagged with `class`.
///
/// # Panics
///
/// Panics when called outside a Tokio runtime.
#[allow(clippy::disallowed_methods)]
pub fn spawn<F>(class: TaskClass, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(worker_class = class.as_str(), "worker.spawn");
	tokio::spawn(fut.instrument(task_span(class)))
}

pub(crate) fn task_span(class: TaskClass) -> tracing::Span {
	tracing::debug_span!("worker.task", class = class.as_str())
}

//! Keyed latest-wins execution gate.
//!
//! At most one job per key runs at a time. Requests arriving while a job for
//! the same key is running do not start a second job: they replace the queued
//! follow-up job (newest request wins) and wait for the first run that started
//! *after* they were issued. Nobody observes a result computed from a job that
//! began before their request.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::TaskClass;

type Job<V> = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = V> + Send>> + Send>;

/// Failure of the gate itself, as opposed to a failure reported by a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoalesceError {
	/// The job panicked or its task was aborted.
	JobFailed(String),
	/// The driver for this key went away before publishing a result.
	Closed,
}

impl fmt::Display for CoalesceError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::JobFailed(msg) => write!(f, "coalesced job failed: {msg}"),
			Self::Closed => write!(f, "coalesced job driver closed"),
		}
	}
}

impl std::error::Error for CoalesceError {}

/// Result published for one completed run: the highest ticket it covers.
type Published<V> = Option<(u64, Result<V, CoalesceError>)>;

struct Slot<V> {
	/// Last ticket handed out for this key.
	requested: u64,
	/// Job for the newest request not yet picked up by the driver.
	pending: Option<Job<V>>,
	running: bool,
	results: watch::Sender<Published<V>>,
}

impl<V> Slot<V> {
	fn new() -> Self {
		let (results, _) = watch::channel(None);
		Self {
			requested: 0,
			pending: None,
			running: false,
			results,
		}
	}
}

/// Keyed single-flight gate with rerun-on-request semantics.
pub struct CoalesceGate<K, V> {
	class: TaskClass,
	slots: Arc<Mutex<HashMap<K, Slot<V>>>>,
}

impl<K, V> Clone for CoalesceGate<K, V> {
	fn clone(&self) -> Self {
		Self {
			class: self.class,
			slots: Arc::clone(&self.slots),
		}
	}
}

impl<K, V> CoalesceGate<K, V>
where
	K: Eq + Hash + Clone + fmt::Debug + Send + 'static,
	V: Clone + Send + Sync + 'static,
{
	pub fn new(class: TaskClass) -> Self {
		Self {
			class,
			slots: Arc::new(Mutex::new(HashMap::new())),
		}
	}

	/// Requests a run of `job` for `key` and waits for the first run that
	/// started after this request.
	///
	/// The job executes on a detached worker task, so dropping the returned
	/// future does not strand later callers for the same key.
	pub async fn run<F, Fut>(&self, key: K, job: F) -> Result<V, CoalesceError>
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = V> + Send + 'static,
	{
		let boxed: Job<V> = Box::new(move || Box::pin(job()));
		let (ticket, mut rx, start_driver) = {
			let mut slots = self.slots.lock();
			let slot = slots.entry(key.clone()).or_insert_with(Slot::new);
			slot.requested = slot.requested.wrapping_add(1);
			let coalesced = slot.pending.replace(boxed).is_some();
			let start_driver = !slot.running;
			slot.running = true;
			tracing::trace!(key = ?key, ticket = slot.requested, coalesced, start_driver, "worker.coalesce.request");
			(slot.requested, slot.results.subscribe(), start_driver)
		};

		if start_driver {
			let gate = self.clone();
			let driver_key = key.clone();
			crate::spawn(self.class, async move { gate.drive(driver_key).await });
		}

		let published = rx
			.wait_for(|published| matches!(published, Some((covered, _)) if *covered >= ticket))
			.await
			.map_err(|_| CoalesceError::Closed)?;
		match &*published {
			Some((_, result)) => result.clone(),
			None => Err(CoalesceError::Closed),
		}
	}

	/// Returns true while a job for `key` is running or queued.
	pub fn is_busy(&self, key: &K) -> bool {
		self.slots.lock().get(key).is_some_and(|slot| slot.running)
	}

	async fn drive(&self, key: K) {
		loop {
			let (job, target) = {
				let mut slots = self.slots.lock();
				let Some(slot) = slots.get_mut(&key) else {
					return;
				};
				match slot.pending.take() {
					Some(job) => (job, slot.requested),
					None => {
						slot.running = false;
						return;
					}
				}
			};

			let result = match crate::spawn(self.class, job()).await {
				Ok(value) => Ok(value),
				Err(err) => Err(CoalesceError::JobFailed(
					crate::join_error_panic_message(err).unwrap_or_else(|| "job cancelled".to_owned()),
				)),
			};
			tracing::trace!(key = ?key, covered = target, ok = result.is_ok(), "worker.coalesce.published");

			let slots = self.slots.lock();
			if let Some(slot) = slots.get(&key) {
				slot.results.send_replace(Some((target, result)));
			}
		}
	}
}

//! Concurrent fetch orchestration.
//!
//! Every descriptor of a plan runs on its own task. Completions are written
//! back as they arrive, in whatever order they finish, and a failed or timed
//! out descriptor never cancels or delays the others. Writes are tagged with
//! the plan's generation so results of a superseded generation are dropped
//! by the state store.
//!
//! At most one fetch per resource is in flight. Starting a fetch for a
//! resource (a plan entry or a refresh) cancels the one it supersedes, and
//! the state store rejects any result of an older request that still lands.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use carebase_primitives::{Collection, Generation};
use parking_lot::Mutex;
use carebase_store::StoreError;
use carebase_worker::{GenerationToken, TaskClass, WorkerJoinSet};

use crate::error::ResourceFetchError;
use crate::notify::Notifier;
use crate::plan::{FetchPlan, ResourceDescriptor};
use crate::state::{MergeOutcome, SliceRequest, SliceUpdate, StateStore};

/// What happened to one plan run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanReport {
	pub generation: Generation,
	/// Resources whose fresh data was written.
	pub loaded: Vec<String>,
	/// Resources whose failure was recorded on their slice.
	pub failed: Vec<String>,
	/// Resources whose result was dropped because the generation was superseded.
	pub discarded: Vec<String>,
	/// True when this run flipped the global loading flag off.
	pub settled: bool,
}

/// Outcome of refreshing a single descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
	/// Fresh rows were written to the slice.
	Applied { rows: usize },
	/// The generation moved on before the refresh finished; nothing was written.
	Discarded,
}

#[derive(Clone)]
pub struct FetchOrchestrator {
	state: Arc<StateStore>,
	notifier: Notifier,
	fetch_timeout: Duration,
	/// Newest in-flight request per resource and the token that cancels it.
	running: Arc<Mutex<HashMap<String, (SliceRequest, GenerationToken)>>>,
}

impl FetchOrchestrator {
	pub fn new(state: Arc<StateStore>, notifier: Notifier, fetch_timeout: Duration) -> Self {
		Self {
			state,
			notifier,
			fetch_timeout,
			running: Arc::default(),
		}
	}

	/// Runs every descriptor of `plan` concurrently for `token`'s generation
	/// and settles the generation once all of them have completed.
	#[tracing::instrument(skip_all, fields(generation = token.generation(), role = ?plan.role(), resources = plan.len()))]
	pub async fn run(&self, plan: &FetchPlan, token: GenerationToken) -> PlanReport {
		let generation = Generation::new(token.generation());
		let mut report = PlanReport {
			generation,
			..PlanReport::default()
		};

		let mut tasks = WorkerJoinSet::new(TaskClass::Fetch);
		for descriptor in plan.iter() {
			let Some((request, token)) = self.begin(generation, descriptor.name(), &token) else {
				report.discarded.push(descriptor.name().to_owned());
				continue;
			};
			let fetch = descriptor.fetch();
			let timeout = self.fetch_timeout;
			tracing::debug!(resource = descriptor.name(), seq = request.seq(), "sync.fetch.start");
			tasks.spawn(async move {
				let result = fetch_with_deadline(request.name(), fetch, timeout, &token).await;
				(request, result)
			});
		}

		while let Some(joined) = tasks.join_next().await {
			let Ok((request, result)) = joined else {
				// fetch_with_deadline contains panics of the fetch itself.
				continue;
			};
			let recorded = self.record(&request, result, "fetch");
			self.finish(&request);
			let name = request.name().to_owned();
			match recorded {
				Recorded::Loaded(_) => report.loaded.push(name),
				Recorded::Failed => report.failed.push(name),
				Recorded::Discarded => report.discarded.push(name),
			}
		}

		report.settled = !token.is_cancelled() && self.state.settle(generation);
		if report.settled {
			tracing::info!(
				loaded = report.loaded.len(),
				failed = report.failed.len(),
				discarded = report.discarded.len(),
				"sync.plan.settled"
			);
		} else {
			tracing::debug!(discarded = report.discarded.len(), "sync.plan.superseded");
		}
		report
	}

	/// Re-runs one descriptor for `token`'s generation and writes the result.
	///
	/// Supersedes any fetch of the same resource still in flight, so rows
	/// read before the refresh started can no longer overwrite its result.
	#[tracing::instrument(skip_all, fields(generation = token.generation(), resource = descriptor.name()))]
	pub async fn refresh(&self, descriptor: &ResourceDescriptor, token: GenerationToken, timeout: Duration) -> Result<RefreshOutcome, ResourceFetchError> {
		let generation = Generation::new(token.generation());
		let name = descriptor.name();
		let Some((request, token)) = self.begin(generation, name, &token) else {
			return Ok(RefreshOutcome::Discarded);
		};

		let result = fetch_with_deadline(name, descriptor.fetch(), timeout, &token).await;
		let failure = result.as_ref().err().cloned();
		let recorded = self.record(&request, result, "refresh");
		self.finish(&request);
		match recorded {
			Recorded::Loaded(rows) => Ok(RefreshOutcome::Applied { rows }),
			Recorded::Discarded => Ok(RefreshOutcome::Discarded),
			Recorded::Failed => Err(failure.unwrap_or_else(|| ResourceFetchError::Cancelled { resource: name.to_owned() })),
		}
	}

	/// Opens a new request for `name` and cancels the one it supersedes.
	///
	/// `None` when the generation is no longer current or the plan has no
	/// such slice.
	fn begin(&self, generation: Generation, name: &str, parent: &GenerationToken) -> Option<(SliceRequest, GenerationToken)> {
		// Held across begin_request so the map and the slice agree on the newest request.
		let mut running = self.running.lock();
		let request = self.state.begin_request(generation, name).ok()?;
		let token = parent.child();
		if let Some((previous, cancel)) = running.insert(name.to_owned(), (request.clone(), token.clone())) {
			tracing::debug!(resource = name, seq = previous.seq(), "sync.fetch.superseded");
			cancel.cancel();
		}
		Some((request, token))
	}

	fn finish(&self, request: &SliceRequest) {
		let mut running = self.running.lock();
		if running.get(request.name()).is_some_and(|(current, _)| current == request) {
			running.remove(request.name());
		}
	}

	fn record(&self, request: &SliceRequest, result: Result<Collection, ResourceFetchError>, kind: &str) -> Recorded {
		let name = request.name();
		match result {
			Ok(rows) => {
				let count = rows.len();
				match self.state.merge_slice(request, SliceUpdate::Loaded(rows)) {
					MergeOutcome::Applied => {
						tracing::debug!(resource = name, rows = count, "sync.fetch.loaded");
						Recorded::Loaded(count)
					}
					_ => {
						tracing::debug!(resource = name, "sync.fetch.discarded");
						Recorded::Discarded
					}
				}
			}
			Err(err @ ResourceFetchError::Cancelled { .. }) => {
				// Clears the loading flag when nothing newer owns the slice. Never notified.
				let outcome = self.state.merge_slice(request, SliceUpdate::Failed(err));
				tracing::debug!(resource = name, ?outcome, "sync.fetch.cancelled");
				Recorded::Discarded
			}
			Err(err) => {
				let message = err.to_string();
				match self.state.merge_slice(request, SliceUpdate::Failed(err)) {
					MergeOutcome::Applied => {
						tracing::warn!(resource = name, error = %message, "sync.fetch.failed");
						self.notifier.warn(format!("{kind}:{name}"), message);
						Recorded::Failed
					}
					_ => {
						tracing::debug!(resource = name, error = %message, "sync.fetch.discarded");
						Recorded::Discarded
					}
				}
			}
		}
	}
}

enum Recorded {
	Loaded(usize),
	Failed,
	Discarded,
}

/// Runs `fetch` on its own task, bounded by `timeout` and by `token`.
///
/// Panics, timeouts, and cancellation all come back as a
/// [`ResourceFetchError`]; the fetch task is aborted when it loses.
async fn fetch_with_deadline(
	name: &str,
	fetch: carebase_primitives::BoxFutureStatic<Result<Collection, StoreError>>,
	timeout: Duration,
	token: &GenerationToken,
) -> Result<Collection, ResourceFetchError> {
	let mut task = carebase_worker::spawn(TaskClass::Fetch, fetch);
	tokio::select! {
		biased;
		_ = token.cancelled() => {
			task.abort();
			Err(ResourceFetchError::Cancelled { resource: name.to_owned() })
		}
		joined = tokio::time::timeout(timeout, &mut task) => match joined {
			Err(_elapsed) => {
				task.abort();
				Err(ResourceFetchError::Timeout {
					resource: name.to_owned(),
					after_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
				})
			}
			Ok(Ok(Ok(rows))) => Ok(rows),
			Ok(Ok(Err(source))) => Err(ResourceFetchError::Store {
				resource: name.to_owned(),
				source,
			}),
			Ok(Err(join)) => Err(ResourceFetchError::Panicked {
				resource: name.to_owned(),
				message: carebase_worker::join_error_panic_message(join).unwrap_or_else(|| "fetch task aborted".to_owned()),
			}),
		},
	}
}

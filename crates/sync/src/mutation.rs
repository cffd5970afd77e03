//! Write-then-refresh coordination.
//!
//! A mutation performs one write against the record store and then refreshes
//! exactly one named resource. The descriptor is looked up from the active
//! plan when the refresh job starts, so it always runs with the current
//! role's query. Refreshes of the same resource are coalesced: at most one
//! runs at a time, and every caller observes a run that began after its own
//! request.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use carebase_primitives::Generation;
use carebase_store::{SharedStore, StoreError};
use carebase_worker::{CoalesceGate, GenerationToken, TaskClass};

use crate::error::{MutationError, RefreshError};
use crate::notify::Notifier;
use crate::orchestrator::{FetchOrchestrator, RefreshOutcome};
use crate::plan::FetchPlan;

/// The committed generation's plan and cancellation token.
#[derive(Debug, Clone)]
pub struct ActivePlan {
	pub generation: Generation,
	pub plan: Arc<FetchPlan>,
	pub token: GenerationToken,
}

impl ActivePlan {
	/// Placeholder installed before the first commit.
	pub fn boot() -> Self {
		Self {
			generation: Generation::BOOT,
			plan: Arc::new(FetchPlan::empty()),
			token: GenerationToken::root(Generation::BOOT.get()),
		}
	}
}

/// Result of a mutation whose write succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome<T> {
	/// Whatever the write returned.
	pub value: T,
	/// How the follow-up refresh went. A failure here does not undo the write.
	pub refresh: Result<RefreshOutcome, RefreshError>,
}

type RefreshResult = Result<RefreshOutcome, RefreshError>;

#[derive(Clone)]
pub struct MutationCoordinator {
	store: SharedStore,
	active: Arc<ArcSwap<ActivePlan>>,
	orchestrator: FetchOrchestrator,
	notifier: Notifier,
	refresh_timeout: Duration,
	gate: CoalesceGate<String, RefreshResult>,
}

impl MutationCoordinator {
	pub fn new(
		store: SharedStore,
		active: Arc<ArcSwap<ActivePlan>>,
		orchestrator: FetchOrchestrator,
		notifier: Notifier,
		refresh_timeout: Duration,
	) -> Self {
		Self {
			store,
			active,
			orchestrator,
			notifier,
			refresh_timeout,
			gate: CoalesceGate::new(TaskClass::Refresh),
		}
	}

	/// Runs `write`, then refreshes `resource`.
	///
	/// Nothing is written when `resource` is not part of the current plan.
	/// A failed write is returned as-is and no refresh is attempted.
	pub async fn perform<T, W, Fut>(&self, resource: &str, write: W) -> Result<MutationOutcome<T>, MutationError>
	where
		W: FnOnce(SharedStore) -> Fut,
		Fut: Future<Output = Result<T, StoreError>>,
	{
		if !self.active.load().plan.contains(resource) {
			let err = MutationError::NotInPlan { resource: resource.to_owned() };
			self.notifier.error(format!("mutation:{resource}"), err.to_string());
			return Err(err);
		}

		let value = write(Arc::clone(&self.store)).await.map_err(|source| {
			let err = MutationError::Write {
				resource: resource.to_owned(),
				source,
			};
			tracing::warn!(resource, error = %err, "sync.mutation.write_failed");
			self.notifier.error(format!("mutation:{resource}"), err.to_string());
			err
		})?;

		let refresh = self.refresh(resource).await;
		match &refresh {
			Ok(outcome) => tracing::debug!(resource, ?outcome, "sync.mutation.refreshed"),
			Err(err) => {
				tracing::warn!(resource, error = %err, "sync.mutation.refresh_failed");
				self.notifier.warn(format!("refresh:{resource}"), err.to_string());
			}
		}
		Ok(MutationOutcome { value, refresh })
	}

	/// Requests a refresh of `resource` and waits for a run that started
	/// after this call.
	pub async fn refresh(&self, resource: &str) -> RefreshResult {
		let this = self.clone();
		let name = resource.to_owned();
		let job = move || async move { this.refresh_now(&name).await };
		self.gate.run(resource.to_owned(), job).await.unwrap_or_else(|err| {
			Err(RefreshError::Lost {
				resource: resource.to_owned(),
				reason: err.to_string(),
			})
		})
	}

	/// Refreshes `name` against whatever plan is active right now.
	async fn refresh_now(&self, name: &str) -> RefreshResult {
		let active = self.active.load_full();
		let Some(descriptor) = active.plan.get(name) else {
			tracing::debug!(resource = name, generation = %active.generation, "sync.refresh.not_in_plan");
			return Ok(RefreshOutcome::Discarded);
		};
		let outcome = self.orchestrator.refresh(descriptor, active.token.child(), self.refresh_timeout).await?;
		Ok(outcome)
	}
}

#[cfg(test)]
mod tests {
	use carebase_primitives::{Record, RecordId, ResolvedIdentity, Role};
	use carebase_store::{MemoryStore, RecordStore};
	use pretty_assertions::assert_eq;

	use super::*;
	use crate::plan::FetchPlanBuilder;
	use crate::state::StateStore;

	struct Fixture {
		store: MemoryStore,
		state: Arc<StateStore>,
		coordinator: MutationCoordinator,
	}

	fn fixture() -> Fixture {
		let store = MemoryStore::new().with_rows("children", [Record::new().with("id", "c1").with("last_name", "Ada")]);
		let shared: SharedStore = Arc::new(store.clone());
		let state = Arc::new(StateStore::new());
		let notifier = Notifier::new(16);
		let identity = ResolvedIdentity::staff(Role::Assistant, RecordId::new("st-1"), "Ari");
		let plan = FetchPlanBuilder::new(Arc::clone(&shared)).build(&identity);
		let generation = Generation::new(1);
		state.replace_identity(generation, identity, plan.names().map(str::to_owned).collect::<Vec<_>>());
		let active = Arc::new(ArcSwap::from_pointee(ActivePlan {
			generation,
			plan: Arc::new(plan),
			token: GenerationToken::root(generation.get()),
		}));
		let orchestrator = FetchOrchestrator::new(Arc::clone(&state), notifier.clone(), Duration::from_secs(5));
		let coordinator = MutationCoordinator::new(shared, active, orchestrator, notifier, Duration::from_secs(5));
		Fixture { store, state, coordinator }
	}

	#[tokio::test]
	async fn write_then_refresh_updates_the_slice() {
		let fx = fixture();
		let outcome = fx
			.coordinator
			.perform("children", |store| async move {
				store.insert("children", Record::new().with("id", "c2").with("last_name", "Bea")).await
			})
			.await
			.unwrap();
		assert_eq!(outcome.value.id(), Some("c2"));
		assert_eq!(outcome.refresh, Ok(RefreshOutcome::Applied { rows: 2 }));
		assert_eq!(fx.state.snapshot().slice("children").unwrap().data.len(), 2);
	}

	#[tokio::test]
	async fn failed_write_skips_the_refresh() {
		let fx = fixture();
		fx.store.fail_writes("children", StoreError::Rejected {
			table: "children".into(),
			reason: "read only".into(),
		});
		let err = fx
			.coordinator
			.perform("children", |store| async move { store.delete("children", &RecordId::new("c1")).await })
			.await
			.unwrap_err();
		assert!(matches!(err, MutationError::Write { .. }));
		assert_eq!(fx.store.stats("children").queries, 0);
	}

	#[tokio::test]
	async fn refresh_failure_keeps_the_write() {
		let fx = fixture();
		fx.store.fail_queries("children", StoreError::Unavailable("flaky".into()));
		let outcome = fx
			.coordinator
			.perform("children", |store| async move { store.insert("children", Record::new().with("id", "c9")).await })
			.await
			.unwrap();
		assert!(matches!(outcome.refresh, Err(RefreshError::Fetch(_))));
		assert_eq!(fx.store.rows("children").len(), 2);
	}

	#[tokio::test]
	async fn resources_outside_the_plan_are_refused_before_writing() {
		let fx = fixture();
		let err = fx
			.coordinator
			.perform("payroll", |store| async move { store.insert("payroll", Record::new()).await })
			.await
			.unwrap_err();
		assert_eq!(err, MutationError::NotInPlan { resource: "payroll".into() });
		assert!(fx.store.rows("payroll").is_empty());
	}
}

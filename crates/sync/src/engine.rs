//! The engine facade and its session pipeline.
//!
//! One pipeline task consumes the session watcher's ordered channel. Each
//! event gets a fresh generation and is resolved into an identity; a newer
//! event arriving mid-resolution preempts the older one. A successful
//! resolution commits identity and empty slices, cancels the previous
//! generation's token, and spawns the plan's orchestration without waiting
//! for it.

use std::future::Future;
use std::sync::Arc;

use arc_swap::ArcSwap;
use carebase_identity::{AuthError, SessionWatcher, SharedProvider, WatchItem};
use carebase_primitives::{AuthAction, Generation, ResolvedIdentity};
use carebase_store::{SharedStore, StoreError};
use carebase_worker::{GenerationClock, GenerationToken, TaskClass};
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, SyncConfig};
use crate::error::{MutationError, SessionError};
use crate::mutation::{ActivePlan, MutationCoordinator, MutationOutcome};
use crate::notify::{Notification, Notifier};
use crate::orchestrator::FetchOrchestrator;
use crate::plan::{FetchPlan, FetchPlanBuilder};
use crate::resolve::RoleResolver;
use crate::state::{ApplicationState, StateStore};

/// What the pipeline is doing, as seen by the facade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PipelineStatus {
	/// An event is being resolved or is queued behind the current one.
	busy: bool,
	/// Access token of the last session event taken off the channel.
	last_token: Option<String>,
}

/// Cloneable handle to a running sync engine.
#[derive(Clone)]
pub struct SyncEngine {
	inner: Arc<Inner>,
}

struct Inner {
	config: SyncConfig,
	provider: SharedProvider,
	state: Arc<StateStore>,
	notifier: Notifier,
	active: Arc<ArcSwap<ActivePlan>>,
	mutations: MutationCoordinator,
	status: watch::Receiver<PipelineStatus>,
	shutdown: CancellationToken,
	watcher: SessionWatcher,
}

impl Drop for Inner {
	fn drop(&mut self) {
		self.shutdown.cancel();
	}
}

impl SyncEngine {
	/// Validates `config`, starts the session watcher, and spawns the pipeline.
	///
	/// Must be called from within a Tokio runtime.
	pub fn start(config: SyncConfig, provider: SharedProvider, store: SharedStore) -> Result<Self, ConfigError> {
		config.validate()?;

		let state = Arc::new(StateStore::new());
		let notifier = Notifier::new(config.notification_buffer);
		let active = Arc::new(ArcSwap::from_pointee(ActivePlan::boot()));
		let orchestrator = FetchOrchestrator::new(Arc::clone(&state), notifier.clone(), config.fetch_timeout());
		let mutations = MutationCoordinator::new(
			Arc::clone(&store),
			Arc::clone(&active),
			orchestrator.clone(),
			notifier.clone(),
			config.refresh_timeout(),
		);
		let (status_tx, status_rx) = watch::channel(PipelineStatus {
			busy: true,
			last_token: None,
		});
		let shutdown = CancellationToken::new();
		let (watcher, events) = SessionWatcher::spawn(Arc::clone(&provider), config.event_buffer);

		let pipeline = Pipeline {
			resolver: RoleResolver::new(Arc::clone(&store)),
			builder: FetchPlanBuilder::new(store),
			orchestrator,
			state: Arc::clone(&state),
			notifier: notifier.clone(),
			active: Arc::clone(&active),
			clock: GenerationClock::new(),
			status: status_tx,
			shutdown: shutdown.clone(),
		};
		carebase_worker::spawn(TaskClass::Pipeline, pipeline.run(events));
		tracing::info!(?config, "sync.engine.started");

		Ok(Self {
			inner: Arc::new(Inner {
				config,
				provider,
				state,
				notifier,
				active,
				mutations,
				status: status_rx,
				shutdown,
				watcher,
			}),
		})
	}

	/// Current state snapshot.
	pub fn application_state(&self) -> Arc<ApplicationState> {
		self.inner.state.snapshot()
	}

	/// Receiver that changes whenever the application state does.
	pub fn subscribe(&self) -> watch::Receiver<u64> {
		self.inner.state.subscribe()
	}

	pub fn notifications(&self) -> broadcast::Receiver<Notification> {
		self.inner.notifier.subscribe()
	}

	/// Runs `write` against the record store, then refreshes `resource`.
	pub async fn perform_mutation<T, W, Fut>(&self, resource: &str, write: W) -> Result<MutationOutcome<T>, MutationError>
	where
		W: FnOnce(SharedStore) -> Fut,
		Fut: Future<Output = Result<T, StoreError>>,
	{
		self.inner.mutations.perform(resource, write).await
	}

	/// Forwards `action` to the identity provider.
	///
	/// State is never written here: the provider's resulting session event
	/// flows through the pipeline like any other. On success this returns
	/// once the pipeline has picked that event up.
	pub async fn dispatch_auth_action(&self, action: AuthAction) -> Result<(), AuthError> {
		let kind = action.as_str();
		let provider = &self.inner.provider;
		let result = match &action {
			AuthAction::SignIn(credentials) => provider.sign_in(credentials).await.map(|s| Some(s.access_token)),
			AuthAction::SignUp(credentials) => provider.sign_up(credentials).await.map(|s| Some(s.access_token)),
			AuthAction::SignOut => provider.sign_out().await.map(|()| None),
		};

		match result {
			Ok(expected) => {
				tracing::info!(action = kind, "sync.auth.accepted");
				self.await_pickup(expected).await;
				Ok(())
			}
			Err(err) => {
				tracing::warn!(action = kind, error = %err, "sync.auth.failed");
				self.inner.notifier.error("auth", err.to_string());
				Err(err)
			}
		}
	}

	async fn await_pickup(&self, expected: Option<String>) {
		let mut status = self.inner.status.clone();
		let picked_up = tokio::time::timeout(self.inner.config.fetch_timeout(), status.wait_for(|s| s.last_token == expected))
			.await
			.is_ok_and(|seen| seen.is_ok());
		if !picked_up {
			tracing::debug!("sync.auth.pickup_not_observed");
		}
	}

	/// Resolves once no session event is pending and the current generation
	/// has settled. Also resolves if the pipeline has stopped.
	pub async fn wait_settled(&self) {
		let mut status = self.inner.status.clone();
		let mut revisions = self.inner.state.subscribe();
		loop {
			let busy = status.borrow_and_update().busy;
			if !busy && !self.inner.state.snapshot().is_loading {
				return;
			}
			tokio::select! {
				changed = status.changed() => if changed.is_err() { return },
				changed = revisions.changed() => if changed.is_err() { return },
			}
		}
	}

	/// Stops the watcher and pipeline and cancels in-flight fetches.
	pub fn shutdown(&self) {
		tracing::info!("sync.engine.shutdown");
		self.inner.shutdown.cancel();
		self.inner.watcher.stop();
		self.inner.active.load().token.cancel();
	}
}

enum Flow {
	Done,
	Preempted(WatchItem),
	Shutdown,
}

struct Pipeline {
	resolver: RoleResolver,
	builder: FetchPlanBuilder,
	orchestrator: FetchOrchestrator,
	state: Arc<StateStore>,
	notifier: Notifier,
	active: Arc<ArcSwap<ActivePlan>>,
	clock: GenerationClock,
	status: watch::Sender<PipelineStatus>,
	shutdown: CancellationToken,
}

impl Pipeline {
	async fn run(self, mut events: mpsc::Receiver<WatchItem>) {
		let mut pending = None;
		loop {
			let item = match pending.take() {
				Some(item) => item,
				None => {
					if events.is_empty() {
						self.status.send_if_modified(|s| std::mem::replace(&mut s.busy, false));
					}
					tokio::select! {
						biased;
						_ = self.shutdown.cancelled() => break,
						next = events.recv() => match next {
							Some(item) => item,
							None => break,
						},
					}
				}
			};

			let token = item.as_ref().ok().and_then(|ev| ev.session.as_ref()).map(|s| s.access_token.clone());
			self.status.send_modify(|s| {
				s.busy = true;
				s.last_token = token;
			});

			match self.handle(item, &mut events).await {
				Flow::Done => {}
				Flow::Preempted(newer) => pending = Some(newer),
				Flow::Shutdown => break,
			}
		}
		self.active.load().token.cancel();
		tracing::debug!("sync.pipeline.stopped");
	}

	async fn handle(&self, item: WatchItem, events: &mut mpsc::Receiver<WatchItem>) -> Flow {
		let generation = Generation::new(self.clock.next());
		let event = match item {
			Ok(event) => event,
			Err(err) => {
				self.fail_session(generation, SessionError::Provider(err));
				return Flow::Done;
			}
		};
		if let Some(session) = event.session.as_ref().filter(|s| s.is_expired_at(Utc::now())) {
			let subject = session.subject_id.clone();
			self.fail_session(generation, SessionError::Expired { subject });
			return Flow::Done;
		}
		tracing::debug!(%generation, kind = ?event.kind, initial = event.initial, "sync.pipeline.event");

		let resolve = self.resolver.resolve(event.session.as_ref());
		tokio::pin!(resolve);
		let mut open = true;
		let resolved = loop {
			tokio::select! {
				biased;
				_ = self.shutdown.cancelled() => return Flow::Shutdown,
				newer = events.recv(), if open => match newer {
					Some(newer) => {
						tracing::debug!(%generation, "sync.resolve.preempted");
						return Flow::Preempted(newer);
					}
					None => open = false,
				},
				resolved = &mut resolve => break resolved,
			}
		};

		match resolved {
			Ok(identity) => self.commit(generation, identity),
			Err(err) => {
				tracing::warn!(%generation, error = %err, "sync.resolve.failed");
				self.notifier.error("resolution", err.to_string());
				// Nothing else will ever settle the boot generation.
				if self.state.generation() == Generation::BOOT {
					self.state.settle(Generation::BOOT);
				}
			}
		}
		Flow::Done
	}

	#[tracing::instrument(skip_all, fields(generation = %generation, role = %identity.role))]
	fn commit(&self, generation: Generation, identity: ResolvedIdentity) {
		let plan = self.builder.build(&identity);
		let resources: Vec<String> = plan.names().map(str::to_owned).collect();
		if !self.state.replace_identity(generation, identity, resources) {
			return;
		}
		tracing::info!(resources = plan.len(), "sync.generation.committed");
		self.activate(generation, plan);
	}

	fn fail_session(&self, generation: Generation, err: SessionError) {
		tracing::error!(%generation, error = %err, "sync.session.failed");
		self.notifier.error("session", err.to_string());
		if self.state.force_signed_out(generation, err) {
			self.activate(generation, FetchPlan::empty());
		}
	}

	/// Makes `plan` the active plan, cancels the previous generation, and
	/// starts orchestration in the background.
	fn activate(&self, generation: Generation, plan: FetchPlan) {
		let active = Arc::new(ActivePlan {
			generation,
			plan: Arc::new(plan),
			token: GenerationToken::root(generation.get()),
		});
		let previous = self.active.swap(Arc::clone(&active));
		previous.token.cancel();

		if active.plan.is_empty() {
			return;
		}
		let orchestrator = self.orchestrator.clone();
		carebase_worker::spawn(TaskClass::Pipeline, async move {
			orchestrator.run(&active.plan, active.token.clone()).await;
		});
	}
}

//! Application state store.
//!
//! Readers take cheap [`Arc`] snapshots. All writes go through
//! [`StateStore::replace_identity`], [`StateStore::begin_request`],
//! [`StateStore::merge_slice`], and [`StateStore::settle`], serialized by one
//! writer lock. Each write publishes a new snapshot and bumps the revision
//! counter.
//!
//! Every fetch of a slice holds a [`SliceRequest`]. Only the newest request
//! of the current generation may write its result, so a plan fetch that is
//! overtaken by a post-mutation refresh can never land on top of it.

use std::sync::Arc;

use arc_swap::ArcSwap;
use carebase_primitives::{Collection, Generation, ResolvedIdentity, Role};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{ResourceFetchError, SessionError};
use crate::scope;

/// Per-resource state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceSlice {
	pub data: Collection,
	pub is_loading: bool,
	pub last_error: Option<ResourceFetchError>,
	/// Sequence number of the newest request issued for this slice.
	request: u64,
}

/// Snapshot of everything the rest of the application reads.
#[derive(Debug, Clone)]
pub struct ApplicationState {
	/// Generation whose identity and slices this snapshot holds.
	pub generation: Generation,
	pub identity: ResolvedIdentity,
	/// One slice per resource of the current plan, in plan order.
	pub slices: IndexMap<String, Arc<ResourceSlice>>,
	/// True until the current generation's plan has settled.
	pub is_loading: bool,
	/// Set when the current generation was forced to signed-out by a session failure.
	pub session_error: Option<SessionError>,
}

impl ApplicationState {
	fn boot() -> Self {
		Self {
			generation: Generation::BOOT,
			identity: ResolvedIdentity::signed_out(),
			slices: IndexMap::new(),
			is_loading: true,
			session_error: None,
		}
	}

	pub fn slice(&self, name: &str) -> Option<&ResourceSlice> {
		self.slices.get(name).map(Arc::as_ref)
	}

	/// Data of `name` as the current identity may see it. Parents only see
	/// their own rows; every other role sees the slice unchanged.
	pub fn scoped(&self, name: &str) -> Option<Collection> {
		let slice = self.slice(name)?;
		Some(match self.identity.role {
			Role::Parent => scope::for_parent(&self.identity, &slice.data),
			_ => slice.data.clone(),
		})
	}
}

/// One fetch of one slice, issued by [`StateStore::begin_request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceRequest {
	generation: Generation,
	name: String,
	seq: u64,
}

impl SliceRequest {
	pub fn generation(&self) -> Generation {
		self.generation
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Position among the requests issued for this slice in this generation.
	pub fn seq(&self) -> u64 {
		self.seq
	}
}

/// Result of a fetch, written back through [`StateStore::merge_slice`].
#[derive(Debug, Clone)]
pub enum SliceUpdate {
	Loaded(Collection),
	/// Keeps the previous data.
	Failed(ResourceFetchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
	Applied,
	/// The update was tagged with a superseded generation and was dropped.
	Stale,
	/// The current plan has no slice by that name.
	Unknown,
	/// A newer request for the same slice was issued; the update was dropped.
	Superseded,
}

/// Single-writer, multi-reader holder of [`ApplicationState`].
pub struct StateStore {
	current: ArcSwap<ApplicationState>,
	writer: Mutex<()>,
	revision: watch::Sender<u64>,
}

impl Default for StateStore {
	fn default() -> Self {
		Self::new()
	}
}

impl StateStore {
	pub fn new() -> Self {
		let (revision, _) = watch::channel(0);
		Self {
			current: ArcSwap::from_pointee(ApplicationState::boot()),
			writer: Mutex::new(()),
			revision,
		}
	}

	pub fn snapshot(&self) -> Arc<ApplicationState> {
		self.current.load_full()
	}

	pub fn generation(&self) -> Generation {
		self.current.load().generation
	}

	/// Receiver that changes on every published write.
	pub fn subscribe(&self) -> watch::Receiver<u64> {
		self.revision.subscribe()
	}

	/// Installs `identity` for `generation` with one empty slice per resource.
	///
	/// Returns false, leaving state untouched, when `generation` is not newer
	/// than the current one. An empty resource list settles the generation on
	/// the spot.
	pub fn replace_identity<I, S>(&self, generation: Generation, identity: ResolvedIdentity, resources: I) -> bool
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let slices = resources.into_iter().map(|name| (name.into(), Arc::new(ResourceSlice::default()))).collect();
		self.commit(generation, identity, slices, None)
	}

	/// Replaces the identity with signed-out for `generation`, recording why.
	pub fn force_signed_out(&self, generation: Generation, error: SessionError) -> bool {
		self.commit(generation, ResolvedIdentity::signed_out(), IndexMap::new(), Some(error))
	}

	fn commit(
		&self,
		generation: Generation,
		identity: ResolvedIdentity,
		slices: IndexMap<String, Arc<ResourceSlice>>,
		session_error: Option<SessionError>,
	) -> bool {
		let _writer = self.writer.lock();
		let current = self.current.load();
		if generation <= current.generation {
			tracing::debug!(%generation, current = %current.generation, "sync.state.commit_stale");
			return false;
		}
		let is_loading = !slices.is_empty();
		self.publish(ApplicationState {
			generation,
			identity,
			slices,
			is_loading,
			session_error,
		});
		true
	}

	/// Marks slice `name` loading and issues a request that supersedes every
	/// earlier request for it.
	///
	/// Fails with [`MergeOutcome::Stale`] or [`MergeOutcome::Unknown`] when
	/// `generation` is not current or its plan has no such slice.
	pub fn begin_request(&self, generation: Generation, name: &str) -> Result<SliceRequest, MergeOutcome> {
		let _writer = self.writer.lock();
		let current = self.current.load_full();
		if current.generation != generation {
			return Err(MergeOutcome::Stale);
		}
		let Some(slice) = current.slices.get(name) else {
			return Err(MergeOutcome::Unknown);
		};

		let mut slice = ResourceSlice::clone(slice);
		slice.request += 1;
		slice.is_loading = true;
		let request = SliceRequest {
			generation,
			name: name.to_owned(),
			seq: slice.request,
		};

		let mut next = ApplicationState::clone(&current);
		next.slices.insert(name.to_owned(), Arc::new(slice));
		self.publish(next);
		Ok(request)
	}

	/// Writes the result of `request` if it is still the newest request of
	/// the current generation.
	pub fn merge_slice(&self, request: &SliceRequest, update: SliceUpdate) -> MergeOutcome {
		let _writer = self.writer.lock();
		let current = self.current.load_full();
		if current.generation != request.generation {
			return MergeOutcome::Stale;
		}
		let Some(slice) = current.slices.get(&request.name) else {
			return MergeOutcome::Unknown;
		};
		if slice.request != request.seq {
			tracing::debug!(resource = %request.name, seq = request.seq, newest = slice.request, "sync.state.superseded");
			return MergeOutcome::Superseded;
		}

		let mut slice = ResourceSlice::clone(slice);
		slice.is_loading = false;
		match update {
			SliceUpdate::Loaded(data) => {
				slice.data = data;
				slice.last_error = None;
			}
			SliceUpdate::Failed(err) => slice.last_error = Some(err),
		}

		let mut next = ApplicationState::clone(&current);
		next.slices.insert(request.name.clone(), Arc::new(slice));
		self.publish(next);
		MergeOutcome::Applied
	}

	/// Clears the global loading flag for `generation`.
	///
	/// Returns true only for the call that actually flipped it.
	pub fn settle(&self, generation: Generation) -> bool {
		let _writer = self.writer.lock();
		let current = self.current.load_full();
		if current.generation != generation || !current.is_loading {
			return false;
		}
		let mut next = ApplicationState::clone(&current);
		next.is_loading = false;
		self.publish(next);
		true
	}

	fn publish(&self, next: ApplicationState) {
		self.current.store(Arc::new(next));
		self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
	}
}

#[cfg(test)]
mod tests {
	use carebase_primitives::{Record, RecordId};
	use pretty_assertions::assert_eq;

	use super::*;

	fn g(n: u64) -> Generation {
		Generation::new(n)
	}

	fn teacher() -> ResolvedIdentity {
		ResolvedIdentity::staff(Role::Teacher, RecordId::new("st-1"), "Tess")
	}

	#[test]
	fn boots_signed_out_and_loading() {
		let store = StateStore::new();
		let state = store.snapshot();
		assert_eq!(state.identity.role, Role::SignedOut);
		assert!(state.is_loading);
		assert!(state.slices.is_empty());
	}

	#[test]
	fn replace_resets_slices_and_rejects_older_generations() {
		let store = StateStore::new();
		assert!(store.replace_identity(g(2), teacher(), ["children", "attendance"]));
		let request = store.begin_request(g(2), "children").unwrap();
		assert_eq!(store.merge_slice(&request, SliceUpdate::Loaded(vec![Record::new()])), MergeOutcome::Applied);

		assert!(!store.replace_identity(g(1), ResolvedIdentity::unknown("late"), Vec::<String>::new()));
		assert_eq!(store.snapshot().identity, teacher());

		assert!(store.replace_identity(g(3), teacher(), ["children"]));
		let state = store.snapshot();
		assert_eq!(state.slice("children"), Some(&ResourceSlice::default()));
		assert!(state.slice("attendance").is_none());
	}

	#[test]
	fn stale_generation_writes_are_dropped() {
		let store = StateStore::new();
		store.replace_identity(g(1), teacher(), ["children"]);
		let old = store.begin_request(g(1), "children").unwrap();
		store.replace_identity(g(2), teacher(), ["children"]);
		let outcome = store.merge_slice(&old, SliceUpdate::Loaded(vec![Record::new().with("id", "old")]));
		assert_eq!(outcome, MergeOutcome::Stale);
		assert!(store.snapshot().slice("children").unwrap().data.is_empty());
		assert_eq!(store.begin_request(g(1), "children"), Err(MergeOutcome::Stale));
		assert_eq!(store.begin_request(g(2), "payroll"), Err(MergeOutcome::Unknown));
	}

	#[test]
	fn failure_keeps_previous_data() {
		let store = StateStore::new();
		store.replace_identity(g(1), teacher(), ["children"]);
		let first = store.begin_request(g(1), "children").unwrap();
		store.merge_slice(&first, SliceUpdate::Loaded(vec![Record::new().with("id", "c1")]));
		let second = store.begin_request(g(1), "children").unwrap();
		assert!(store.snapshot().slice("children").unwrap().is_loading);
		let err = ResourceFetchError::Cancelled { resource: "children".into() };
		store.merge_slice(&second, SliceUpdate::Failed(err.clone()));

		let state = store.snapshot();
		let slice = state.slice("children").unwrap();
		assert_eq!(slice.data.len(), 1);
		assert!(!slice.is_loading);
		assert_eq!(slice.last_error, Some(err));
	}

	#[test]
	fn older_request_cannot_overwrite_a_newer_one() {
		let store = StateStore::new();
		store.replace_identity(g(1), teacher(), ["children"]);
		let plan_fetch = store.begin_request(g(1), "children").unwrap();
		let refresh = store.begin_request(g(1), "children").unwrap();
		assert!(refresh.seq() > plan_fetch.seq());

		let fresh = vec![Record::new().with("id", "c2"), Record::new().with("id", "c1")];
		assert_eq!(store.merge_slice(&refresh, SliceUpdate::Loaded(fresh.clone())), MergeOutcome::Applied);
		let outcome = store.merge_slice(&plan_fetch, SliceUpdate::Loaded(vec![Record::new().with("id", "c1")]));
		assert_eq!(outcome, MergeOutcome::Superseded);

		let state = store.snapshot();
		let slice = state.slice("children").unwrap();
		assert_eq!(slice.data, fresh);
		assert!(!slice.is_loading);
	}

	#[test]
	fn older_result_arriving_first_leaves_the_slice_loading() {
		let store = StateStore::new();
		store.replace_identity(g(1), teacher(), ["children"]);
		let plan_fetch = store.begin_request(g(1), "children").unwrap();
		let refresh = store.begin_request(g(1), "children").unwrap();

		let outcome = store.merge_slice(&plan_fetch, SliceUpdate::Loaded(vec![Record::new().with("id", "old")]));
		assert_eq!(outcome, MergeOutcome::Superseded);
		assert!(store.snapshot().slice("children").unwrap().is_loading);

		store.merge_slice(&refresh, SliceUpdate::Loaded(Vec::new()));
		assert!(!store.snapshot().slice("children").unwrap().is_loading);
	}

	#[test]
	fn settle_flips_once_per_generation() {
		let store = StateStore::new();
		store.replace_identity(g(1), teacher(), ["children"]);
		assert!(store.snapshot().is_loading);
		assert!(!store.settle(g(0)));
		assert!(store.settle(g(1)));
		assert!(!store.settle(g(1)));
		assert!(!store.snapshot().is_loading);
	}

	#[test]
	fn empty_plans_settle_on_commit() {
		let store = StateStore::new();
		store.replace_identity(g(1), ResolvedIdentity::unknown("who"), Vec::<String>::new());
		assert!(!store.snapshot().is_loading);
		assert!(!store.settle(g(1)));
	}

	#[test]
	fn every_write_bumps_the_revision() {
		let store = StateStore::new();
		let rx = store.subscribe();
		store.replace_identity(g(1), teacher(), ["children"]);
		store.begin_request(g(1), "children").unwrap();
		assert!(store.begin_request(g(0), "children").is_err());
		assert_eq!(*rx.borrow(), 2);
	}

	#[test]
	fn parents_only_see_their_rows() {
		let store = StateStore::new();
		store.replace_identity(g(1), ResolvedIdentity::parent(RecordId::new("p-1"), "Pat"), ["billing"]);
		let rows = vec![Record::new().with("parent_id", "p-1"), Record::new().with("parent_id", "p-2")];
		let request = store.begin_request(g(1), "billing").unwrap();
		store.merge_slice(&request, SliceUpdate::Loaded(rows));
		let state = store.snapshot();
		assert_eq!(state.scoped("billing").map(|r| r.len()), Some(1));
		assert_eq!(state.slice("billing").map(|s| s.data.len()), Some(2));
	}

	#[test]
	fn forced_sign_out_records_the_session_error() {
		let store = StateStore::new();
		store.replace_identity(g(1), teacher(), ["children"]);
		let err = SessionError::Provider(carebase_identity::AuthError::Closed);
		assert!(store.force_signed_out(g(2), err.clone()));
		let state = store.snapshot();
		assert!(state.identity.is_signed_out());
		assert_eq!(state.session_error, Some(err));
		assert!(!state.is_loading);
	}
}

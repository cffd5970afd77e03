use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

/// Monotonic generation clock for identity-resolution lifecycles.
#[derive(Debug, Default, Clone)]
pub struct GenerationClock {
	last: Arc<AtomicU64>,
}

impl GenerationClock {
	/// Creates a new clock. The first call to [`Self::next`] returns 1.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the next generation id.
	pub fn next(&self) -> u64 {
		self.last.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
	}

	/// Returns the most recently issued generation id, 0 if none yet.
	pub fn current(&self) -> u64 {
		self.last.load(Ordering::Acquire)
	}
}

/// Generation-scoped cancellation token.
///
/// Every fetch started for a generation holds a child of that generation's
/// token, so superseding a generation cancels all of its outstanding work.
#[derive(Debug, Clone)]
pub struct GenerationToken {
	generation: u64,
	cancel: CancellationToken,
}

impl GenerationToken {
	/// Creates a new generation token.
	pub fn new(generation: u64, cancel: CancellationToken) -> Self {
		Self { generation, cancel }
	}

	/// Token for `generation` that is only cancelled explicitly.
	pub fn root(generation: u64) -> Self {
		Self::new(generation, CancellationToken::new())
	}

	/// Returns the generation id.
	pub const fn generation(&self) -> u64 {
		self.generation
	}

	/// Returns true once cancellation has been requested.
	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	/// Requests cancellation of this token and all of its children.
	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	/// Future resolving when cancellation is requested.
	pub async fn cancelled(&self) {
		self.cancel.cancelled().await;
	}

	/// Creates a child token in the same generation.
	pub fn child(&self) -> Self {
		Self {
			generation: self.generation,
			cancel: self.cancel.child_token(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn clock_is_monotonic_and_shared_across_clones() {
		let clock = GenerationClock::new();
		assert_eq!(clock.current(), 0);
		let other = clock.clone();
		assert_eq!(clock.next(), 1);
		assert_eq!(other.next(), 2);
		assert_eq!(clock.current(), 2);
	}

	#[test]
	fn cancelling_parent_cancels_children_but_not_vice_versa() {
		let parent = GenerationToken::root(7);
		let child = parent.child();
		let sibling = parent.child();
		assert_eq!(child.generation(), 7);

		child.cancel();
		assert!(!parent.is_cancelled());
		assert!(!sibling.is_cancelled());

		parent.cancel();
		assert!(sibling.is_cancelled());
	}
}

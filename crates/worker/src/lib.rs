//! Task runtime primitives for the carebase sync engine.
//!
//! Everything the engine spawns goes through [`spawn`] or a [`WorkerJoinSet`]
//! so tasks carry a [`TaskClass`] for tracing. Generation tokens scope
//! cancellation to one identity lifecycle, and [`CoalesceGate`] serializes
//! repeated work on the same key.

mod class;
pub mod coalesce;
mod join_set;
mod spawn;
mod token;

pub use class::TaskClass;
pub use coalesce::{CoalesceError, CoalesceGate};
pub use join_set::WorkerJoinSet;
pub use spawn::spawn;
pub use token::{GenerationClock, GenerationToken};

/// Extracts the panic payload message from a [`tokio::task::JoinError`].
///
/// Returns `None` when the task was cancelled rather than panicking.
pub fn join_error_panic_message(err: tokio::task::JoinError) -> Option<String> {
	let payload = err.try_into_panic().ok()?;
	if let Some(msg) = payload.downcast_ref::<&'static str>() {
		return Some((*msg).to_owned());
	}
	if let Some(msg) = payload.downcast_ref::<String>() {
		return Some(msg.clone());
	}
	Some("non-string panic payload".to_owned())
}

#[cfg(test)]
mod panic_tests;

use carebase_primitives::SessionEvent;
use carebase_worker::TaskClass;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{AuthError, SharedProvider};

/// One delivery from the watcher: a session transition, or a failure to read
/// the current session from the provider.
pub type WatchItem = Result<SessionEvent, AuthError>;

/// Serializes provider session events onto one ordered channel.
///
/// The first item is always a synthetic snapshot of the session that existed
/// when watching began. Provider-pushed events follow in emission order.
pub struct SessionWatcher {
	cancel: CancellationToken,
	task: JoinHandle<()>,
}

impl SessionWatcher {
	/// Starts watching `provider`, delivering into a channel of `buffer` items.
	pub fn spawn(provider: SharedProvider, buffer: usize) -> (Self, mpsc::Receiver<WatchItem>) {
		let (tx, rx) = mpsc::channel(buffer.max(1));
		let cancel = CancellationToken::new();
		// Subscribe before reading the current session so nothing emitted in between is lost.
		let events = provider.subscribe();
		let task = carebase_worker::spawn(TaskClass::Watcher, watch(provider, events, tx, cancel.clone()));
		(Self { cancel, task }, rx)
	}

	/// Stops delivery. Items already queued stay readable.
	pub fn stop(&self) {
		self.cancel.cancel();
	}

	pub fn is_finished(&self) -> bool {
		self.task.is_finished()
	}
}

impl Drop for SessionWatcher {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

async fn snapshot(provider: &SharedProvider) -> WatchItem {
	provider.current_session().await.map(SessionEvent::snapshot)
}

async fn watch(provider: SharedProvider, mut events: broadcast::Receiver<SessionEvent>, tx: mpsc::Sender<WatchItem>, cancel: CancellationToken) {
	let initial = snapshot(&provider).await;
	tracing::debug!(signed_in = matches!(&initial, Ok(ev) if ev.session.is_some()), ok = initial.is_ok(), "session.watch.initial");
	if tx.send(initial).await.is_err() {
		return;
	}

	loop {
		let item = tokio::select! {
			biased;
			_ = cancel.cancelled() => break,
			received = events.recv() => match received {
				Ok(event) => Ok(event),
				Err(broadcast::error::RecvError::Lagged(skipped)) => {
					tracing::warn!(skipped, "session.watch.lagged");
					snapshot(&provider).await
				}
				Err(broadcast::error::RecvError::Closed) => {
					tracing::warn!("session.watch.closed");
					let _ = tx.send(Ok(SessionEvent::signed_out())).await;
					break;
				}
			},
		};

		tracing::trace!(ok = item.is_ok(), "session.watch.deliver");
		if tx.send(item).await.is_err() {
			break;
		}
	}
	tracing::debug!("session.watch.stopped");
}

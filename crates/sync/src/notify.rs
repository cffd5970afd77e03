use serde::Serialize;
use tokio::sync::broadcast;

/// Severity of a [`Notification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
	Info,
	Warn,
	Error,
}

/// Transient, user-visible message about something the engine contained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
	pub level: Level,
	/// Originating component: `session`, `resolution`, `auth`, or
	/// `fetch:<name>`, `mutation:<name>`, `refresh:<name>`.
	pub source: String,
	pub message: String,
}

/// Bounded broadcast side channel for [`Notification`]s.
///
/// Publishing never blocks. Slow subscribers lag and lose the oldest entries.
#[derive(Debug, Clone)]
pub struct Notifier {
	tx: broadcast::Sender<Notification>,
}

impl Notifier {
	/// Creates a notifier buffering up to `capacity` messages per subscriber.
	pub fn new(capacity: usize) -> Self {
		let (tx, _) = broadcast::channel(capacity.max(1));
		Self { tx }
	}

	/// Returns a receiver for every notification published from now on.
	pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
		self.tx.subscribe()
	}

	/// Broadcasts a notification to all current subscribers.
	pub fn publish(&self, level: Level, source: impl Into<String>, message: impl Into<String>) {
		let notification = Notification {
			level,
			source: source.into(),
			message: message.into(),
		};
		tracing::trace!(level = ?notification.level, source = %notification.source, "sync.notify");
		// Nobody listening is not an error.
		let _ = self.tx.send(notification);
	}

	/// Publishes an [`Level::Info`] notification.
	pub fn info(&self, source: impl Into<String>, message: impl Into<String>) {
		self.publish(Level::Info, source, message);
	}

	/// Publishes a [`Level::Warn`] notification.
	pub fn warn(&self, source: impl Into<String>, message: impl Into<String>) {
		self.publish(Level::Warn, source, message);
	}

	/// Publishes a [`Level::Error`] notification.
	pub fn error(&self, source: impl Into<String>, message: impl Into<String>) {
		self.publish(Level::Error, source, message);
	}
}

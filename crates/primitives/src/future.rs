use std::future::Future;
use std::pin::Pin;

/// A pinned, boxed future that is `Send` and `'static`.
///
/// Resource descriptors hand these out so a fetch can be moved onto a worker task.
pub type BoxFutureStatic<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

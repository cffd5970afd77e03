use std::time::Duration;

use super::{TaskClass, WorkerJoinSet, join_error_panic_message, spawn};

#[tokio::test]
async fn fetch_panic_message_survives_the_join() {
	let handle = spawn(TaskClass::Fetch, async { panic!("attendance query exploded") });
	let message = join_error_panic_message(handle.await.unwrap_err());
	assert_eq!(message.as_deref(), Some("attendance query exploded"));
}

#[tokio::test]
async fn formatted_panics_keep_their_arguments() {
	let table = String::from("invoices");
	let handle = spawn(TaskClass::Refresh, async move { panic!("refresh of {table} exploded") });
	let message = join_error_panic_message(handle.await.unwrap_err()).unwrap();
	assert!(message.contains("refresh of invoices"), "got: {message}");
}

#[tokio::test]
async fn aborted_fetch_is_not_a_panic() {
	let mut set = WorkerJoinSet::new(TaskClass::Fetch);
	set.spawn(async {
		tokio::time::sleep(Duration::from_secs(60)).await;
	});
	set.abort_all();
	let err = set.join_next().await.unwrap().unwrap_err();
	assert!(err.is_cancelled());
	assert_eq!(join_error_panic_message(err), None);
}

#[tokio::test]
async fn non_string_payloads_are_labelled() {
	let handle = spawn(TaskClass::Pipeline, async { std::panic::panic_any(42_u32) });
	let message = join_error_panic_message(handle.await.unwrap_err());
	assert_eq!(message.as_deref(), Some("non-string panic payload"));
}

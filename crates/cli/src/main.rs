//! Carebase demo binary.
//!
//! Loads a fixture into the in-memory identity provider and record store,
//! drives one auth action through the sync engine, and prints the settled
//! application state as JSON.

mod fixture;
mod report;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use carebase_primitives::{AuthAction, Credentials};
use carebase_sync::{SyncConfig, SyncEngine};
use clap::Parser;
use tracing::info;

use crate::fixture::Fixture;
use crate::report::Summary;

/// Demo command line arguments.
#[derive(Parser, Debug)]
#[command(name = "carebase")]
#[command(about = "Run the carebase sync engine against a fixture")]
#[command(version)]
struct Args {
	/// Fixture with accounts, tables, and an optional live session
	#[arg(short, long, value_name = "PATH")]
	fixture: PathBuf,

	/// Engine configuration (defaults plus environment overrides if omitted)
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Account email to authenticate with
	#[arg(long, requires = "password")]
	email: Option<String>,

	/// Account password
	#[arg(long, requires = "email")]
	password: Option<String>,

	/// Create the account instead of signing in to it
	#[arg(long, requires = "email")]
	sign_up: bool,

	/// Sign out of the fixture's session
	#[arg(long, conflicts_with_all = ["email", "sign_up"])]
	sign_out: bool,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

impl Args {
	fn auth_action(&self) -> Option<AuthAction> {
		if self.sign_out {
			return Some(AuthAction::SignOut);
		}
		let credentials = Credentials::new(self.email.clone()?, self.password.clone()?);
		Some(if self.sign_up {
			AuthAction::SignUp(credentials)
		} else {
			AuthAction::SignIn(credentials)
		})
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
	let args = Args::parse();

	setup_tracing(args.verbose);

	let fixture = Fixture::load(&args.fixture)?;
	let config = match &args.config {
		Some(path) => SyncConfig::load(path).with_context(|| format!("loading config {}", path.display()))?,
		None => SyncConfig::default().with_env_overrides().context("applying environment overrides")?,
	};

	let engine = SyncEngine::start(config, Arc::new(fixture.provider()?), Arc::new(fixture.store())).context("starting sync engine")?;
	engine.wait_settled().await;
	info!(generation = engine.application_state().generation.get(), "cli.startup.settled");

	if let Some(action) = args.auth_action() {
		let name = action.as_str();
		engine.dispatch_auth_action(action).await.with_context(|| format!("{name} rejected"))?;
		engine.wait_settled().await;
	}

	let summary = Summary::from_state(&engine.application_state());
	engine.shutdown();

	println!("{}", serde_json::to_string_pretty(&summary)?);
	Ok(if summary.failed() { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

fn setup_tracing(verbose: bool) {
	use std::fs::OpenOptions;

	use tracing_subscriber::EnvFilter;
	use tracing_subscriber::fmt::format::FmtSpan;
	use tracing_subscriber::prelude::*;

	let filter = || {
		EnvFilter::try_from_default_env().unwrap_or_else(|_| {
			if verbose {
				EnvFilter::new("carebase=debug,info")
			} else {
				EnvFilter::new("carebase=info,warn")
			}
		})
	};

	// CAREBASE_LOG_DIR keeps stderr clean for scripted runs.
	if let Some(log_dir) = std::env::var("CAREBASE_LOG_DIR").ok().map(PathBuf::from)
		&& std::fs::create_dir_all(&log_dir).is_ok()
	{
		let log_path = log_dir.join(format!("carebase.{}.log", std::process::id()));

		if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
			let file_layer = tracing_subscriber::fmt::layer()
				.with_writer(file)
				.with_ansi(false)
				.with_span_events(FmtSpan::CLOSE)
				.with_target(true);

			tracing_subscriber::registry().with(filter()).with(file_layer).init();

			tracing::info!(path = ?log_path, "cli.tracing.file");
			return;
		}
	}

	// stdout carries the JSON summary.
	tracing_subscriber::fmt().with_env_filter(filter()).with_writer(std::io::stderr).init();
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse(argv: &[&str]) -> Result<Args, clap::Error> {
		Args::try_parse_from(std::iter::once("carebase").chain(argv.iter().copied()))
	}

	#[test]
	fn credentials_become_sign_in() {
		let args = parse(&["--fixture", "f.toml", "--email", "a@example.com", "--password", "pw"]).unwrap();
		assert_eq!(args.auth_action(), Some(AuthAction::SignIn(Credentials::new("a@example.com", "pw"))));
	}

	#[test]
	fn sign_up_flag_switches_the_action() {
		let args = parse(&["--fixture", "f.toml", "--email", "n@example.com", "--password", "pw", "--sign-up"]).unwrap();
		assert!(matches!(args.auth_action(), Some(AuthAction::SignUp(_))));
	}

	#[test]
	fn no_credentials_means_no_action() {
		assert_eq!(parse(&["--fixture", "f.toml"]).unwrap().auth_action(), None);
		assert_eq!(parse(&["--fixture", "f.toml", "--sign-out"]).unwrap().auth_action(), Some(AuthAction::SignOut));
	}

	#[test]
	fn email_needs_a_password() {
		assert!(parse(&["--fixture", "f.toml", "--email", "a@example.com"]).is_err());
		assert!(parse(&["--fixture", "f.toml", "--sign-out", "--email", "a@example.com", "--password", "pw"]).is_err());
	}
}

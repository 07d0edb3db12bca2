use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::soak::SoakOptions;

#[derive(Parser, Debug)]
#[command(name = "cs-soak")]
#[command(about = "Drive concurrent requests through a session facade and stop it mid-flight")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Facade configuration (JSON)
	#[arg(short, long, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Concurrent request threads
	#[arg(short = 'n', long, default_value_t = 50)]
	pub requests: usize,

	/// How long each request keeps its session bound, in milliseconds
	#[arg(long, default_value_t = 5)]
	pub hold_ms: u64,

	/// Stop the manager after this many milliseconds
	#[arg(long, default_value_t = 200)]
	pub stop_after_ms: u64,

	/// Rename every Nth session; 0 disables renames
	#[arg(long, default_value_t = 5)]
	pub rename_every: usize,

	/// Routing suffix appended to every session id
	#[arg(long, default_value = "node1")]
	pub route: String,
}

impl Cli {
	pub fn soak_options(&self) -> SoakOptions {
		SoakOptions {
			config: self.config.clone(),
			requests: self.requests,
			hold: Duration::from_millis(self.hold_ms),
			stop_after: Duration::from_millis(self.stop_after_ms),
			rename_every: self.rename_every,
			route: self.route.clone(),
		}
	}
}

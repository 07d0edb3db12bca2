use clap::Parser;
use clustered_session_cli::{cli::Cli, logging, soak};
use tracing::error;

fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	match soak::run(&cli.soak_options()).and_then(|report| serde_json::to_string_pretty(&report).map_err(Into::into)) {
		Ok(json) => println!("{json}"),
		Err(err) => {
			error!(target = "cs", error = %format!("{err:#}"), "soak failed");
			std::process::exit(1);
		}
	}
}

use clap::Parser;

use zsnapd::cli;

fn main() {
    let cli = cli::TriggerCli::parse();
    std::process::exit(cli::run_trigger(cli));
}

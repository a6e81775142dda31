use clap::Parser;

use zsnapd::cli;

fn main() {
    let cli = cli::DaemonCli::parse();
    std::process::exit(cli::run_daemon(cli));
}

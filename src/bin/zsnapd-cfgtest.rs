use clap::Parser;

use zsnapd::cli;

fn main() {
    let cli = cli::CfgtestCli::parse();
    std::process::exit(cli::run_cfgtest(cli));
}

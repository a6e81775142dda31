use clap::Parser;

use zsnapd::cli;

fn main() {
    let cli = cli::RcmdCli::parse();
    std::process::exit(cli::run_rcmd(cli));
}

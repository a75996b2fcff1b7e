use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = medassist_history_cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(medassist_history_cli::config::log_filter(cli.log_filter()))
        .with_writer(std::io::stderr)
        .init();

    medassist_history_cli::run_cli(cli)
}

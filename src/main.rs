use clap::Parser;
use std::process::ExitCode;
use tacheles_lib::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tacheles_lib::run(Cli::parse()).await
}

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = ezballot_cli::cli::Cli::parse();
    cli.run()
}

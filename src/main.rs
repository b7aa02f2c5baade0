use clap::Parser;
use supply_chain_stress::{
    cli::{self, GenerateArgs},
    error::Result,
};

/// Generate signed in-toto supply chains for load-testing verifiers
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    args: GenerateArgs,
}

fn main() -> Result<()> {
    // Initialize logging
    supply_chain_stress::init_logging()?;

    // Parse command line arguments
    let cli = Cli::parse();

    let result = cli::handle_generate_command(cli.args);

    // Format and display any errors
    if let Err(ref e) = result {
        eprintln!("{}", cli::format_error(e));
    }

    result
}

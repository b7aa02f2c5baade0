use crate::error::Result;

use super::commands::GenerateArgs;
use crate::compose::ComposedChain;
use crate::generator;

pub fn handle_generate_command(args: GenerateArgs) -> Result<()> {
    if args.clean {
        let report = generator::clean(&args.root)?;
        println!(
            "Removed {} generated entries from {}",
            report.removed,
            args.root.display()
        );
        if report.failed > 0 {
            super::print_validation_warning(&format!(
                "{} entries could not be removed",
                report.failed
            ));
        }
        return Ok(());
    }

    let config = args.to_config();
    println!("Welcome to the in-toto stress test!");
    println!("Basic supply chains have three steps: source, test and build.");
    println!("Advanced ones add a sublayout step backed by a nested basic chain.");
    println!(
        "Generating {} supply chains ({} with nested sublayouts) in {}",
        config.total,
        config.advanced,
        config.root.display()
    );

    let chains = generator::generate(&config)?;
    for chain in &chains {
        print_chain(chain);
    }
    println!("Done. Keys, metadata and artifacts are ready for verification.");
    Ok(())
}

fn print_chain(chain: &ComposedChain) {
    let indent = "  ".repeat(chain.tier - 1);
    println!(
        "{indent}{}: {} steps, layout {}",
        chain.name,
        chain.layout.steps.len(),
        chain.layout_path.display()
    );
    if let Some(sub) = &chain.sublayout {
        print_chain(sub);
    }
}

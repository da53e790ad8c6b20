//! Library function listing.

use clap::Args;
use rill_ir::{FunctionInfo, PortInfo};

use super::common::Global;

#[derive(Args)]
pub struct FunctionsArgs {
    /// Show only this function
    name: Option<String>,

    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
}

fn ports(ports: &[PortInfo]) -> String {
    ports
        .iter()
        .map(|p| format!("{}: {}", p.name, p.data_type))
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_table(infos: &[FunctionInfo]) {
    println!("Available Functions\n");
    println!("  {:<14} {:<28} {:<20} LAG", "NAME", "INLETS", "OUTLETS");
    for info in infos {
        println!(
            "  {:<14} {:<28} {:<20} {}",
            info.name,
            ports(&info.inlets),
            ports(&info.outlets),
            if info.lag_capable { "yes" } else { "" }
        );
    }
}

pub fn run(global: &Global, args: FunctionsArgs) -> anyhow::Result<()> {
    let library = global.library()?;
    let infos = match &args.name {
        Some(name) => vec![
            library
                .info(name)
                .ok_or_else(|| anyhow::anyhow!("unknown function: {name}"))?,
        ],
        None => library.infos(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
    } else {
        print_table(&infos);
    }
    Ok(())
}

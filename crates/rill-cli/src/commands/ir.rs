//! IR inspection: lowered flows and standalone IR source.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use rill_flow::{Flow, lower};

use super::common::Global;

#[derive(Args)]
pub struct IrArgs {
    /// Flow file (.toml) or IR source file
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Only report whether the file is valid
    #[arg(long)]
    check: bool,
}

pub fn run(global: &Global, args: IrArgs) -> anyhow::Result<()> {
    let mut library = global.library()?;
    let is_flow = args.file.extension().is_some_and(|ext| ext == "toml");

    if is_flow {
        let flow = Flow::load(&args.file, &library)
            .with_context(|| format!("failed to load flow {}", args.file.display()))?;
        let lowered = lower(&flow, &library)?;
        if args.check {
            println!("{}: ok ({} nodes)", args.file.display(), lowered.order.len());
            return Ok(());
        }
        for helper in &lowered.helpers {
            println!("{helper}");
        }
        println!("{}", lowered.function);
        return Ok(());
    }

    let text = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let names = library
        .load_source(&text)
        .with_context(|| format!("invalid IR in {}", args.file.display()))?;
    if args.check {
        println!("{}: ok ({} definitions)", args.file.display(), names.len());
        return Ok(());
    }
    for name in &names {
        match library.get(name) {
            Some(func) if func.name == *name => println!("{func}"),
            _ => {
                let target = library.resolve_name(name).unwrap_or("?");
                println!("alias {name}: {target}\n");
            }
        }
    }
    Ok(())
}

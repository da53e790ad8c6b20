//! Effective settings.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use rill_config::default_config_file;

use super::common::Global;

#[derive(Args)]
pub struct ConfigArgs {
    /// Write the effective settings (default: the user config file)
    #[arg(long, value_name = "FILE", num_args = 0..=1)]
    save: Option<Option<PathBuf>>,
}

pub fn run(global: &Global, args: ConfigArgs) -> anyhow::Result<()> {
    let settings = global.settings()?;
    match args.save {
        Some(path) => {
            let path = path.unwrap_or_else(default_config_file);
            settings
                .save(&path)
                .with_context(|| format!("failed to save {}", path.display()))?;
            println!("Saved {}", path.display());
        }
        None => print!("{}", settings.to_toml()?),
    }
    Ok(())
}

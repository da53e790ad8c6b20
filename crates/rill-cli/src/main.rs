//! rill CLI - render, play and inspect rill flows.

mod commands;

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rill")]
#[command(author, version, about = "rill signal-flow compiler and runtime", long_about = None)]
struct Cli {
    /// Settings file (default: the user config file, if present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Execution backend: jit or interpreter
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Extra IR source to add to the function library (repeatable)
    #[arg(long = "library", global = true, value_name = "FILE")]
    libraries: Vec<PathBuf>,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a flow offline to a WAV file
    Render(commands::render::RenderArgs),

    /// Play a flow in real time
    Play(commands::play::PlayArgs),

    /// Print the IR of a flow, or check an IR source file
    Ir(commands::ir::IrArgs),

    /// List library functions and their ports
    Functions(commands::functions::FunctionsArgs),

    /// Compile and evaluate a math expression
    Eval(commands::eval::EvalArgs),

    /// List audio output devices
    Devices(commands::devices::DevicesArgs),

    /// Show or write the effective settings
    Config(commands::config::ConfigArgs),
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let global = commands::common::Global {
        config: cli.config,
        backend: cli.backend,
        libraries: cli.libraries,
    };

    match cli.command {
        Commands::Render(args) => commands::render::run(&global, args),
        Commands::Play(args) => commands::play::run(&global, args),
        Commands::Ir(args) => commands::ir::run(&global, args),
        Commands::Functions(args) => commands::functions::run(&global, args),
        Commands::Eval(args) => commands::eval::run(&global, args),
        Commands::Devices(args) => commands::devices::run(&global, args),
        Commands::Config(args) => commands::config::run(&global, args),
    }
}

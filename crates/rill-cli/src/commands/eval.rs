//! One-off evaluation of a math expression.

use anyhow::Context;
use clap::Args;
use rill_engine::{DataPresets, Engine};
use rill_ir::compile_expression;

use super::common::Global;

#[derive(Args)]
pub struct EvalArgs {
    /// Expression, with or without the leading `=` (e.g. "$0 + $1 * 2")
    expression: String,

    /// Values for $0, $1, ...
    #[arg(allow_negative_numbers = true)]
    args: Vec<f32>,

    /// Frames to run; stateful calls such as lag advance each frame
    #[arg(short, long, default_value = "1")]
    frames: usize,

    /// Print the compiled IR before the result
    #[arg(long)]
    ir: bool,
}

pub fn run(global: &Global, args: EvalArgs) -> anyhow::Result<()> {
    let settings = global.settings()?;
    let library = global.library()?;

    let text = args.expression.trim();
    let text = if text.starts_with('=') {
        text.to_owned()
    } else {
        format!("= {text}")
    };
    let function = compile_expression("eval", &text, None)
        .with_context(|| format!("failed to compile '{text}'"))?;
    if args.ir {
        println!("{function}");
    }

    let backend = settings.backend_kind()?.create(settings.opt_level()?);
    let engine = Engine::new(backend, settings.sample_rate as f32);
    let (handle, mut processor) = engine.instantiate(&function, &library, &DataPresets::new())?;

    let mut outputs = vec![0.0; function.outlets.len()];
    for _ in 0..args.frames.max(1) {
        processor.run(&args.args, &mut outputs);
        let line = outputs
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        println!("{line}");
    }
    engine.destroy(&handle);
    Ok(())
}

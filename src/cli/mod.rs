// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All workflow logic is delegated to Layer 2 (application).
//
// Three commands are supported:
//   1. `simulate`    — reads whole epochs, prints packing metrics
//   2. `inspect`     — prints how the first minibatches were packed
//   3. `init-config` — writes a default JSON run config
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, ConfigArgs, InitConfigArgs, InspectArgs, SimulateArgs};

use crate::application::simulate_use_case::SimulateConfig;
use crate::infra::config_store;

#[derive(Parser, Debug)]
#[command(
    name = "utterance-packer",
    version = "0.1.0",
    about = "Pack variable-length utterances into parallel-sequence minibatches."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Simulate(args)   => run_simulate(args),
            Commands::Inspect(args)    => run_inspect(args),
            Commands::InitConfig(args) => run_init_config(args),
        }
    }
}

fn load(source: &ConfigArgs) -> Result<SimulateConfig> {
    let cfg = match &source.config {
        Some(path) => config_store::load_config(path)?,
        None       => SimulateConfig::default(),
    };
    Ok(source.apply(cfg))
}

fn run_simulate(args: SimulateArgs) -> Result<()> {
    use crate::application::simulate_use_case::SimulateUseCase;

    let cfg = args.apply(load(&args.source)?);
    let history = SimulateUseCase::new(cfg, args.source.base_dir()).execute()?;

    println!("epoch  minibatches  valid  padding  packed  efficiency");
    for m in &history {
        println!(
            "{:>5}  {:>11}  {:>5}  {:>7}  {:>6}  {:>10.3}",
            m.epoch,
            m.minibatches,
            m.valid_frames,
            m.padding_frames,
            m.packed_sequences,
            m.efficiency()
        );
    }
    Ok(())
}

fn run_inspect(args: InspectArgs) -> Result<()> {
    use crate::application::inspect_use_case::InspectUseCase;

    let cfg = load(&args.source)?;
    let reports = InspectUseCase::new(cfg, args.source.base_dir(), args.count).execute()?;

    for r in &reports {
        let mode = if r.sequential { "sequences" } else { "frames" };
        println!("\nMinibatch {} ({} steps x {} {})", r.index, r.steps, r.parallel, mode);
        for (s, row) in r.rows.iter().enumerate() {
            println!("  {s:>3} | {row}");
        }
        for p in &r.packed {
            println!(
                "  row {} <- channel {} at step {} ({} frames)",
                p.channel, p.source_channel, p.start, p.frames
            );
        }
        if r.packed.is_empty() && !r.states.is_empty() {
            println!("  channel states: {:?}", r.states);
        }
    }
    Ok(())
}

fn run_init_config(args: InitConfigArgs) -> Result<()> {
    config_store::save_config(&args.path, &SimulateConfig::default())?;
    println!("Wrote default config to '{}'", args.path.display());
    Ok(())
}

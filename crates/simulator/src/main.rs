use std::path::PathBuf;

use clap::{ArgAction, Parser};
use log::LevelFilter;

use vmsim::{Console, SimConfig, Simulation};

#[derive(Parser)]
#[command(name = "vmsim")]
#[command(about = "Multiprogrammed paged virtual memory simulator")]
struct Args {
    /// Increase logging: -v for debug, -vv for trace
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Translate through per-CPU TLBs
    #[arg(short, long)]
    tlb: bool,

    /// Number of CPUs, overriding the configuration file
    #[arg(long)]
    cpus: Option<usize>,

    /// Configuration properties file
    config: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    Console::init(level).map_err(|err| err.to_string())?;

    let mut config = SimConfig::load(&args.config).inspect_err(|err| log::error!("{err}"))?;
    if let Some(cpus) = args.cpus {
        if cpus == 0 {
            return Err("--cpus must be at least 1".into());
        }
        config = config.with_cpus(cpus);
    }
    config = config.with_tlb(args.tlb);

    Simulation::new(config)
        .run()
        .inspect_err(|err| log::error!("{err}"))?;
    Ok(())
}

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snt_core::payload::script;
use snt_core::protocol::BootConfig;
use snt_core::session::DriverConfig;
use snt_core::track::decode_binary_log;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "SNT8100 sensor driver tool", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register-init scripts
    Script {
        #[command(subcommand)]
        action: ScriptAction,
    },
    /// Print a binary track-report log as text
    DecodeLog { file: PathBuf },
    /// Compute the boot configuration word
    Bcr {
        /// I2C address the boot ROM answers on
        #[arg(long, default_value_t = 0, value_parser = parse_u8)]
        addr: u8,
        #[arg(long, default_value_t = 0)]
        log_level: u8,
        #[arg(long, default_value_t = 0)]
        edge_duration: u8,
        /// Edge-triggered interrupt instead of level
        #[arg(long)]
        edge: bool,
        #[arg(long)]
        active_low: bool,
    },
    /// Print the default driver configuration
    Config {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum ScriptAction {
    /// Parse a script and print it normalized
    Check { file: PathBuf },
    /// Encode a script into a register partition
    Encode {
        file: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print an encoded register partition as a script
    Decode { file: PathBuf },
}

fn parse_u8(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("{}: {}", s, e))
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn run_script(action: ScriptAction) -> Result<()> {
    match action {
        ScriptAction::Check { file } => {
            let groups = script::parse(&read(&file)?)?;
            let values: usize = groups.iter().map(|g| g.values.len()).sum();
            info!(groups = groups.len(), values, "Script is valid");
            print!("{}", script::format(&groups));
        }
        ScriptAction::Encode { file, output } => {
            let groups = script::parse(&read(&file)?)?;
            let partition = script::encode(&groups)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &partition)
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!(bytes = partition.len(), path = %path.display(), "Partition written");
                }
                None => {
                    for line in partition.chunks(16) {
                        let hex: Vec<String> = line.iter().map(|b| format!("{:02X}", b)).collect();
                        println!("{}", hex.join(" "));
                    }
                }
            }
        }
        ScriptAction::Decode { file } => {
            let groups = script::decode(&read(&file)?)?;
            print!("{}", script::format(&groups));
        }
    }
    Ok(())
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Script { action } => run_script(action)?,
        Command::DecodeLog { file } => {
            let batches = decode_binary_log(&read(&file)?)?;
            info!(batches = batches.len(), "Decoded track log");
            for batch in &batches {
                for r in &batch.reports {
                    println!(
                        "{}, {}, {}, {}, {}, {}, {}, {}",
                        batch.timestamp_ms,
                        batch.frame,
                        r.bar_id,
                        r.track_id,
                        r.force,
                        r.top,
                        r.center,
                        r.bottom
                    );
                }
            }
        }
        Command::Bcr {
            addr,
            log_level,
            edge_duration,
            edge,
            active_low,
        } => {
            let bcr = BootConfig {
                i2c_addr: addr,
                log_level,
                edge_duration,
                edge_triggered: edge,
                active_low,
            };
            let word = bcr.to_word();
            if BootConfig::from_word(word) != bcr {
                anyhow::bail!("field out of range: {:?} packs to 0x{:08X}", bcr, word);
            }
            println!("0x{:08X}", word);
        }
        Command::Config { output } => {
            let config = DriverConfig::default();
            match output {
                Some(path) => {
                    config.save_to_file(&path)?;
                    info!(path = %path.display(), "Configuration written");
                }
                None => print!("{}", config.to_toml_string()?),
            }
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

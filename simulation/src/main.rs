//! zigmesh - Zigbee mesh bootstrap and Wi-Fi coexistence simulation
//!
//! Brings a mesh up through formation, discovery, join and router start,
//! exchanges sequenced frames across it, and reports per-destination QoS
//! next to the Wi-Fi flow statistics.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use zigmesh_logging::{LogConfig, ZigmeshSubscriberBuilder};
use zigmesh_simulation::config::{LayoutKind, ScenarioConfig};
use zigmesh_simulation::scenarios::{self, ScenarioRun};
use zigmesh_simulation::topology::{LayoutBuilder, RadioMap};

#[derive(Parser)]
#[command(
    name = "zigmesh",
    about = "Zigbee mesh bootstrap simulation with Wi-Fi coexistence",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write a JSONL log of the run into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LayoutArg {
    Circle,
    Line,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coexistence scenario
    Coex {
        /// Scenario configuration (JSON); defaults when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of mesh devices, coordinator included
        #[arg(long)]
        n_zigbee: Option<u32>,

        /// Simulated seconds
        #[arg(long)]
        simulation_time: Option<f64>,

        /// Wi-Fi offered load per station (bit/s)
        #[arg(long)]
        wifi_data_rate: Option<u64>,

        /// Wi-Fi UDP payload size (bytes)
        #[arg(long)]
        wifi_packet_size: Option<u32>,

        #[arg(long)]
        seed: Option<u64>,

        /// Write the report as JSON to this file
        #[arg(long)]
        report_json: Option<PathBuf>,
    },

    /// Run a line of routers where every frame crosses the whole chain
    Chain {
        #[arg(short, long, default_value = "4")]
        devices: u32,

        #[arg(long)]
        report_json: Option<PathBuf>,
    },

    /// Create and visualize a device layout
    Topology {
        #[arg(short, long, default_value = "5")]
        devices: usize,

        #[arg(short, long, value_enum, default_value = "circle")]
        layout: LayoutArg,

        /// Circle radius or line spacing (m)
        #[arg(short, long, default_value = "10.0")]
        spacing: f64,

        /// Radio range (m)
        #[arg(short, long, default_value = "50.0")]
        range: f64,
    },

    /// Print the default configuration, or save it to a file
    Config {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut log_config = match &cli.log_dir {
        Some(dir) => LogConfig::run_archive(dir.clone(), "zigmesh"),
        None => LogConfig::development(),
    };
    log_config.default_level = if cli.verbose { "debug" } else { "info" }.to_string();
    let _guard = ZigmeshSubscriberBuilder::new().with_config(log_config).init();

    match cli.command {
        Commands::Coex {
            config,
            n_zigbee,
            simulation_time,
            wifi_data_rate,
            wifi_packet_size,
            seed,
            report_json,
        } => {
            let mut config = match config {
                Some(path) => ScenarioConfig::load(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => ScenarioConfig::default(),
            };
            if let Some(n) = n_zigbee {
                config.n_zigbee = n;
            }
            if let Some(t) = simulation_time {
                config.simulation_time = t;
            }
            if let Some(rate) = wifi_data_rate {
                config.wifi.data_rate_bps = rate;
            }
            if let Some(size) = wifi_packet_size {
                config.wifi.packet_size = size;
            }
            if let Some(seed) = seed {
                config.seed = seed;
            }

            let run = scenarios::run_coexistence_scenario(config)?;
            finish(&run, report_json)?;
        }
        Commands::Chain {
            devices,
            report_json,
        } => {
            let run = scenarios::run_chain_scenario(devices)?;
            finish(&run, report_json)?;
        }
        Commands::Topology {
            devices,
            layout,
            spacing,
            range,
        } => {
            let kind = match layout {
                LayoutArg::Circle => LayoutKind::Circle { radius: spacing },
                LayoutArg::Line => LayoutKind::Line { spacing },
            };
            let positions = LayoutBuilder::new(devices).build(kind);
            for (i, position) in positions.iter().enumerate() {
                println!("[ZB] Node {i} position: {position}");
            }
            println!("{}", RadioMap::new(positions, range).visualize());
        }
        Commands::Config { output } => {
            let config = ScenarioConfig::default();
            match output {
                Some(path) => {
                    config
                        .save(&path)
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!(path = %path.display(), "Default configuration written");
                }
                None => println!("{}", serde_json::to_string_pretty(&config)?),
            }
        }
    }

    Ok(())
}

fn finish(run: &ScenarioRun, report_json: Option<PathBuf>) -> anyhow::Result<()> {
    println!("{}", run.report);
    println!("Simulation time elapsed: {:?}", run.elapsed);

    for dump in run.simulation.table_dumps() {
        println!("{}", dump.text);
    }
    for trace in run.simulation.traces() {
        println!("{trace}");
    }

    if let Some(path) = report_json {
        run.report
            .write_json(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "Report written");
    }
    Ok(())
}

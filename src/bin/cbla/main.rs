use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use cbla::config::{BarrierConfig, EngineConfig};
use cbla::engine::{CblaEngine, RunnableEngine};
use cbla::rand::Rng;
use cbla::robot::adapter::ScalarActuatorAdapter;
use cbla::barrier::SyncBarrier;
use cbla::snapshot::SnapshotSink;
use cbla::supervisor::Supervisor;
use cbla::transport::loopback::LoopbackTransport;
use cbla::Config;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
struct NodeConfig {
    id: String,
    device: String,
    sensor_var: String,
    actuator_var: String,
    actuator_min: f64,
    actuator_max: f64,
    engine: EngineConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct DeploymentConfig {
    seed: u64,
    barrier: BarrierConfig,
    snapshot_dir: PathBuf,
    nodes: Vec<NodeConfig>,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        DeploymentConfig {
            seed: 1,
            barrier: BarrierConfig::default(),
            snapshot_dir: PathBuf::from("./snapshots"),
            nodes: vec![NodeConfig {
                id: "node-0".to_string(),
                device: "fin-0".to_string(),
                sensor_var: "s".to_string(),
                actuator_var: "m".to_string(),
                actuator_min: 0.0,
                actuator_max: 255.0,
                engine: EngineConfig::default(),
            }],
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a deployment config with sensible defaults to a JSON file.
    CreateConfig {
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Run a deployment against an in-process loopback transport (`s = 3m -
    /// 1` per node) for `ticks` ticks, then flush snapshots and exit.
    /// A real deployment supplies its own `Transport` over the wire and
    /// wires `Supervisor::shutdown` to its process's signal handler instead.
    Run {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long, default_value_t = 2000)]
        ticks: u64,
    },
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Run curiosity-based learning agents against a network of actuator/sensor nodes.", long_about = None)]
struct Args {
    #[command(subcommand)]
    pub command: Command,
}

fn run(config_path: &PathBuf, ticks: u64) -> Result<()> {
    let mut config = DeploymentConfig::load(config_path)?;
    std::fs::create_dir_all(&config.snapshot_dir)?;

    let transport = Arc::new(LoopbackTransport::new());
    for node in &config.nodes {
        let sensor_var = node.sensor_var.clone();
        let actuator_var = node.actuator_var.clone();
        transport.add_device(
            node.device.clone(),
            Box::new(move |commands| {
                let m = commands.get(&actuator_var).copied().unwrap_or(0.0);
                [(sensor_var.clone(), 3.0 * m - 1.0)].into_iter().collect()
            }),
        );
    }

    let devices: Vec<String> = config.nodes.iter().map(|n| n.device.clone()).collect();
    let barrier = Arc::new(SyncBarrier::new(
        config.nodes.len(),
        devices,
        transport,
        config.barrier.clone(),
    ));
    let snapshot_sink = Arc::new(SnapshotSink::new(config.snapshot_dir.clone()));
    let mut rng = Rng::from_seed(config.seed);

    let supervisor_builder = Supervisor::new();
    let variable_bus = supervisor_builder.variable_bus();

    let engines: Vec<Box<dyn RunnableEngine>> = config
        .nodes
        .drain(..)
        .map(|node| {
            let mut node_config = node.engine;
            node_config.sim_duration = Some(ticks);
            let adapter = ScalarActuatorAdapter {
                sensor_var: node.sensor_var,
                actuator_var: node.actuator_var,
                device: node.device.clone(),
                min: node.actuator_min,
                max: node.actuator_max,
            };
            Box::new(CblaEngine::with_bus(
                node.id,
                node.device,
                node_config,
                adapter,
                Arc::clone(&barrier),
                rng.create_child(),
                Some(Arc::clone(&snapshot_sink)),
                vec![vec![(node.actuator_min + node.actuator_max) / 2.0]],
                Some(Arc::clone(&variable_bus)),
            )) as Box<dyn RunnableEngine>
        })
        .collect();

    let mut supervisor = supervisor_builder;
    supervisor.start(engines);

    // Demo-mode stop condition: wall-clock proportional to the tick budget.
    // A real deployment would instead wire the process's signal handler to
    // call `barrier.request_stop()` / `supervisor.shutdown()`.
    thread::sleep(Duration::from_millis(ticks));
    supervisor.shutdown();

    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    match args.command {
        Command::CreateConfig { output } => {
            DeploymentConfig::default().save(&output)?;
            Ok(())
        }
        Command::Run { config, ticks } => run(&config, ticks),
    }
}

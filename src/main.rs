// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::error::Error;
use std::f32::consts::PI;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chopfire::config::{self, Config};
use chopfire::engine::{TriggerEngine, TriggerOptions};
use chopfire::input::{Bank, InputRouter};
use chopfire::latency::LatencyMonitor;
use chopfire::samples::{DecodedBuffer, WavFileProvider};
use chopfire::{audio, console, verify};
use clap::{crate_version, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Sample id used by the bench command.
const BENCH_SAMPLE: &str = "bench";

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A low-latency sample pad player."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Starts the pad player and reads keys from stdin.
    Start {
        /// The path to the player config.
        config_path: String,
    },
    /// Fires a synthetic chop repeatedly and prints the latency analysis.
    Bench {
        /// The number of triggers to fire.
        #[arg(short, long, default_value_t = 100)]
        count: usize,
        /// The device to play through.
        #[arg(short, long, default_value = "mock")]
        device: String,
    },
    /// Verifies the banks in a player config against their sources.
    Verify {
        /// The path to the player config.
        config_path: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Start { config_path } => {
            let config_path = PathBuf::from(config_path);
            let config = Config::deserialize(&config_path)?;
            start(&config, &sources_path(&config_path)).await?;
        }
        Commands::Bench { count, device } => bench(count, &device)?,
        Commands::Verify { config_path } => {
            let config_path = PathBuf::from(config_path);
            let config = Config::deserialize(&config_path)?;
            let provider = WavFileProvider::new(&sources_path(&config_path));

            let report = verify::check_config(&config, &provider);
            verify::print_report(&report, config.banks());
            if report.has_errors() {
                return Err("verification failed".into());
            }
        }
    }

    Ok(())
}

/// Sources are resolved relative to the config file.
fn sources_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

async fn start(config: &Config, sources: &Path) -> Result<(), Box<dyn Error>> {
    let engine = Arc::new(TriggerEngine::new(config.audio(), config.voices())?);
    engine.optimize_for_ultra_low_latency()?;

    let latency = config.latency();
    let monitor = Arc::new(LatencyMonitor::new(
        engine.clock().clone(),
        latency.thresholds(),
        latency.max_measurements(),
    ));
    monitor.start_monitoring(latency.monitor_interval()?);

    let banks = config
        .banks()
        .iter()
        .map(Bank::from_config)
        .collect::<Result<Vec<_>, _>>()?;
    let router = Arc::new(InputRouter::new(
        engine.clone(),
        monitor.clone(),
        Arc::new(WavFileProvider::new(sources)),
        banks,
        config.input(),
    )?);

    {
        let router = router.clone();
        let preloaded = tokio::task::spawn_blocking(move || router.preload_active_bank()).await?;
        info!(samples = preloaded, "Preloaded active bank.");
    }
    // Page in everything that was just preloaded.
    engine.optimize_for_ultra_low_latency()?;
    monitor.set_optimizations(engine.optimizations());

    {
        let router = router.clone();
        tokio::task::spawn_blocking(move || console::run(&router, io::stdin().lock(), io::stdout()))
            .await??;
    }

    monitor.stop_monitoring();
    engine.shutdown();
    Ok(())
}

fn bench(count: usize, device: &str) -> Result<(), Box<dyn Error>> {
    let audio = config::Audio::new(device);
    let engine = TriggerEngine::new(&audio, &config::Voices::default())?;
    engine.optimize_for_ultra_low_latency()?;

    let sample_rate = audio.sample_rate();
    let frames = sample_rate as usize / 4;
    let channels = (0..2)
        .map(|channel| {
            let frequency = 220.0 * (channel + 1) as f32;
            (0..frames)
                .map(|i| (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin() * 0.5)
                .collect()
        })
        .collect();
    let source = DecodedBuffer::new(channels, sample_rate);
    if !engine.preload_sample(BENCH_SAMPLE, &source, 0.0, source.duration_secs()) {
        return Err("unable to preload the bench sample".into());
    }

    let monitor = LatencyMonitor::new(
        engine.clock().clone(),
        Default::default(),
        count.max(1),
    );
    let mut failures = 0;
    for _ in 0..count {
        let start = engine.clock().now_ms();
        let result = engine.trigger_sample(BENCH_SAMPLE, 1.0, TriggerOptions::default());
        if result.is_success() {
            monitor.record_audio_trigger(start, engine.clock().now_ms());
        } else {
            failures += 1;
        }
    }
    engine.stop_all_samples();

    let report = serde_json::json!({
        "triggers": count,
        "failures": failures,
        "analysis": monitor.analysis().audio_trigger,
        "metrics": engine.performance_metrics(),
    });
    println!("{:#}", report);
    engine.shutdown();
    Ok(())
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use keyscope::audio::decoder::decode_to_mono;
use keyscope::config::ServiceConfig;
use keyscope::{analyze_waveform, AdmissionGate, FeatureDetector, KeyProfiles, RemoteAudioSource};

#[derive(Parser)]
#[command(name = "keyscope", version, about = "Musical key and tempo detection service")]
struct Cli {
    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP detection service
    Serve {
        /// TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Listen address (overrides config)
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Maximum concurrent detection jobs (overrides config)
        #[arg(long)]
        max_jobs: Option<usize>,

        /// Directory for downloaded audio (overrides config)
        #[arg(long)]
        scratch_dir: Option<PathBuf>,
    },

    /// Analyze a local audio file and print tempo and key
    Analyze {
        /// Audio file (WAV, MP3, FLAC, OGG, ...)
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    match cli.command {
        Commands::Serve {
            config,
            bind,
            max_jobs,
            scratch_dir,
        } => {
            let mut config =
                ServiceConfig::load(config.as_deref()).context("Failed to load config")?;
            if let Some(bind) = bind {
                config.bind = bind;
            }
            if let Some(max_jobs) = max_jobs {
                config.max_concurrent_jobs = max_jobs;
            }
            if let Some(scratch_dir) = scratch_dir {
                config.scratch_dir = scratch_dir;
            }
            config.validate()?;

            let source = RemoteAudioSource::from_config(&config).with_context(|| {
                format!("Failed to prepare scratch dir {}", config.scratch_dir.display())
            })?;
            let detector = Arc::new(FeatureDetector::new(
                AdmissionGate::new(config.max_concurrent_jobs),
                Arc::new(KeyProfiles::krumhansl()),
                Arc::new(source),
            ));

            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            runtime
                .block_on(keyscope::server::serve(config.bind, detector))
                .with_context(|| format!("Server on {} failed", config.bind))?;
        }

        Commands::Analyze { file } => {
            let waveform = decode_to_mono(&file)
                .with_context(|| format!("Failed to decode {}", file.display()))?;
            log::info!(
                "Decoded {} ({} ms at {} Hz)",
                file.display(),
                waveform.duration_ms(),
                waveform.sample_rate
            );

            let report = analyze_waveform(&waveform, &KeyProfiles::krumhansl());
            println!("{}", serde_json::to_string(&report)?);
            println!("Camelot: {}", report.key.camelot());
        }
    }

    Ok(())
}

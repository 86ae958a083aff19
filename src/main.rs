use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use signal_radio::audio::AudioBuffer;
use signal_radio::block::list_block_files;
use signal_radio::config::{ReplenishMode, StationConfig};
use signal_radio::mixer::{self, BedIntro};
use signal_radio::player::{Player, run_programme};
use signal_radio::producer::BlockProducer;
use signal_radio::replenish::{ReplenishPolicy, ReplenisherHandle};
use signal_radio::station::Station;
use signal_radio::track::Track;
use signal_radio::weekly::{self, BatchPolicy, WeeklyHandle};
use signal_radio::{script, voice};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Wait between `next()` polls while nothing is ready.
const NOT_READY_POLL: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "signal_radio", about = "Radio programme scheduler and mixing engine")]
struct Cli {
    /// Station config file (default: station.json in the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep blocks coming and play the programme locally
    Run,
    /// Show blocks on disk, the music catalog and the batch marker
    Status,
    /// List the music catalog with durations
    Tracks,
    /// Produce blocks now
    Produce {
        /// Number of blocks to produce
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },
    /// Regenerate the whole block set now
    Batch,
    /// Lay a voice over music, ducking the music under it
    Duck {
        music: PathBuf,
        voice: PathBuf,
        /// Output file (.mp3 or .wav)
        out: PathBuf,
    },
    /// Lay a voice over a looping bed with a bed-only intro
    Bed {
        voice: PathBuf,
        bed: PathBuf,
        /// Output file (.mp3 or .wav)
        out: PathBuf,
    },
    /// Normalize a file's loudness
    Normalize {
        input: PathBuf,
        /// Output file (.mp3 or .wav)
        out: PathBuf,
        /// Target level in dBFS (overrides config)
        #[arg(long, allow_hyphen_values = true)]
        target: Option<f32>,
    },
    /// Station configuration
    Config {
        #[command(subcommand)]
        action: ConfigCmd,
    },
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Commands::Config { action } = &cli.command {
        return config_command(action, cli.config.as_deref());
    }

    let (config, source) =
        StationConfig::resolve(cli.config.as_deref()).context("failed to load config")?;
    match &source {
        Some(path) => tracing::debug!(config = %path.display(), "config loaded"),
        None => tracing::debug!("using built-in config defaults"),
    }

    match cli.command {
        Commands::Run => run(&config),
        Commands::Status => {
            status(&config);
            Ok(())
        }
        Commands::Tracks => {
            tracks(&config);
            Ok(())
        }
        Commands::Produce { count } => produce(&config, count),
        Commands::Batch => {
            let station = Station::from_config(&config);
            let producer = build_producer(&config);
            let report = weekly::run_batch(
                &station,
                &producer,
                &BatchPolicy::from_config(&config),
                Utc::now(),
            )
            .context("batch generation failed")?;
            println!(
                "Batch done: {} produced, {} failed, {} old blocks removed.",
                report.produced, report.failed, report.removed
            );
            if report.produced == 0 {
                bail!("no block could be produced");
            }
            Ok(())
        }
        Commands::Duck { music, voice, out } => {
            let music = decode(&music)?;
            let voice = decode(&voice)?;
            let mixed = mixer::ducked_overlay(&music, &voice, config.mix.duck_db);
            write(&mixed, &out)
        }
        Commands::Bed { voice, bed, out } => {
            let voice = decode(&voice)?;
            let bed = decode(&bed)?;
            let params = BedIntro {
                bed_db: config.mix.bed_db,
                intro_seconds: config.mix.intro_seconds,
                intro_bed_db: config.mix.intro_bed_db,
                target_dbfs: config.mix.target_dbfs,
            };
            write(&mixer::bed_intro_overlay(&voice, &bed, &params), &out)
        }
        Commands::Normalize { input, out, target } => {
            let buf = decode(&input)?;
            let target = target.unwrap_or(config.mix.target_dbfs);
            write(&mixer::normalize(&buf, target), &out)
        }
        Commands::Config { .. } => Ok(()),
    }
}

fn config_command(action: &ConfigCmd, explicit: Option<&Path>) -> Result<()> {
    match action {
        ConfigCmd::Init { force } => {
            let path = match explicit {
                Some(p) => p.to_path_buf(),
                None => StationConfig::default_path()
                    .context("no user config directory on this system; pass --config")?,
            };
            if path.exists() && !force {
                bail!(
                    "'{}' already exists (use --force to overwrite)",
                    path.display()
                );
            }
            StationConfig::default()
                .save(&path)
                .with_context(|| format!("failed to write '{}'", path.display()))?;
            println!("Wrote default config to '{}'.", path.display());
        }
        ConfigCmd::Show => {
            let (config, source) =
                StationConfig::resolve(explicit).context("failed to load config")?;
            match source {
                Some(path) => eprintln!("# {}", path.display()),
                None => eprintln!("# built-in defaults"),
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}

fn build_producer(config: &StationConfig) -> BlockProducer {
    BlockProducer::from_config(
        config,
        script::from_config(&config.scripts),
        voice::from_config(&config.voice, &config.voice_dir()),
    )
}

fn run(config: &StationConfig) -> Result<()> {
    let station = Arc::new(Station::from_config(config));
    let producer = Arc::new(build_producer(config));

    let (_replenisher, _weekly) = match config.mode {
        ReplenishMode::Continuous => {
            if let Some(last) = list_block_files(&config.blocks_dir).last() {
                station.continue_ids_after(last.id);
            }
            let handle = ReplenisherHandle::start(
                station.clone(),
                producer.clone(),
                ReplenishPolicy::from_config(config),
            );
            (Some(handle), None)
        }
        ReplenishMode::Weekly => {
            let handle = WeeklyHandle::start(
                station.clone(),
                producer.clone(),
                BatchPolicy::from_config(config),
            );
            (None, Some(handle))
        }
    };

    let mut player = Player::new().context("cannot start local playback")?;
    let running = AtomicBool::new(true);
    println!("On air. Press Ctrl+C to stop.");
    run_programme(&station, &mut player, &running, NOT_READY_POLL);
    Ok(())
}

fn produce(config: &StationConfig, count: usize) -> Result<()> {
    let station = Station::from_config(config);
    if let Some(last) = list_block_files(&config.blocks_dir).last() {
        station.continue_ids_after(last.id);
    }
    let producer = build_producer(config);

    let mut failures = 0;
    for _ in 0..count {
        match station.produce_into_queue(&producer) {
            Ok(block) => println!("Produced {}", block.path.display()),
            Err(e) => {
                failures += 1;
                eprintln!("Error: {}", e);
            }
        }
    }
    if failures == count && count > 0 {
        bail!("no block could be produced");
    }
    Ok(())
}

fn status(config: &StationConfig) {
    println!("signal_radio v{}", env!("CARGO_PKG_VERSION"));
    println!("Mode: {:?}", config.mode);

    let blocks = list_block_files(&config.blocks_dir);
    println!(
        "Blocks in '{}': {}",
        config.blocks_dir.display(),
        blocks.len()
    );
    for block in &blocks {
        let size = std::fs::metadata(&block.path).map(|m| m.len()).unwrap_or(0);
        println!("  {} ({} KB)", block.name, size / 1024);
    }

    let station = Station::from_config(config);
    let tracks = station.catalog().list_tracks();
    println!(
        "Music in '{}': {} track(s)",
        config.music_dir.display(),
        tracks.len()
    );

    match config.available_bed() {
        Some(bed) => println!("Bed: {}", bed.display()),
        None => println!("Bed: none"),
    }

    match weekly::read_marker(&config.marker_file) {
        Some(at) => println!("Last batch: {}", weekly::format_marker(at)),
        None => println!("Last batch: never"),
    }
}

fn tracks(config: &StationConfig) {
    let station = Station::from_config(config);
    let tracks = station.catalog().list_tracks();
    if tracks.is_empty() {
        println!("No music in '{}'.", config.music_dir.display());
        return;
    }
    for (i, track) in tracks.iter().enumerate() {
        let duration = track
            .duration()
            .map(Track::duration_display)
            .unwrap_or_else(|_| "?:??".to_string());
        println!("  {:>3}. {} [{}]", i + 1, track.name, duration);
    }
}

fn decode(path: &Path) -> Result<AudioBuffer> {
    AudioBuffer::decode(path).with_context(|| format!("failed to read '{}'", path.display()))
}

fn write(buf: &AudioBuffer, out: &Path) -> Result<()> {
    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    buf.write(out)
        .with_context(|| format!("failed to write '{}'", out.display()))?;
    println!("Wrote {} ({} ms).", out.display(), buf.duration_ms());
    Ok(())
}

//! evlink CLI application.
//!
//! Replays a recorded USB byte stream through the acquisition pipeline and
//! writes the committed containers as CSV.

use anyhow::{Context, Result};
use clap::Parser;
use evlink_core::capture::DEFAULT_CHUNK_SIZE;
use evlink_core::{
    chip, AcquisitionConfig, CaptureReader, ChipId, CsvWriter, DavisFamily, DeviceFamily,
    DeviceHandle, DvsFamily, DynapseFamily, FamilyKind, MemoryRegisters, Summary, SysInfo,
};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::prelude::*;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Replays neuromorphic sensor captures through the evlink pipeline.
///
/// The capture is fed in USB-sized chunks from a producer thread while the
/// main thread takes committed containers and writes their events as CSV.
#[derive(Parser, Debug)]
#[command(name = "evlink")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Capture file: optional `%` header followed by the raw device bytes
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output CSV file
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// YAML acquisition config, overridable with EVLINK_* environment variables
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Device family, if the capture header does not name one
    #[arg(long)]
    family: Option<FamilyKind>,

    /// Chip, if the capture header does not name one (e.g. davis346)
    #[arg(long)]
    chip: Option<ChipId>,

    /// Bytes handed to the decoder per simulated USB transfer
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Defaults, then the YAML file, then `EVLINK_` environment variables.
fn load_config(path: Option<&Path>) -> Result<AcquisitionConfig> {
    let mut figment = Figment::from(Serialized::defaults(AcquisitionConfig::default()));
    if let Some(path) = path {
        figment = figment.merge(Yaml::file(path));
    }
    let config: AcquisitionConfig = figment
        .merge(Env::prefixed("EVLINK_"))
        .extract()
        .context("Failed to load acquisition config")?;
    Ok(config.validated()?)
}

struct Report {
    summary: Summary,
    written: u64,
    delivered: u64,
    dropped: u64,
    geometry: (u16, u16),
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let mut config = load_config(args.config.as_deref())?;
    if config.blocking {
        // Replay polls; a blocking get would wait forever once input ends.
        debug!("Ignoring blocking mode for capture replay");
        config.blocking = false;
    }

    let reader = CaptureReader::open(&args.input, args.chunk_size)
        .with_context(|| format!("Failed to open capture {:?}", args.input))?;
    let header = reader.header().clone();

    let chip_id = args
        .chip
        .or(header.chip)
        .context("Capture header names no chip; pass --chip")?;
    let family = args
        .family
        .or(header.family)
        .unwrap_or_else(|| FamilyKind::from_chip(chip_id));

    let profile = chip::profile(chip_id);
    let sysinfo = SysInfo {
        chip_identifier: chip_id.register_value(),
        dvs_size: header.geometry.unwrap_or_else(|| profile.dvs_size()),
        aps_size: profile.aps_size(),
        ..Default::default()
    };
    let registers = Arc::new(MemoryRegisters::with_sysinfo(&sysinfo));

    info!("Replaying {:?} as {} ({})", args.input, chip_id, family);

    let progress = if args.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .context("Invalid progress template")?,
        );
        pb.set_message("Decoding...");
        pb
    };

    let start_time = Instant::now();
    let output = File::create(&args.output)
        .with_context(|| format!("Failed to create output {:?}", args.output))?;

    let report = match family {
        FamilyKind::Dvs => run::<DvsFamily>(reader, registers, &config, output, &progress)?,
        FamilyKind::Davis => run::<DavisFamily>(reader, registers, &config, output, &progress)?,
        FamilyKind::Dynapse => run::<DynapseFamily>(reader, registers, &config, output, &progress)?,
    };

    let total_duration = start_time.elapsed();
    progress.finish_with_message(format!(
        "Done! Wrote {} events in {:.2}s",
        report.written,
        total_duration.as_secs_f64()
    ));

    if report.dropped > 0 {
        warn!("{} containers were dropped because the ring buffer was full", report.dropped);
    }

    if !args.quiet {
        eprintln!();
        eprintln!("Summary:");
        eprintln!("  Input:        {:?}", args.input);
        eprintln!("  Output:       {:?}", args.output);
        eprintln!("  Sensor:       {}x{}", report.geometry.0, report.geometry.1);
        eprintln!("  Delivered:    {}", report.delivered);
        eprintln!("  Duration:     {:.3}s", total_duration.as_secs_f64());
        eprintln!();
        eprint!("{}", report.summary);
    }

    Ok(())
}

/// Feeds the capture from a producer thread and consumes on this one.
fn run<F: DeviceFamily>(
    mut reader: CaptureReader<std::io::BufReader<File>>,
    registers: Arc<MemoryRegisters>,
    config: &AcquisitionConfig,
    output: File,
    progress: &ProgressBar,
) -> Result<Report> {
    let mut device: DeviceHandle<F> =
        DeviceHandle::open(1, registers, config).context("Failed to open device")?;
    let geometry = device.info().dvs_size;

    let mut writer = CsvWriter::new(output);
    writer.write_header(Some(geometry))?;

    let mut acquisition = device.data_start()?;
    let producer = thread::spawn(move || -> Result<_> {
        while let Some(chunk) = reader.next_chunk()? {
            // Replay has no deadline, so wait for the consumer instead of dropping.
            while acquisition.is_backlogged() {
                thread::sleep(POLL_INTERVAL);
            }
            acquisition.on_bytes(chunk)?;
        }
        debug!("Capture exhausted after {} bytes", reader.bytes_read());
        Ok(acquisition.stats())
    });

    let mut summary = Summary::new();
    loop {
        match device.data_get() {
            Some(container) => {
                writer.write_container(&container)?;
                summary.add_container(&container);
                if summary.containers % 64 == 0 {
                    progress.set_message(format!(
                        "{} containers, {} events",
                        summary.containers,
                        summary.total()
                    ));
                }
            }
            None if producer.is_finished() => {
                if device.data_look().is_none() {
                    break;
                }
            }
            None => thread::sleep(POLL_INTERVAL),
        }
    }

    let stats = producer
        .join()
        .map_err(|_| anyhow::anyhow!("Producer thread panicked"))??;
    writer.flush()?;
    device.close()?;

    Ok(Report {
        written: writer.written(),
        summary,
        delivered: stats.delivered,
        dropped: stats.dropped,
        geometry,
    })
}

use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand};
use currents_core::{
    AppConfig, CaptureBackend, CaptureSession, CpalBackend, GradientSet, InterpolateMode, Pipeline,
    PipelineEvent, SerialBackend, SystemSerial,
};
use tracing_subscriber::EnvFilter;

const STEP: Duration = Duration::from_millis(100);

fn main() -> currents_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => list_devices(),
        Commands::Ports { all } => list_ports(all),
        Commands::Gradients { file, json } => list_gradients(file.as_deref(), json),
        Commands::Run(args) => run(args),
    }
}

fn list_devices() -> currents_core::Result<()> {
    let session = CaptureSession::new(CpalBackend::new());
    match session.list_devices() {
        Ok(devices) if !devices.is_empty() => {
            for device in devices {
                println!("{device}");
            }
        }
        Ok(_) => println!("no devices available"),
        Err(error) => {
            tracing::warn!(%error, "device enumeration failed");
            println!("no devices available");
        }
    }
    Ok(())
}

fn list_ports(all: bool) -> currents_core::Result<()> {
    let ports = SystemSerial { include_all: all }.ports()?;
    if ports.is_empty() {
        println!("no serial ports available");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

fn list_gradients(file: Option<&Path>, json: bool) -> currents_core::Result<()> {
    let gradients = load_gradients(file)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&gradients)?);
        return Ok(());
    }
    for name in gradients.names() {
        let stops = gradients.get(name).map_or(0, |g| g.len());
        println!("{name} ({stops} keypoints)");
    }
    Ok(())
}

/// Built-in presets, overridden by any with the same name in `file`.
fn load_gradients(file: Option<&Path>) -> currents_core::Result<GradientSet> {
    let mut gradients = GradientSet::builtin();
    if let Some(path) = file {
        let data = std::fs::read_to_string(path)?;
        gradients.merge(GradientSet::from_json(&data)?);
    }
    Ok(gradients)
}

fn run(args: RunArgs) -> currents_core::Result<()> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(port) = args.port {
        config.serial.port = Some(port);
    }
    if let Some(mode) = args.mode {
        config.extractor.interpolation = mode;
    }
    let device_name = args.device.or_else(|| config.device.clone());
    let gradient_name = args.gradient.or_else(|| config.gradient.clone());

    let mut pipeline = Pipeline::new(CpalBackend::new(), SystemSerial::new(), &config)?;

    if let Some(name) = gradient_name {
        let gradients = load_gradients(args.gradients.as_deref())?;
        let gradient = gradients
            .get(&name)
            .cloned()
            .ok_or_else(|| {
                currents_core::CurrentsError::InvalidConfig(format!("unknown gradient {name:?}"))
            })?;
        tracing::info!(
            gradient = %name,
            mode = %config.extractor.interpolation,
            "colouring through gradient"
        );
        pipeline.set_gradient(Some(gradient))?;
    }

    let device = match device_name {
        Some(name) => pipeline.find_device(&name)?,
        None => first_device(&pipeline)?,
    };

    if let Some(port) = &config.serial.port {
        // Analysis still runs without a controller attached.
        if let Err(error) = pipeline.connect(port) {
            tracing::warn!(%error, "running without serial output");
        }
    }

    pipeline.start(&device)?;
    tracing::info!(device = %device.name, "running");

    let deadline = args.seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let result = drive(&mut pipeline, deadline);
    let shutdown = pipeline.shutdown();
    result.and(shutdown)
}

fn drive<C: CaptureBackend, S: SerialBackend>(
    pipeline: &mut Pipeline<C, S>,
    deadline: Option<Instant>,
) -> currents_core::Result<()> {
    while deadline.map_or(true, |d| Instant::now() < d) {
        match pipeline.step(STEP) {
            PipelineEvent::Color(color) => tracing::debug!(%color, "colour"),
            PipelineEvent::Idle => {}
            PipelineEvent::CaptureEnded(outcome) if outcome.is_intentional() => {}
            PipelineEvent::CaptureEnded(outcome) | PipelineEvent::ExtractorEnded(outcome) => {
                return match outcome.error() {
                    Some(error) => Err(error.clone()),
                    None => Ok(()),
                };
            }
        }
    }
    Ok(())
}

fn first_device<C: CaptureBackend, S: SerialBackend>(
    pipeline: &Pipeline<C, S>,
) -> currents_core::Result<currents_core::Device> {
    pipeline
        .list_devices()?
        .into_iter()
        .next()
        .ok_or_else(|| currents_core::CurrentsError::Backend("no devices available".into()))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Turns live audio into colour for a serial lighting controller",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List audio capture devices.
    Devices,
    /// List serial ports a controller may be attached to.
    Ports {
        /// Include ports that are not USB adapters.
        #[arg(long)]
        all: bool,
    },
    /// List gradient presets.
    Gradients {
        /// JSON file of additional gradients.
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Print the gradients as JSON instead of by name.
        #[arg(long)]
        json: bool,
    },
    /// Capture audio and stream colours until stopped.
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Capture device name; defaults to the first one found.
    #[arg(short, long)]
    device: Option<String>,
    /// Serial port of the lighting controller.
    #[arg(short, long)]
    port: Option<String>,
    /// Gradient preset to colour with; plain hue when omitted.
    #[arg(short, long)]
    gradient: Option<String>,
    /// JSON file of additional gradients.
    #[arg(long)]
    gradients: Option<PathBuf>,
    /// Gradient interpolation: blended or blocky.
    #[arg(short, long)]
    mode: Option<InterpolateMode>,
    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Stop after this many seconds.
    #[arg(short, long)]
    seconds: Option<u64>,
}
